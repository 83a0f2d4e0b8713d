//! # ClickMine Solver
//!
//! Client for a FlareSolverr-compatible bypass service. Reward pages
//! sit behind anti-automation challenges; fetching them through a named
//! solver session returns the solved page plus the user agent to replay
//! on direct follow-up requests (the reward claim itself).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use clickmine_core::config::SolverConfig;
use clickmine_core::{MinerError, Result};

/// A solved page.
#[derive(Debug, Clone, Deserialize)]
pub struct Solution {
    /// Effective URL after any challenge redirects.
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Page body.
    pub response: String,
    /// User agent the solver browsed with; replayed on direct requests
    /// so they look like the same visitor.
    #[serde(default, rename = "userAgent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize)]
struct SolverReply {
    status: String,
    #[serde(default)]
    message: String,
    solution: Option<Solution>,
}

pub struct SolverClient {
    http: reqwest::Client,
    base_url: String,
    session: String,
}

impl SolverClient {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            session: config.session.clone(),
        }
    }

    /// Create the named solver session. An already existing session is
    /// not an error.
    pub async fn create_session(&self) -> Result<()> {
        let reply = self
            .post(json!({ "cmd": "sessions.create", "session": self.session }))
            .await?;
        if reply.status != "ok" && !reply.message.contains("already exists") {
            return Err(MinerError::Solver(format!(
                "session create failed: {}",
                reply.message
            )));
        }
        tracing::debug!("solver session '{}' ready", self.session);
        Ok(())
    }

    /// Fetch `url` through the bypass. A lost session is recreated and
    /// the request retried once; any further failure is surfaced.
    pub async fn get(&self, url: &str) -> Result<Solution> {
        match self.request_get(url).await {
            Err(MinerError::Solver(message)) if session_missing(&message) => {
                tracing::warn!("solver session lost, recreating and retrying once");
                self.create_session().await?;
                self.request_get(url).await
            }
            other => other,
        }
    }

    async fn request_get(&self, url: &str) -> Result<Solution> {
        let reply = self
            .post(json!({ "cmd": "request.get", "session": self.session, "url": url }))
            .await?;
        if reply.status != "ok" {
            return Err(MinerError::Solver(reply.message));
        }
        reply
            .solution
            .ok_or_else(|| MinerError::Solver("solver reply carried no solution".to_string()))
    }

    async fn post(&self, body: serde_json::Value) -> Result<SolverReply> {
        let response = self
            .http
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MinerError::Solver(format!("solver request failed: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| MinerError::Solver(format!("invalid solver reply: {e}")))
    }

    /// Direct GET outside the solver, replaying its user agent. Used to
    /// submit reward claims after the page itself was solved.
    pub async fn direct_get(&self, url: &str, user_agent: &str) -> Result<String> {
        let mut request = self.http.get(url);
        if !user_agent.is_empty() {
            request = request.header(reqwest::header::USER_AGENT, user_agent);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MinerError::Solver(format!("claim request failed: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| MinerError::Solver(format!("claim response unreadable: {e}")))
    }
}

/// Does this solver error mean the named session is gone?
fn session_missing(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("session")
        && (message.contains("does not exist")
            || message.contains("doesn't exist")
            || message.contains("not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_missing_detection() {
        assert!(session_missing("The session MinerSession does not exist."));
        assert!(session_missing("session not found"));
        assert!(!session_missing("timeout solving challenge"));
        assert!(!session_missing("page does not exist"));
    }

    #[test]
    fn solver_reply_decodes() {
        let reply: SolverReply = serde_json::from_str(
            r#"{
                "status": "ok",
                "message": "",
                "solution": {
                    "url": "https://adpage.example/view/9",
                    "status": 200,
                    "headers": {"content-type": "text/html"},
                    "response": "<html></html>",
                    "userAgent": "Mozilla/5.0"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(reply.status, "ok");
        let solution = reply.solution.unwrap();
        assert_eq!(solution.status, 200);
        assert_eq!(solution.user_agent, "Mozilla/5.0");
    }

    #[test]
    fn solver_error_reply_decodes_without_solution() {
        let reply: SolverReply = serde_json::from_str(
            r#"{"status": "error", "message": "The session does not exist."}"#,
        )
        .unwrap();
        assert_eq!(reply.status, "error");
        assert!(reply.solution.is_none());
        assert!(session_missing(&reply.message));
    }
}
