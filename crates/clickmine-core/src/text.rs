//! Scrapers for bot replies and reward pages.
//!
//! Reward bots embed the numbers we need in prose ("You earned 0.00015
//! LTC!") and reward pages embed a countdown claim token in the markup.
//! Absence of a number or token is not an error here; callers decide
//! what a missing value means for their step.

use once_cell::sync::Lazy;
use regex::Regex;

/// Countdown to wait out when a page does not declare its own timer.
const DEFAULT_CLAIM_WAIT_SECS: u64 = 10;

static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid amount regex"));

static TOKEN_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-token\s*=\s*"([^"]+)""#).expect("valid token regex"));

static TIMER_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-timer\s*=\s*"(\d+)""#).expect("valid timer regex"));

static REWARD_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href\s*=\s*"(https?://[^"]+/reward\?token=[^"]+)""#).expect("valid link regex")
});

/// First contiguous run of digits (with an optional decimal point) in
/// `text`, parsed as a float.
pub fn leading_amount(text: &str) -> Option<f64> {
    AMOUNT_RE.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Claim request scraped from a solved reward page: the URL to hit and
/// the countdown to wait out first.
///
/// Pages either link the claim endpoint outright or carry the token as
/// a `data-token` attribute, in which case the endpoint is composed
/// from the page's own origin.
pub fn claim_request(html: &str, page_url: &str) -> Option<(String, u64)> {
    let wait_secs = TIMER_ATTR_RE
        .captures(html)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(DEFAULT_CLAIM_WAIT_SECS);

    if let Some(captures) = REWARD_LINK_RE.captures(html) {
        return Some((captures[1].to_string(), wait_secs));
    }

    let token = TOKEN_ATTR_RE.captures(html)?;
    let origin = site_origin(page_url)?;
    Some((format!("{origin}/reward?token={}", &token[1]), wait_secs))
}

/// `scheme://host[:port]` prefix of a URL.
pub fn site_origin(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")?;
    let rest = &url[scheme_end + 3..];
    if rest.is_empty() {
        return None;
    }
    match rest.find('/') {
        Some(end) => Some(&url[..scheme_end + 3 + end]),
        None => Some(url),
    }
}

/// Bot handle and optional start parameter from a `t.me` deep link,
/// e.g. `https://t.me/Some_bot?start=ref123` -> `("@Some_bot", Some("ref123"))`.
pub fn bot_start_link(url: &str) -> Option<(String, Option<String>)> {
    let rest = strip_platform_prefix(url)?;
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let name = path.split('/').next().filter(|n| !n.is_empty())?;
    if name == "joinchat" || name.starts_with('+') {
        return None;
    }
    let referral = query.and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("start="))
            .map(|v| v.to_string())
    });
    Some((format!("@{name}"), referral))
}

/// Join target from a chat link. Public chats become handles; invite
/// links are opaque to us and passed through whole for the platform
/// client to interpret.
pub fn chat_target(url: &str) -> Option<String> {
    let rest = strip_platform_prefix(url)?;
    let path = rest.split('?').next().unwrap_or(rest);
    let name = path.split('/').next().filter(|n| !n.is_empty())?;
    if name == "joinchat" || name.starts_with('+') {
        return Some(url.to_string());
    }
    Some(format!("@{name}"))
}

fn strip_platform_prefix(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.strip_prefix("t.me/")
        .or_else(|| rest.strip_prefix("telegram.me/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_from_earned_message() {
        assert_eq!(leading_amount("You earned 0.00015 LTC!"), Some(0.00015));
    }

    #[test]
    fn amount_from_balance_message() {
        assert_eq!(leading_amount("Available balance: 12"), Some(12.0));
    }

    #[test]
    fn amount_absent_without_digits() {
        assert_eq!(leading_amount("no digits here"), None);
    }

    #[test]
    fn amount_takes_first_number() {
        assert_eq!(leading_amount("0.5 then 7"), Some(0.5));
    }

    #[test]
    fn claim_from_data_attributes() {
        let html = r#"<div id="headbar" data-token="abc123" data-timer="35"></div>"#;
        let (url, wait) = claim_request(html, "https://adpage.example/view/9").unwrap();
        assert_eq!(url, "https://adpage.example/reward?token=abc123");
        assert_eq!(wait, 35);
    }

    #[test]
    fn claim_prefers_explicit_reward_link() {
        let html = r#"
            <a href="https://other.example/reward?token=xyz">claim</a>
            <div data-token="abc" data-timer="5"></div>
        "#;
        let (url, wait) = claim_request(html, "https://adpage.example/view").unwrap();
        assert_eq!(url, "https://other.example/reward?token=xyz");
        assert_eq!(wait, 5);
    }

    #[test]
    fn claim_defaults_timer_when_missing() {
        let html = r#"<div data-token="abc"></div>"#;
        let (_, wait) = claim_request(html, "https://adpage.example").unwrap();
        assert_eq!(wait, DEFAULT_CLAIM_WAIT_SECS);
    }

    #[test]
    fn claim_absent_without_token() {
        assert_eq!(claim_request("<html></html>", "https://x.example"), None);
    }

    #[test]
    fn origin_strips_path() {
        assert_eq!(
            site_origin("https://host.example:8080/a/b?c=d"),
            Some("https://host.example:8080")
        );
        assert_eq!(site_origin("http://host.example"), Some("http://host.example"));
        assert_eq!(site_origin("not a url"), None);
    }

    #[test]
    fn bot_link_with_referral() {
        assert_eq!(
            bot_start_link("https://t.me/Visit_bot?start=ref42"),
            Some(("@Visit_bot".to_string(), Some("ref42".to_string())))
        );
    }

    #[test]
    fn bot_link_without_referral() {
        assert_eq!(
            bot_start_link("https://t.me/Visit_bot"),
            Some(("@Visit_bot".to_string(), None))
        );
    }

    #[test]
    fn bot_link_rejects_invites_and_foreign_urls() {
        assert_eq!(bot_start_link("https://t.me/joinchat/AAAA"), None);
        assert_eq!(bot_start_link("https://example.com/bot"), None);
    }

    #[test]
    fn chat_target_public_channel() {
        assert_eq!(
            chat_target("https://t.me/crypto_news"),
            Some("@crypto_news".to_string())
        );
    }

    #[test]
    fn chat_target_invite_link_passes_through() {
        let url = "https://t.me/joinchat/AbCdEf";
        assert_eq!(chat_target(url), Some(url.to_string()));
        let plus = "https://t.me/+AbCdEf";
        assert_eq!(chat_target(plus), Some(plus.to_string()));
    }
}
