//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use clickmine_core::config::GatewayConfig;
use clickmine_core::error::Result;
use clickmine_core::observe::EventSink;
use clickmine_engine::MinerFleet;

/// Shared state for the gateway server.
pub struct AppState {
    pub config: GatewayConfig,
    pub fleet: Arc<MinerFleet>,
    pub sink: Arc<EventSink>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig, fleet: Arc<MinerFleet>, sink: Arc<EventSink>) -> Self {
        Self { config, fleet, sink, started_at: Instant::now() }
    }
}

/// Access-token middleware: validates the X-Access-Token header or a
/// ?token= query parameter. An empty configured token disables auth.
async fn require_token(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let expected = &state.config.access_token;
    if expected.is_empty() {
        return next.run(req).await;
    }

    let from_header = req
        .headers()
        .get("X-Access-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if token == expected {
                    return next.run(req).await;
                }
            }
        }
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": "invalid or missing access token"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    // Protected routes require a valid access token.
    let protected = Router::new()
        .route("/api/miners", get(super::routes::list_miners))
        .route("/api/miners/control", post(super::routes::control_miners))
        .route("/api/logs", get(super::routes::logs))
        .route_layer(axum::middleware::from_fn_with_state(shared.clone(), require_token));

    // The websocket authenticates itself with a join frame instead.
    let public = Router::new()
        .route("/health", get(super::routes::health))
        .route("/api/ws", get(super::ws::ws_handler));

    protected
        .merge(public)
        .layer(cors_layer(&shared.config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));
    if origin.is_empty() {
        return cors.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => cors.allow_origin(value),
        Err(_) => {
            tracing::warn!(origin, "invalid CORS origin in config, allowing any");
            cors.allow_origin(Any)
        }
    }
}

/// Start the HTTP server.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 control plane listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use clickmine_core::config::MinerConfig;
    use clickmine_solver::SolverClient;
    use clickmine_store::Store;
    use tower::ServiceExt;

    fn router(access_token: &str) -> Router {
        let config = MinerConfig::default();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sink = Arc::new(EventSink::new(16));
        let fleet = Arc::new(MinerFleet::new(
            config.clone(),
            store,
            Arc::new(SolverClient::new(&config.solver)),
            sink.clone(),
        ));
        let mut gateway = config.gateway;
        gateway.access_token = access_token.to_string();
        build_router(Arc::new(AppState::new(gateway, fleet, sink)))
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = router("secret")
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_requires_the_token() {
        let app = router("secret");
        let denied = app
            .clone()
            .oneshot(Request::builder().uri("/api/miners").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let by_header = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/miners")
                    .header("X-Access-Token", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(by_header.status(), StatusCode::OK);

        let by_query = app
            .oneshot(
                Request::builder()
                    .uri("/api/miners?token=secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(by_query.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_token_disables_auth() {
        let response = router("")
            .oneshot(Request::builder().uri("/api/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn control_reports_how_many_miners_were_reached() {
        let response = router("")
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/miners/control")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"start":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        // No accounts in the fleet, so no miner is reached.
        assert_eq!(body["reached"], 0);
    }
}
