//! `ParleyServer`: Axum HTTP + WebSocket server.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use parley_history::HistoryStore;
use parley_sessions::SessionRegistry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{PumpConfig, ServerConfig};
use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::http::{upgrade, users};
use crate::hub::{HubConfig, HubHandle, spawn_hub};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::ConnectionContext;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Accounts, logins, and tokens.
    pub sessions: Arc<SessionRegistry>,
    /// Broadcast hub.
    pub hub: HubHandle,
    /// Message history.
    pub history: Arc<dyn HistoryStore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Pump timings.
    pub pumps: PumpConfig,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Per-connection view of the state.
    pub fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            hub: self.hub.clone(),
            history: self.history.clone(),
            sessions: self.sessions.clone(),
            pumps: self.pumps.clone(),
            queue_capacity: self.config.queue_capacity,
            replay_len: self.config.replay_len,
            shutdown: self.shutdown.token(),
        }
    }
}

/// The chat server.
pub struct ParleyServer {
    config: Arc<ServerConfig>,
    pumps: PumpConfig,
    sessions: Arc<SessionRegistry>,
    history: Arc<dyn HistoryStore>,
    hub: HubHandle,
    hub_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ParleyServer {
    /// Create a server and start its hub. Must be called inside a Tokio
    /// runtime.
    pub fn new(
        config: ServerConfig,
        pumps: PumpConfig,
        sessions: Arc<SessionRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let hub_config = HubConfig {
            command_capacity: config.hub_command_capacity,
            shutdown_grace: config.shutdown_grace,
        };
        let (hub, hub_task) = spawn_hub(&hub_config, shutdown.token());
        Self {
            config: Arc::new(config),
            pumps,
            sessions,
            history,
            hub,
            hub_task: Mutex::new(Some(hub_task)),
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: self.sessions.clone(),
            hub: self.hub.clone(),
            history: self.history.clone(),
            config: self.config.clone(),
            pumps: self.pumps.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/user", post(users::create_user))
            .route("/user/login", post(users::login))
            .route("/users", get(users::active_users))
            .route("/ws", get(upgrade::ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "parley listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Stop accepting work, let connections wind down, stop the hub, and
    /// close history. Safe to call more than once.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.shutdown();
        let task = self.hub_task.lock().take();
        if let Some(task) = task {
            let deadline = self.config.shutdown_grace + Duration::from_secs(1);
            if !self.shutdown.drain(task, deadline).await {
                warn!("hub did not stop in time");
            }
        }
        self.history.close();
    }

    /// Hub handle.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let participants = state.hub.active_users().await.map_or(0, |users| users.len());
    Json(health::health_check(
        state.start_time,
        participants,
        state.hub.state(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    ApiError::Internal.into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use parley_history::MemoryHistory;
    use parley_settings::AuthSettings;
    use tower::ServiceExt;

    use super::*;

    fn make_server() -> ParleyServer {
        ParleyServer::new(
            ServerConfig::default(),
            PumpConfig::default(),
            Arc::new(SessionRegistry::new(&AuthSettings::default())),
            Arc::new(MemoryHistory::new(100)),
        )
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    const ALICE: &str = r#"{"userName":"alice","password":"password1"}"#;

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert!(!server.shutdown_coordinator().is_shutting_down());
    }

    #[tokio::test]
    async fn create_user_returns_name_and_id() {
        let app = make_server().router();
        let resp = app.oneshot(json_request("POST", "/user", ALICE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(parsed["userName"], "alice");
        assert!(parsed["id"].is_string());
    }

    #[tokio::test]
    async fn duplicate_user_conflicts() {
        let app = make_server().router();
        let _ = app.clone().oneshot(json_request("POST", "/user", ALICE)).await.unwrap();
        let resp = app.oneshot(json_request("POST", "/user", ALICE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_string(resp).await, "user already registered");
    }

    #[tokio::test]
    async fn short_credentials_rejected() {
        let app = make_server().router();
        let resp = app
            .oneshot(json_request("POST", "/user", r#"{"userName":"al","password":"password1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_rejected() {
        let app = make_server().router();
        let resp = app.oneshot(json_request("POST", "/user", "{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_sets_headers_and_url() {
        let app = make_server().router();
        let _ = app.clone().oneshot(json_request("POST", "/user", ALICE)).await.unwrap();

        let mut req = json_request("POST", "/user/login", ALICE);
        let _ = req
            .headers_mut()
            .insert("host", "chat.local:8080".parse().unwrap());
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-rate-limit"], "100");
        let expires = resp.headers()["x-expires-after"].to_str().unwrap().to_string();
        assert!(chrono::DateTime::parse_from_rfc3339(&expires).is_ok());

        let parsed: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        let url = parsed["url"].as_str().unwrap();
        assert!(url.starts_with("ws://chat.local:8080/ws?token="), "{url}");
    }

    #[tokio::test]
    async fn second_login_conflicts() {
        let app = make_server().router();
        let _ = app.clone().oneshot(json_request("POST", "/user", ALICE)).await.unwrap();
        let _ = app.clone().oneshot(json_request("POST", "/user/login", ALICE)).await.unwrap();
        let resp = app.oneshot(json_request("POST", "/user/login", ALICE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_string(resp).await, "user already logged in");
    }

    #[tokio::test]
    async fn wrong_password_unauthorized() {
        let app = make_server().router();
        let _ = app.clone().oneshot(json_request("POST", "/user", ALICE)).await.unwrap();
        let resp = app
            .oneshot(json_request("POST", "/user/login", r#"{"userName":"alice","password":"wrongpass"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(resp).await, "invalid username or password");
    }

    #[tokio::test]
    async fn ws_without_token_is_bad_request() {
        let app = make_server().router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn plain_get_does_not_burn_token() {
        let server = make_server();
        let app = server.router();
        let _ = app.clone().oneshot(json_request("POST", "/user", ALICE)).await.unwrap();
        let resp = app.clone().oneshot(json_request("POST", "/user/login", ALICE)).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        let token = parsed["url"]
            .as_str()
            .and_then(|u| u.split("token=").nth(1))
            .unwrap()
            .to_string();

        let req = Request::builder()
            .uri(format!("/ws?token={token}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert!(server.sessions().consume_token(&token).is_ok());
    }

    #[tokio::test]
    async fn users_starts_empty() {
        let app = make_server().router();
        let req = Request::builder().uri("/users").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, r#"{"activeUsers":[]}"#);
    }

    #[tokio::test]
    async fn health_reports_hub_state() {
        let app = make_server().router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["participants"], 0);
        assert_eq!(parsed["hubState"], "running");
    }

    #[tokio::test]
    async fn metrics_absent_without_recorder() {
        let app = make_server().router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shutdown_stops_hub_and_closes_history() {
        let history = Arc::new(MemoryHistory::new(10));
        let server = ParleyServer::new(
            ServerConfig::default(),
            PumpConfig::default(),
            Arc::new(SessionRegistry::new(&AuthSettings::default())),
            history.clone(),
        );
        server.shutdown().await;
        assert_eq!(server.hub().state(), crate::hub::HubState::Stopped);
        assert!(history.tail(1).is_err());

        // idempotent
        server.shutdown().await;
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);

        server.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
