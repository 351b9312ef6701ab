//! `TetherServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tether_core::ids;
use tether_events::EventRouter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::WsConnection;
use crate::websocket::lifecycle::{
    LifecycleFunnel, LifecycleHooks, NoopHooks, UpgradeRejection, UpgradeRequest,
};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionDeps, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    session: SessionDeps,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// WebSocket front end for an [`EventRouter`].
pub struct TetherServer {
    config: Arc<ServerConfig>,
    router: EventRouter,
    funnel: Arc<LifecycleFunnel>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl TetherServer {
    /// Server with no lifecycle hooks and no `/metrics` output.
    pub fn new(config: ServerConfig, router: EventRouter) -> Self {
        Self::with_hooks(config, router, Arc::new(NoopHooks))
    }

    /// Server whose connections pass through `hooks`.
    pub fn with_hooks(
        config: ServerConfig,
        router: EventRouter,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_capacity(config.max_connections));
        let funnel = Arc::new(LifecycleFunnel::new(hooks, Arc::clone(&registry)));
        Self {
            config: Arc::new(config),
            router,
            funnel,
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: SessionDeps {
                router: self.router.clone(),
                funnel: Arc::clone(&self.funnel),
                config: Arc::clone(&self.config),
            },
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task,
    /// which finishes once [`shutdown`](Self::shutdown) is triggered and
    /// open sessions have ended.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = serve.await {
                warn!(error = %err, "server exited with error");
            }
        });
        info!(%addr, "tether server listening");
        Ok((addr, handle))
    }

    /// The event router behind `/ws`.
    pub fn events(&self) -> &EventRouter {
        &self.router
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl IntoResponse for UpgradeRejection {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::AtCapacity { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                tether_core::ErrorBody {
                    code: "AT_CAPACITY".into(),
                    message: self.to_string(),
                },
            ),
            Self::Refused(err) => (StatusCode::FORBIDDEN, err.to_error_body()),
        };
        (status, Json(body)).into_response()
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let request = UpgradeRequest {
        path: uri.path().to_owned(),
        query: uri.query().map(str::to_owned),
        headers,
    };
    if let Err(rejection) = state.session.funnel.pre_upgrade(&request).await {
        return rejection.into_response();
    }

    let config = Arc::clone(&state.session.config);
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| {
            let (tx, rx) = mpsc::channel(config.send_queue_capacity.max(1));
            let conn = Arc::new(WsConnection::new(
                ids::new_connection_id(),
                tx,
                &state.shutdown.token(),
            ));
            run_ws_session(socket, conn, rx, state.session)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.session.funnel.registry().count(),
        state.session.router.namespace_names().len(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> TetherServer {
        TetherServer::new(ServerConfig::default(), EventRouter::new())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let server = make_server();
        let _ = server.events().namespace("room");
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["namespaces"], 1);
    }

    #[tokio::test]
    async fn health_reports_draining_after_shutdown() {
        let server = make_server();
        server.shutdown().shutdown();
        let (_, body) = get_json(server.router(), "/health").await;
        assert_eq!(body["status"], "draining");
    }

    #[tokio::test]
    async fn metrics_endpoint_without_handle_is_not_found() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_handle() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = make_server().with_metrics(handle);
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_not_an_upgrade() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/ws").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn rejection_maps_to_status() {
        let busy = UpgradeRejection::AtCapacity { max: 1 }.into_response();
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
        let refused =
            UpgradeRejection::Refused(tether_core::EventError::unauthorized("no")).into_response();
        assert_eq!(refused.status(), StatusCode::FORBIDDEN);
    }
}
