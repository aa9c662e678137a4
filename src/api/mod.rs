//! Control API: REST + WebSocket surface for operators and UIs.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::audit_log::AuditStore;
use crate::services::cost_governor::CostGovernor;
use crate::services::event_bus::EventBus;
use crate::services::orchestrator::Orchestrator;

pub mod error;
pub mod routes;
pub mod ws;

pub use error::ApiError;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<EventBus>,
    pub cost_governor: Arc<CostGovernor>,
    pub audit_store: Arc<dyn AuditStore>,
    pub api_key: Arc<str>,
    pub batch_window: Duration,
    /// Fired by `POST /shutdown`; the process main loop waits on it.
    pub shutdown_signal: Arc<Notify>,
}

/// Bearer-key authentication. Browser WebSocket clients cannot set an
/// `Authorization` header, so an `api_key` query parameter is also
/// accepted.
async fn authenticate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header_key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let query_key = request.uri().query().and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("api_key="))
    });

    let presented = header_key.or(query_key);
    if state.api_key.is_empty() || presented == Some(state.api_key.as_ref()) {
        next.run(request).await
    } else {
        ApiError::Unauthorized.into_response()
    }
}

/// Build the router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/status", get(routes::status))
        .route("/agents", get(routes::list_agents).post(routes::add_agent))
        .route("/agents/{id}/pause", post(routes::pause_agent))
        .route("/agents/{id}/resume", post(routes::resume_agent))
        .route("/agents/{id}/stop", post(routes::stop_agent))
        .route("/agents/{id}/heartbeat", post(routes::agent_heartbeat))
        .route("/projects", get(routes::list_projects).post(routes::create_project))
        .route("/events/project", post(routes::ingress_project_event))
        .route("/events/replay", get(routes::replay_events))
        .route("/audit-history", get(routes::audit_history))
        .route("/cost", get(routes::cost))
        .route("/events", get(ws::ws_events))
        .route("/shutdown", post(routes::shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

/// Bind and serve until the process shuts down.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
) -> Result<(), crate::domain::error::OrchestratorError> {
    let router = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::domain::error::OrchestratorError::Fatal(e.to_string()))?;
    tracing::info!(%addr, "control API listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| crate::domain::error::OrchestratorError::Fatal(e.to_string()))
}
