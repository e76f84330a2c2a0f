//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use seopilot_core::{GatewayConfig, Result};
use seopilot_pool::{AgentPool, ApprovalGate};
use seopilot_scheduler::JobScheduler;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AgentPool>,
    pub gate: Arc<ApprovalGate>,
    pub scheduler: Arc<JobScheduler>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(pool: Arc<AgentPool>, gate: Arc<ApprovalGate>, scheduler: Arc<JobScheduler>) -> Self {
        Self {
            pool,
            gate,
            scheduler,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/tasks", post(super::routes::create_task))
        .route("/api/tasks", get(super::routes::list_tasks))
        .route("/api/tasks/{id}", get(super::routes::get_task))
        .route("/api/tasks/{id}", delete(super::routes::cancel_task))
        .route("/api/tasks/{id}/approve", post(super::routes::approve_task))
        .route("/api/tasks/{id}/reject", post(super::routes::reject_task))
        .route("/api/pool/stats", get(super::routes::pool_stats))
        .route("/api/scheduler/status", get(super::routes::scheduler_status))
        .route(
            "/api/scheduler/control",
            post(super::routes::scheduler_control),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(shared)
}

/// Bind and serve until the process is stopped.
pub async fn serve(cfg: &GatewayConfig, state: AppState) -> Result<()> {
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on http://{addr}");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
