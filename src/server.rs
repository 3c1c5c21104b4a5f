use std::sync::Arc;

use axum::{routing::post, Router};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::queue::TaskQueue;
use crate::workflow::{ReviewCycleOrchestrator, WorkflowContext};

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: ReviewCycleOrchestrator,
    pub task_queue: RwLock<TaskQueue>,
}

impl AppState {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self {
            config: Arc::clone(&ctx.config),
            orchestrator: ReviewCycleOrchestrator::new(ctx),
            task_queue: RwLock::new(TaskQueue::new()),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/github", post(crate::webhook::handler::handle_webhook))
        .route("/health", axum::routing::get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
