use axum::{
    routing::{get, post},
    Router,
};

pub mod roadmaps;
pub mod system;
pub mod workers;

/// Endpoints for signed-in users (bearer token).
pub fn user_router() -> Router {
    Router::new().nest("/api/roadmaps", roadmaps::router())
}

/// Endpoints for the push worker trigger (worker secret).
pub fn worker_router() -> Router {
    Router::new()
        .route("/api/workers/generate-roadmap", post(workers::generate_roadmap))
        .route("/api/workers/stats", get(workers::stats))
}

/// Endpoints for the external scheduler (cron secret).
pub fn cron_router() -> Router {
    Router::new().route("/api/cron/process-roadmaps", post(workers::process_roadmaps))
}
