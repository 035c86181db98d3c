use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use skillpath_infra::dispatch::JobSignal;
use skillpath_infra::jobs::{CycleOutcome, JobStore, TriggerSource};

use crate::app::dto::{StatsResponse, TriggerResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// Push trigger. Answers at once; the claim cycle runs afterwards.
pub async fn generate_roadmap(
    Extension(services): Extension<Arc<AppServices>>,
    body: Option<Json<JobSignal>>,
) -> Response {
    let signal = body.map(|Json(s)| s).unwrap_or_default();
    let runner = services.runner();

    tokio::spawn(async move {
        if let Err(e) = runner.run_cycle(TriggerSource::Push).await {
            warn!(job_id = ?signal.job_id, error = %e, "pushed claim cycle failed");
        }
    });

    (StatusCode::ACCEPTED, Json(TriggerResponse::Accepted)).into_response()
}

/// Scheduler trigger: one claim, reported synchronously.
pub async fn process_roadmaps(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let outcome = services.runner().run_cycle(TriggerSource::Scheduler).await?;

    Ok(Json(match outcome {
        CycleOutcome::Claimed(job_id) => TriggerResponse::Claimed { job_id },
        CycleOutcome::Idle => TriggerResponse::NoPendingRequests,
        CycleOutcome::Busy => TriggerResponse::Busy,
    }))
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        jobs: services.store.stats().await?,
        worker: services.worker.stats(),
    }))
}
