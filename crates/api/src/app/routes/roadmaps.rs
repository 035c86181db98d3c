use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use skillpath_core::{OwnerKey, Topic};
use skillpath_infra::jobs::JobStore;

use crate::app::dto::{SubmitRoadmapRequest, SubmitRoadmapResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::IdentityContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_roadmap))
        .route("/:topic", get(get_roadmap))
        .route("/:topic/status", get(get_roadmap_status))
}

pub async fn submit_roadmap(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    body: Result<Json<SubmitRoadmapRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let outcome = services.submitter.submit(caller.identity(), &body.skill).await?;

    let status = if outcome.is_accepted() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(SubmitRoadmapResponse::from(outcome))).into_response())
}

fn owner_key(caller: &IdentityContext, raw_topic: &str) -> Result<OwnerKey, ApiError> {
    let topic = Topic::parse(raw_topic)?;
    Ok(OwnerKey::new(caller.identity(), &topic))
}

pub async fn get_roadmap(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(topic): Path<String>,
) -> Result<Response, ApiError> {
    let key = owner_key(&caller, &topic)?;

    match services.store.get_result(&key).await? {
        Some(result) => Ok(Json(result).into_response()),
        None => Err(ApiError::not_found("no roadmap for this skill yet")),
    }
}

pub async fn get_roadmap_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<IdentityContext>,
    Path(topic): Path<String>,
) -> Result<Response, ApiError> {
    let key = owner_key(&caller, &topic)?;

    match services.store.latest_for_owner(&key).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Err(ApiError::not_found("no request for this skill")),
    }
}
