use serde::{Deserialize, Serialize};

use skillpath_core::{JobId, OwnerKey};
use skillpath_infra::jobs::{JobStats, JobStatus, SubmitOutcome, WorkerStats};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitRoadmapRequest {
    /// Missing is treated as blank so it fails topic validation.
    #[serde(default)]
    pub skill: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Accepted,
    AlreadyInProgress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRoadmapResponse {
    pub status: SubmitStatus,
    pub message: &'static str,
    pub job_id: JobId,
    pub owner_key: OwnerKey,
    pub job_status: JobStatus,
}

impl From<SubmitOutcome> for SubmitRoadmapResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        let (status, message, job) = match outcome {
            SubmitOutcome::Accepted(job) => (
                SubmitStatus::Accepted,
                "Roadmap generation started. Check back shortly.",
                job,
            ),
            SubmitOutcome::AlreadyInProgress(job) => (
                SubmitStatus::AlreadyInProgress,
                "A roadmap for this skill is already being generated.",
                job,
            ),
        };
        Self {
            status,
            message,
            job_id: job.id,
            owner_key: job.owner_key,
            job_status: job.status,
        }
    }
}

/// Answer of the worker and scheduler triggers.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerResponse {
    /// Push trigger: the cycle runs after the response is sent.
    Accepted,
    Claimed {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    NoPendingRequests,
    Busy,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub jobs: JobStats,
    pub worker: WorkerStats,
}
