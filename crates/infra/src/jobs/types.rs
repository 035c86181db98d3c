//! Job records, statuses and stored results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skillpath_ai::LearningPlan;
use skillpath_core::{Identity, JobId, OwnerKey, Topic};

use super::store::JobStoreError;

/// Lifecycle of a generation job.
///
/// `Pending -> Processing -> Completed | Failed`. Nothing else is legal and
/// the two terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Pending or processing: the owner key is taken.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(JobStoreError::Corrupt(format!("unknown job status '{other}'"))),
        }
    }
}

/// One request to generate a plan for `(identity, topic)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub owner_key: OwnerKey,
    pub identity: Identity,
    pub topic: Topic,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn pending(identity: Identity, topic: Topic, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            owner_key: OwnerKey::new(&identity, &topic),
            identity,
            topic,
            status: JobStatus::Pending,
            created_at: now,
            processed_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobStoreError> {
        if !self.status.can_transition_to(next) {
            return Err(JobStoreError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        self.transition(JobStatus::Processing)?;
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(now);
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(now);
        self.error = Some(error.into());
        Ok(())
    }
}

/// Generated plan stored per owner key. Later completions overwrite earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub owner_key: OwnerKey,
    pub identity: Identity,
    pub topic: Topic,
    pub weeks: LearningPlan,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn for_job(job: &JobRecord, weeks: LearningPlan, now: DateTime<Utc>) -> Self {
        Self {
            owner_key: job.owner_key.clone(),
            identity: job.identity.clone(),
            topic: job.topic.clone(),
            weeks,
            created_at: now,
        }
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}
