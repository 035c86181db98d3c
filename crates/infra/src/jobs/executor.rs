//! Runs one claimed job to a terminal status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use skillpath_ai::{GenerationClient, GenerationError, LearningPlan};
use skillpath_core::JobId;

use super::store::{JobStore, JobStoreError};
use super::types::{JobRecord, JobStatus, ResultRecord};

/// Default bound on a single generation call.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// What happened to a job handed to [`JobExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Result stored, job COMPLETED.
    Completed { job: JobRecord, weeks: usize },
    /// Job FAILED with a recorded reason; no result written.
    Failed { job: JobRecord, reason: String },
    /// The job was not PROCESSING; nothing was touched.
    Rejected { job_id: JobId, status: JobStatus },
    /// The final status could not be written. The job stays PROCESSING.
    Abandoned { job_id: JobId, error: JobStoreError },
}

impl JobOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            JobOutcome::Completed { job, .. } | JobOutcome::Failed { job, .. } => job.id,
            JobOutcome::Rejected { job_id, .. } | JobOutcome::Abandoned { job_id, .. } => *job_id,
        }
    }
}

/// `"<kind>: <detail>"`, the text stored in a FAILED job's `error` column.
pub fn failure_reason(err: &GenerationError) -> String {
    match err {
        GenerationError::Timeout(limit) => {
            format!("{}: no response within {}s", err.kind(), limit.as_secs())
        }
        GenerationError::MalformedOutput(detail) | GenerationError::Upstream(detail) => {
            format!("{}: {detail}", err.kind())
        }
    }
}

/// Calls the generation client for a claimed job and records the outcome.
pub struct JobExecutor<S> {
    store: S,
    client: Arc<dyn GenerationClient>,
    timeout: Duration,
}

impl<S: JobStore> JobExecutor<S> {
    pub fn new(store: S, client: Arc<dyn GenerationClient>) -> Self {
        Self {
            store,
            client,
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip_all, fields(job_id = %job.id, owner_key = %job.owner_key, client = self.client.name()))]
    pub async fn execute(&self, job: JobRecord) -> JobOutcome {
        if job.status != JobStatus::Processing {
            warn!(status = %job.status, "refusing to execute a job that was not claimed");
            return JobOutcome::Rejected {
                job_id: job.id,
                status: job.status,
            };
        }

        match self.generate(&job).await {
            Ok(plan) => self.complete(job, plan).await,
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "generation failed");
                self.fail(job, failure_reason(&err)).await
            }
        }
    }

    async fn generate(&self, job: &JobRecord) -> Result<LearningPlan, GenerationError> {
        let plan = tokio::time::timeout(self.timeout, self.client.generate(&job.topic))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;

        // Clients are expected to validate, but the stored result must hold
        // whatever the client is.
        plan.validate()?;
        Ok(plan)
    }

    async fn complete(&self, job: JobRecord, plan: LearningPlan) -> JobOutcome {
        let weeks = plan.len();
        let result = ResultRecord::for_job(&job, plan, Utc::now());

        if let Err(e) = self.store.upsert_result(&result).await {
            error!(error = %e, "failed to store result");
            return self.fail(job, format!("storage_error: {e}")).await;
        }

        match self.store.mark_completed(job.id, Utc::now()).await {
            Ok(job) => {
                info!(weeks, "job completed");
                JobOutcome::Completed { job, weeks }
            }
            Err(error) => {
                error!(%error, "failed to mark job completed");
                JobOutcome::Abandoned {
                    job_id: job.id,
                    error,
                }
            }
        }
    }

    async fn fail(&self, job: JobRecord, reason: String) -> JobOutcome {
        match self.store.mark_failed(job.id, &reason, Utc::now()).await {
            Ok(job) => {
                info!(%reason, "job failed");
                JobOutcome::Failed { job, reason }
            }
            Err(error) => {
                error!(%error, %reason, "failed to mark job failed");
                JobOutcome::Abandoned {
                    job_id: job.id,
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use skillpath_ai::{StubGenerationClient, WeekUnit};
    use skillpath_core::{Identity, Topic};

    use super::*;
    use crate::jobs::InMemoryJobStore;

    /// Returns a canned answer regardless of topic.
    struct ScriptedGenerationClient(Result<Vec<WeekUnit>, GenerationError>);

    #[async_trait]
    impl GenerationClient for ScriptedGenerationClient {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(&self, _topic: &Topic) -> Result<LearningPlan, GenerationError> {
            // Skip LearningPlan::new so invalid shapes reach the executor.
            let weeks = self.0.clone()?;
            Ok(serde_json::from_value(serde_json::to_value(weeks).unwrap()).unwrap())
        }
    }

    async fn claimed_job(store: &Arc<InMemoryJobStore>) -> JobRecord {
        let job = JobRecord::pending(
            Identity::new("U").unwrap(),
            Topic::parse("Rust").unwrap(),
            Utc::now(),
        );
        store.insert(&job).await.unwrap();
        store.claim_next(Utc::now()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn success_stores_result_and_completes() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let executor = JobExecutor::new(store.clone(), Arc::new(StubGenerationClient::new()));

        let outcome = executor.execute(job.clone()).await;
        assert!(matches!(outcome, JobOutcome::Completed { weeks: 8, .. }));

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.completed_at.is_some());

        let result = store.get_result(&job.owner_key).await.unwrap().unwrap();
        assert_eq!(result.weeks.len(), 8);
        assert_eq!(result.identity.as_str(), "U");
        assert_eq!(result.topic.as_str(), "Rust");
    }

    #[tokio::test]
    async fn malformed_output_fails_without_result() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let client = ScriptedGenerationClient(Err(GenerationError::malformed("expected a JSON array")));
        let executor = JobExecutor::new(store.clone(), Arc::new(client));

        let outcome = executor.execute(job.clone()).await;
        match outcome {
            JobOutcome::Failed { reason, .. } => {
                assert_eq!(reason, "malformed_output: expected a JSON array");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().starts_with("malformed_output"));
        assert!(store.get_result(&job.owner_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_plan_shape_is_malformed() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let client = ScriptedGenerationClient(Ok(vec![
            WeekUnit::new(2, "b", "d"),
            WeekUnit::new(1, "a", "d"),
        ]));
        let executor = JobExecutor::new(store.clone(), Arc::new(client));

        let outcome = executor.execute(job.clone()).await;
        assert!(matches!(outcome, JobOutcome::Failed { ref reason, .. } if reason.starts_with("malformed_output")));
        assert!(store.get_result(&job.owner_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gapped_weeks_fail_without_result() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let client = ScriptedGenerationClient(Ok(vec![
            WeekUnit::new(3, "a", "d"),
            WeekUnit::new(7, "b", "d"),
        ]));
        let executor = JobExecutor::new(store.clone(), Arc::new(client));

        let outcome = executor.execute(job.clone()).await;
        assert!(matches!(outcome, JobOutcome::Failed { ref reason, .. } if reason.starts_with("malformed_output")));

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(store.get_result(&job.owner_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_result_reads_are_stable() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let executor = JobExecutor::new(store.clone(), Arc::new(StubGenerationClient::new()));
        executor.execute(job.clone()).await;

        let first = store.get_result(&job.owner_key).await.unwrap().unwrap();
        let second = store.get_result(&job.owner_key).await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn upstream_error_is_classified() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let client = ScriptedGenerationClient(Err(GenerationError::upstream("gemini returned 503")));
        let executor = JobExecutor::new(store.clone(), Arc::new(client));

        executor.execute(job.clone()).await;
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("upstream_error: gemini returned 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_client_times_out() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let client = StubGenerationClient::new().with_delay(Duration::from_secs(120));
        let executor = JobExecutor::new(store.clone(), Arc::new(client)).with_timeout(Duration::from_secs(60));

        let outcome = executor.execute(job.clone()).await;
        match outcome {
            JobOutcome::Failed { reason, .. } => assert_eq!(reason, "timeout: no response within 60s"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.get_result(&job.owner_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unclaimed_job_is_rejected_untouched() {
        let store = InMemoryJobStore::arc();
        let job = JobRecord::pending(
            Identity::new("U").unwrap(),
            Topic::parse("Rust").unwrap(),
            Utc::now(),
        );
        store.insert(&job).await.unwrap();
        let executor = JobExecutor::new(store.clone(), Arc::new(StubGenerationClient::new()));

        let outcome = executor.execute(job.clone()).await;
        assert_eq!(
            outcome,
            JobOutcome::Rejected {
                job_id: job.id,
                status: JobStatus::Pending
            }
        );
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Pending);
        assert!(store.get_result(&job.owner_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lost_store_leaves_job_processing() {
        let store = InMemoryJobStore::arc();
        let job = claimed_job(&store).await;
        let executor = JobExecutor::new(store.clone(), Arc::new(StubGenerationClient::new()));

        store.set_unavailable(true);
        let outcome = executor.execute(job.clone()).await;
        assert!(matches!(outcome, JobOutcome::Abandoned { .. }));

        store.set_unavailable(false);
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Processing);
    }
}
