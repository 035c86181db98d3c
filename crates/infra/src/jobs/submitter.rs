//! Request intake: validate, dedupe, persist, signal.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use skillpath_core::{DomainError, Identity, OwnerKey, Topic};

use crate::dispatch::{Dispatcher, JobSignal};

use super::store::{JobStore, JobStoreError};
use super::types::JobRecord;

const INSERT_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new PENDING job was created.
    Accepted(JobRecord),
    /// An active job for the same owner key already exists; nothing was written.
    AlreadyInProgress(JobRecord),
}

impl SubmitOutcome {
    pub fn job(&self) -> &JobRecord {
        match self {
            SubmitOutcome::Accepted(job) | SubmitOutcome::AlreadyInProgress(job) => job,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("job store unavailable: {0}")]
    StorageUnavailable(JobStoreError),

    /// Every insert lost a race, yet no active job was visible afterwards.
    #[error("owner key {0} is contended, retry shortly")]
    Contended(OwnerKey),
}

/// Accepts generation requests.
///
/// At most one active job exists per owner key. The check-then-insert here is
/// backed by the store's own uniqueness guarantee, so two racing submissions
/// still end with one job.
pub struct RequestSubmitter<S> {
    store: S,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<S: JobStore> RequestSubmitter<S> {
    pub fn new(store: S, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn submit(&self, identity: &Identity, raw_topic: &str) -> Result<SubmitOutcome, SubmitError> {
        let topic = Topic::parse(raw_topic)?;
        let job = JobRecord::pending(identity.clone(), topic, Utc::now());

        // A lost race against a job that finished in between frees the key,
        // so one retry is enough.
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(existing) = self.active(&job.owner_key).await? {
                return Ok(SubmitOutcome::AlreadyInProgress(existing));
            }

            match self.store.insert(&job).await {
                Ok(()) => {
                    info!(owner_key = %job.owner_key, job_id = %job.id, "generation request accepted");
                    self.dispatcher.job_enqueued(&JobSignal::for_job(&job)).await;
                    return Ok(SubmitOutcome::Accepted(job));
                }
                Err(JobStoreError::Duplicate(key)) => {
                    debug!(owner_key = %key, "lost insert race, re-checking active job");
                }
                Err(e) => return Err(SubmitError::StorageUnavailable(e)),
            }
        }

        // The last insert lost to a job that is still active.
        if let Some(existing) = self.active(&job.owner_key).await? {
            return Ok(SubmitOutcome::AlreadyInProgress(existing));
        }

        warn!(owner_key = %job.owner_key, "owner key stayed contended across retries");
        Err(SubmitError::Contended(job.owner_key))
    }

    async fn active(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, SubmitError> {
        let existing = self
            .store
            .find_active(owner_key)
            .await
            .map_err(SubmitError::StorageUnavailable)?;
        if let Some(job) = &existing {
            debug!(owner_key = %job.owner_key, job_id = %job.id, "request already in progress");
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use chrono::DateTime;
    use skillpath_core::JobId;

    use super::*;
    use crate::jobs::{InMemoryJobStore, JobStats, JobStatus, ResultRecord};

    #[derive(Default)]
    struct CountingDispatcher {
        enqueued: AtomicUsize,
    }

    #[async_trait]
    impl Dispatcher for CountingDispatcher {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn job_enqueued(&self, _signal: &JobSignal) {
            self.enqueued.fetch_add(1, Ordering::SeqCst);
        }

        async fn run(&self, _shutdown: CancellationToken) {}
    }

    fn setup() -> (Arc<InMemoryJobStore>, Arc<CountingDispatcher>, RequestSubmitter<Arc<InMemoryJobStore>>) {
        let store = InMemoryJobStore::arc();
        let dispatcher = Arc::new(CountingDispatcher::default());
        let submitter = RequestSubmitter::new(store.clone(), dispatcher.clone());
        (store, dispatcher, submitter)
    }

    fn user(id: &str) -> Identity {
        Identity::new(id).unwrap()
    }

    #[tokio::test]
    async fn accepts_new_request_and_signals() {
        let (store, dispatcher, submitter) = setup();

        let outcome = submitter.submit(&user("U"), "  Rust ").await.unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(outcome.job().owner_key.as_str(), "U:Rust");
        assert_eq!(outcome.job().status, JobStatus::Pending);
        assert_eq!(dispatcher.enqueued.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn second_submission_returns_existing_job() {
        let (store, dispatcher, submitter) = setup();

        let first = submitter.submit(&user("U"), "Rust").await.unwrap();
        let second = submitter.submit(&user("U"), "Rust").await.unwrap();

        assert!(matches!(second, SubmitOutcome::AlreadyInProgress(_)));
        assert_eq!(second.job().id, first.job().id);
        assert_eq!(dispatcher.enqueued.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn processing_job_also_blocks_resubmission() {
        let (store, _, submitter) = setup();
        submitter.submit(&user("U"), "Rust").await.unwrap();
        store.claim_next(Utc::now()).await.unwrap();

        let again = submitter.submit(&user("U"), "Rust").await.unwrap();
        assert_eq!(again.job().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn failed_job_allows_resubmission() {
        let (store, _, submitter) = setup();
        let first = submitter.submit(&user("U"), "Rust").await.unwrap();
        store.claim_next(Utc::now()).await.unwrap();
        store.mark_failed(first.job().id, "timeout: slow", Utc::now()).await.unwrap();

        let again = submitter.submit(&user("U"), "Rust").await.unwrap();
        assert!(again.is_accepted());
        assert_ne!(again.job().id, first.job().id);
    }

    #[tokio::test]
    async fn blank_topic_is_rejected_without_writing() {
        let (store, dispatcher, submitter) = setup();

        let err = submitter.submit(&user("U"), "   ").await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert_eq!(store.stats().await.unwrap(), Default::default());
        assert_eq!(dispatcher.enqueued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_unavailable() {
        let (store, dispatcher, submitter) = setup();
        store.set_unavailable(true);

        let err = submitter.submit(&user("U"), "Rust").await.unwrap_err();
        assert!(matches!(err, SubmitError::StorageUnavailable(JobStoreError::Unavailable(_))));
        assert_eq!(dispatcher.enqueued.load(Ordering::SeqCst), 0);
    }

    /// Hides active jobs from the first `blind_reads` lookups, so every
    /// insert collides with a job the submitter has not seen.
    struct LaggingStore {
        inner: Arc<InMemoryJobStore>,
        blind_reads: AtomicUsize,
    }

    #[async_trait]
    impl JobStore for LaggingStore {
        async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
            self.inner.insert(job).await
        }

        async fn find_active(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
            let blind = self
                .blind_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if blind {
                return Ok(None);
            }
            self.inner.find_active(owner_key).await
        }

        async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
            self.inner.get(job_id).await
        }

        async fn latest_for_owner(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
            self.inner.latest_for_owner(owner_key).await
        }

        async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, JobStoreError> {
            self.inner.claim_next(now).await
        }

        async fn mark_completed(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, JobStoreError> {
            self.inner.mark_completed(job_id, now).await
        }

        async fn mark_failed(
            &self,
            job_id: JobId,
            error: &str,
            now: DateTime<Utc>,
        ) -> Result<JobRecord, JobStoreError> {
            self.inner.mark_failed(job_id, error, now).await
        }

        async fn upsert_result(&self, result: &ResultRecord) -> Result<(), JobStoreError> {
            self.inner.upsert_result(result).await
        }

        async fn get_result(&self, owner_key: &OwnerKey) -> Result<Option<ResultRecord>, JobStoreError> {
            self.inner.get_result(owner_key).await
        }

        async fn stats(&self) -> Result<JobStats, JobStoreError> {
            self.inner.stats().await
        }
    }

    fn lagging_submitter(blind_reads: usize) -> (Arc<InMemoryJobStore>, RequestSubmitter<LaggingStore>) {
        let inner = InMemoryJobStore::arc();
        let store = LaggingStore {
            inner: inner.clone(),
            blind_reads: AtomicUsize::new(blind_reads),
        };
        let submitter = RequestSubmitter::new(store, Arc::new(CountingDispatcher::default()));
        (inner, submitter)
    }

    #[tokio::test]
    async fn repeated_duplicate_inserts_report_the_active_job() {
        let (inner, submitter) = lagging_submitter(INSERT_ATTEMPTS);
        let existing = JobRecord::pending(user("U"), Topic::parse("Rust").unwrap(), Utc::now());
        inner.insert(&existing).await.unwrap();

        let outcome = submitter.submit(&user("U"), "Rust").await.unwrap();
        assert_eq!(outcome, SubmitOutcome::AlreadyInProgress(existing));
        assert_eq!(inner.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn unresolved_contention_is_not_a_storage_outage() {
        let (inner, submitter) = lagging_submitter(INSERT_ATTEMPTS + 1);
        let existing = JobRecord::pending(user("U"), Topic::parse("Rust").unwrap(), Utc::now());
        inner.insert(&existing).await.unwrap();

        let err = submitter.submit(&user("U"), "Rust").await.unwrap_err();
        assert!(matches!(err, SubmitError::Contended(key) if key.as_str() == "U:Rust"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_submissions_create_one_job() {
        let (store, _, submitter) = setup();
        let submitter = Arc::new(submitter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let submitter = submitter.clone();
                tokio::spawn(async move { submitter.submit(&user("U"), "Rust").await.unwrap() })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_accepted() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(store.stats().await.unwrap().pending, 1);
    }
}
