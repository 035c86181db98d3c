//! Job storage: the trait every pipeline component talks to, plus the
//! in-memory implementation used by tests and single-process dev runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use skillpath_core::{JobId, OwnerKey};

use super::types::{JobRecord, JobStats, JobStatus, ResultRecord};

/// Durable home of job records and generated results.
///
/// All status changes go through this trait, and each one is conditional on
/// the current status so concurrent workers cannot overwrite each other.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Persist a new PENDING job.
    ///
    /// Fails with [`JobStoreError::Duplicate`] when an active job already
    /// holds the same owner key.
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError>;

    /// The PENDING or PROCESSING job for this key, if any.
    async fn find_active(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Most recently created job for this key, whatever its status.
    async fn latest_for_owner(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError>;

    /// Atomically move the oldest PENDING job to PROCESSING and return it.
    ///
    /// Ordering is `(created_at, id)`. Two concurrent callers never receive
    /// the same job.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, JobStoreError>;

    /// PROCESSING -> COMPLETED.
    async fn mark_completed(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, JobStoreError>;

    /// PROCESSING -> FAILED, recording `error`.
    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, JobStoreError>;

    /// Insert or replace the result for `result.owner_key`.
    async fn upsert_result(&self, result: &ResultRecord) -> Result<(), JobStoreError>;

    async fn get_result(&self, owner_key: &OwnerKey) -> Result<Option<ResultRecord>, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Release connections. Called once at shutdown.
    async fn close(&self) {}
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("an active job already exists for {0}")]
    Duplicate(OwnerKey),

    #[error("job {job_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        (**self).insert(job).await
    }

    async fn find_active(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).find_active(owner_key).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn latest_for_owner(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).latest_for_owner(owner_key).await
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).claim_next(now).await
    }

    async fn mark_completed(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, JobStoreError> {
        (**self).mark_completed(job_id, now).await
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, JobStoreError> {
        (**self).mark_failed(job_id, error, now).await
    }

    async fn upsert_result(&self, result: &ResultRecord) -> Result<(), JobStoreError> {
        (**self).upsert_result(result).await
    }

    async fn get_result(&self, owner_key: &OwnerKey) -> Result<Option<ResultRecord>, JobStoreError> {
        (**self).get_result(owner_key).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<JobId, JobRecord>,
    results: HashMap<OwnerKey, ResultRecord>,
}

/// In-memory job store for tests/dev.
///
/// One lock guards both tables, so every operation (claims included) is
/// atomic with respect to every other.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate an outage: while set, every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), JobStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JobStoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, JobStoreError> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|_| JobStoreError::Unavailable("job table lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, JobStoreError> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|_| JobStoreError::Unavailable("job table lock poisoned".into()))
    }

    fn update<F>(&self, job_id: JobId, apply: F) -> Result<JobRecord, JobStoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), JobStoreError>,
    {
        let mut tables = self.write()?;
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        // Apply to a copy so a rejected transition leaves the record untouched.
        let mut next = job.clone();
        apply(&mut next)?;
        *job = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        let mut tables = self.write()?;
        if tables
            .jobs
            .values()
            .any(|j| j.owner_key == job.owner_key && j.status.is_active())
        {
            return Err(JobStoreError::Duplicate(job.owner_key.clone()));
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_active(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
        let tables = self.read()?;
        Ok(tables
            .jobs
            .values()
            .filter(|j| &j.owner_key == owner_key && j.status.is_active())
            .min_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        Ok(self.read()?.jobs.get(&job_id).cloned())
    }

    async fn latest_for_owner(&self, owner_key: &OwnerKey) -> Result<Option<JobRecord>, JobStoreError> {
        let tables = self.read()?;
        Ok(tables
            .jobs
            .values()
            .filter(|j| &j.owner_key == owner_key)
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, JobStoreError> {
        let mut tables = self.write()?;

        let Some(job_id) = tables
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id)
        else {
            return Ok(None);
        };

        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        job.mark_processing(now)?;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobRecord, JobStoreError> {
        self.update(job_id, |job| job.mark_completed(now))
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, JobStoreError> {
        self.update(job_id, |job| job.mark_failed(error, now))
    }

    async fn upsert_result(&self, result: &ResultRecord) -> Result<(), JobStoreError> {
        let mut tables = self.write()?;
        tables.results.insert(result.owner_key.clone(), result.clone());
        Ok(())
    }

    async fn get_result(&self, owner_key: &OwnerKey) -> Result<Option<ResultRecord>, JobStoreError> {
        Ok(self.read()?.results.get(owner_key).cloned())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let tables = self.read()?;
        let mut stats = JobStats::default();
        for job in tables.jobs.values() {
            stats.record(job.status);
        }
        Ok(stats)
    }
}
