use chrono::Utc;
use tracing::{debug, info};

use super::store::{JobStore, JobStoreError};
use super::types::JobRecord;

/// Takes the oldest PENDING job and moves it to PROCESSING.
///
/// Safe to call from any number of tasks or processes at once; the store
/// guarantees each job is handed out once.
#[derive(Debug, Clone)]
pub struct JobClaimer<S> {
    store: S,
}

impl<S: JobStore> JobClaimer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn claim(&self) -> Result<Option<JobRecord>, JobStoreError> {
        match self.store.claim_next(Utc::now()).await? {
            Some(job) => {
                info!(job_id = %job.id, owner_key = %job.owner_key, "claimed job");
                Ok(Some(job))
            }
            None => {
                debug!("no pending jobs");
                Ok(None)
            }
        }
    }
}
