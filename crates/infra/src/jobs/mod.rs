//! Generation job pipeline.
//!
//! ## Flow
//!
//! 1. [`RequestSubmitter`] validates a request, enforces one active job per
//!    owner key and persists a PENDING [`JobRecord`].
//! 2. A dispatcher (see [`crate::dispatch`]) tells the [`Worker`] to run a
//!    claim cycle.
//! 3. [`JobClaimer`] atomically moves the oldest PENDING job to PROCESSING.
//! 4. [`JobExecutor`] calls the generation client under a timeout, stores the
//!    [`ResultRecord`] and marks the job COMPLETED, or marks it FAILED with a
//!    classified reason.
//!
//! ## Components
//!
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `RequestSubmitter`: intake and dedup
//! - `JobClaimer`: atomic claim
//! - `JobExecutor`: generation and terminal status
//! - `Worker`: claim cycles with bounded concurrency

pub mod claimer;
pub mod executor;
pub mod postgres;
pub mod store;
pub mod submitter;
pub mod types;
pub mod worker;

pub use claimer::JobClaimer;
pub use executor::{failure_reason, JobExecutor, JobOutcome, DEFAULT_GENERATION_TIMEOUT};
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use submitter::{RequestSubmitter, SubmitError, SubmitOutcome};
pub use types::{JobRecord, JobStats, JobStatus, ResultRecord};
pub use worker::{CycleOutcome, JobRunner, TriggerSource, Worker, WorkerConfig, WorkerStats};
