//! Claim cycles with bounded concurrency.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use skillpath_ai::GenerationClient;
use skillpath_core::JobId;

use super::claimer::JobClaimer;
use super::executor::{JobExecutor, JobOutcome, DEFAULT_GENERATION_TIMEOUT};
use super::store::{JobStore, JobStoreError};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on one generation call.
    pub generation_timeout: Duration,
    /// Jobs allowed to execute at the same time.
    pub max_concurrent: usize,
    /// Name for logging.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            max_concurrent: 4,
            name: "generation-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }
}

/// Why a claim cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Poll,
    Push,
    Scheduler,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerSource::Poll => "poll",
            TriggerSource::Push => "push",
            TriggerSource::Scheduler => "scheduler",
        })
    }
}

/// Result of one claim cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A job was claimed and handed to an execution task.
    Claimed(JobId),
    /// Nothing was pending.
    Idle,
    /// Every execution slot is taken; nothing was claimed.
    Busy,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub cycles: u64,
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_abandoned: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &JobOutcome) {
        self.current_running = self.current_running.saturating_sub(1);
        match outcome {
            JobOutcome::Completed { .. } => self.jobs_completed += 1,
            JobOutcome::Failed { .. } => self.jobs_failed += 1,
            JobOutcome::Rejected { .. } | JobOutcome::Abandoned { .. } => self.jobs_abandoned += 1,
        }
    }
}

/// Anything that can run a claim cycle. Dispatchers drive this.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run_cycle(&self, source: TriggerSource) -> Result<CycleOutcome, JobStoreError>;
}

/// Claims jobs and executes them on tracked background tasks.
///
/// A cycle claims at most one job. Claims stop while `max_concurrent` jobs
/// are executing, so a job never sits in PROCESSING waiting for a slot.
pub struct Worker<S> {
    claimer: JobClaimer<S>,
    executor: Arc<JobExecutor<S>>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
    name: String,
}

impl<S: JobStore + Clone> Worker<S> {
    pub fn new(store: S, client: Arc<dyn GenerationClient>, config: WorkerConfig) -> Self {
        let executor = JobExecutor::new(store.clone(), client).with_timeout(config.generation_timeout);
        Self {
            claimer: JobClaimer::new(store),
            executor: Arc::new(executor),
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            stats: Arc::new(Mutex::new(WorkerStats::default())),
            started: Instant::now(),
            name: config.name,
        }
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    fn update_stats(&self, apply: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            apply(&mut stats);
        }
    }

    /// Wait until every in-flight job has finished. New cycles may still be
    /// run afterwards.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting work and wait for in-flight jobs.
    pub async fn shutdown(&self) {
        info!(worker = %self.name, running = self.tracker.len(), "worker draining");
        self.slots.close();
        self.tracker.close();
        self.tracker.wait().await;
        info!(worker = %self.name, "worker stopped");
    }
}

#[async_trait]
impl<S: JobStore + Clone> JobRunner for Worker<S> {
    async fn run_cycle(&self, source: TriggerSource) -> Result<CycleOutcome, JobStoreError> {
        self.update_stats(|s| s.cycles += 1);

        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(worker = %self.name, %source, "all execution slots busy");
                return Ok(CycleOutcome::Busy);
            }
        };

        let job = match self.claimer.claim().await {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(CycleOutcome::Idle),
            Err(e) => {
                warn!(worker = %self.name, %source, error = %e, "claim failed");
                return Err(e);
            }
        };

        let job_id = job.id;
        self.update_stats(|s| {
            s.jobs_claimed += 1;
            s.current_running += 1;
        });
        info!(worker = %self.name, %source, %job_id, "dispatching job");

        let executor = self.executor.clone();
        let stats = self.stats.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            let outcome = executor.execute(job).await;
            if let Ok(mut stats) = stats.lock() {
                stats.record(&outcome);
            }
        });

        Ok(CycleOutcome::Claimed(job_id))
    }
}
