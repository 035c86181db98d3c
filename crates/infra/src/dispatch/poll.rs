use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jobs::{CycleOutcome, JobRunner, TriggerSource};

use super::{Dispatcher, JobSignal};

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Runs one claim cycle per tick.
///
/// Ticks never overlap: a slow cycle delays the next tick instead of
/// stacking them. A failed tick is logged and the loop carries on.
pub struct PollDispatcher {
    runner: Arc<dyn JobRunner>,
    interval: Duration,
}

impl PollDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, interval: Duration) -> Self {
        Self { runner, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One tick, as run by the loop.
    pub async fn tick(&self) -> Option<CycleOutcome> {
        match self.runner.run_cycle(TriggerSource::Poll).await {
            Ok(outcome) => {
                match outcome {
                    CycleOutcome::Claimed(job_id) => debug!(%job_id, "poll tick claimed a job"),
                    CycleOutcome::Idle => debug!("poll tick: queue empty"),
                    CycleOutcome::Busy => debug!("poll tick: worker saturated"),
                }
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "poll tick aborted");
                None
            }
        }
    }
}

#[async_trait]
impl Dispatcher for PollDispatcher {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn job_enqueued(&self, _signal: &JobSignal) {}

    async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "poll dispatcher started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("poll dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use skillpath_ai::StubGenerationClient;
    use skillpath_core::{Identity, Topic};

    use super::*;
    use crate::jobs::{InMemoryJobStore, JobRecord, JobStatus, JobStore, Worker, WorkerConfig};

    fn worker(store: &Arc<InMemoryJobStore>) -> Arc<Worker<Arc<InMemoryJobStore>>> {
        Arc::new(Worker::new(
            store.clone(),
            Arc::new(StubGenerationClient::new()),
            WorkerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn tick_on_empty_queue_changes_nothing() {
        let store = InMemoryJobStore::arc();
        let poll = PollDispatcher::new(worker(&store), DEFAULT_POLL_INTERVAL);

        assert_eq!(poll.tick().await, Some(CycleOutcome::Idle));
        assert_eq!(store.stats().await.unwrap(), Default::default());
    }

    #[tokio::test]
    async fn tick_survives_store_outage() {
        let store = InMemoryJobStore::arc();
        let poll = PollDispatcher::new(worker(&store), DEFAULT_POLL_INTERVAL);
        store.set_unavailable(true);
        assert_eq!(poll.tick().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_picks_up_pending_jobs_until_shutdown() {
        let store = InMemoryJobStore::arc();
        let job = JobRecord::pending(
            Identity::new("U").unwrap(),
            Topic::parse("Rust").unwrap(),
            Utc::now(),
        );
        store.insert(&job).await.unwrap();

        let worker = worker(&store);
        let poll = Arc::new(PollDispatcher::new(worker.clone(), Duration::from_secs(1)));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let poll = poll.clone();
            let shutdown = shutdown.clone();
            async move { poll.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();
        worker.wait_idle().await;

        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Completed);
    }
}
