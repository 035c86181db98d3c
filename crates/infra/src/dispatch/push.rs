use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jobs::{JobRunner, TriggerSource};

use super::{Dispatcher, JobSignal};

/// Buffered wake-ups before enqueue signals start being dropped.
pub const DEFAULT_PUSH_CAPACITY: usize = 64;

/// In-process push: an enqueue wakes the local worker right away.
///
/// Signals go through a bounded channel. When it is full the signal is
/// dropped; the job stays PENDING and the poll loop picks it up.
pub struct LocalPushDispatcher {
    runner: Arc<dyn JobRunner>,
    tx: mpsc::Sender<JobSignal>,
    rx: Mutex<Option<mpsc::Receiver<JobSignal>>>,
}

impl LocalPushDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self::with_capacity(runner, DEFAULT_PUSH_CAPACITY)
    }

    pub fn with_capacity(runner: Arc<dyn JobRunner>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            runner,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl Dispatcher for LocalPushDispatcher {
    fn name(&self) -> &'static str {
        "local_push"
    }

    async fn job_enqueued(&self, signal: &JobSignal) {
        match self.tx.try_send(signal.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("push queue full, leaving job for the poll loop");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("push dispatcher stopped, leaving job for the poll loop");
            }
        }
    }

    async fn run(&self, shutdown: CancellationToken) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            warn!("local push dispatcher already running");
            return;
        };
        info!("local push dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = rx.recv() => {
                    let Some(signal) = signal else { break };
                    match self.runner.run_cycle(TriggerSource::Push).await {
                        Ok(outcome) => debug!(job_id = ?signal.job_id, ?outcome, "push cycle finished"),
                        Err(e) => warn!(error = %e, "push cycle failed"),
                    }
                }
            }
        }

        rx.close();
        info!("local push dispatcher stopped");
    }
}
