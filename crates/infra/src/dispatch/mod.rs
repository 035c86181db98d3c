//! How claimed work gets started.
//!
//! A [`Dispatcher`] decides *when* the worker runs a claim cycle. The queue
//! itself (the job store) is the only source of truth: signals carry hints,
//! never work, so a lost signal only delays a job until the next poll.
//!
//! ## Strategies
//!
//! - [`PollDispatcher`]: fixed-interval ticks, one claim per tick.
//! - [`LocalPushDispatcher`]: in-process nudge on enqueue.
//! - [`HttpPushDispatcher`]: fire-and-forget POST to a remote worker endpoint.
//! - `RedisPushDispatcher` (feature `redis`): publish/subscribe between
//!   processes.
//!
//! [`DispatcherSet`] fans one enqueue out to several strategies; polling is
//! normally kept alongside a push strategy as the safety net.

mod http;
mod poll;
mod push;
#[cfg(feature = "redis")]
mod redis_pubsub;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use skillpath_core::{JobId, OwnerKey};

use crate::jobs::JobRecord;

pub use http::{HttpPushDispatcher, WORKER_SECRET_HEADER};
pub use poll::{PollDispatcher, DEFAULT_POLL_INTERVAL};
pub use push::{LocalPushDispatcher, DEFAULT_PUSH_CAPACITY};
#[cfg(feature = "redis")]
pub use redis_pubsub::RedisPushDispatcher;

/// Wake-up hint sent when a job is enqueued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<OwnerKey>,
}

impl JobSignal {
    pub fn for_job(job: &JobRecord) -> Self {
        Self {
            job_id: Some(job.id),
            owner_key: Some(job.owner_key.clone()),
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// A job was accepted. Must return promptly: never waits for the job to
    /// run, and never fails the caller.
    async fn job_enqueued(&self, signal: &JobSignal);

    /// Drive the worker until `shutdown` fires. Strategies with nothing to
    /// drive return immediately.
    async fn run(&self, shutdown: CancellationToken);
}

/// Fan-out over several dispatchers.
#[derive(Clone, Default)]
pub struct DispatcherSet {
    dispatchers: Vec<Arc<dyn Dispatcher>>,
}

impl DispatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatchers.push(dispatcher);
        self
    }

    pub fn push(&mut self, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatchers.push(dispatcher);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.dispatchers.iter().map(|d| d.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }
}

#[async_trait]
impl Dispatcher for DispatcherSet {
    fn name(&self) -> &'static str {
        "set"
    }

    async fn job_enqueued(&self, signal: &JobSignal) {
        for dispatcher in &self.dispatchers {
            dispatcher.job_enqueued(signal).await;
        }
    }

    async fn run(&self, shutdown: CancellationToken) {
        let runs = self.dispatchers.iter().map(|d| {
            let d = d.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { d.run(shutdown).await })
        });
        let handles: Vec<_> = runs.collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dispatcher task panicked");
            }
        }
    }
}
