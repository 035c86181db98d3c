//! Redis pub/sub push (optional).
//!
//! Pub/sub is not durable: a message published while no subscriber is
//! connected is gone. That is acceptable here because a signal only wakes a
//! worker early; the job row is what matters and the poll loop finds it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Commands;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jobs::{JobRunner, TriggerSource};

use super::{Dispatcher, JobSignal};

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

fn next_resubscribe_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_RESUBSCRIBE_DELAY)
}

/// Publishes enqueue signals to a Redis channel and, when given a runner,
/// subscribes to the same channel and runs a claim cycle per message.
pub struct RedisPushDispatcher {
    client: redis::Client,
    channel: String,
    runner: Option<Arc<dyn JobRunner>>,
}

impl RedisPushDispatcher {
    /// Publisher only (API processes without a local worker).
    pub fn publisher(redis_url: &str, channel: impl Into<String>) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            channel: channel.into(),
            runner: None,
        })
    }

    /// Publisher and subscriber.
    pub fn with_runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    fn publish_blocking(client: &redis::Client, channel: &str, payload: &str) -> redis::RedisResult<i64> {
        let mut conn = client.get_connection()?;
        conn.publish(channel, payload)
    }
}

/// Forwards pub/sub messages into `tx` until the receiver goes away.
fn subscribe_loop(client: redis::Client, channel: String, tx: mpsc::Sender<JobSignal>) {
    let mut conn = match client.get_connection() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "redis subscribe connection failed");
            return;
        }
    };

    let mut pubsub = conn.as_pubsub();
    if let Err(e) = pubsub.subscribe(&channel) {
        warn!(error = %e, %channel, "redis subscribe failed");
        return;
    }
    // Wake up periodically to notice shutdown.
    if let Err(e) = pubsub.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!(error = %e, "redis read timeout not set");
        return;
    }

    while !tx.is_closed() {
        let msg = match pubsub.get_message() {
            Ok(m) => m,
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                warn!(error = %e, "redis subscription lost");
                return;
            }
        };

        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };

        let signal = serde_json::from_str(&payload).unwrap_or_default();
        if tx.blocking_send(signal).is_err() {
            return;
        }
    }
}

#[async_trait]
impl Dispatcher for RedisPushDispatcher {
    fn name(&self) -> &'static str {
        "redis_push"
    }

    async fn job_enqueued(&self, signal: &JobSignal) {
        let payload = match serde_json::to_string(signal) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode job signal");
                return;
            }
        };

        let client = self.client.clone();
        let channel = self.channel.clone();
        tokio::task::spawn_blocking(move || match Self::publish_blocking(&client, &channel, &payload) {
            Ok(receivers) => debug!(%channel, receivers, "job signal published"),
            Err(e) => warn!(%channel, error = %e, "job signal publish failed"),
        });
    }

    async fn run(&self, shutdown: CancellationToken) {
        let Some(runner) = self.runner.clone() else {
            return;
        };

        let mut delay = MIN_RESUBSCRIBE_DELAY;
        while !shutdown.is_cancelled() {
            let (tx, mut rx) = mpsc::channel(16);
            let client = self.client.clone();
            let channel = self.channel.clone();
            let subscriber = tokio::task::spawn_blocking(move || subscribe_loop(client, channel, tx));
            info!(channel = %self.channel, "redis push dispatcher subscribing");

            let mut received = false;
            let lost = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break false,
                    signal = rx.recv() => {
                        let Some(signal) = signal else { break true };
                        received = true;
                        match runner.run_cycle(TriggerSource::Push).await {
                            Ok(outcome) => debug!(job_id = ?signal.job_id, ?outcome, "push cycle finished"),
                            Err(e) => warn!(error = %e, "push cycle failed"),
                        }
                    }
                }
            };

            drop(rx);
            let _ = subscriber.await;
            if !lost {
                break;
            }

            if received {
                delay = MIN_RESUBSCRIBE_DELAY;
            }
            warn!(
                channel = %self.channel,
                retry_in_ms = delay.as_millis() as u64,
                "redis subscription ended, polling only until it is restored"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_resubscribe_delay(delay);
        }

        info!("redis push dispatcher stopped");
    }
}
