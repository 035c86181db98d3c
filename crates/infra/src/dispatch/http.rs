use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Dispatcher, JobSignal};

/// Header carrying the shared worker secret.
pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote push: POSTs the signal to a worker endpoint and forgets about it.
///
/// The request runs on its own task, so enqueueing never waits on the
/// network. Delivery failures are logged only; polling covers them.
#[derive(Debug, Clone)]
pub struct HttpPushDispatcher {
    http: reqwest::Client,
    url: String,
    secret: String,
}

impl HttpPushDispatcher {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.into(),
            secret: secret.into(),
        })
    }

    async fn deliver(&self, signal: JobSignal) {
        let result = self
            .http
            .post(&self.url)
            .header(WORKER_SECRET_HEADER, &self.secret)
            .json(&signal)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(url = %self.url, status = %response.status(), "worker notified");
            }
            Ok(response) => {
                warn!(url = %self.url, status = %response.status(), "worker rejected push");
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "worker push failed");
            }
        }
    }
}

#[async_trait]
impl Dispatcher for HttpPushDispatcher {
    fn name(&self) -> &'static str {
        "http_push"
    }

    async fn job_enqueued(&self, signal: &JobSignal) {
        let this = self.clone();
        let signal = signal.clone();
        tokio::spawn(async move { this.deliver(signal).await });
    }

    async fn run(&self, _shutdown: CancellationToken) {}
}
