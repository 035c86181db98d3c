use std::sync::Arc;

use tracing::info;

use skillpath_infra::bootstrap::{self, SharedStore};
use skillpath_infra::dispatch::{Dispatcher, DispatcherSet, PollDispatcher};
use skillpath_infra::jobs::{JobRunner, JobStore, RequestSubmitter, Worker, WorkerConfig};
use skillpath_infra::{AppConfig, BootstrapError};

/// Everything the request handlers need, built once in `main` and shared.
pub struct AppServices {
    pub store: SharedStore,
    pub submitter: RequestSubmitter<SharedStore>,
    /// Executes claimed jobs for this process (background loops and the
    /// trigger endpoints alike).
    pub worker: Arc<Worker<SharedStore>>,
    /// Background strategies driving `worker`; empty when the embedded
    /// worker is disabled.
    pub dispatchers: DispatcherSet,
}

impl AppServices {
    pub fn new(
        store: SharedStore,
        worker: Arc<Worker<SharedStore>>,
        dispatchers: DispatcherSet,
        notify: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            submitter: RequestSubmitter::new(store.clone(), notify),
            store,
            worker,
            dispatchers,
        }
    }

    pub fn runner(&self) -> Arc<dyn JobRunner> {
        self.worker.clone()
    }

    /// Drain in-flight jobs, then release the store.
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
        self.store.close().await;
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, BootstrapError> {
    let store = bootstrap::open_store(config.database_url.as_deref()).await?;
    let client = bootstrap::generation_client(&config.generation)?;

    let worker = Arc::new(Worker::new(
        store.clone(),
        client,
        WorkerConfig::default()
            .with_name("api-worker")
            .with_max_concurrent(config.worker.max_concurrent)
            .with_generation_timeout(config.worker.generation_timeout),
    ));

    let runner: Option<Arc<dyn JobRunner>> = if config.worker.embedded {
        Some(worker.clone())
    } else {
        None
    };

    let mut dispatchers = DispatcherSet::new();
    if let Some(runner) = &runner {
        dispatchers.push(Arc::new(PollDispatcher::new(
            runner.clone(),
            config.worker.poll_interval,
        )));
    }

    // Enqueue notifications go to the push strategy even when this process
    // runs no worker (http/redis reach a worker elsewhere).
    let push = bootstrap::push_dispatcher(&config.dispatch, config.worker_secret.as_deref(), runner)?;
    if let Some(push) = push {
        dispatchers.push(push);
    }

    info!(
        embedded_worker = config.worker.embedded,
        dispatchers = ?dispatchers.names(),
        "services ready"
    );

    let notify: Arc<dyn Dispatcher> = Arc::new(dispatchers.clone());
    Ok(AppServices::new(store, worker, dispatchers, notify))
}
