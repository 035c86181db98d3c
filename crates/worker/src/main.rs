//! Standalone worker: claims and executes jobs from the shared Postgres store.

use std::sync::Arc;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;

use skillpath_infra::bootstrap;
use skillpath_infra::dispatch::{Dispatcher, DispatcherSet, PollDispatcher};
use skillpath_infra::jobs::{JobRunner, JobStore, Worker, WorkerConfig};
use skillpath_infra::{AppConfig, PushMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    skillpath_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    // An in-memory store would be private to this process.
    let Some(database_url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL is required for the standalone worker");
    };

    let store = bootstrap::open_store(Some(database_url))
        .await
        .context("failed to open job store")?;
    let client = bootstrap::generation_client(&config.generation).context("failed to build generation client")?;

    let worker = Arc::new(Worker::new(
        store.clone(),
        client,
        WorkerConfig::default()
            .with_name("standalone-worker")
            .with_max_concurrent(config.worker.max_concurrent)
            .with_generation_timeout(config.worker.generation_timeout),
    ));
    let runner: Arc<dyn JobRunner> = worker.clone();

    let mut dispatchers =
        DispatcherSet::new().with(Arc::new(PollDispatcher::new(runner.clone(), config.worker.poll_interval)));

    // Only a broker reaches this process; local and http push target the API's worker.
    if config.dispatch.push == PushMode::Redis {
        let redis = bootstrap::push_dispatcher(&config.dispatch, config.worker_secret.as_deref(), Some(runner))
            .context("failed to build redis dispatcher")?;
        if let Some(redis) = redis {
            dispatchers.push(redis);
        }
    }

    tracing::info!(dispatchers = ?dispatchers.names(), "worker started");

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let dispatchers = dispatchers.clone();
        let shutdown = shutdown.clone();
        async move { dispatchers.run(shutdown).await }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }

    tracing::info!("shutting down; draining in-flight jobs");
    shutdown.cancel();
    if let Err(e) = run.await {
        tracing::error!(error = %e, "dispatcher task panicked");
    }
    worker.shutdown().await;
    store.close().await;

    tracing::info!(stats = ?worker.stats(), "worker stopped");
    Ok(())
}
