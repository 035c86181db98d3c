use std::sync::Arc;

use anyhow::Context;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use skillpath_api::app::{self, ApiAuth};
use skillpath_infra::dispatch::Dispatcher;
use skillpath_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    skillpath_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let verifier = app::identity_verifier(&config.auth).context("invalid JWT configuration")?;
    let auth = ApiAuth::new(
        verifier,
        config.worker_secret.as_deref(),
        config.cron_secret.as_deref(),
    )
    .context("invalid worker or cron secret")?;

    let services = Arc::new(
        app::services::build_services(&config)
            .await
            .context("failed to build services")?,
    );

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn({
        let dispatchers = services.dispatchers.clone();
        let shutdown = shutdown.clone();
        async move { dispatchers.run(shutdown).await }
    });
    tracker.close();

    let router = app::build_app(services.clone(), auth);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down");
    shutdown.cancel();
    tracker.wait().await;
    services.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
