//! Wiring shared by the API and worker binaries.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use skillpath_ai::{GeminiClient, GenerationClient, GenerationError, StubGenerationClient};

use crate::config::{DispatchSettings, GenerationProvider, GenerationSettings, PushMode};
use crate::dispatch::{Dispatcher, HttpPushDispatcher, LocalPushDispatcher};
use crate::jobs::{InMemoryJobStore, JobRunner, JobStore, JobStoreError, PostgresJobStore};

/// Store handle shared across request handlers and workers.
pub type SharedStore = Arc<dyn JobStore>;

const DEFAULT_POOL_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("job store: {0}")]
    Store(#[from] JobStoreError),

    #[error("generation client: {0}")]
    Generation(#[from] GenerationError),

    #[error("dispatcher: {0}")]
    Dispatch(String),
}

/// Postgres when a URL is given (schema applied on connect), in-memory otherwise.
pub async fn open_store(database_url: Option<&str>) -> Result<SharedStore, BootstrapError> {
    match database_url {
        Some(url) => {
            let store = PostgresJobStore::connect(url, DEFAULT_POOL_SIZE).await?;
            store.ensure_schema().await?;
            info!("using postgres job store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory job store (state is lost on restart)");
            Ok(InMemoryJobStore::arc())
        }
    }
}

pub fn generation_client(settings: &GenerationSettings) -> Result<Arc<dyn GenerationClient>, BootstrapError> {
    match (settings.provider, settings.gemini_api_key.as_deref()) {
        (GenerationProvider::Gemini, Some(key)) => {
            info!(model = %settings.gemini_model, "using gemini generation client");
            Ok(Arc::new(GeminiClient::new(key, settings.gemini_model.clone())?))
        }
        (GenerationProvider::Gemini, None) => Err(BootstrapError::Generation(GenerationError::upstream(
            "GEMINI_API_KEY is not set",
        ))),
        (GenerationProvider::Stub, _) => {
            warn!("using stub generation client");
            Ok(Arc::new(StubGenerationClient::new()))
        }
    }
}

/// The configured push strategy, if any.
///
/// `runner` is the local worker, when this process has one. Local push
/// without a runner degrades to polling only.
pub fn push_dispatcher(
    settings: &DispatchSettings,
    worker_secret: Option<&str>,
    runner: Option<Arc<dyn JobRunner>>,
) -> Result<Option<Arc<dyn Dispatcher>>, BootstrapError> {
    match settings.push {
        PushMode::None => Ok(None),
        PushMode::Local => match runner {
            Some(runner) => Ok(Some(Arc::new(LocalPushDispatcher::new(runner)))),
            None => {
                warn!("PUSH_DISPATCH=local without an embedded worker; relying on polling");
                Ok(None)
            }
        },
        PushMode::Http => {
            let url = settings
                .worker_url
                .as_deref()
                .ok_or_else(|| BootstrapError::Dispatch("WORKER_URL is not set".into()))?;
            let secret =
                worker_secret.ok_or_else(|| BootstrapError::Dispatch("WORKER_SECRET_KEY is not set".into()))?;
            let dispatcher = HttpPushDispatcher::new(url, secret)
                .map_err(|e| BootstrapError::Dispatch(format!("failed to build HTTP client: {e}")))?;
            Ok(Some(Arc::new(dispatcher)))
        }
        PushMode::Redis => redis_dispatcher(settings, runner),
    }
}

#[cfg(feature = "redis")]
fn redis_dispatcher(
    settings: &DispatchSettings,
    runner: Option<Arc<dyn JobRunner>>,
) -> Result<Option<Arc<dyn Dispatcher>>, BootstrapError> {
    use crate::dispatch::RedisPushDispatcher;

    let url = settings
        .redis_url
        .as_deref()
        .ok_or_else(|| BootstrapError::Dispatch("REDIS_URL is not set".into()))?;
    let mut dispatcher = RedisPushDispatcher::publisher(url, settings.redis_channel.clone())
        .map_err(|e| BootstrapError::Dispatch(format!("invalid REDIS_URL: {e}")))?;
    if let Some(runner) = runner {
        dispatcher = dispatcher.with_runner(runner);
    }
    Ok(Some(Arc::new(dispatcher)))
}

#[cfg(not(feature = "redis"))]
fn redis_dispatcher(
    _settings: &DispatchSettings,
    _runner: Option<Arc<dyn JobRunner>>,
) -> Result<Option<Arc<dyn Dispatcher>>, BootstrapError> {
    Err(BootstrapError::Dispatch(
        "PUSH_DISPATCH=redis requires building with the `redis` feature".into(),
    ))
}
