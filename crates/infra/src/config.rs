//! Process configuration from environment variables.
//!
//! `.env` files are honoured via `dotenvy`. Parsing goes through
//! [`AppConfig::from_lookup`] so tests never touch the real environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use skillpath_ai::DEFAULT_MODEL;

use crate::dispatch::DEFAULT_POLL_INTERVAL;
use crate::jobs::DEFAULT_GENERATION_TIMEOUT;

pub const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080);
pub const DEFAULT_REDIS_CHANNEL: &str = "skillpath:jobs";
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} is required when {because}")]
    Missing { key: &'static str, because: String },
}

/// How enqueue signals reach a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Poll only.
    None,
    /// In-process channel to the embedded worker.
    Local,
    /// POST to `WORKER_URL`.
    Http,
    /// Redis pub/sub on `REDIS_CHANNEL`.
    Redis,
}

impl FromStr for PushMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(PushMode::None),
            "local" => Ok(PushMode::Local),
            "http" => Ok(PushMode::Http),
            "redis" => Ok(PushMode::Redis),
            _ => Err("expected one of none, local, http, redis".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProvider {
    Gemini,
    Stub,
}

impl FromStr for GenerationProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(GenerationProvider::Gemini),
            "stub" => Ok(GenerationProvider::Stub),
            _ => Err("expected gemini or stub".into()),
        }
    }
}

/// Bearer token verification settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: Option<String>,
    /// RS256 public key; takes precedence over `jwt_secret`.
    pub jwt_public_key_pem: Option<String>,
    pub jwt_issuer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub generation_timeout: Duration,
    pub max_concurrent: usize,
    /// Run a worker inside the API process.
    pub embedded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSettings {
    pub provider: GenerationProvider,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub push: PushMode,
    pub worker_url: Option<String>,
    pub redis_url: Option<String>,
    pub redis_channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Absent: the API falls back to the in-memory store.
    pub database_url: Option<String>,
    pub auth: AuthConfig,
    /// Guards the worker endpoints. Absent: they answer 503.
    pub worker_secret: Option<String>,
    /// Guards the scheduler endpoint. Defaults to `worker_secret`.
    pub cron_secret: Option<String>,
    pub worker: WorkerSettings,
    pub generation: GenerationSettings,
    pub dispatch: DispatchSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse::<SocketAddr>(&get, "BIND_ADDR")?.unwrap_or(DEFAULT_BIND_ADDR);

        let worker_secret = get("WORKER_SECRET_KEY");
        let cron_secret = get("CRON_SECRET").or_else(|| worker_secret.clone());

        let worker = WorkerSettings {
            poll_interval: secs(&get, "POLL_INTERVAL_SECS")?.unwrap_or(DEFAULT_POLL_INTERVAL),
            generation_timeout: secs(&get, "GENERATION_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT),
            max_concurrent: parse::<usize>(&get, "MAX_CONCURRENT_JOBS")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS),
            embedded: parse_bool(&get, "EMBEDDED_WORKER")?.unwrap_or(true),
        };
        if worker.max_concurrent == 0 {
            return Err(invalid("MAX_CONCURRENT_JOBS", "0", "must be at least 1"));
        }

        let gemini_api_key = get("GEMINI_API_KEY");
        let provider = match get("GENERATION_PROVIDER") {
            Some(raw) => raw
                .parse()
                .map_err(|reason: String| invalid("GENERATION_PROVIDER", &raw, reason))?,
            None if gemini_api_key.is_some() => GenerationProvider::Gemini,
            None => GenerationProvider::Stub,
        };
        if provider == GenerationProvider::Gemini && gemini_api_key.is_none() {
            return Err(ConfigError::Missing {
                key: "GEMINI_API_KEY",
                because: "GENERATION_PROVIDER=gemini".into(),
            });
        }
        let generation = GenerationSettings {
            provider,
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        };

        let dispatch = DispatchSettings {
            push: match get("PUSH_DISPATCH") {
                Some(raw) => raw
                    .parse()
                    .map_err(|reason: String| invalid("PUSH_DISPATCH", &raw, reason))?,
                None => PushMode::Local,
            },
            worker_url: get("WORKER_URL"),
            redis_url: get("REDIS_URL"),
            redis_channel: get("REDIS_CHANNEL").unwrap_or_else(|| DEFAULT_REDIS_CHANNEL.to_string()),
        };
        match dispatch.push {
            PushMode::Http if dispatch.worker_url.is_none() => {
                return Err(ConfigError::Missing {
                    key: "WORKER_URL",
                    because: "PUSH_DISPATCH=http".into(),
                });
            }
            PushMode::Http if worker_secret.is_none() => {
                return Err(ConfigError::Missing {
                    key: "WORKER_SECRET_KEY",
                    because: "PUSH_DISPATCH=http".into(),
                });
            }
            PushMode::Redis if dispatch.redis_url.is_none() => {
                return Err(ConfigError::Missing {
                    key: "REDIS_URL",
                    because: "PUSH_DISPATCH=redis".into(),
                });
            }
            _ => {}
        }

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            auth: AuthConfig {
                jwt_secret: get("JWT_SECRET"),
                jwt_public_key_pem: get("JWT_PUBLIC_KEY_PEM").map(|pem| pem.replace("\\n", "\n")),
                jwt_issuer: get("JWT_ISSUER"),
            },
            worker_secret,
            cron_secret,
            worker,
            generation,
            dispatch,
        })
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, &raw, e)))
        .transpose()
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match parse::<u64>(get, key)? {
        Some(0) => Err(invalid(key, "0", "must be positive")),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    get(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, &raw, "expected a boolean")),
        })
        .transpose()
}
