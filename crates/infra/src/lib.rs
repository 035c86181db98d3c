//! Infrastructure layer: job storage, dispatch, config and process wiring.

pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod jobs;

pub use bootstrap::{BootstrapError, SharedStore};
pub use config::{AppConfig, ConfigError, PushMode};
