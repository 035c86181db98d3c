//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, worker and dispatcher wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;
use tracing::warn;

use skillpath_auth::{AuthError, Hs256JwtValidator, IdentityVerifier, Rs256JwtValidator, SharedSecret};
use skillpath_infra::config::AuthConfig;

use crate::middleware::{self, AuthState, SecretGuard, CRON_SECRET_HEADER, WORKER_SECRET_HEADER};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Credentials the router checks.
#[derive(Clone)]
pub struct ApiAuth {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub worker_secret: Option<SharedSecret>,
    pub cron_secret: Option<SharedSecret>,
}

impl ApiAuth {
    /// Secrets from raw strings; an absent secret disables its endpoints.
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        worker_secret: Option<&str>,
        cron_secret: Option<&str>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            verifier,
            worker_secret: worker_secret.map(SharedSecret::new).transpose()?,
            cron_secret: cron_secret.map(SharedSecret::new).transpose()?,
        })
    }
}

/// RS256 when a public key is configured, else HS256.
pub fn identity_verifier(config: &AuthConfig) -> Result<Arc<dyn IdentityVerifier>, AuthError> {
    if let Some(pem) = &config.jwt_public_key_pem {
        return Ok(Arc::new(Rs256JwtValidator::new(pem, config.jwt_issuer.as_deref())?));
    }

    let secret = config.jwt_secret.clone().unwrap_or_else(|| {
        warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    Ok(Arc::new(Hs256JwtValidator::new(secret.into_bytes())))
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>, auth: ApiAuth) -> Router {
    let auth_state = AuthState {
        verifier: auth.verifier,
    };

    let users = routes::user_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    let workers = routes::worker_router().layer(axum::middleware::from_fn_with_state(
        SecretGuard::new(WORKER_SECRET_HEADER, auth.worker_secret),
        middleware::secret_middleware,
    ));

    let cron = routes::cron_router().layer(axum::middleware::from_fn_with_state(
        SecretGuard::new(CRON_SECRET_HEADER, auth.cron_secret),
        middleware::secret_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(users)
        .merge(workers)
        .merge(cron)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
