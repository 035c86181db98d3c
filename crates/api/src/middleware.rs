use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use skillpath_auth::{IdentityVerifier, SharedSecret};

use crate::app::errors::ApiError;
use crate::context::IdentityContext;

pub use skillpath_infra::dispatch::WORKER_SECRET_HEADER;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// Bearer token -> [`IdentityContext`] request extension.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers())?;

    let identity = state.verifier.verify(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "bearer token rejected");
        ApiError::Unauthorized("invalid or expired token".into())
    })?;

    req.extensions_mut().insert(IdentityContext::new(identity));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let missing = || ApiError::Unauthorized("missing bearer token".into());

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(missing)?;

    let header = header.to_str().map_err(|_| missing())?;

    let token = header.strip_prefix("Bearer ").ok_or_else(missing)?.trim();
    if token.is_empty() {
        return Err(missing());
    }

    Ok(token)
}

/// Shared-secret check for machine callers (push worker, scheduler).
///
/// With no secret configured the guarded routes answer 503: they are
/// disabled, not open.
#[derive(Clone, Debug)]
pub struct SecretGuard {
    header: &'static str,
    secret: Option<SharedSecret>,
}

impl SecretGuard {
    pub fn new(header: &'static str, secret: Option<SharedSecret>) -> Self {
        Self { header, secret }
    }
}

pub async fn secret_middleware(
    State(guard): State<SecretGuard>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(secret) = &guard.secret else {
        return Err(ApiError::Unavailable(format!(
            "endpoint disabled: no secret configured for {}",
            guard.header
        )));
    };

    let presented = req.headers().get(guard.header).and_then(|v| v.to_str().ok());
    secret.verify(presented).map_err(|e| {
        debug!(header = guard.header, error = %e, "shared secret rejected");
        ApiError::Unauthorized(format!("missing or invalid {} header", guard.header))
    })?;

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer tok.en"));
        assert_eq!(extract_bearer(&headers).unwrap(), "tok.en");
    }
}
