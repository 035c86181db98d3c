use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use thiserror::Error;

use skillpath_core::Identity;

use crate::claims::{IdentityClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("token subject is empty")]
    EmptySubject,

    #[error("invalid shared secret")]
    InvalidSecret,

    #[error("invalid verifier configuration: {0}")]
    Config(String),
}

/// Turns a bearer token into a caller identity.
pub trait IdentityVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError>;
}

fn base_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    // The time window is checked by `validate_claims` against the caller's clock.
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = ["exp", "sub"].into_iter().map(String::from).collect();
    validation
}

fn decode_identity(
    token: &str,
    key: &DecodingKey,
    validation: &Validation,
    now: DateTime<Utc>,
) -> Result<Identity, AuthError> {
    let data = jsonwebtoken::decode::<IdentityClaims>(token, key, validation)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    validate_claims(&data.claims, now)?;
    Identity::new(data.claims.sub).map_err(|_| AuthError::EmptySubject)
}

/// HMAC-SHA256 verifier (shared signing secret).
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation: base_validation(Algorithm::HS256),
        }
    }
}

impl IdentityVerifier for Hs256JwtValidator {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        decode_identity(token, &self.key, &self.validation, now)
    }
}

/// RSA-SHA256 verifier for tokens minted by an external identity provider.
pub struct Rs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Rs256JwtValidator {
    /// `public_key_pem`: the provider's RSA public key. When `issuer` is set,
    /// tokens must carry a matching `iss`.
    pub fn new(public_key_pem: &str, issuer: Option<&str>) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::Config(format!("bad RSA public key: {e}")))?;

        let mut validation = base_validation(Algorithm::RS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self { key, validation })
    }
}

impl IdentityVerifier for Rs256JwtValidator {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        decode_identity(token, &self.key, &self.validation, now)
    }
}
