use sha2::{Digest, Sha256};

use crate::jwt::AuthError;

/// Shared secret guarding worker and scheduler entry points.
///
/// Only the SHA-256 digest is kept; presented values are hashed and compared
/// over the full digest so timing does not reveal a matching prefix.
#[derive(Clone)]
pub struct SharedSecret {
    digest: [u8; 32],
}

impl SharedSecret {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AuthError::Config("shared secret must not be empty".into()));
        }
        Ok(Self {
            digest: Sha256::digest(secret).into(),
        })
    }

    pub fn verify(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let presented = presented.ok_or(AuthError::Missing)?;
        let candidate: [u8; 32] = Sha256::digest(presented.as_bytes()).into();

        let diff = self
            .digest
            .iter()
            .zip(candidate.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));

        if diff == 0 {
            Ok(())
        } else {
            Err(AuthError::InvalidSecret)
        }
    }
}

impl core::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}
