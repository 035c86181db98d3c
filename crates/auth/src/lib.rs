//! `skillpath-auth`: authentication boundary.
//!
//! Two concerns, both decoupled from HTTP and storage:
//! - caller identity: bearer token → [`Identity`](skillpath_core::Identity)
//! - worker access: shared-secret header verification

pub mod claims;
pub mod jwt;
pub mod secret;

pub use claims::{IdentityClaims, TokenValidationError, validate_claims};
pub use jwt::{AuthError, Hs256JwtValidator, IdentityVerifier, Rs256JwtValidator};
pub use secret::SharedSecret;
