//! `skillpath-core`: domain building blocks shared by every crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the validated request key, and the domain error model.

pub mod error;
pub mod id;
pub mod key;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use key::{Identity, OwnerKey, Topic, MAX_TOPIC_LEN};
