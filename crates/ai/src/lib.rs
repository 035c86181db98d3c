//! `skillpath-ai`
//!
//! **Responsibility:** the generation boundary.
//!
//! This crate turns a topic into a [`LearningPlan`] and nothing more:
//! - It knows nothing about jobs, storage or dispatch.
//! - Every failure is classified ([`GenerationError`]) so callers can record
//!   *why* a plan could not be produced.

pub mod client;
pub mod gemini;
pub mod parse;
pub mod plan;
pub mod prompt;

pub use client::{GenerationClient, StubGenerationClient};
pub use gemini::{GeminiClient, DEFAULT_MODEL};
pub use parse::parse_plan;
pub use plan::{GenerationError, LearningPlan, WeekUnit, MAX_WEEKS};
