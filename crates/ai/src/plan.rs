use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on plan length; anything longer is treated as a broken answer.
pub const MAX_WEEKS: usize = 52;

/// One unit of a learning plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekUnit {
    /// 1-based position in the plan.
    pub week: u32,

    /// Short heading for the week. Models commonly call this `topic`.
    #[serde(alias = "topic")]
    pub title: String,

    pub description: String,
}

impl WeekUnit {
    pub fn new(week: u32, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            week,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Generated artifact: an ordered sequence of week-units.
///
/// Serialized as a bare JSON array so it can be stored and served as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearningPlan {
    weeks: Vec<WeekUnit>,
}

impl LearningPlan {
    /// Build a plan, checking its shape.
    pub fn new(weeks: Vec<WeekUnit>) -> Result<Self, GenerationError> {
        let plan = Self { weeks };
        plan.validate()?;
        Ok(plan)
    }

    pub fn weeks(&self) -> &[WeekUnit] {
        &self.weeks
    }

    pub fn len(&self) -> usize {
        self.weeks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    pub fn into_weeks(self) -> Vec<WeekUnit> {
        self.weeks
    }

    /// Shape check: non-empty, bounded, weeks numbered `1..=n` in order,
    /// and non-blank text on every unit.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.weeks.is_empty() {
            return Err(GenerationError::malformed("plan has no weeks"));
        }
        if self.weeks.len() > MAX_WEEKS {
            return Err(GenerationError::malformed(format!(
                "plan has {} weeks (max {MAX_WEEKS})",
                self.weeks.len()
            )));
        }

        for (idx, unit) in self.weeks.iter().enumerate() {
            let expected = idx as u32 + 1;
            if unit.week != expected {
                return Err(GenerationError::malformed(format!(
                    "expected week {expected} at position {idx}, got week {}",
                    unit.week
                )));
            }
            if unit.title.trim().is_empty() {
                return Err(GenerationError::malformed(format!(
                    "week {} has an empty title",
                    unit.week
                )));
            }
            if unit.description.trim().is_empty() {
                return Err(GenerationError::malformed(format!(
                    "week {} has an empty description",
                    unit.week
                )));
            }
        }

        Ok(())
    }
}

/// Classified generation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl GenerationError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedOutput(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Stable machine-readable class, recorded alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Timeout(_) => "timeout",
            GenerationError::MalformedOutput(_) => "malformed_output",
            GenerationError::Upstream(_) => "upstream_error",
        }
    }
}
