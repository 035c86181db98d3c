use std::time::Duration;

use async_trait::async_trait;

use skillpath_core::Topic;

use crate::plan::{GenerationError, LearningPlan, WeekUnit};
use crate::prompt::DEFAULT_WEEKS;

/// Produces a learning plan for a topic.
///
/// Implementations may be slow and may fail; callers apply their own
/// timeout. Returned plans must already satisfy [`LearningPlan::validate`].
#[async_trait]
pub trait GenerationClient: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn generate(&self, topic: &Topic) -> Result<LearningPlan, GenerationError>;
}

/// Deterministic in-process client for dev and tests.
#[derive(Debug, Clone)]
pub struct StubGenerationClient {
    weeks: u32,
    delay: Option<Duration>,
}

impl Default for StubGenerationClient {
    fn default() -> Self {
        Self {
            weeks: DEFAULT_WEEKS,
            delay: None,
        }
    }
}

impl StubGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weeks(mut self, weeks: u32) -> Self {
        self.weeks = weeks;
        self
    }

    /// Sleep before answering (exercises timeouts and concurrency).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl GenerationClient for StubGenerationClient {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn generate(&self, topic: &Topic) -> Result<LearningPlan, GenerationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let weeks = (1..=self.weeks)
            .map(|week| {
                WeekUnit::new(
                    week,
                    format!("{topic}: part {week}"),
                    format!("Study and practice part {week} of {topic}."),
                )
            })
            .collect();

        LearningPlan::new(weeks)
    }
}
