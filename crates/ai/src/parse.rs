//! Parsing of raw model text into a [`LearningPlan`].

use serde_json::Value as JsonValue;

use crate::plan::{GenerationError, LearningPlan, WeekUnit};

/// Parse model output into a validated plan.
///
/// Accepts a bare JSON array or an object carrying a `weeklyPlan` array,
/// optionally wrapped in a markdown code fence.
pub fn parse_plan(raw: &str) -> Result<LearningPlan, GenerationError> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return Err(GenerationError::malformed("empty response"));
    }

    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| GenerationError::malformed(format!("invalid JSON: {e}")))?;

    let weeks = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("weeklyPlan") {
            Some(JsonValue::Array(items)) => items,
            _ => {
                return Err(GenerationError::malformed(
                    "expected a JSON array or an object with a `weeklyPlan` array",
                ));
            }
        },
        other => {
            return Err(GenerationError::malformed(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            )));
        }
    };

    let weeks = weeks
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            serde_json::from_value::<WeekUnit>(item)
                .map_err(|e| GenerationError::malformed(format!("week at position {idx}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    LearningPlan::new(weeks)
}

fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (e.g. `json`) up to the first newline.
        text = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => rest.trim_start_matches("json"),
        };
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text);
    }
    text.trim()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
