use skillpath_core::Topic;

/// Number of weeks requested from the model.
pub const DEFAULT_WEEKS: u32 = 8;

/// Curriculum prompt for a topic.
pub fn plan_prompt(topic: &Topic, weeks: u32) -> String {
    format!(
        "Act as an expert curriculum designer. Your task is to create a detailed, structured, \
         {weeks}-week learning roadmap for the skill: \"{topic}\".\n\
         The output MUST be a valid JSON array (not an object). Do not include any text or markdown formatting.\n\
         The array must contain exactly {weeks} objects, one per week, in order.\n\
         Each object must have the keys \"week\" (number, starting at 1), \"topic\" (short title) and \
         \"description\" (what to study and practice that week).",
        topic = topic.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_topic_and_length() {
        let prompt = plan_prompt(&Topic::parse("Rust").unwrap(), DEFAULT_WEEKS);
        assert!(prompt.contains("\"Rust\""));
        assert!(prompt.contains("8-week"));
    }
}
