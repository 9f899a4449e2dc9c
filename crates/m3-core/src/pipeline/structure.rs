//! Stage 1: attach short thematic labels (open codes) to each unit.

use crate::chunk::word_count;
use crate::llm::{extract_json_array, ChatModel, StageRole};

use super::{StageLog, Stratified, Structured};

const MAX_LABELS: usize = 4;

const SYSTEM_PROMPT: &str = "You are a qualitative researcher performing open coding. Read the \
passage and produce 2-4 short thematic labels (2-4 words each) naming the topics, actions or \
concepts it contains. Respond ONLY with a JSON list of strings. \
Example: [\"fear of failure\", \"parental expectations\"]";

/// Labels parsed from a reply: trimmed, non-empty, at most four.
fn parse_labels(reply: &str) -> Option<Vec<String>> {
    let items = extract_json_array(reply)?;
    let labels: Vec<String> = items
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_LABELS)
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

pub(crate) async fn run(
    llm: &dyn ChatModel,
    input: Stratified,
    min_words: usize,
    log: &mut StageLog,
) -> Structured {
    let mut units = input.units;
    for (i, unit) in units.iter_mut().enumerate() {
        if word_count(&unit.text) < min_words {
            continue;
        }
        let user_prompt = format!("Passage to code:\n---\n{}", unit.text);
        match llm
            .chat(StageRole::Structure, SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(reply) => match parse_labels(&reply) {
                Some(labels) => unit.themes = Some(labels.join(", ")),
                None => log.warn(
                    StageRole::Structure,
                    format!("unit {}: response contained no labels", i),
                ),
            },
            Err(e) => log.warn(StageRole::Structure, format!("unit {}: {}", i, e)),
        }
    }
    Structured { units }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_capped_and_cleaned() {
        let labels = parse_labels(r#"["a", " b ", "", 7, "c", "d", "e"]"#).unwrap();
        assert_eq!(labels, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn no_string_labels_is_none() {
        assert!(parse_labels("[1, 2]").is_none());
        assert!(parse_labels("no json").is_none());
    }
}
