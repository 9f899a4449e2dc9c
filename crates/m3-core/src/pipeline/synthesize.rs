//! Stage 3: one holistic summary per file.

use crate::error::M3Error;
use crate::llm::{clean_reply, ChatModel, StageRole};

use super::{stage_failure, Enriched};

const SYSTEM_PROMPT: &str = "You are a research assistant. Write a holistic summary of the \
document below in three to five sentences, covering its main themes and how they relate. \
Respond ONLY with the summary.";

pub(crate) async fn run(
    llm: &dyn ChatModel,
    input: &Enriched,
    char_limit: usize,
) -> Result<String, M3Error> {
    let joined = input
        .chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let text: String = joined.chars().take(char_limit).collect();

    let user_prompt = format!("Document:\n---\n{}", text);
    let reply = llm
        .chat(StageRole::Synthesize, SYSTEM_PROMPT, &user_prompt)
        .await
        .map_err(|e| stage_failure(StageRole::Synthesize, e.to_string()))?;

    let summary = clean_reply(&reply);
    if summary.is_empty() {
        return Err(stage_failure(StageRole::Synthesize, "empty summary"));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::super::DraftChunk;
    use super::*;

    struct Recorder(Mutex<String>);

    #[async_trait]
    impl ChatModel for Recorder {
        async fn chat(&self, _role: StageRole, _system: &str, user: &str) -> Result<String> {
            *self.0.lock().unwrap() = user.to_string();
            Ok("  The summary.  ".to_string())
        }
    }

    #[tokio::test]
    async fn input_is_truncated_to_the_limit() {
        let llm = Recorder(Mutex::new(String::new()));
        let input = Enriched {
            chunks: vec![
                DraftChunk {
                    text: "a".repeat(50),
                    ..Default::default()
                },
                DraftChunk {
                    text: "b".repeat(50),
                    ..Default::default()
                },
            ],
        };

        let summary = run(&llm, &input, 60).await.unwrap();

        assert_eq!(summary, "The summary.");
        let sent = llm.0.lock().unwrap().clone();
        let body = sent.split("---\n").nth(1).unwrap();
        assert_eq!(body.chars().count(), 60);
        assert!(body.ends_with(&"b".repeat(8)));
    }
}
