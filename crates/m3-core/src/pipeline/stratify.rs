//! Stage 0: split an interview transcript into question/answer units.

use crate::error::M3Error;
use crate::llm::{extract_json_array, ChatModel, StageRole};

use super::{stage_failure, Stratified, TextUnit};

const SYSTEM_PROMPT: &str = "You segment interview transcripts. Split the transcript into the \
interviewer's questions and the interviewee's answers, keeping the answer text verbatim. \
Respond ONLY with a JSON array of objects with the keys \"question\" and \"answer\". \
Example: [{\"question\": \"Where did you grow up?\", \"answer\": \"In a small town...\"}]";

pub(crate) async fn run(llm: &dyn ChatModel, text: &str) -> Result<Stratified, M3Error> {
    let user_prompt = format!("Transcript:\n---\n{}", text);
    let reply = llm
        .chat(StageRole::Stratify, SYSTEM_PROMPT, &user_prompt)
        .await
        .map_err(|e| stage_failure(StageRole::Stratify, e.to_string()))?;

    let items = extract_json_array(&reply)
        .ok_or_else(|| stage_failure(StageRole::Stratify, "response contained no JSON array"))?;

    let units: Vec<TextUnit> = items
        .iter()
        .filter_map(|item| {
            let answer = item.get("answer")?.as_str()?.trim();
            if answer.is_empty() {
                return None;
            }
            let question = item
                .get("question")
                .and_then(|q| q.as_str())
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string);
            Some(TextUnit {
                text: answer.to_string(),
                question,
                themes: None,
            })
        })
        .collect();

    if units.is_empty() {
        return Err(stage_failure(
            StageRole::Stratify,
            "no question/answer pairs in response",
        ));
    }

    Ok(Stratified { units })
}
