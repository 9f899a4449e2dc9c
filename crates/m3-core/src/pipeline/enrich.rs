//! Stage 2: window each unit and add per-chunk enrichment.
//!
//! Every window gets a hypothetical question it could answer. With
//! affective analysis on, it also gets a primary emotion and a sentiment
//! score in `[-1, 1]`. Failures leave the fields unset.

use crate::chunk::split_windows;
use crate::error::M3Error;
use crate::llm::{clean_reply, extract_json_object, ChatModel, StageRole};

use super::{stage_failure, DraftChunk, Enriched, PipelineConfig, StageLog, Structured};

const QUESTION_PROMPT: &str = "You read a passage from a research corpus and write the single \
question a researcher could ask that this passage answers. Respond ONLY with the question.";

const AFFECT_PROMPT: &str = "You perform affective analysis of a passage. Identify its primary \
emotion and rate its overall sentiment from -1.0 (very negative) to 1.0 (very positive). \
Respond ONLY with a JSON object with the keys \"primary_emotion\", \"sentiment_score\" and \
\"emotion_justification\".";

pub(crate) async fn run(
    llm: &dyn ChatModel,
    input: Structured,
    config: &PipelineConfig,
    log: &mut StageLog,
) -> Result<Enriched, M3Error> {
    let mut chunks = Vec::new();
    for unit in &input.units {
        for text in split_windows(&unit.text, config.window_words, config.overlap_words) {
            chunks.push(DraftChunk {
                text,
                question: unit.question.clone(),
                themes: unit.themes.clone(),
                ..Default::default()
            });
        }
    }

    if chunks.is_empty() {
        return Err(stage_failure(
            StageRole::Enrich,
            "splitting produced no chunks",
        ));
    }

    for (i, chunk) in chunks.iter_mut().enumerate() {
        let user_prompt = format!("Passage:\n---\n{}", chunk.text);
        match llm
            .chat(StageRole::Enrich, QUESTION_PROMPT, &user_prompt)
            .await
        {
            Ok(reply) => {
                let question = clean_reply(&reply);
                if question.is_empty() {
                    log.warn(StageRole::Enrich, format!("chunk {}: empty question", i));
                } else {
                    chunk.hypothetical_question = Some(question);
                }
            }
            Err(e) => log.warn(StageRole::Enrich, format!("chunk {}: {}", i, e)),
        }

        if config.affective_analysis {
            match llm.chat(StageRole::Enrich, AFFECT_PROMPT, &user_prompt).await {
                Ok(reply) => match parse_affect(&reply) {
                    Some((emotion, score)) => {
                        chunk.primary_emotion = Some(emotion);
                        chunk.sentiment_score = score;
                    }
                    None => log.warn(
                        StageRole::Enrich,
                        format!("chunk {}: unreadable affect response", i),
                    ),
                },
                Err(e) => log.warn(StageRole::Enrich, format!("chunk {}: {}", i, e)),
            }
        }
    }

    Ok(Enriched { chunks })
}

fn parse_affect(reply: &str) -> Option<(String, Option<f64>)> {
    let obj = extract_json_object(reply)?;
    let emotion = obj
        .get("primary_emotion")?
        .as_str()?
        .trim()
        .to_lowercase();
    if emotion.is_empty() {
        return None;
    }
    let score = obj
        .get("sentiment_score")
        .and_then(|v| v.as_f64())
        .map(|s| s.clamp(-1.0, 1.0));
    Some((emotion, score))
}

/// Fallback when the stage fails: plain windows over the raw document.
pub(crate) fn naive_split(text: &str, config: &PipelineConfig) -> Enriched {
    let chunks = split_windows(text, config.window_words, config.overlap_words)
        .into_iter()
        .map(|text| DraftChunk {
            text,
            ..Default::default()
        })
        .collect();
    Enriched { chunks }
}
