//! Finalization: file-level metadata, hashes and searchable text.

use crate::chunk::{build_searchable_text, content_hash};
use crate::models::{ChunkMetadata, NewChunk, SourceDocument};

use super::{PipelineConfig, Synthesized};

pub(crate) fn run(
    doc: &SourceDocument,
    input: Synthesized,
    config: &PipelineConfig,
) -> Vec<NewChunk> {
    let summary = input.summary;
    input
        .chunks
        .into_iter()
        .enumerate()
        .map(|(i, draft)| {
            let metadata = ChunkMetadata {
                file_id: doc.file_id.clone(),
                original_filename: doc.original_filename.clone(),
                hash: content_hash(draft.text.as_bytes()),
                original_text: draft.text,
                doc_type: doc.doc_type.clone(),
                version: doc.version,
                chunk_index: i as u32,
                question: draft.question,
                themes: draft.themes,
                hypothetical_question: draft.hypothetical_question,
                primary_emotion: draft.primary_emotion,
                sentiment_score: draft.sentiment_score,
                holistic_summary: summary.clone(),
            };
            let searchable_text = build_searchable_text(
                &metadata.original_text,
                &metadata,
                &config.embed_fields,
                config.embed_summary,
            );
            NewChunk {
                searchable_text,
                metadata,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::DraftChunk;
    use super::*;
    use crate::models::EmbedField;

    #[test]
    fn file_metadata_and_hash_are_copied() {
        let doc = SourceDocument {
            file_id: "fid".to_string(),
            original_filename: "a.md".to_string(),
            doc_type: "fieldnotes".to_string(),
            version: 3,
            text: String::new(),
        };
        let input = Synthesized {
            chunks: vec![
                DraftChunk {
                    text: "first".to_string(),
                    hypothetical_question: Some("Q?".to_string()),
                    ..Default::default()
                },
                DraftChunk {
                    text: "second".to_string(),
                    ..Default::default()
                },
            ],
            summary: Some("S".to_string()),
        };
        let config = PipelineConfig {
            embed_fields: vec![EmbedField::HypotheticalQuestion],
            ..PipelineConfig::default()
        };

        let chunks = run(&doc, input, &config);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata.chunk_index, 1);
        assert_eq!(chunks[0].metadata.version, 3);
        assert_eq!(chunks[0].metadata.hash, content_hash(b"first"));
        assert_eq!(chunks[0].searchable_text, "first\n\nHypothetical Question: Q?");
        assert_eq!(chunks[1].searchable_text, "second");
        assert_eq!(chunks[1].metadata.holistic_summary.as_deref(), Some("S"));
    }
}
