use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const UNGROUNDED_ANSWER: &str =
    "I cannot answer this question from the information available in the document.";

pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn text_checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extracted text of one uploaded document, ready to be chunked.
#[derive(Debug, Clone)]
pub struct Document {
    pub document_id: String,
    pub title: Option<String>,
    pub text: String,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            title: None,
            text: text.into(),
            ingested_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub title: Option<String>,
    pub checksum: String,
    pub char_len: usize,
    pub chunk_count: usize,
    pub embedding_model: String,
    pub dimensions: usize,
    /// Fingerprint of the chunking parameters the chunks were produced with.
    pub chunking: String,
    pub ingested_at: DateTime<Utc>,
}

/// A retrieval unit. `text` is always `document_text[start..end]`; offsets are
/// byte offsets on char boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Everything the index holds for one document; swapped in and out as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentIndex {
    pub record: DocumentRecord,
    pub chunks: Vec<IndexedChunk>,
}

impl DocumentIndex {
    pub fn document_id(&self) -> &str {
        &self.record.document_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub model: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Fused relevance; non-increasing by rank.
    pub score: f64,
    /// 1-based.
    pub rank: usize,
    pub similarity: f32,
    pub lexical_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub chunk_ids: Vec<String>,
    pub grounded: bool,
}

impl Answer {
    pub fn ungrounded() -> Self {
        Self {
            text: UNGROUNDED_ANSWER.to_string(),
            chunk_ids: Vec::new(),
            grounded: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HighlightedPassage {
    pub chunk_id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Idle,
    Ingesting,
    Retrieving,
    Synthesizing,
    Locating,
    Done,
    Failed,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Ingesting => "ingesting",
            Self::Retrieving => "retrieving",
            Self::Synthesizing => "synthesizing",
            Self::Locating => "locating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: QueryStage,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResponse {
    pub document_id: String,
    pub question: String,
    pub answer: Answer,
    pub highlights: Vec<HighlightedPassage>,
    pub retrieved: Vec<RetrievedChunk>,
    pub stages: Vec<StageTiming>,
}

impl QaResponse {
    pub fn grounded(&self) -> bool {
        self.answer.grounded
    }

    pub fn highlighted_passages(&self) -> Vec<String> {
        self.highlights
            .iter()
            .map(|passage| passage.text.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingReport {
    pub document_id: String,
    pub chunk_count: usize,
    pub unchanged: bool,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(text_checksum("abc"), text_checksum("abc"));
        assert_ne!(text_checksum("abc"), text_checksum("abd"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(new_document_id(), new_document_id());
    }

    #[test]
    fn response_exposes_passage_texts() {
        let response = QaResponse {
            document_id: "doc-1".to_string(),
            question: "q".to_string(),
            answer: Answer::ungrounded(),
            highlights: vec![HighlightedPassage {
                chunk_id: "0000-a".to_string(),
                start: 0,
                end: 3,
                text: "The".to_string(),
            }],
            retrieved: Vec::new(),
            stages: Vec::new(),
        };
        assert_eq!(response.highlighted_passages(), vec!["The".to_string()]);
        assert!(!response.grounded());
    }
}
