use crate::error::IndexError;
use crate::models::{DocumentIndex, DocumentRecord, Embedding, ScoredChunk};
use async_trait::async_trait;

/// Per-document chunk index.
///
/// `put` swaps a document's entries atomically: concurrent readers see either the
/// complete old set or the complete new set, never a mix.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn put(&self, index: DocumentIndex) -> Result<(), IndexError>;

    /// Returns whether anything was removed. Removing an absent document is not an error.
    async fn delete_document(&self, document_id: &str) -> Result<bool, IndexError>;

    /// The `k` chunks of `document_id` most similar to `query`, most similar first,
    /// ties broken by ascending ordinal.
    async fn query(
        &self,
        document_id: &str,
        query: &Embedding,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn record(&self, document_id: &str) -> Option<DocumentRecord>;

    async fn documents(&self) -> Vec<DocumentRecord>;
}
