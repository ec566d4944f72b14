use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::error::QaError;
use crate::lexical::idf_scores;
use crate::models::{Embedding, RetrievedChunk, ScoredChunk};
use crate::traits::IndexStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const RRF_K: f64 = 60.0;
const SIMILARITY_WEIGHT: f64 = 0.01;

/// Ranks a document's chunks against a question.
///
/// The store returns the `candidate_pool` nearest chunks by cosine similarity;
/// those are re-ranked lexically, and the two rankings are fused with weighted
/// reciprocal-rank fusion.
pub struct Retriever<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: RetrievalConfig,
}

impl<S, E> Retriever<S, E>
where
    S: IndexStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Embeds `question` and returns up to `k` ranked chunks of `document_id`.
    ///
    /// An unknown document fails with [`QaError::DocumentNotIndexed`]; a known
    /// document always yields at least one chunk.
    pub async fn retrieve(
        &self,
        document_id: &str,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, QaError> {
        let record = self
            .store
            .record(document_id)
            .await
            .ok_or_else(|| QaError::DocumentNotIndexed {
                document_id: document_id.to_string(),
            })?;

        let model = self.embedder.model_id();
        if record.embedding_model != model {
            return Err(QaError::EmbeddingModelMismatch {
                indexed: record.embedding_model,
                configured: model,
            });
        }

        let vector = self.embedder.embed(question).await?;
        if vector.len() != self.embedder.dimensions() {
            return Err(QaError::EmbeddingDimensionMismatch {
                expected: self.embedder.dimensions(),
                actual: vector.len(),
            });
        }

        let pool = self.config.candidate_pool.max(k);
        let candidates = self
            .store
            .query(document_id, &Embedding { model, vector }, pool)
            .await?;
        debug!(document_id, candidates = candidates.len(), "vector candidates fetched");

        Ok(self.fuse(question, candidates, k))
    }

    fn fuse(&self, question: &str, candidates: Vec<ScoredChunk>, k: usize) -> Vec<RetrievedChunk> {
        let texts = candidates
            .iter()
            .map(|candidate| candidate.chunk.text.as_str())
            .collect::<Vec<_>>();
        let lexical = idf_scores(question, &texts);

        let mut lexical_order = (0..candidates.len())
            .filter(|&index| lexical[index] > 0.0)
            .collect::<Vec<_>>();
        lexical_order.sort_by(|&left, &right| {
            lexical[right]
                .total_cmp(&lexical[left])
                .then_with(|| candidates[left].chunk.ordinal.cmp(&candidates[right].chunk.ordinal))
        });

        let mut fused = HashMap::<usize, f64>::new();
        apply_rrf(&mut fused, 0..candidates.len(), self.config.vector_weight);
        apply_rrf(&mut fused, lexical_order.into_iter(), self.config.lexical_weight);

        let mut ranked = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| {
                let score = fused.get(&index).copied().unwrap_or(0.0)
                    + f64::from(candidate.similarity) * SIMILARITY_WEIGHT;
                (score, lexical[index], candidate)
            })
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| left.2.chunk.ordinal.cmp(&right.2.chunk.ordinal))
        });

        ranked
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(position, (score, lexical_score, candidate))| RetrievedChunk {
                chunk: candidate.chunk,
                score,
                rank: position + 1,
                similarity: candidate.similarity,
                lexical_score,
            })
            .collect()
    }
}

fn apply_rrf(target: &mut HashMap<usize, f64>, order: impl Iterator<Item = usize>, weight: f64) {
    for (position, index) in order.enumerate() {
        let rank_component = 1.0 / (RRF_K + (position as f64 + 1.0));
        *target.entry(index).or_default() += weight * rank_component;
    }
}
