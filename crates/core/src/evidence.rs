use crate::chunking::sentence_spans;
use crate::config::LocatorConfig;
use crate::lexical::{shared_terms, term_set};
use crate::models::{Answer, Chunk, HighlightedPassage};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// Maps an answer back to verbatim sentences of the chunks it cites.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceLocator {
    config: LocatorConfig,
}

struct Candidate {
    span: Range<usize>,
    shared: usize,
    precision: f64,
}

impl EvidenceLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Highlighted passages for a grounded answer, in citation order.
    ///
    /// Each passage is a whole sentence of a cited chunk sharing content terms with
    /// the answer; per chunk the best `max_passages_per_chunk` are kept and reported
    /// in document order, up to `max_passages` overall. Ungrounded answers get none.
    pub fn locate(
        &self,
        answer: &Answer,
        chunks: &HashMap<String, Chunk>,
    ) -> Vec<HighlightedPassage> {
        if !answer.grounded {
            return Vec::new();
        }

        let answer_terms = term_set(&answer.text);
        if answer_terms.is_empty() {
            return Vec::new();
        }

        let mut passages = Vec::new();
        let mut emitted = Vec::<Range<usize>>::new();

        for chunk_id in &answer.chunk_ids {
            if passages.len() >= self.config.max_passages {
                break;
            }
            let Some(chunk) = chunks.get(chunk_id) else {
                continue;
            };

            for span in self.best_spans(&chunk.text, &answer_terms) {
                if passages.len() >= self.config.max_passages {
                    break;
                }
                let start = chunk.start + span.start;
                let end = chunk.start + span.end;
                if emitted
                    .iter()
                    .any(|span| span.start <= start && end <= span.end)
                {
                    continue;
                }
                emitted.push(start..end);
                passages.push(HighlightedPassage {
                    chunk_id: chunk.chunk_id.clone(),
                    start,
                    end,
                    text: chunk.text[span].to_string(),
                });
            }
        }

        passages
    }

    fn best_spans(&self, text: &str, answer_terms: &BTreeSet<String>) -> Vec<Range<usize>> {
        let mut candidates = sentence_spans(text)
            .into_iter()
            .filter_map(|span| {
                let sentence_terms = term_set(&text[span.clone()]);
                let shared = shared_terms(answer_terms, &sentence_terms);
                (shared > 0).then(|| Candidate {
                    precision: shared as f64 / sentence_terms.len() as f64,
                    span,
                    shared,
                })
            })
            .collect::<Vec<_>>();

        candidates.sort_by(|left, right| {
            right
                .shared
                .cmp(&left.shared)
                .then_with(|| right.precision.total_cmp(&left.precision))
                .then_with(|| left.span.start.cmp(&right.span.start))
        });
        candidates.truncate(self.config.max_passages_per_chunk);
        candidates.sort_by_key(|candidate| candidate.span.start);
        candidates.into_iter().map(|candidate| candidate.span).collect()
    }
}
