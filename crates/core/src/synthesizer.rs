use crate::chunking::normalize_whitespace;
use crate::config::SynthesisConfig;
use crate::error::QaError;
use crate::llm::{EvidenceBlock, GenerationRequest, LanguageModel, INSUFFICIENT_EVIDENCE};
use crate::models::{Answer, RetrievedChunk};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const MARKER_OPEN: &str = "[[chunk:";
const MARKER_CLOSE: &str = "]]";

/// Produces answers that rest only on the retrieved chunks.
///
/// The model sees nothing but the question and the evidence blocks. Output
/// without a valid `[[chunk:<id>]]` citation, or carrying the insufficient-evidence
/// reply, becomes an ungrounded answer.
pub struct AnswerSynthesizer<M: ?Sized> {
    model: Arc<M>,
    config: SynthesisConfig,
}

impl<M> AnswerSynthesizer<M>
where
    M: LanguageModel + ?Sized,
{
    pub fn new(model: Arc<M>, config: SynthesisConfig) -> Self {
        Self { model, config }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        retrieved: &[RetrievedChunk],
    ) -> Result<Answer, QaError> {
        if retrieved.is_empty() {
            debug!("no evidence retrieved; answer is ungrounded");
            return Ok(Answer::ungrounded());
        }

        let request = self.build_request(question, retrieved);
        let output = self.model.generate(&request).await?;

        if output.contains(INSUFFICIENT_EVIDENCE) {
            debug!("model reported insufficient evidence");
            return Ok(Answer::ungrounded());
        }

        let allowed = request
            .evidence
            .iter()
            .map(|block| block.chunk_id.as_str())
            .collect::<HashSet<_>>();
        let (text, cited) = extract_citations(&output);
        let chunk_ids = cited
            .into_iter()
            .filter(|chunk_id| allowed.contains(chunk_id.as_str()))
            .collect::<Vec<_>>();

        if chunk_ids.is_empty() || text.is_empty() {
            warn!(
                model = %self.model.model_id(),
                "model output carried no valid evidence citation; treating as ungrounded"
            );
            return Ok(Answer::ungrounded());
        }

        Ok(Answer {
            text,
            chunk_ids,
            grounded: true,
        })
    }

    fn build_request(&self, question: &str, retrieved: &[RetrievedChunk]) -> GenerationRequest {
        let mut budget = self.config.max_evidence_chars;
        let mut evidence = Vec::new();
        for (position, hit) in retrieved.iter().enumerate() {
            let size = hit.chunk.text.chars().count();
            if position > 0 && size > budget {
                break;
            }
            budget = budget.saturating_sub(size);
            evidence.push(EvidenceBlock {
                chunk_id: hit.chunk.chunk_id.clone(),
                text: hit.chunk.text.clone(),
            });
        }

        GenerationRequest {
            question: question.trim().to_string(),
            evidence,
        }
    }
}

/// Splits model output into answer text with markers removed and the cited ids,
/// deduplicated in order of first appearance.
pub fn extract_citations(output: &str) -> (String, Vec<String>) {
    let mut text = String::with_capacity(output.len());
    let mut cited: Vec<String> = Vec::new();
    let mut rest = output;

    while let Some(open) = rest.find(MARKER_OPEN) {
        text.push_str(&rest[..open]);
        let after_open = &rest[open + MARKER_OPEN.len()..];
        match after_open.find(MARKER_CLOSE) {
            Some(close) => {
                for chunk_id in after_open[..close].split(',') {
                    let chunk_id = chunk_id.trim().trim_start_matches(MARKER_OPEN).trim();
                    if !chunk_id.is_empty() && !cited.iter().any(|seen| seen == chunk_id) {
                        cited.push(chunk_id.to_string());
                    }
                }
                rest = &after_open[close + MARKER_CLOSE.len()..];
            }
            None => {
                rest = "";
            }
        }
    }
    text.push_str(rest);

    let text = normalize_whitespace(&text)
        .replace(" .", ".")
        .replace(" ,", ",");
    (text.trim().to_string(), cited)
}
