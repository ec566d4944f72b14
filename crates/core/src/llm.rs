use crate::chunking::sentence_spans;
use crate::error::CapabilityError;
use crate::lexical::{coverage, shared_terms, term_set};
use async_trait::async_trait;

pub const INSUFFICIENT_EVIDENCE: &str = "INSUFFICIENT_EVIDENCE";

pub fn citation_marker(chunk_id: &str) -> String {
    format!("[[chunk:{chunk_id}]]")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceBlock {
    pub chunk_id: String,
    pub text: String,
}

/// Typed prompt context handed to a [`LanguageModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub question: String,
    pub evidence: Vec<EvidenceBlock>,
}

impl GenerationRequest {
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::from(
            "You answer questions about a single document using only the evidence below.\n\
             Do not use outside knowledge. Every statement must cite the evidence it comes from \
             with a marker of the form [[chunk:<id>]].\n",
        );
        prompt.push_str(&format!(
            "If the evidence does not answer the question, reply with exactly {INSUFFICIENT_EVIDENCE}.\n\n"
        ));
        prompt.push_str("Evidence:\n");
        for block in &self.evidence {
            prompt.push_str(&citation_marker(&block.chunk_id));
            prompt.push('\n');
            prompt.push_str(block.text.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("Question: ");
        prompt.push_str(self.question.trim());
        prompt.push_str("\nAnswer:");
        prompt
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> String;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError>;
}

/// Offline model that answers with the evidence sentence best covering the
/// question's content terms, cited in the marker format.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveModel {
    pub min_coverage: f64,
}

impl Default for ExtractiveModel {
    fn default() -> Self {
        Self { min_coverage: 0.3 }
    }
}

impl ExtractiveModel {
    pub fn answer(&self, request: &GenerationRequest) -> String {
        let question_terms = term_set(&request.question);
        let mut best: Option<(usize, f64, &str, &str)> = None;

        for block in &request.evidence {
            for span in sentence_spans(&block.text) {
                let sentence = &block.text[span];
                let sentence_terms = term_set(sentence);
                let shared = shared_terms(&question_terms, &sentence_terms);
                if shared == 0 {
                    continue;
                }
                let covered = coverage(&question_terms, &sentence_terms);
                let better = match best {
                    None => true,
                    Some((best_shared, best_covered, _, _)) => {
                        shared > best_shared || (shared == best_shared && covered > best_covered)
                    }
                };
                if better {
                    best = Some((shared, covered, sentence, block.chunk_id.as_str()));
                }
            }
        }

        match best {
            Some((_, covered, sentence, chunk_id)) if covered >= self.min_coverage => {
                format!("{sentence} {}", citation_marker(chunk_id))
            }
            _ => INSUFFICIENT_EVIDENCE.to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for ExtractiveModel {
    fn model_id(&self) -> String {
        "extractive".to_string()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        Ok(self.answer(request))
    }
}
