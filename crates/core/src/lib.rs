pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod evidence;
pub mod lexical;
pub mod llm;
pub mod locks;
pub mod models;
pub mod orchestrator;
pub mod remote;
pub mod retriever;
pub mod stores;
pub mod synthesizer;
pub mod traits;

pub use chunking::{chunk_text, normalize_whitespace, sentence_spans, ChunkingConfig};
pub use config::{
    LocatorConfig, QaConfig, RetrievalConfig, RetryPolicy, StageTimeouts, SynthesisConfig,
};
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{CapabilityError, IndexError, IngestError, QaError};
pub use evidence::EvidenceLocator;
pub use llm::{ExtractiveModel, GenerationRequest, LanguageModel, INSUFFICIENT_EVIDENCE};
pub use models::{
    new_document_id, Answer, Chunk, Document, DocumentIndex, DocumentRecord, HighlightedPassage,
    IndexingReport, QaResponse, QueryStage, RetrievedChunk, StageTiming, UNGROUNDED_ANSWER,
};
pub use orchestrator::QueryOrchestrator;
pub use remote::{OllamaClient, OllamaEmbedder, OllamaLanguageModel};
pub use retriever::Retriever;
pub use stores::LocalIndexStore;
pub use synthesizer::AnswerSynthesizer;
pub use traits::IndexStore;
