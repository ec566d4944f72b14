use crate::models::QueryStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("document {document_id} has no indexed chunks")]
    NotFound { document_id: String },

    #[error("embedding dimension {actual} does not match indexed dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("query embedding model {query} does not match indexed model {indexed}")]
    ModelMismatch { indexed: String, query: String },

    #[error("invalid index entry: {0}")]
    InvalidEntry(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{capability} backend unavailable: {details}")]
    Unavailable {
        capability: &'static str,
        details: String,
    },

    #[error("invalid response from {capability}: {details}")]
    BadResponse {
        capability: &'static str,
        details: String,
    },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl CapabilityError {
    pub fn from_transport(capability: &'static str, error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() || error.is_request() {
            Self::Unavailable {
                capability,
                details: error.to_string(),
            }
        } else {
            Self::BadResponse {
                capability,
                details: error.to_string(),
            }
        }
    }
}

/// Caller-facing failures of the question-answering core.
///
/// An answer that the document cannot support is not a failure; it comes back
/// as an [`crate::Answer`] with `grounded == false`.
#[derive(Debug, Error)]
pub enum QaError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("document {document_id} is not indexed; upload or select a document")]
    DocumentNotIndexed { document_id: String },

    #[error("embedding dimension mismatch: index expects {expected}, capability produced {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("embedding model mismatch: document indexed with {indexed}, querying with {configured}")]
    EmbeddingModelMismatch { indexed: String, configured: String },

    #[error("stage {stage} timed out")]
    Timeout { stage: QueryStage },

    #[error("{capability} capability unavailable: {details}")]
    CapabilityUnavailable {
        capability: &'static str,
        details: String,
    },

    #[error(transparent)]
    Capability(CapabilityError),

    #[error(transparent)]
    Index(IndexError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl QaError {
    /// Whether the whole request may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CapabilityUnavailable { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::DocumentNotIndexed { .. } => "DOCUMENT_NOT_INDEXED",
            Self::EmbeddingDimensionMismatch { .. } => "EMBEDDING_DIMENSION_MISMATCH",
            Self::EmbeddingModelMismatch { .. } => "EMBEDDING_MODEL_MISMATCH",
            Self::Timeout { .. } => "TIMEOUT",
            Self::CapabilityUnavailable { .. } => "CAPABILITY_UNAVAILABLE",
            Self::Capability(_) => "CAPABILITY_ERROR",
            Self::Index(_) => "INDEX_ERROR",
            Self::Ingest(_) => "INGEST_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

impl From<IndexError> for QaError {
    fn from(value: IndexError) -> Self {
        match value {
            IndexError::NotFound { document_id } => Self::DocumentNotIndexed { document_id },
            IndexError::DimensionMismatch { expected, actual } => {
                Self::EmbeddingDimensionMismatch { expected, actual }
            }
            IndexError::ModelMismatch { indexed, query } => Self::EmbeddingModelMismatch {
                indexed,
                configured: query,
            },
            other => Self::Index(other),
        }
    }
}

impl From<CapabilityError> for QaError {
    fn from(value: CapabilityError) -> Self {
        match value {
            CapabilityError::Unavailable {
                capability,
                details,
            } => Self::CapabilityUnavailable {
                capability,
                details,
            },
            other => Self::Capability(other),
        }
    }
}

pub type Result<T, E = QaError> = std::result::Result<T, E>;
