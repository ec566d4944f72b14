use crate::chunking::ChunkingConfig;
use crate::error::QaError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Nearest neighbours pulled from the store before lexical fusion.
    pub candidate_pool: usize,
    pub vector_weight: f64,
    pub lexical_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            candidate_pool: 20,
            vector_weight: 0.6,
            lexical_weight: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub max_evidence_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_evidence_chars: 12_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocatorConfig {
    pub max_passages: usize,
    pub max_passages_per_chunk: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_passages: 5,
            max_passages_per_chunk: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageTimeouts {
    pub ingest_ms: u64,
    pub retrieve_ms: u64,
    pub synthesize_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            ingest_ms: 120_000,
            retrieve_ms: 10_000,
            synthesize_ms: 60_000,
        }
    }
}

impl StageTimeouts {
    pub fn ingest(&self) -> Duration {
        Duration::from_millis(self.ingest_ms)
    }

    pub fn retrieve(&self) -> Duration {
        Duration::from_millis(self.retrieve_ms)
    }

    pub fn synthesize(&self) -> Duration {
        Duration::from_millis(self.synthesize_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QaConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub synthesis: SynthesisConfig,
    pub locator: LocatorConfig,
    pub timeouts: StageTimeouts,
    pub retry: RetryPolicy,
}

impl QaConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, QaError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            QaError::InvalidConfig(format!("cannot read {}: {error}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            QaError::InvalidConfig(format!("cannot parse {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QaError> {
        self.chunking
            .validate()
            .map_err(|error| QaError::InvalidConfig(error.to_string()))?;

        if self.retrieval.top_k == 0 {
            return Err(QaError::InvalidConfig("top_k must be positive".to_string()));
        }
        if self.retrieval.candidate_pool < self.retrieval.top_k {
            return Err(QaError::InvalidConfig(format!(
                "candidate_pool {} is smaller than top_k {}",
                self.retrieval.candidate_pool, self.retrieval.top_k
            )));
        }
        if self.retrieval.vector_weight < 0.0
            || self.retrieval.lexical_weight < 0.0
            || self.retrieval.vector_weight + self.retrieval.lexical_weight <= 0.0
        {
            return Err(QaError::InvalidConfig(
                "fusion weights must be non-negative and not both zero".to_string(),
            ));
        }
        if self.locator.max_passages == 0 || self.locator.max_passages_per_chunk == 0 {
            return Err(QaError::InvalidConfig(
                "passage caps must be positive".to_string(),
            ));
        }
        if self.timeouts.ingest_ms == 0
            || self.timeouts.retrieve_ms == 0
            || self.timeouts.synthesize_ms == 0
        {
            return Err(QaError::InvalidConfig("timeouts must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(QaError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
