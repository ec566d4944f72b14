use crate::embeddings::cosine_similarity;
use crate::error::IndexError;
use crate::locks::DocumentLocks;
use crate::models::{DocumentIndex, DocumentRecord, Embedding, ScoredChunk};
use crate::traits::IndexStore;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Exact cosine-similarity index held in memory, optionally mirrored to one JSON
/// file per document so it survives a restart.
///
/// Each document's entries live behind one `Arc`; `put` builds the replacement
/// fully and swaps the pointer under the write lock, and queries clone the
/// pointer and score outside the lock.
#[derive(Debug, Default)]
pub struct LocalIndexStore {
    root: Option<PathBuf>,
    documents: RwLock<HashMap<String, Arc<DocumentIndex>>>,
    writers: DocumentLocks,
}

impl LocalIndexStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens (creating if needed) a persistent store under `root` and loads every
    /// document file found there. Unreadable files are skipped with a warning.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut documents = HashMap::new();
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match load_document(&path).await {
                Ok(index) => {
                    documents.insert(index.document_id().to_string(), Arc::new(index));
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping unreadable index file");
                }
            }
        }

        debug!(root = %root.display(), documents = documents.len(), "index store opened");
        Ok(Self {
            root: Some(root),
            documents: RwLock::new(documents),
            writers: DocumentLocks::new(),
        })
    }

    fn document_path(&self, document_id: &str) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        Some(root.join(format!("{:x}.json", hasher.finalize())))
    }

    async fn persist(&self, index: &DocumentIndex) -> Result<(), IndexError> {
        let Some(path) = self.document_path(index.document_id()) else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec(index)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn unpersist(&self, document_id: &str) -> Result<(), IndexError> {
        let Some(path) = self.document_path(document_id) else {
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

async fn load_document(path: &Path) -> Result<DocumentIndex, IndexError> {
    let bytes = fs::read(path).await?;
    let index: DocumentIndex = serde_json::from_slice(&bytes)?;
    validate(&index)?;
    Ok(index)
}

fn validate(index: &DocumentIndex) -> Result<(), IndexError> {
    let dimensions = index.record.dimensions;
    if dimensions == 0 {
        return Err(IndexError::InvalidEntry(format!(
            "document {} declares zero embedding dimensions",
            index.document_id()
        )));
    }

    for (position, entry) in index.chunks.iter().enumerate() {
        if entry.chunk.document_id != index.record.document_id {
            return Err(IndexError::InvalidEntry(format!(
                "chunk {} belongs to {}, not {}",
                entry.chunk.chunk_id, entry.chunk.document_id, index.record.document_id
            )));
        }
        if entry.chunk.ordinal as usize != position {
            return Err(IndexError::InvalidEntry(format!(
                "chunk {} has ordinal {} at position {position}",
                entry.chunk.chunk_id, entry.chunk.ordinal
            )));
        }
        if entry.embedding.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                actual: entry.embedding.len(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl IndexStore for LocalIndexStore {
    async fn put(&self, index: DocumentIndex) -> Result<(), IndexError> {
        if index.chunks.is_empty() {
            self.delete_document(index.document_id()).await?;
            return Ok(());
        }
        validate(&index)?;

        let document_id = index.document_id().to_string();
        let _writer = self.writers.acquire(&document_id).await;
        self.persist(&index).await?;

        let chunk_count = index.chunks.len();
        self.documents
            .write()
            .await
            .insert(document_id.clone(), Arc::new(index));
        debug!(document_id = %document_id, chunk_count, "document index replaced");
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, IndexError> {
        let _writer = self.writers.acquire(document_id).await;
        self.unpersist(document_id).await?;
        let removed = self.documents.write().await.remove(document_id).is_some();
        Ok(removed)
    }

    async fn query(
        &self,
        document_id: &str,
        query: &Embedding,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let index = self
            .documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| IndexError::NotFound {
                document_id: document_id.to_string(),
            })?;

        if query.model != index.record.embedding_model {
            return Err(IndexError::ModelMismatch {
                indexed: index.record.embedding_model.clone(),
                query: query.model.clone(),
            });
        }
        if query.vector.len() != index.record.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: index.record.dimensions,
                actual: query.vector.len(),
            });
        }

        let mut scored: Vec<ScoredChunk> = index
            .chunks
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                similarity: cosine_similarity(&entry.embedding, &query.vector),
            })
            .collect();
        scored.sort_by(|left, right| {
            right
                .similarity
                .total_cmp(&left.similarity)
                .then_with(|| left.chunk.ordinal.cmp(&right.chunk.ordinal))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn record(&self, document_id: &str) -> Option<DocumentRecord> {
        self.documents
            .read()
            .await
            .get(document_id)
            .map(|index| index.record.clone())
    }

    async fn documents(&self) -> Vec<DocumentRecord> {
        let mut records: Vec<DocumentRecord> = self
            .documents
            .read()
            .await
            .values()
            .map(|index| index.record.clone())
            .collect();
        records.sort_by(|left, right| left.document_id.cmp(&right.document_id));
        records
    }
}
