use crate::chunking::chunk_text;
use crate::config::{QaConfig, RetryPolicy};
use crate::embeddings::Embedder;
use crate::error::{IngestError, QaError};
use crate::evidence::EvidenceLocator;
use crate::llm::LanguageModel;
use crate::locks::DocumentLocks;
use crate::models::{
    text_checksum, Chunk, Document, DocumentIndex, DocumentRecord, IndexedChunk, IndexingReport,
    QaResponse, QueryStage, StageTiming,
};
use crate::retriever::Retriever;
use crate::synthesizer::AnswerSynthesizer;
use crate::traits::IndexStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Entry point of the core: ingestion plus the retrieve, synthesize, locate cycle.
///
/// Capability calls run under a per-stage timeout. Unavailable backends are
/// retried with bounded backoff inside that timeout. When a stage times out its
/// future is dropped, which aborts any in-flight backend request.
pub struct QueryOrchestrator<S: ?Sized, E: ?Sized, M: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    retriever: Retriever<S, E>,
    synthesizer: AnswerSynthesizer<M>,
    locator: EvidenceLocator,
    config: QaConfig,
    ingest_locks: DocumentLocks,
}

impl<S, E, M> QueryOrchestrator<S, E, M>
where
    S: IndexStore + ?Sized,
    E: Embedder + ?Sized,
    M: LanguageModel + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        embedder: Arc<E>,
        model: Arc<M>,
        config: QaConfig,
    ) -> Result<Self, QaError> {
        config.validate()?;
        Ok(Self {
            retriever: Retriever::new(Arc::clone(&store), Arc::clone(&embedder), config.retrieval),
            synthesizer: AnswerSynthesizer::new(model, config.synthesis),
            locator: EvidenceLocator::new(config.locator),
            store,
            embedder,
            config,
            ingest_locks: DocumentLocks::new(),
        })
    }

    pub async fn index_document(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<IndexingReport, QaError> {
        self.index(Document::new(document_id, text)).await
    }

    /// Chunks, embeds and stores `document`, replacing any previous version.
    ///
    /// Re-indexing identical text with the same embedding model and chunking is a
    /// no-op reported as `unchanged`.
    pub async fn index(&self, document: Document) -> Result<IndexingReport, QaError> {
        let document_id = document.document_id.trim().to_string();
        if document_id.is_empty() {
            return Err(QaError::InvalidRequest("document id cannot be empty".to_string()));
        }
        if document.text.trim().is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "document {document_id} has no text to index"
            ))
            .into());
        }

        let started = Instant::now();
        let _guard = self.ingest_locks.acquire(&document_id).await;

        let checksum = text_checksum(&document.text);
        let model = self.embedder.model_id();
        let chunking = self.config.chunking.fingerprint();

        if let Some(existing) = self.store.record(&document_id).await {
            if existing.checksum == checksum
                && existing.embedding_model == model
                && existing.chunking == chunking
                && existing.title == document.title
            {
                debug!(document_id = %document_id, "document unchanged; skipping re-index");
                return Ok(IndexingReport {
                    document_id,
                    chunk_count: existing.chunk_count,
                    unchanged: true,
                    elapsed_ms: elapsed_ms(started),
                });
            }
        }

        let chunks = chunk_text(&document_id, &document.text, self.config.chunking)?;
        let embeddings = match tokio::time::timeout(
            self.config.timeouts.ingest(),
            self.embed_chunks(&chunks),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(QaError::Timeout {
                    stage: QueryStage::Ingesting,
                })
            }
        };

        let chunk_count = chunks.len();
        let record = DocumentRecord {
            document_id: document_id.clone(),
            title: document.title.clone(),
            checksum,
            char_len: document.text.chars().count(),
            chunk_count,
            embedding_model: model,
            dimensions: self.embedder.dimensions(),
            chunking,
            ingested_at: document.ingested_at,
        };
        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
            .collect();
        self.store
            .put(DocumentIndex {
                record,
                chunks: entries,
            })
            .await?;

        let elapsed_ms = elapsed_ms(started);
        info!(document_id = %document_id, chunk_count, elapsed_ms, "document indexed");
        Ok(IndexingReport {
            document_id,
            chunk_count,
            unchanged: false,
            elapsed_ms,
        })
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, QaError> {
        let dimensions = self.embedder.dimensions();
        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = with_retry(&self.config.retry, QueryStage::Ingesting, || async move {
                self.embedder.embed(&chunk.text).await.map_err(QaError::from)
            })
            .await?;
            if embedding.len() != dimensions {
                return Err(QaError::EmbeddingDimensionMismatch {
                    expected: dimensions,
                    actual: embedding.len(),
                });
            }
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }

    /// Removes a document and its chunks. Removing an unknown document succeeds.
    pub async fn remove_document(&self, document_id: &str) -> Result<bool, QaError> {
        let document_id = document_id.trim();
        if document_id.is_empty() {
            return Err(QaError::InvalidRequest("a document must be selected".to_string()));
        }
        let _guard = self.ingest_locks.acquire(document_id).await;
        let removed = self.store.delete_document(document_id).await?;
        info!(document_id, removed, "document removed");
        Ok(removed)
    }

    pub async fn list_documents(&self) -> Vec<DocumentRecord> {
        self.store.documents().await
    }

    /// Answers `question` from the content of `document_id` alone.
    ///
    /// An answer the document cannot support is returned as a normal response with
    /// `grounded == false` and no highlights; only real failures are errors.
    pub async fn answer_question(
        &self,
        document_id: &str,
        question: &str,
    ) -> Result<QaResponse, QaError> {
        let document_id = document_id.trim();
        let question = question.trim();
        if document_id.is_empty() {
            return Err(QaError::InvalidRequest("a document must be selected".to_string()));
        }
        if question.is_empty() {
            return Err(QaError::InvalidRequest("question cannot be empty".to_string()));
        }

        let mut progress = QueryProgress::new(document_id);
        let top_k = self.config.retrieval.top_k;

        progress.enter(QueryStage::Retrieving);
        let retrieved = match self
            .run_stage(QueryStage::Retrieving, self.config.timeouts.retrieve(), || {
                self.retriever.retrieve(document_id, question, top_k)
            })
            .await
        {
            Ok(retrieved) => retrieved,
            Err(error) => return Err(progress.fail(error)),
        };

        progress.enter(QueryStage::Synthesizing);
        let answer = match self
            .run_stage(QueryStage::Synthesizing, self.config.timeouts.synthesize(), || {
                self.synthesizer.synthesize(question, &retrieved)
            })
            .await
        {
            Ok(answer) => answer,
            Err(error) => return Err(progress.fail(error)),
        };

        progress.enter(QueryStage::Locating);
        let chunks = retrieved
            .iter()
            .map(|hit| (hit.chunk.chunk_id.clone(), hit.chunk.clone()))
            .collect::<HashMap<_, _>>();
        let highlights = self.locator.locate(&answer, &chunks);

        let stages = progress.finish();
        info!(
            document_id,
            grounded = answer.grounded,
            retrieved = retrieved.len(),
            highlights = highlights.len(),
            "question answered"
        );

        Ok(QaResponse {
            document_id: document_id.to_string(),
            question: question.to_string(),
            answer,
            highlights,
            retrieved,
            stages,
        })
    }

    async fn run_stage<T, F, Fut>(
        &self,
        stage: QueryStage,
        limit: Duration,
        operation: F,
    ) -> Result<T, QaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QaError>>,
    {
        match tokio::time::timeout(limit, with_retry(&self.config.retry, stage, operation)).await {
            Ok(result) => result,
            Err(_) => Err(QaError::Timeout { stage }),
        }
    }
}

async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    stage: QueryStage,
    mut operation: F,
) -> Result<T, QaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QaError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(QaError::CapabilityUnavailable {
                capability,
                details,
            }) if attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    %stage,
                    capability,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    details = %details,
                    "capability unavailable; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Per-request state machine: `Idle → Retrieving → Synthesizing → Locating → Done`,
/// or `Failed` from any stage.
struct QueryProgress<'a> {
    document_id: &'a str,
    state: QueryStage,
    entered_at: Instant,
    timings: Vec<StageTiming>,
}

impl<'a> QueryProgress<'a> {
    fn new(document_id: &'a str) -> Self {
        Self {
            document_id,
            state: QueryStage::Idle,
            entered_at: Instant::now(),
            timings: Vec::new(),
        }
    }

    fn enter(&mut self, next: QueryStage) {
        self.close_current();
        debug!(document_id = self.document_id, from = %self.state, to = %next, "query stage transition");
        self.state = next;
        self.entered_at = Instant::now();
    }

    fn finish(mut self) -> Vec<StageTiming> {
        self.enter(QueryStage::Done);
        self.timings
    }

    fn fail(&mut self, error: QaError) -> QaError {
        warn!(
            document_id = self.document_id,
            stage = %self.state,
            kind = error.kind(),
            error = %error,
            "question failed"
        );
        self.state = QueryStage::Failed;
        error
    }

    fn close_current(&mut self) {
        if matches!(
            self.state,
            QueryStage::Retrieving | QueryStage::Synthesizing | QueryStage::Locating
        ) {
            self.timings.push(StageTiming {
                stage: self.state,
                elapsed_ms: elapsed_ms(self.entered_at),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
    use crate::error::CapabilityError;
    use crate::llm::{ExtractiveModel, GenerationRequest};
    use crate::models::UNGROUNDED_ANSWER;
    use crate::stores::LocalIndexStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    const SKY: &str = "The sky is blue. Grass is green.";

    fn small_chunks() -> QaConfig {
        QaConfig {
            chunking: ChunkingConfig {
                max_chunk_chars: 20,
                overlap_chars: 0,
            },
            ..QaConfig::default()
        }
    }

    #[derive(Default)]
    struct CountingModel {
        inner: ExtractiveModel,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        fn model_id(&self) -> String {
            "counting".to_string()
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.generate(request).await
        }
    }

    #[derive(Default)]
    struct StallingModel {
        finished: AtomicBool,
    }

    #[async_trait]
    impl LanguageModel for StallingModel {
        fn model_id(&self) -> String {
            "stalling".to_string()
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok("late".to_string())
        }
    }

    #[derive(Default)]
    struct DownModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for DownModel {
        fn model_id(&self) -> String {
            "down".to_string()
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::Unavailable {
                capability: "language-model",
                details: "connection refused".to_string(),
            })
        }
    }

    /// Fails the first `failures` calls, then delegates; optionally slow.
    #[derive(Default)]
    struct FlakyEmbedder {
        inner: CharacterNgramEmbedder,
        failures: usize,
        delay: Option<Duration>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_id(&self) -> String {
            self.inner.model_id()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CapabilityError::Unavailable {
                    capability: "embedding",
                    details: "connection refused".to_string(),
                });
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }
    }

    #[derive(Default)]
    struct StallingEmbedder {
        inner: CharacterNgramEmbedder,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl Embedder for StallingEmbedder {
        fn model_id(&self) -> String {
            self.inner.model_id()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
            if self.stalled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
            }
            self.inner.embed(text).await
        }
    }

    /// Declares the default dimensions but returns three-entry vectors.
    struct TruncatingEmbedder;

    #[async_trait]
    impl Embedder for TruncatingEmbedder {
        fn model_id(&self) -> String {
            "truncating".to_string()
        }

        fn dimensions(&self) -> usize {
            DEFAULT_EMBEDDING_DIMENSIONS
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CapabilityError> {
            Ok(vec![0.5; 3])
        }
    }

    fn orchestrator<M: LanguageModel>(
        model: Arc<M>,
        config: QaConfig,
    ) -> QueryOrchestrator<LocalIndexStore, CharacterNgramEmbedder, M> {
        QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            Arc::new(CharacterNgramEmbedder::default()),
            model,
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn answers_from_the_relevant_chunk() {
        let qa = orchestrator(Arc::new(ExtractiveModel::default()), small_chunks());
        let report = qa.index_document("doc-1", SKY).await.unwrap();
        assert_eq!(report.chunk_count, 2);

        let response = qa.answer_question("doc-1", "What color is the sky?").await.unwrap();
        assert_eq!(response.retrieved[0].chunk.text, "The sky is blue. ");
        assert_eq!(response.retrieved[0].rank, 1);
        assert!(response.grounded());
        assert!(response.answer.text.contains("blue"));
        assert_eq!(response.highlighted_passages(), vec!["The sky is blue.".to_string()]);
        assert_eq!(
            response.stages.iter().map(|timing| timing.stage).collect::<Vec<_>>(),
            vec![QueryStage::Retrieving, QueryStage::Synthesizing, QueryStage::Locating]
        );
    }

    #[tokio::test]
    async fn unindexed_document_fails_before_synthesis() {
        let model = Arc::new(CountingModel::default());
        let qa = orchestrator(Arc::clone(&model), QaConfig::default());

        let result = qa.answer_question("doc-404", "What color is the sky?").await;
        assert!(matches!(result, Err(QaError::DocumentNotIndexed { .. })));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unrelated_question_is_ungrounded_without_highlights() {
        let qa = orchestrator(Arc::new(ExtractiveModel::default()), small_chunks());
        qa.index_document("doc-1", SKY).await.unwrap();

        let response = qa
            .answer_question("doc-1", "What is the capital of France?")
            .await
            .unwrap();
        assert!(!response.grounded());
        assert!(response.highlighted_passages().is_empty());
        assert_eq!(response.answer.text, UNGROUNDED_ANSWER);
        assert!(response.answer.text.contains("information available in the document"));
    }

    #[tokio::test]
    async fn blank_inputs_are_rejected() {
        let model = Arc::new(CountingModel::default());
        let qa = orchestrator(Arc::clone(&model), QaConfig::default());

        assert!(matches!(
            qa.answer_question("", "question?").await,
            Err(QaError::InvalidRequest(_))
        ));
        assert!(matches!(
            qa.answer_question("doc-1", "   ").await,
            Err(QaError::InvalidRequest(_))
        ));
        assert!(matches!(
            qa.index_document("doc-1", " \n ").await,
            Err(QaError::Ingest(IngestError::InvalidArgument(_)))
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reindexing_identical_text_is_skipped() {
        let embedder = Arc::new(FlakyEmbedder::default());
        let qa = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            Arc::clone(&embedder),
            Arc::new(ExtractiveModel::default()),
            small_chunks(),
        )
        .unwrap();

        let first = qa.index_document("doc-1", SKY).await.unwrap();
        let calls = embedder.calls.load(Ordering::SeqCst);
        let second = qa.index_document("doc-1", SKY).await.unwrap();

        assert!(!first.unchanged);
        assert!(second.unchanged);
        assert_eq!(second.chunk_count, first.chunk_count);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);

        let third = qa
            .index_document("doc-1", "The sky is grey today.")
            .await
            .unwrap();
        assert!(!third.unchanged);
    }

    #[tokio::test]
    async fn removed_documents_are_no_longer_answerable() {
        let qa = orchestrator(Arc::new(ExtractiveModel::default()), small_chunks());
        qa.index(Document::new("doc-1", SKY).with_title("sky.pdf"))
            .await
            .unwrap();

        let listed = qa.list_documents().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title.as_deref(), Some("sky.pdf"));
        assert_eq!(listed[0].chunk_count, 2);

        assert!(qa.remove_document("doc-1").await.unwrap());
        assert!(!qa.remove_document("doc-1").await.unwrap());
        assert!(qa.list_documents().await.is_empty());
        assert!(matches!(
            qa.answer_question("doc-1", "What color is the sky?").await,
            Err(QaError::DocumentNotIndexed { .. })
        ));
    }

    #[tokio::test]
    async fn padded_document_ids_are_removed_like_they_are_indexed() {
        let qa = orchestrator(Arc::new(ExtractiveModel::default()), small_chunks());
        qa.index_document("doc-1 ", SKY).await.unwrap();
        assert!(qa.answer_question("doc-1 ", "What color is the sky?").await.is_ok());

        assert!(qa.remove_document("doc-1 ").await.unwrap());
        assert!(qa.list_documents().await.is_empty());
        assert!(matches!(
            qa.remove_document("   ").await,
            Err(QaError::InvalidRequest(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_synthesis_times_out_and_is_cancelled() {
        let model = Arc::new(StallingModel::default());
        let mut config = small_chunks();
        config.timeouts.synthesize_ms = 50;
        let qa = orchestrator(Arc::clone(&model), config);
        qa.index_document("doc-1", SKY).await.unwrap();

        let result = qa.answer_question("doc-1", "What color is the sky?").await;
        assert!(matches!(
            result,
            Err(QaError::Timeout {
                stage: QueryStage::Synthesizing
            })
        ));

        tokio::time::sleep(Duration::from_secs(7_200)).await;
        assert!(!model.finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_question_embedding_times_out_in_retrieval() {
        let embedder = Arc::new(StallingEmbedder::default());
        let model = Arc::new(CountingModel::default());
        let mut config = small_chunks();
        config.timeouts.retrieve_ms = 50;
        let qa = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            Arc::clone(&embedder),
            Arc::clone(&model),
            config,
        )
        .unwrap();
        qa.index_document("doc-1", SKY).await.unwrap();

        embedder.stalled.store(true, Ordering::SeqCst);
        let result = qa.answer_question("doc-1", "What color is the sky?").await;
        assert!(matches!(
            result,
            Err(QaError::Timeout {
                stage: QueryStage::Retrieving
            })
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_chunk_embedding_times_out_in_ingestion() {
        let embedder = Arc::new(StallingEmbedder {
            stalled: AtomicBool::new(true),
            ..StallingEmbedder::default()
        });
        let mut config = small_chunks();
        config.timeouts.ingest_ms = 50;
        let qa = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            embedder,
            Arc::new(ExtractiveModel::default()),
            config,
        )
        .unwrap();

        let result = qa.index_document("doc-1", SKY).await;
        assert!(matches!(
            result,
            Err(QaError::Timeout {
                stage: QueryStage::Ingesting
            })
        ));
        assert!(qa.list_documents().await.is_empty());
    }

    #[tokio::test]
    async fn wrong_length_chunk_embeddings_are_rejected() {
        let qa = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            Arc::new(TruncatingEmbedder),
            Arc::new(ExtractiveModel::default()),
            small_chunks(),
        )
        .unwrap();

        let result = qa.index_document("doc-1", SKY).await;
        assert!(matches!(
            result,
            Err(QaError::EmbeddingDimensionMismatch {
                expected: DEFAULT_EMBEDDING_DIMENSIONS,
                actual: 3
            })
        ));
        assert!(qa.list_documents().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_model_is_retried_then_surfaced() {
        let model = Arc::new(DownModel::default());
        let qa = orchestrator(Arc::clone(&model), small_chunks());
        qa.index_document("doc-1", SKY).await.unwrap();

        let result = qa.answer_question("doc-1", "What color is the sky?").await;
        assert!(matches!(result, Err(QaError::CapabilityUnavailable { .. })));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_embedding_failures_are_retried() {
        let embedder = Arc::new(FlakyEmbedder {
            failures: 2,
            ..FlakyEmbedder::default()
        });
        let qa = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            Arc::clone(&embedder),
            Arc::new(ExtractiveModel::default()),
            small_chunks(),
        )
        .unwrap();

        let report = qa.index_document("doc-1", SKY).await.unwrap();
        assert_eq!(report.chunk_count, 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);

        let response = qa.answer_question("doc-1", "What color is the sky?").await.unwrap();
        assert!(response.grounded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ingestion_is_serialized_per_document() {
        let embedder = Arc::new(FlakyEmbedder {
            delay: Some(Duration::from_millis(20)),
            ..FlakyEmbedder::default()
        });
        let qa = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            Arc::clone(&embedder),
            Arc::new(ExtractiveModel::default()),
            QaConfig::default(),
        )
        .unwrap();

        let (first, second) = tokio::join!(
            qa.index_document("doc-1", "First version of the text."),
            qa.index_document("doc-1", "Second version of the text."),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(embedder.peak.load(Ordering::SeqCst), 1);

        let (left, right) = tokio::join!(
            qa.index_document("doc-a", "Document a."),
            qa.index_document("doc-b", "Document b."),
        );
        left.unwrap();
        right.unwrap();
        assert_eq!(embedder.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_questions_do_not_interfere() {
        let qa = Arc::new(orchestrator(
            Arc::new(ExtractiveModel::default()),
            QaConfig::default(),
        ));
        qa.index_document("sky", SKY).await.unwrap();
        qa.index_document("pump", "Pumps need 5 bar of pressure. Valves close at 8 bar.")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for round in 0..16 {
            let qa = Arc::clone(&qa);
            handles.push(tokio::spawn(async move {
                if round % 2 == 0 {
                    let response = qa.answer_question("sky", "What color is the sky?").await?;
                    assert!(response.answer.text.contains("blue"));
                } else {
                    let response = qa
                        .answer_question("pump", "How much pressure do pumps need?")
                        .await?;
                    assert!(response.answer.text.contains("5 bar"));
                    assert!(response
                        .retrieved
                        .iter()
                        .all(|hit| hit.chunk.document_id == "pump"));
                }
                Ok::<_, QaError>(())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn answers_survive_a_restart() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let qa = QueryOrchestrator::new(
                Arc::new(LocalIndexStore::open(dir.path()).await?),
                Arc::new(CharacterNgramEmbedder::default()),
                Arc::new(ExtractiveModel::default()),
                small_chunks(),
            )?;
            qa.index_document("doc-1", SKY).await?;
        }

        let qa = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::open(dir.path()).await?),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(ExtractiveModel::default()),
            small_chunks(),
        )?;
        let response = qa.answer_question("doc-1", "What color is the sky?").await?;
        assert!(response.grounded());
        assert_eq!(response.highlighted_passages(), vec!["The sky is blue.".to_string()]);
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = QaConfig::default();
        config.retrieval.top_k = 0;
        let result = QueryOrchestrator::new(
            Arc::new(LocalIndexStore::in_memory()),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(ExtractiveModel::default()),
            config,
        );
        assert!(matches!(result, Err(QaError::InvalidConfig(_))));
    }
}
