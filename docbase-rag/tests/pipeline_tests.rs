//! End-to-end tests for the retrieval pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docbase_rag::{
    AnswerMode, CompletionModel, Document, DocumentStore, Embedder, Embedding,
    EmbeddingModelLoader, EmbeddingProvider, HashingEmbedder, InMemoryDocumentStore,
    InMemoryVectorStore, RagConfig, RagError, RagPipeline, Result, VectorStore,
};

const DIM: usize = 64;

const TIDES: &str = "Tides are caused by the gravitational pull of the moon. Spring tides \
    happen when the sun and moon align. Neap tides happen at the quarter moons.";
const BREAD: &str = "Sourdough bread needs a lively starter. Feed the starter with flour and \
    water the night before baking. Bake the loaf in a hot dutch oven.";

struct Harness {
    pipeline: RagPipeline,
    store: Arc<InMemoryDocumentStore>,
    index: Arc<InMemoryVectorStore>,
}

impl Harness {
    fn build(
        config: RagConfig,
        embedder: Arc<Embedder>,
        model: Option<Arc<dyn CompletionModel>>,
    ) -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorStore::new(DIM));
        let mut builder = RagPipeline::builder()
            .config(config)
            .embedder(embedder)
            .vector_store(index.clone())
            .document_store(store.clone());
        if let Some(model) = model {
            builder = builder.completion_model(model);
        }
        Self { pipeline: builder.build().unwrap(), store, index }
    }

    fn hashing(config: RagConfig) -> Self {
        Self::build(config, hashing_embedder(), None)
    }

    async fn add(&self, id: &str, text: &str) -> usize {
        self.store
            .put_document(Document::new(id, format!("{id}.txt"), "text/plain", text))
            .await
            .unwrap();
        self.pipeline.ingest(id, text).await.unwrap()
    }
}

fn hashing_embedder() -> Arc<Embedder> {
    Arc::new(Embedder::from_provider("hashing", Arc::new(HashingEmbedder::new(DIM))))
}

fn small_chunks() -> RagConfig {
    RagConfig::builder().chunk_size(80).chunk_overlap(20).build().unwrap()
}

/// A language model that always answers the same way.
struct Scripted {
    reply: std::result::Result<String, &'static str>,
    delay: Duration,
}

#[async_trait]
impl CompletionModel for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _max_tokens: usize, _timeout: Duration) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.reply.clone().map_err(|message| RagError::ModelUnavailable {
            model: "scripted".into(),
            message: message.into(),
        })
    }
}

/// An embedding provider that fails transiently for texts containing `POISON`.
struct Flaky {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for Flaky {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("POISON") {
            return Err(RagError::Embedding { provider: "flaky".into(), message: "boom".into() });
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// An embedding provider that requests cancellation on its `after`-th call.
struct Interrupting {
    inner: HashingEmbedder,
    calls: AtomicUsize,
    after: usize,
    cancel: Arc<AtomicBool>,
}

#[async_trait]
impl EmbeddingProvider for Interrupting {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.cancel.store(true, Ordering::SeqCst);
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// A loader whose model can never be loaded.
struct Missing;

#[async_trait]
impl EmbeddingModelLoader for Missing {
    fn model_name(&self) -> &str {
        "missing-model"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn load(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(RagError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no weights")))
    }
}

#[tokio::test]
async fn ingesting_a_thousand_chars_gives_six_overlapping_chunks() {
    let config = RagConfig::builder().chunk_size(200).chunk_overlap(50).build().unwrap();
    let harness = Harness::hashing(config);
    let text = "x".repeat(1000);
    assert_eq!(harness.add("doc", &text).await, 6);

    let chunks = harness.store.list_chunks("doc").await.unwrap();
    assert_eq!(chunks.len(), 6);
    for pair in chunks.windows(2) {
        assert!(pair[1].start > pair[0].start);
        assert!(pair[1].start < pair[0].end);
        assert!(pair[1].end > pair[0].end);
    }
    assert_eq!(chunks[5].end, 1000);
    assert!(chunks.iter().all(|c| !c.is_embedded()));
}

#[tokio::test]
async fn asking_an_empty_index_returns_no_context() {
    let harness = Harness::hashing(RagConfig::default());
    let answer = harness.pipeline.ask("unrelated question", 3).await.unwrap();
    assert!(answer.supports.is_empty());
    assert_eq!(answer.confidence, 0.0);
    assert_eq!(answer.mode, AnswerMode::NoContext);
}

#[tokio::test]
async fn short_questions_are_rejected() {
    let harness = Harness::hashing(RagConfig::default());
    let err = harness.pipeline.ask("  hi ", 3).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
}

#[tokio::test]
async fn empty_documents_are_stored_but_not_indexable() {
    let harness = Harness::hashing(RagConfig::default());
    assert_eq!(harness.add("blank", "").await, 0);
    let report = harness.pipeline.embed_all(false).await.unwrap();
    assert_eq!(report.embedded, 0);
    assert_eq!(harness.pipeline.status().await.unwrap().document_count, 1);
}

#[tokio::test]
async fn ingest_requires_a_stored_document() {
    let harness = Harness::hashing(RagConfig::default());
    let err = harness.pipeline.ingest("ghost", "text").await.unwrap_err();
    assert!(matches!(err, RagError::NotFound { kind: "document", .. }));
}

#[tokio::test(start_paused = true)]
async fn slow_language_model_times_out_within_budget() {
    let budget = Duration::from_secs(2);
    let config = RagConfig::builder().inference_timeout(budget).build().unwrap();
    let model = Arc::new(Scripted { reply: Ok("late".into()), delay: Duration::from_secs(60) });
    let harness = Harness::build(config, hashing_embedder(), Some(model));
    harness.add("tides", TIDES).await;
    harness.pipeline.embed_all(false).await.unwrap();

    let started = tokio::time::Instant::now();
    let answer = harness.pipeline.ask("What causes spring tides?", 3).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= budget);
    assert!(elapsed < budget + Duration::from_millis(50), "took {elapsed:?}");
    assert_eq!(answer.mode, AnswerMode::TimedOut { budget });
    assert!(answer.timed_out());
    assert!(!answer.supports.is_empty());
    assert!(answer.text.contains("From tides.txt:"));
}

#[tokio::test]
async fn unavailable_language_model_falls_back_to_extractive_answer() {
    let model = Arc::new(Scripted { reply: Err("model file missing"), delay: Duration::ZERO });
    let harness = Harness::build(RagConfig::default(), hashing_embedder(), Some(model));
    harness.add("bread", BREAD).await;
    harness.pipeline.embed_all(false).await.unwrap();

    let answer = harness.pipeline.ask("How do I feed a sourdough starter?", 3).await.unwrap();
    assert!(answer.is_degraded());
    match &answer.mode {
        AnswerMode::Extractive { reason } => assert!(reason.contains("model file missing")),
        other => panic!("unexpected mode {other:?}"),
    }
    assert!(answer.text.starts_with("Based on the retrieved context:"));
    assert!(answer.confidence > 0.0 && answer.confidence <= 100.0);
}

#[tokio::test]
async fn generated_answers_carry_supports_and_confidence() {
    let model =
        Arc::new(Scripted { reply: Ok(" The moon's pull. ".into()), delay: Duration::ZERO });
    let harness = Harness::build(RagConfig::default(), hashing_embedder(), Some(model));
    harness.add("tides", TIDES).await;
    harness.add("bread", BREAD).await;
    harness.pipeline.embed_all(false).await.unwrap();

    let answer = harness.pipeline.ask("What causes tides on the moon?", 50).await.unwrap();
    assert_eq!(answer.mode, AnswerMode::Generated);
    assert_eq!(answer.text, "The moon's pull.");
    assert_eq!(answer.supports[0].document_id, "tides");
    assert!(answer.supports.len() <= harness.pipeline.config().max_top_k);
}

#[tokio::test]
async fn deleting_a_document_cascades_to_chunks_and_vectors() {
    let harness = Harness::hashing(small_chunks());
    harness.add("tides", TIDES).await;
    harness.add("bread", BREAD).await;
    harness.pipeline.embed_all(false).await.unwrap();
    let tide_chunks = harness.store.list_chunks("tides").await.unwrap();

    let removed = harness.pipeline.delete_document("tides").await.unwrap();
    assert_eq!(removed, tide_chunks.len());
    for chunk in &tide_chunks {
        assert!(!harness.index.contains(&chunk.id).await);
    }
    let results = harness.pipeline.search("gravitational pull of the moon", 10).await.unwrap();
    assert!(results.iter().all(|r| r.document_id != "tides"));

    let err = harness.pipeline.delete_document("tides").await.unwrap_err();
    assert!(matches!(err, RagError::NotFound { .. }));
}

#[tokio::test]
async fn deleting_everything_empties_store_and_index() {
    let harness = Harness::hashing(small_chunks());
    let chunk_count = harness.add("tides", TIDES).await + harness.add("bread", BREAD).await;
    harness.pipeline.embed_all(false).await.unwrap();
    harness.index.upsert("stray_0", &[1.0; DIM]).await.unwrap();

    let (documents, chunks) = harness.pipeline.delete_all().await.unwrap();
    assert_eq!((documents, chunks), (2, chunk_count));
    assert!(harness.store.list_documents().await.unwrap().is_empty());
    assert!(harness.store.list_chunks("tides").await.unwrap().is_empty());
    assert!(harness.index.is_empty().await);

    let answer = harness.pipeline.ask("what causes the tides?", 3).await.unwrap();
    assert_eq!(answer.mode, AnswerMode::NoContext);
    assert_eq!(harness.pipeline.delete_all().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn forced_re_embedding_replaces_vectors_without_duplicates() {
    let harness = Harness::hashing(small_chunks());
    let chunk_count = harness.add("tides", TIDES).await;

    let first = harness.pipeline.embed_document("tides", false).await.unwrap();
    assert_eq!(first.embedded, chunk_count);
    let again = harness.pipeline.embed_document("tides", false).await.unwrap();
    assert_eq!(again.embedded, 0);
    assert_eq!(again.skipped, chunk_count);

    let forced = harness.pipeline.embed_document("tides", true).await.unwrap();
    assert_eq!(forced.embedded, chunk_count);
    assert_eq!(harness.index.len().await, chunk_count);
}

#[tokio::test]
async fn re_ingesting_replaces_chunks_and_their_vectors() {
    let harness = Harness::hashing(small_chunks());
    harness.add("notes", TIDES).await;
    harness.pipeline.embed_all(false).await.unwrap();

    let count = harness.pipeline.ingest("notes", "Only one short line now.").await.unwrap();
    assert_eq!(count, 1);
    assert!(harness.index.is_empty().await);
    let report = harness.pipeline.embed_all(false).await.unwrap();
    assert_eq!(report.embedded, 1);
    assert_eq!(harness.index.len().await, 1);
}

#[tokio::test]
async fn unavailable_embedding_model_fails_the_operation() {
    let embedder = Arc::new(Embedder::new(Arc::new(Missing)));
    let harness = Harness::build(RagConfig::default(), embedder, None);
    harness.add("tides", TIDES).await;

    let err = harness.pipeline.embed_document("tides", false).await.unwrap_err();
    assert!(matches!(err, RagError::ModelUnavailable { .. }));
    assert!(!err.is_retryable());

    let status = harness.pipeline.status().await.unwrap();
    assert!(!status.model_loaded);
    assert_eq!(status.embedding_coverage.embedded_chunks, 0);
    assert_eq!(status.index_size, 0);
    assert!(!status.ready);
}

#[tokio::test]
async fn batch_failures_are_isolated_per_chunk() {
    let flaky = Arc::new(Flaky { inner: HashingEmbedder::new(DIM), calls: AtomicUsize::new(0) });
    let embedder = Arc::new(Embedder::from_provider("flaky", flaky.clone()));
    let harness = Harness::build(small_chunks(), embedder, None);
    let text = format!("{TIDES}\n\nThis paragraph is POISON and cannot be embedded.\n\n{BREAD}");
    let chunk_count = harness.add("mixed", &text).await;
    let poisoned = harness
        .store
        .list_chunks("mixed")
        .await
        .unwrap()
        .iter()
        .filter(|c| c.text.contains("POISON"))
        .count();
    assert!(poisoned > 0);

    let report = harness.pipeline.embed_all(false).await.unwrap();
    assert_eq!(report.failed, poisoned);
    assert_eq!(report.embedded, chunk_count - poisoned);

    let status = harness.pipeline.status().await.unwrap();
    assert_eq!(status.embedding_coverage.pending_chunks, poisoned);
    assert_eq!(status.index_size, chunk_count - poisoned);
    assert!(status.ready);
}

#[tokio::test]
async fn cancelled_runs_resume_where_they_stopped() {
    let harness = Harness::hashing(small_chunks());
    let tides = harness.add("tides", TIDES).await;
    let bread = harness.add("bread", BREAD).await;

    let cancel = AtomicBool::new(true);
    let report = harness.pipeline.embed_all_cancellable(false, &cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.embedded, 0);

    let resumed = harness.pipeline.embed_all(false).await.unwrap();
    assert!(!resumed.cancelled);
    assert_eq!(resumed.embedded, tides + bread);
}

#[tokio::test]
async fn cancellation_stops_between_chunk_commits_inside_a_document() {
    let cancel = Arc::new(AtomicBool::new(false));
    let provider = Interrupting {
        inner: HashingEmbedder::new(DIM),
        calls: AtomicUsize::new(0),
        after: 2,
        cancel: cancel.clone(),
    };
    let embedder = Arc::new(Embedder::from_provider("interrupting", Arc::new(provider)));
    let config = RagConfig::builder().chunk_size(80).chunk_overlap(20).embed_batch_size(1).build().unwrap();
    let harness = Harness::build(config, embedder, None);
    let chunk_count = harness.add("tides", TIDES).await;
    assert!(chunk_count >= 2);

    let report = harness.pipeline.embed_all_cancellable(false, &cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.embedded, 1);
    assert_eq!(harness.index.len().await, 1);
    let embedded = harness.store.list_chunks("tides").await.unwrap();
    assert_eq!(embedded.iter().filter(|c| c.is_embedded()).count(), 1);

    cancel.store(false, Ordering::SeqCst);
    let resumed = harness.pipeline.embed_all_cancellable(false, &cancel).await.unwrap();
    assert!(!resumed.cancelled);
    assert_eq!(resumed.embedded, chunk_count - 1);
    assert_eq!(resumed.skipped, 1);
}

#[tokio::test]
async fn reconcile_restores_missing_and_prunes_orphaned_vectors() {
    let harness = Harness::hashing(small_chunks());
    let chunk_count = harness.add("tides", TIDES).await;
    harness.pipeline.embed_all(false).await.unwrap();

    harness.index.clear().await;
    harness.index.upsert("orphan_0", &vec![1.0; DIM]).await.unwrap();

    let (restored, pruned) = harness.pipeline.reconcile().await.unwrap();
    assert_eq!(restored, chunk_count);
    assert_eq!(pruned, 1);
    assert_eq!(harness.index.len().await, chunk_count);
    assert_eq!(harness.pipeline.reconcile().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn status_reports_coverage() {
    let harness = Harness::hashing(small_chunks());
    let tides = harness.add("tides", TIDES).await;
    let bread = harness.add("bread", BREAD).await;
    harness.pipeline.embed_document("tides", false).await.unwrap();

    let status = harness.pipeline.status().await.unwrap();
    assert_eq!(status.document_count, 2);
    assert_eq!(status.dimension, DIM);
    assert!(status.model_loaded);
    assert_eq!(status.embedding_model, "hashing");
    assert_eq!(status.embedding_coverage.total_chunks, tides + bread);
    assert_eq!(status.embedding_coverage.embedded_chunks, tides);
    assert_eq!(status.embedding_coverage.pending_chunks, bread);
    assert!(status.language_model.is_none());
    assert!(status.ready);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let documents = dir.path().join("documents.json");
    let vectors = dir.path().join("index.json");

    {
        let store = Arc::new(InMemoryDocumentStore::open(&documents).await.unwrap());
        let index = Arc::new(InMemoryVectorStore::open(&vectors, DIM).await.unwrap());
        let pipeline = RagPipeline::builder()
            .embedder(hashing_embedder())
            .vector_store(index)
            .document_store(store.clone())
            .build()
            .unwrap();
        store.put_document(Document::new("tides", "tides.txt", "text/plain", TIDES)).await.unwrap();
        pipeline.ingest("tides", TIDES).await.unwrap();
        pipeline.embed_all(false).await.unwrap();
    }

    let store = Arc::new(InMemoryDocumentStore::open(&documents).await.unwrap());
    let index = Arc::new(InMemoryVectorStore::open(&vectors, DIM).await.unwrap());
    assert!(!index.is_empty().await);
    let pipeline = RagPipeline::builder()
        .embedder(hashing_embedder())
        .vector_store(index)
        .document_store(store)
        .build()
        .unwrap();
    assert_eq!(pipeline.reconcile().await.unwrap(), (0, 0));
    let results = pipeline.search("neap tides at the quarter moons", 3).await.unwrap();
    assert_eq!(results[0].filename, "tides.txt");
}

#[test]
fn mismatched_index_dimension_is_rejected_at_build() {
    let err = RagPipeline::builder()
        .embedder(hashing_embedder())
        .vector_store(Arc::new(InMemoryVectorStore::new(DIM + 1)))
        .document_store(Arc::new(InMemoryDocumentStore::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));
}
