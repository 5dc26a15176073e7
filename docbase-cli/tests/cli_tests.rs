//! End-to-end tests driving the commands against a temporary data directory.

use std::path::Path;
use std::sync::atomic::AtomicBool;

use docbase_cli::commands;
use docbase_cli::{App, AppConfig};
use docbase_rag::AnswerMode;

const HARBOUR: &str = "The harbour master publishes tide tables every Monday. \
    Spring tides reach four metres at the northern quay.\n\n\
    Mooring fees are paid at the office beside the lighthouse before departure.";

const GARDEN: &str = "Tomatoes need full sun and regular watering. \
    Pinch out side shoots weekly and feed with potash once the first truss sets.";

fn config(dir: &Path) -> AppConfig {
    AppConfig { data_dir: dir.join("kb"), ..AppConfig::default() }
}

fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[tokio::test]
async fn upload_then_ask_answers_from_the_right_document() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::open(config(dir.path())).await.unwrap();
    let files = [write(dir.path(), "harbour.txt", HARBOUR), write(dir.path(), "garden.txt", GARDEN)];

    let outcomes = commands::upload(&app, &files[..], true).await;
    assert!(outcomes.iter().all(|o| o.error.is_none()), "{outcomes:?}");
    for outcome in &outcomes {
        let report = outcome.embedding.unwrap();
        assert_eq!(report.embedded, outcome.chunks);
        assert_eq!(report.failed, 0);
    }

    let answer = commands::ask(&app, "when are the tide tables published?", Some(1)).await.unwrap();
    assert!(matches!(answer.mode, AnswerMode::Extractive { .. }));
    assert_eq!(answer.supports.len(), 1);
    assert_eq!(answer.supports[0].filename, "harbour.txt");
    assert!(answer.text.contains("tide tables"));
    assert!(answer.confidence > 0.0 && answer.confidence <= 100.0);

    let status = commands::status(&app).await.unwrap();
    assert_eq!(status.document_count, 2);
    assert!(status.ready);
    assert_eq!(status.embedding_coverage.pending_chunks, 0);
}

#[tokio::test]
async fn uploads_without_embedding_stay_pending_until_embed() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::open(config(dir.path())).await.unwrap();
    let files = [write(dir.path(), "harbour.txt", HARBOUR)];

    let outcomes = commands::upload(&app, &files[..], false).await;
    assert!(outcomes[0].embedding.is_none());
    let chunks = outcomes[0].chunks;
    assert!(chunks > 0);
    assert!(!commands::status(&app).await.unwrap().ready);

    let report = commands::embed(&app, None, false, &AtomicBool::new(false)).await.unwrap();
    assert_eq!(report.embedded, chunks);
    assert!(!report.cancelled);

    let again = commands::embed(&app, None, false, &AtomicBool::new(false)).await.unwrap();
    assert_eq!(again.embedded, 0);
    assert_eq!(again.skipped, chunks);
}

#[tokio::test]
async fn a_bad_file_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::open(config(dir.path())).await.unwrap();
    let files = [
        write(dir.path(), "empty.txt", "   \n "),
        write(dir.path(), "garden.txt", GARDEN),
        dir.path().join("missing.txt"),
    ];

    let outcomes = commands::upload(&app, &files[..], true).await;
    assert!(outcomes[0].error.as_deref().unwrap().contains("too little text"));
    assert!(outcomes[1].error.is_none());
    assert!(outcomes[2].error.is_some());

    let documents = commands::documents(&app).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].filename, "garden.txt");
    assert_eq!(documents[0].embedded_chunks, documents[0].chunks);
}

#[tokio::test]
async fn knowledge_base_survives_reopen_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let document_id = {
        let app = App::open(config(dir.path())).await.unwrap();
        let files = [write(dir.path(), "harbour.txt", HARBOUR)];
        let outcomes = commands::upload(&app, &files[..], true).await;
        outcomes[0].document_id.clone().unwrap()
    };

    let app = App::open(config(dir.path())).await.unwrap();
    let results = commands::search(&app, "mooring fees lighthouse", None).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, document_id);

    let reconciled = commands::reconcile(&app).await.unwrap();
    assert_eq!((reconciled.restored, reconciled.pruned), (0, 0));

    let deleted = commands::delete(&app, &document_id).await.unwrap();
    assert!(deleted.chunks_removed > 0);
    assert!(commands::documents(&app).await.unwrap().is_empty());

    let answer = commands::ask(&app, "mooring fees?", None).await.unwrap();
    assert_eq!(answer.mode, AnswerMode::NoContext);
    assert!(commands::delete(&app, &document_id).await.is_err());
}

#[tokio::test]
async fn too_short_questions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::open(config(dir.path())).await.unwrap();
    let err = commands::ask(&app, "  a ", None).await.unwrap_err();
    assert!(err.to_string().contains("at least 3 characters"));
}

#[tokio::test]
async fn show_reports_one_document_with_its_counts() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::open(config(dir.path())).await.unwrap();
    let files = [write(dir.path(), "harbour.txt", HARBOUR)];
    let outcomes = commands::upload(&app, &files[..], false).await;
    let document_id = outcomes[0].document_id.clone().unwrap();

    let pending = commands::show(&app, &document_id).await.unwrap();
    assert_eq!(pending.filename, "harbour.txt");
    assert_eq!(pending.content_type, "text/plain");
    assert_eq!(pending.chunks, outcomes[0].chunks);
    assert_eq!(pending.embedded_chunks, 0);

    commands::embed(&app, Some(document_id.as_str()), false, &AtomicBool::new(false)).await.unwrap();
    let embedded = commands::show(&app, &document_id).await.unwrap();
    assert_eq!(embedded.embedded_chunks, embedded.chunks);

    let err = commands::show(&app, "no-such-document").await.unwrap_err();
    assert!(err.to_string().contains("no-such-document"), "{err}");
}

#[tokio::test]
async fn delete_all_clears_documents_chunks_and_index_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let chunk_total = {
        let app = App::open(config(dir.path())).await.unwrap();
        let files = [write(dir.path(), "harbour.txt", HARBOUR), write(dir.path(), "garden.txt", GARDEN)];
        let outcomes = commands::upload(&app, &files[..], true).await;
        let chunk_total: usize = outcomes.iter().map(|o| o.chunks).sum();

        let cleared = commands::delete_all(&app).await.unwrap();
        assert_eq!(cleared.documents_deleted, 2);
        assert_eq!(cleared.chunks_deleted, chunk_total);
        chunk_total
    };
    assert!(chunk_total > 0);

    let app = App::open(config(dir.path())).await.unwrap();
    assert!(commands::documents(&app).await.unwrap().is_empty());
    let status = commands::status(&app).await.unwrap();
    assert_eq!(status.index_size, 0);
    assert_eq!(status.embedding_coverage.total_chunks, 0);
    assert!(commands::search(&app, "tide tables", None).await.unwrap().is_empty());

    let again = commands::delete_all(&app).await.unwrap();
    assert_eq!((again.documents_deleted, again.chunks_deleted), (0, 0));
}
