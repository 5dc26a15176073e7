//! The operations behind each subcommand.
//!
//! Every command returns a serializable outcome; rendering it as text or
//! JSON is left to the caller.

use std::path::Path;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use docbase_rag::{Answer, Chunk, Document, EmbedReport, RagError, RetrievalResult, SystemStatus};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::app::App;
use crate::extract::extract_file;

/// Result of uploading one file.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub path: String,
    pub document_id: Option<String>,
    pub chunks: usize,
    /// `None` when embedding was not requested.
    pub embedding: Option<EmbedReport>,
    pub error: Option<String>,
}

/// A document as listed by `documents`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub total_chars: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub document_id: String,
    pub chunks_removed: usize,
}

/// Result of `delete --all`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClearOutcome {
    pub documents_deleted: usize,
    pub chunks_deleted: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReconcileOutcome {
    pub restored: usize,
    pub pruned: usize,
}

/// Extract, store and chunk each file, then embed it unless `embed` is false.
///
/// A file that cannot be read or indexed is reported in its outcome and does
/// not stop the remaining uploads. An embedding failure leaves the chunks
/// stored and pending.
#[instrument(skip_all, fields(files = paths.len()))]
pub async fn upload(app: &App, paths: &[impl AsRef<Path>], embed: bool) -> Vec<UploadOutcome> {
    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let mut outcome = UploadOutcome {
            path: path.display().to_string(),
            document_id: None,
            chunks: 0,
            embedding: None,
            error: None,
        };
        match upload_one(app, path, embed, &mut outcome).await {
            Ok(()) => info!(path = %outcome.path, chunks = outcome.chunks, "uploaded"),
            Err(e) => {
                warn!(path = %outcome.path, error = %format!("{e:#}"), "upload failed");
                outcome.error = Some(format!("{e:#}"));
            }
        }
        outcomes.push(outcome);
    }
    outcomes
}

async fn upload_one(app: &App, path: &Path, embed: bool, outcome: &mut UploadOutcome) -> Result<()> {
    let extracted = extract_file(path)?;
    let pipeline = app.pipeline();
    let id = Uuid::new_v4().to_string();
    let document =
        Document::new(&id, extracted.filename, extracted.content_type, extracted.text.as_str());

    pipeline.document_store().put_document(document).await?;
    match pipeline.ingest(&id, &extracted.text).await {
        Ok(chunks) => outcome.chunks = chunks,
        Err(e) => {
            if let Err(cleanup) = pipeline.delete_document(&id).await {
                warn!(document.id = %id, error = %cleanup, "failed to remove partial upload");
            }
            return Err(e).context("failed to chunk document");
        }
    }
    outcome.document_id = Some(id.clone());

    if embed {
        outcome.embedding = Some(
            pipeline
                .embed_document(&id, false)
                .await
                .context("document stored but embedding failed; run `docbase embed` to retry")?,
        );
    }
    Ok(())
}

/// Embed one document, or every document with pending chunks.
///
/// `cancel` is only honoured for the all-documents run. It is checked before
/// each chunk commit, so every chunk embedded so far stays saved.
pub async fn embed(
    app: &App,
    document_id: Option<&str>,
    force: bool,
    cancel: &AtomicBool,
) -> Result<EmbedReport> {
    let pipeline = app.pipeline();
    let report = match document_id {
        Some(id) => pipeline.embed_document(id, force).await?,
        None => pipeline.embed_all_cancellable(force, cancel).await?,
    };
    Ok(report)
}

pub async fn ask(app: &App, question: &str, top_k: Option<usize>) -> Result<Answer> {
    let top_k = top_k.unwrap_or(app.config().rag.top_k);
    Ok(app.pipeline().ask(question, top_k).await?)
}

pub async fn search(app: &App, query: &str, top_k: Option<usize>) -> Result<Vec<RetrievalResult>> {
    let top_k = top_k.unwrap_or(app.config().rag.top_k);
    Ok(app.pipeline().search(query, top_k).await?)
}

pub async fn status(app: &App) -> Result<SystemStatus> {
    Ok(app.pipeline().status().await?)
}

/// All documents with their chunk and embedding counts, oldest first.
pub async fn documents(app: &App) -> Result<Vec<DocumentSummary>> {
    let store = app.pipeline().document_store();
    let mut summaries = Vec::new();
    for document in store.list_documents().await? {
        let chunks = store.list_chunks(&document.id).await?;
        summaries.push(summarize(document, &chunks));
    }
    Ok(summaries)
}

fn summarize(document: Document, chunks: &[Chunk]) -> DocumentSummary {
    DocumentSummary {
        embedded_chunks: chunks.iter().filter(|c| c.is_embedded()).count(),
        chunks: chunks.len(),
        id: document.id,
        filename: document.filename,
        content_type: document.content_type,
        uploaded_at: document.uploaded_at,
        total_chars: document.total_chars,
    }
}

/// One document with its chunk and embedding counts.
///
/// Fails with a not-found error for an unknown id.
pub async fn show(app: &App, document_id: &str) -> Result<DocumentSummary> {
    let store = app.pipeline().document_store();
    let document = store
        .get_document(document_id)
        .await?
        .ok_or_else(|| RagError::document_not_found(document_id))?;
    let chunks = store.list_chunks(document_id).await?;
    Ok(summarize(document, &chunks))
}

pub async fn delete(app: &App, document_id: &str) -> Result<DeleteOutcome> {
    let chunks_removed = app.pipeline().delete_document(document_id).await?;
    Ok(DeleteOutcome { document_id: document_id.to_string(), chunks_removed })
}

/// Delete every document, chunk and vector.
pub async fn delete_all(app: &App) -> Result<ClearOutcome> {
    let (documents_deleted, chunks_deleted) = app.pipeline().delete_all().await?;
    Ok(ClearOutcome { documents_deleted, chunks_deleted })
}

pub async fn reconcile(app: &App) -> Result<ReconcileOutcome> {
    let (restored, pruned) = app.pipeline().reconcile().await?;
    Ok(ReconcileOutcome { restored, pruned })
}
