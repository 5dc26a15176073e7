//! Argument parsing and output rendering.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use docbase_rag::{Answer, AnswerMode, EmbedReport, RetrievalResult, SystemStatus};
use serde::Serialize;
use tracing::{Level, warn};

use crate::app::App;
use crate::commands::{
    self, ClearOutcome, DeleteOutcome, DocumentSummary, ReconcileOutcome, UploadOutcome,
};
use crate::config::{AppConfig, Overrides};

/// Ask questions about your own documents.
#[derive(Debug, Parser)]
#[command(name = "docbase", version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true, env = "DOCBASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the document store and index.
    #[arg(long, global = true, env = "DOCBASE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Base URL of an OpenAI-compatible completion server.
    #[arg(long, global = true, env = "DOCBASE_LLM_URL")]
    pub llm_url: Option<String>,

    /// Model name sent to the completion server.
    #[arg(long, global = true, env = "DOCBASE_LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Time budget for answer generation, in milliseconds.
    #[arg(long, global = true)]
    pub inference_timeout_ms: Option<u64>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value_t = Level::WARN)]
    pub log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add PDF or text files to the knowledge base.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Store and chunk only; embed later with `embed`.
        #[arg(long)]
        no_embed: bool,
    },
    /// Embed pending chunks. Ctrl-C stops before the next chunk is saved.
    Embed {
        /// Re-embed chunks that already have a vector.
        #[arg(long)]
        force: bool,
        /// Limit the run to one document.
        #[arg(long)]
        document: Option<String>,
    },
    /// Answer a question from the stored documents.
    Ask {
        question: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Show the chunks most similar to a query.
    Search {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Show index size, model state and embedding coverage.
    Status,
    /// List stored documents.
    Documents,
    /// Show one document with its chunk counts.
    Show { document_id: String },
    /// Delete a document with its chunks and vectors.
    Delete {
        #[arg(required_unless_present = "all")]
        document_id: Option<String>,
        /// Delete every document and empty the index.
        #[arg(long, conflicts_with = "document_id")]
        all: bool,
    },
    /// Repair the index from the stored chunk embeddings.
    Reconcile,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            data_dir: self.data_dir.clone(),
            llm_url: self.llm_url.clone(),
            llm_model: self.llm_model.clone(),
            inference_timeout_ms: self.inference_timeout_ms,
        }
    }
}

/// Load configuration, open the knowledge base and run the subcommand.
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref(), cli.overrides())?;
    let app = App::open(config).await?;
    let json = cli.json;

    match cli.command {
        Command::Upload { paths, no_embed } => {
            let outcomes = commands::upload(&app, &paths[..], !no_embed).await;
            let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
            emit(json, &outcomes, |o| render_uploads(o))?;
            if failed > 0 {
                anyhow::bail!("{failed} of {} uploads failed", outcomes.len());
            }
        }
        Command::Embed { force, document } => {
            let cancel = Arc::new(AtomicBool::new(false));
            let watcher = {
                let cancel = Arc::clone(&cancel);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupted, stopping before the next chunk is saved");
                        cancel.store(true, Ordering::Relaxed);
                    }
                })
            };
            let report = commands::embed(&app, document.as_deref(), force, &cancel).await;
            watcher.abort();
            emit(json, &report?, render_embed_report)?;
        }
        Command::Ask { question, top_k } => {
            let answer = commands::ask(&app, &question, top_k).await?;
            emit(json, &answer, render_answer)?;
        }
        Command::Search { query, top_k } => {
            let results = commands::search(&app, &query, top_k).await?;
            emit(json, &results, |r| render_results(r))?;
        }
        Command::Status => emit(json, &commands::status(&app).await?, render_status)?,
        Command::Documents => {
            emit(json, &commands::documents(&app).await?, |d| render_documents(d))?
        }
        Command::Show { document_id } => {
            emit(json, &commands::show(&app, &document_id).await?, render_document)?
        }
        Command::Delete { document_id: Some(id), .. } => {
            emit(json, &commands::delete(&app, &id).await?, render_delete)?
        }
        Command::Delete { document_id: None, .. } => {
            emit(json, &commands::delete_all(&app).await?, render_clear)?
        }
        Command::Reconcile => emit(json, &commands::reconcile(&app).await?, render_reconcile)?,
    }
    Ok(())
}

fn emit<T: Serialize + ?Sized>(
    json: bool,
    value: &T,
    render: impl FnOnce(&T) -> String,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", render(value));
    }
    Ok(())
}

fn render_uploads(outcomes: &[UploadOutcome]) -> String {
    let mut lines = Vec::new();
    for outcome in outcomes {
        match (&outcome.document_id, &outcome.error) {
            (Some(id), None) => {
                let mut line = format!("{}: {} chunks, id {id}", outcome.path, outcome.chunks);
                if let Some(report) = &outcome.embedding {
                    line.push_str(&format!(", {} embedded", report.embedded));
                    if report.failed > 0 {
                        line.push_str(&format!(", {} failed", report.failed));
                    }
                }
                lines.push(line);
            }
            (_, Some(error)) => lines.push(format!("{}: error: {error}", outcome.path)),
            (None, None) => lines.push(format!("{}: skipped", outcome.path)),
        }
    }
    lines.join("\n")
}

fn render_embed_report(report: &EmbedReport) -> String {
    let mut line = format!(
        "embedded {}, failed {}, already embedded {}",
        report.embedded, report.failed, report.skipped
    );
    if report.cancelled {
        line.push_str(" (cancelled, run again to resume)");
    }
    line
}

fn render_answer(answer: &Answer) -> String {
    let mut out = answer.text.clone();
    match &answer.mode {
        AnswerMode::Extractive { reason } => {
            out.push_str(&format!("\n\n(extractive answer: {reason})"));
        }
        // Timed-out answers already carry a retry notice.
        AnswerMode::Generated | AnswerMode::NoContext | AnswerMode::TimedOut { .. } => {}
    }
    if !answer.supports.is_empty() {
        out.push_str(&format!("\n\nConfidence: {:.1}%\nSources:", answer.confidence));
        for support in &answer.supports {
            out.push_str(&format!(
                "\n  [{:.3}] {} #{}",
                support.score, support.filename, support.chunk_index
            ));
        }
    }
    out
}

fn render_results(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "no matching chunks".to_string();
    }
    results
        .iter()
        .map(|r| {
            let preview: String = r.text.chars().take(160).collect();
            format!("[{:.3}] {} #{}\n  {}", r.score, r.filename, r.chunk_index, preview)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_status(status: &SystemStatus) -> String {
    let coverage = &status.embedding_coverage;
    let language_model = match &status.language_model {
        Some(name) if status.language_model_available => format!("{name} (available)"),
        Some(name) => format!("{name} (unreachable)"),
        None => "none (extractive answers)".to_string(),
    };
    format!(
        "ready:            {}\n\
         documents:        {}\n\
         chunks:           {} ({} embedded, {} pending, {:.1}%)\n\
         index size:       {} x {}\n\
         embedding model:  {} ({})\n\
         language model:   {language_model}",
        status.ready,
        status.document_count,
        coverage.total_chunks,
        coverage.embedded_chunks,
        coverage.pending_chunks,
        coverage.percent,
        status.index_size,
        status.dimension,
        status.embedding_model,
        if status.model_loaded { "loaded" } else { "not loaded" },
    )
}

fn render_documents(documents: &[DocumentSummary]) -> String {
    if documents.is_empty() {
        return "no documents".to_string();
    }
    documents
        .iter()
        .map(|d| {
            format!(
                "{}  {}  {} chars, {}/{} chunks embedded, uploaded {}",
                d.id,
                d.filename,
                d.total_chars,
                d.embedded_chunks,
                d.chunks,
                d.uploaded_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_document(d: &DocumentSummary) -> String {
    format!(
        "id:           {}\n\
         filename:     {}\n\
         type:         {}\n\
         uploaded:     {}\n\
         characters:   {}\n\
         chunks:       {} ({} embedded)",
        d.id,
        d.filename,
        d.content_type,
        d.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC"),
        d.total_chars,
        d.chunks,
        d.embedded_chunks,
    )
}

fn render_delete(outcome: &DeleteOutcome) -> String {
    format!("deleted {} ({} chunks)", outcome.document_id, outcome.chunks_removed)
}

fn render_clear(outcome: &ClearOutcome) -> String {
    if outcome.documents_deleted == 0 {
        return "no documents to delete".to_string();
    }
    format!(
        "deleted {} documents ({} chunks)",
        outcome.documents_deleted, outcome.chunks_deleted
    )
}

fn render_reconcile(outcome: &ReconcileOutcome) -> String {
    format!("restored {} vectors, pruned {}", outcome.restored, outcome.pruned)
}
