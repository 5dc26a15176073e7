//! Text extraction from uploaded files.

use std::path::Path;

use anyhow::{Context, Result, bail};
use docbase_rag::text::{clean_text, meaningful_chars};
use tracing::{debug, warn};

/// Uploads with fewer non-whitespace characters than this are rejected.
pub const MIN_DOCUMENT_CHARS: usize = 10;

/// Text pulled out of an uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub filename: String,
    pub content_type: &'static str,
    /// Normalised text, ready for ingestion.
    pub text: String,
}

/// Read `path` as PDF or UTF-8 text and normalise the result.
pub fn extract_file(path: &Path) -> Result<Extracted> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} is not a file", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    let is_pdf = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
        || bytes.starts_with(b"%PDF-");
    let (content_type, raw) = if is_pdf {
        let text = extract_pdf(&bytes).with_context(|| format!("failed to parse {filename}"))?;
        ("application/pdf", text)
    } else {
        let text = String::from_utf8(bytes)
            .with_context(|| format!("{filename} is neither a PDF nor UTF-8 text"))?;
        ("text/plain", text)
    };

    let text = clean_text(&raw);
    if meaningful_chars(&text) < MIN_DOCUMENT_CHARS {
        bail!(
            "{filename} contains too little text to index \
             (at least {MIN_DOCUMENT_CHARS} characters needed)"
        );
    }
    debug!(filename = %filename, raw_chars = raw.len(), clean_chars = text.len(), "extracted text");
    Ok(Extracted { filename, content_type, text })
}

/// Extract the text of every page, pages separated by a blank line.
pub fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let document = lopdf::Document::load_mem(bytes).context("not a readable PDF")?;
    let pages = document.get_pages();
    debug!(page_count = pages.len(), "extracting text from PDF");

    let mut texts = Vec::with_capacity(pages.len());
    for page in pages.keys() {
        match document.extract_text(&[*page]) {
            Ok(text) if !text.trim().is_empty() => texts.push(text),
            Ok(_) => {}
            Err(e) => warn!(page, error = %e, "failed to extract page text, skipping"),
        }
    }
    if texts.is_empty() {
        bail!("no text content found in PDF");
    }
    Ok(texts.join("\n\n"))
}
