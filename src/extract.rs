//! PDF text extraction.
//!
//! Turns an uploaded byte buffer into plain UTF-8 text. Parsing runs on the
//! blocking pool under a wall-clock timeout; a single unreadable page is
//! logged and skipped rather than failing the whole document.

use std::time::Duration;

use lopdf::Document;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::PipelineError;

pub const MIME_PDF: &str = "application/pdf";

/// Leading bytes every PDF file starts with.
pub const PDF_SIGNATURE: &[u8] = b"%PDF";

/// Shortest buffer worth handing to the parser.
const MIN_BUFFER_BYTES: usize = 5;

/// Parser error fragments that indicate an encrypted document.
const ENCRYPTION_KEYWORDS: &[&str] = &["password", "encrypt", "decrypt"];

/// Classified extraction failure, each with a user-facing message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("File is too small to be a valid PDF.")]
    TooSmall,
    #[error("File does not appear to be a valid PDF (missing %PDF header).")]
    NotPdf,
    #[error("The PDF is password-protected. Please upload an unlocked version.")]
    Encrypted,
    #[error("Failed to parse the PDF. The file may be corrupted or use an unsupported format.")]
    Corrupted,
    #[error("The PDF contains no pages.")]
    NoPages,
}

/// Text pulled from a document plus page bookkeeping.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub page_count: usize,
    /// 1-based numbers of the pages that could not be read.
    pub skipped_pages: Vec<u32>,
}

/// Extracts text from PDF bytes synchronously.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<Extraction, ExtractError> {
    if bytes.len() < MIN_BUFFER_BYTES {
        return Err(ExtractError::TooSmall);
    }
    if !bytes.starts_with(PDF_SIGNATURE) {
        return Err(ExtractError::NotPdf);
    }

    let doc = Document::load_mem(bytes).map_err(|e| {
        let msg = e.to_string();
        debug!(error = %msg, "PDF structure could not be parsed");
        classify_parse_error(&msg)
    })?;

    // The loader tries the empty user password and keeps going when it fails,
    // leaving a document whose page tree cannot be walked.
    if doc.is_encrypted() && doc.encryption_state.is_none() {
        debug!("PDF is encrypted with a non-empty user password");
        return Err(ExtractError::Encrypted);
    }

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(ExtractError::NoPages);
    }
    let page_count = pages.len();

    let mut out = String::new();
    let mut skipped_pages = Vec::new();
    for &page_number in pages.keys() {
        match doc.extract_text(&[page_number]) {
            Ok(text) => {
                out.push('\n');
                out.push_str(&text);
            }
            Err(e) => {
                warn!(
                    page = page_number,
                    pages = page_count,
                    error = %e,
                    "Skipping unreadable PDF page"
                );
                skipped_pages.push(page_number);
            }
        }
    }

    Ok(Extraction {
        text: out.trim().to_string(),
        page_count,
        skipped_pages,
    })
}

/// Maps a parser error message to encrypted vs. generic corruption.
pub fn classify_parse_error(message: &str) -> ExtractError {
    let lower = message.to_lowercase();
    if ENCRYPTION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ExtractError::Encrypted
    } else {
        ExtractError::Corrupted
    }
}

/// Runs [`extract_pdf_text`] on the blocking pool, bounded by `timeout`.
///
/// On timeout the caller gets [`PipelineError::ExtractionTimeout`]; the
/// parser thread cannot be interrupted and its late result is discarded.
pub async fn extract_with_timeout(
    bytes: Vec<u8>,
    timeout: Duration,
) -> Result<Extraction, PipelineError> {
    run_blocking(move || extract_pdf_text(&bytes), timeout).await
}

/// A parser panic counts as a corrupted document.
async fn run_blocking<F>(parse: F, timeout: Duration) -> Result<Extraction, PipelineError>
where
    F: FnOnce() -> Result<Extraction, ExtractError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(parse);
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(PipelineError::ExtractionTimeout {
            secs: timeout.as_secs(),
        }),
        Ok(Err(join_err)) if join_err.is_panic() => {
            warn!(error = %join_err, "PDF parser panicked");
            Err(PipelineError::Extraction(ExtractError::Corrupted))
        }
        Ok(Err(join_err)) => Err(PipelineError::Internal(format!(
            "PDF extraction task failed: {}",
            join_err
        ))),
        Ok(Ok(result)) => result.map_err(PipelineError::from),
    }
}

/// Extracted text after the readable-content and maximum-length rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedText {
    pub text: String,
    /// Original length in chars when truncation happened.
    pub truncated_from: Option<usize>,
}

/// Rejects text below `min_chars` and truncates text above `max_chars`.
pub fn enforce_length(
    text: String,
    min_chars: usize,
    max_chars: usize,
) -> Result<BoundedText, PipelineError> {
    let len = text.chars().count();
    if len < min_chars {
        return Err(PipelineError::NoReadableText);
    }
    if len > max_chars {
        return Ok(BoundedText {
            text: truncate_chars(&text, max_chars).to_string(),
            truncated_from: Some(len),
        });
    }
    Ok(BoundedText {
        text,
        truncated_from: None,
    })
}

/// The first `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
