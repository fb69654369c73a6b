//! Text extraction: turns a stored upload into plain text for the judge.
//!
//! Dispatch is by declared format: the locator's extension, then the display
//! name's, then the declared MIME type. Unknown extensions are rejected rather
//! than read as text. Decoding never invents text; an image-only PDF yields
//! an empty string, which is valid judge input.

use std::path::Path;

use tracing::debug;

use crate::evaluation::error::EvaluationError;
use crate::models::document::DocumentHandle;

pub mod docx;

/// Closed set of formats the extractor knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Pdf,
    RichDocument,
}

impl DocumentFormat {
    /// Maps a lowercase extension (with leading dot, or empty) to a format.
    pub fn from_extension(extension: &str) -> Result<Self, EvaluationError> {
        match extension {
            "" | ".txt" => Ok(DocumentFormat::PlainText),
            ".md" | ".markdown" => Ok(DocumentFormat::Markdown),
            ".pdf" => Ok(DocumentFormat::Pdf),
            ".docx" => Ok(DocumentFormat::RichDocument),
            other => Err(EvaluationError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence.to_ascii_lowercase().as_str() {
            "text/plain" => Some(DocumentFormat::PlainText),
            "text/markdown" | "text/x-markdown" => Some(DocumentFormat::Markdown),
            "application/pdf" => Some(DocumentFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(DocumentFormat::RichDocument)
            }
            _ => None,
        }
    }

    /// Resolves the format of a handle. An explicit extension always decides;
    /// the MIME type is only consulted when no extension is present.
    pub fn detect(handle: &DocumentHandle) -> Result<Self, EvaluationError> {
        let extension = extension_of(&handle.locator)
            .or_else(|| extension_of(Path::new(&handle.display_name)));

        match extension {
            Some(ext) => Self::from_extension(&ext),
            None => Ok(handle
                .content_type
                .as_deref()
                .and_then(Self::from_mime)
                .unwrap_or(DocumentFormat::PlainText)),
        }
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// Reads the document behind `handle` and returns its plain text.
pub async fn extract_text(handle: &DocumentHandle) -> Result<String, EvaluationError> {
    let format = DocumentFormat::detect(handle)?;

    let bytes = tokio::fs::read(&handle.locator).await.map_err(|e| {
        EvaluationError::SourceUnavailable(format!("{}: {e}", handle.display_name))
    })?;

    debug!(
        "Extracting {:?} text from {} ({} bytes)",
        format,
        handle.display_name,
        bytes.len()
    );

    match format {
        DocumentFormat::PlainText | DocumentFormat::Markdown => Ok(decode_utf8(bytes)),
        DocumentFormat::Pdf => decode_blocking(&handle.display_name, move || {
            pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| format!("could not decode PDF: {e}"))
        })
        .await,
        DocumentFormat::RichDocument => decode_blocking(&handle.display_name, move || {
            docx::extract_docx_text(&bytes).map_err(|e| e.to_string())
        })
        .await,
    }
}

fn decode_utf8(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Runs a CPU-bound decoder on the blocking pool. A decoder that panics on a
/// hostile file is reported like any other undecodable source.
async fn decode_blocking<F>(display_name: &str, decode: F) -> Result<String, EvaluationError>
where
    F: FnOnce() -> Result<String, String> + Send + 'static,
{
    match tokio::task::spawn_blocking(decode).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(message)) => Err(EvaluationError::SourceUnavailable(format!(
            "{display_name}: {message}"
        ))),
        Err(join_error) => Err(EvaluationError::SourceUnavailable(format!(
            "{display_name}: decoder aborted: {join_error}"
        ))),
    }
}
