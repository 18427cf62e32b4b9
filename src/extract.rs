//! Text extraction for ingestible files.
//!
//! The pipeline hands over raw bytes plus the file's content type and gets
//! back plain UTF-8 text, or an error that marks only that file as failed.
//!
//! | Extension | Content type | Treatment |
//! |-----------|--------------|-----------|
//! | `.md`, `.markdown` | `text/markdown` | UTF-8 as-is |
//! | `.txt` and anything else textual | `text/plain` | UTF-8 as-is |
//! | `.json` | `application/json` | parsed, re-rendered pretty-printed |
//! | `.pdf` | `application/pdf` | pdf-extract |

use std::path::Path;

use thiserror::Error;

pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_JSON: &str = "application/json";
pub const MIME_PDF: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Content type for a path, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        Some("json") => MIME_JSON,
        Some("pdf") => MIME_PDF,
        _ => MIME_TEXT,
    }
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string())),
        MIME_JSON => {
            let value: serde_json::Value = serde_json::from_slice(bytes)?;
            Ok(serde_json::to_string_pretty(&value)?)
        }
        _ => Ok(String::from_utf8(bytes.to_vec())?),
    }
}
