//! Sliding token-window chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` tokens,
//! where consecutive chunks share `floor(chunk_size * overlap_fraction)`
//! tokens. A token is a maximal run of non-whitespace characters.
//!
//! # Algorithm
//!
//! 1. Scan the text once, recording the byte span of every token.
//! 2. Emit the window `[start, min(start + chunk_size, n))`.
//! 3. Stop once a window reaches the last token; otherwise advance
//!    `start` by `chunk_size - overlap`.
//!
//! Chunk text is sliced straight from the source between the first and
//! last token of the window, so internal whitespace is preserved and
//! boundaries are reproducible for the same text and parameters.
//!
//! # Example
//!
//! ```rust
//! use knowledge_router_core::chunk::{chunk_text, ChunkingParams};
//!
//! let params = ChunkingParams { chunk_size: 4, overlap_fraction: 0.5 };
//! let chunks = chunk_text("doc", "a b c d e f", &params).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "a b c d");
//! assert_eq!(chunks[1].text, "c d e f");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Chunk;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("invalid chunking configuration: {0}")]
    Configuration(String),
}

/// Window size and overlap for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkingParams {
    /// Maximum tokens per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fraction of `chunk_size` shared between neighbouring chunks, in `[0, 1)`.
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,
}

fn default_chunk_size() -> usize {
    350
}

fn default_overlap_fraction() -> f64 {
    0.2
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_fraction: default_overlap_fraction(),
        }
    }
}

impl ChunkingParams {
    /// Tokens shared by consecutive chunks.
    pub fn overlap_tokens(&self) -> usize {
        (self.chunk_size as f64 * self.overlap_fraction).floor() as usize
    }

    /// Distance between the starts of consecutive chunks.
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap_tokens())
    }

    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::Configuration(
                "chunk_size must be greater than 0".into(),
            ));
        }
        if !self.overlap_fraction.is_finite() || !(0.0..1.0).contains(&self.overlap_fraction) {
            return Err(ChunkError::Configuration(format!(
                "overlap_fraction must be in [0, 1), got {}",
                self.overlap_fraction
            )));
        }
        if self.overlap_tokens() >= self.chunk_size {
            return Err(ChunkError::Configuration(format!(
                "overlap of {} tokens must be smaller than chunk_size {}",
                self.overlap_tokens(),
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Byte spans `[start, end)` of every whitespace-delimited token in `text`.
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Split `text` into overlapping token windows.
///
/// Always returns at least one chunk: text with no tokens yields a
/// single empty chunk with span `[0, 0)`.
///
/// # Errors
///
/// [`ChunkError::Configuration`] if `params` fail [`ChunkingParams::validate`].
pub fn chunk_text(
    document_id: &str,
    text: &str,
    params: &ChunkingParams,
) -> Result<Vec<Chunk>, ChunkError> {
    params.validate()?;

    let spans = token_spans(text);
    if spans.is_empty() {
        return Ok(vec![Chunk {
            document_id: document_id.to_string(),
            index: 0,
            start_token: 0,
            end_token: 0,
            text: String::new(),
        }]);
    }

    let stride = params.stride();
    let mut chunks = Vec::with_capacity(spans.len() / stride + 1);
    let mut start = 0usize;

    loop {
        let end = (start + params.chunk_size).min(spans.len());
        let byte_start = spans[start].0;
        let byte_end = spans[end - 1].1;
        chunks.push(Chunk {
            document_id: document_id.to_string(),
            index: chunks.len(),
            start_token: start,
            end_token: end,
            text: text[byte_start..byte_end].to_string(),
        });
        if end == spans.len() {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}
