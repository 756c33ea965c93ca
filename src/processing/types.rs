//! Core data types and error definitions for the processing pipeline.

use thiserror::Error;

/// Errors produced while turning raw text into token-based chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// The shared tokenizer failed to encode or decode a span of text.
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] anyhow::Error),
}

/// Outcome of running the indexing pipeline (C7) for one document.
///
/// Mirrors the result dictionary shape the pipeline returns at every
/// step-level failure as well as on success, so callers (the batch worker,
/// the rescraper) can pattern-match on `success` without a separate error
/// type per step.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// Whether every required step completed (BM25 failures do not flip this to false).
    pub success: bool,
    /// The document URL this outcome concerns.
    pub url: String,
    /// Number of chunks successfully upserted to the vector store.
    pub chunks_indexed: usize,
    /// Sum of `chunk.token_count` across all chunks, present on success.
    pub total_tokens: usize,
    /// Human-readable failure reason, present iff `success` is false.
    pub error: Option<String>,
    /// Coarse failure category (e.g. `"chunking"`, `"embedding"`, `"panic"`),
    /// present iff `success` is false. Lets the batch worker isolate one
    /// document's failure kind without the caller parsing `error`.
    pub error_type: Option<String>,
}

impl IndexOutcome {
    pub(crate) fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self::failure_typed(url, error, "indexing")
    }

    pub(crate) fn failure_typed(
        url: impl Into<String>,
        error: impl Into<String>,
        error_type: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            url: url.into(),
            chunks_indexed: 0,
            total_tokens: 0,
            error: Some(error.into()),
            error_type: Some(error_type.into()),
        }
    }

    pub(crate) fn success(url: impl Into<String>, chunks_indexed: usize, total_tokens: usize) -> Self {
        Self {
            success: true,
            url: url.into(),
            chunks_indexed,
            total_tokens,
            error: None,
            error_type: None,
        }
    }
}
