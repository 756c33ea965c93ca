//! Token-based sliding-window chunker.
//!
//! Embedding models have token limits, not character limits, so chunk
//! boundaries are computed against the encoded token stream and decoded back
//! to text afterwards. The tokenizer (`tiktoken-rs`) is not safe for
//! concurrent use, so a single shared instance is guarded by a mutex and
//! reused across every chunking call in the process.

use std::sync::{Mutex, OnceLock};

use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base, p50k_base, p50k_edit, r50k_base};

use crate::config::get_config;
use crate::models::Chunk;

use super::types::ChunkingError;

static TOKENIZER: OnceLock<Mutex<CoreBPE>> = OnceLock::new();

fn tokenizer() -> Result<&'static Mutex<CoreBPE>, ChunkingError> {
    if let Some(tokenizer) = TOKENIZER.get() {
        return Ok(tokenizer);
    }
    let encoding = resolve_encoding(&get_config().tokenizer_encoding)?;
    Ok(TOKENIZER.get_or_init(|| Mutex::new(encoding)))
}

fn resolve_encoding(name: &str) -> Result<CoreBPE, ChunkingError> {
    let encoding = match name {
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "p50k_edit" => p50k_edit(),
        "r50k_base" | "gpt2" => r50k_base(),
        _ => cl100k_base(),
    };
    encoding.map_err(ChunkingError::Tokenizer)
}

/// Split `text` into overlapping token windows of at most `max_tokens`
/// tokens, stepping forward by `max_tokens - overlap_tokens` (at least 1)
/// between windows. Returns an empty vector for blank input.
pub fn chunk_text(
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    if max_tokens == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tokenizer = tokenizer()?;
    let guard = tokenizer.lock().expect("tokenizer mutex poisoned");

    let tokens = guard.encode_ordinary(text);
    let total_tokens = tokens.len();
    let step = max_tokens.saturating_sub(overlap_tokens).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut chunk_index = 0;

    while start < total_tokens {
        let end = (start + max_tokens).min(total_tokens);
        let window = tokens[start..end].to_vec();
        let decoded = guard
            .decode(window.clone())
            .map_err(ChunkingError::Tokenizer)?;

        chunks.push(Chunk {
            text: decoded,
            chunk_index,
            token_count: window.len(),
            start_token: start,
            end_token: end,
        });

        chunk_index += 1;
        start += step;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        crate::config::set_config_for_test(crate::config::tests::sample_config());
    }

    #[test]
    fn chunk_text_respects_token_budget() {
        init();
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunk_text(text, 4, 0).unwrap();
        for chunk in &chunks {
            assert!(chunk.token_count <= 4);
        }
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn chunk_text_handles_empty_input() {
        init();
        assert!(chunk_text("   ", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn chunk_text_rejects_zero_max_tokens() {
        init();
        let error = chunk_text("hello", 0, 0).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn chunk_text_overlaps_consecutive_windows() {
        init();
        let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliet";
        let chunks = chunk_text(text, 4, 2).unwrap();
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[1].start_token, chunks[0].end_token - 2);
    }

    #[test]
    fn chunk_text_indexes_sequentially_from_zero() {
        init();
        let text = "one two three four five six";
        let chunks = chunk_text(text, 2, 0).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }
}
