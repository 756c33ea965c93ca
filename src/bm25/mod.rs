//! In-process BM25 keyword index with cross-process file-locked snapshot
//! persistence.
//!
//! One entry per source document (not per chunk); the corpus is small
//! enough that a full rebuild on every insert is cheap and keeps the
//! scoring logic simple, since there is no incremental document-frequency
//! bookkeeping to get wrong.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use fs2::FileExt;

use crate::config::get_config;
use crate::models::DocumentMetadata;
use crate::qdrant::SearchFilterArgs;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors raised by the BM25 engine.
#[derive(Debug, Error)]
pub enum Bm25Error {
    /// Failed to acquire the snapshot file lock before the timeout elapsed.
    #[error("timed out waiting for BM25 snapshot lock after {0:?}")]
    LockTimeout(Duration),
    /// Snapshot file could not be read or written.
    #[error("BM25 snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot contents could not be (de)serialized.
    #[error("BM25 snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Snapshot {
    corpus: Vec<String>,
    tokenized_corpus: Vec<Vec<String>>,
    metadata: Vec<DocumentMetadata>,
}

/// A single BM25 search hit: position, score, and source text/metadata.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    /// Position of the document within the in-memory corpus at query time.
    pub index: usize,
    /// BM25 relevance score.
    pub score: f32,
    /// Full indexed text.
    pub text: String,
    /// Document metadata, used for filtering and result shaping.
    pub metadata: DocumentMetadata,
}

/// In-memory BM25 index, optionally backed by a snapshot file on disk.
pub struct Bm25Engine {
    state: Mutex<EngineState>,
    snapshot_path: Option<PathBuf>,
    lock_timeout: Duration,
    k1: f32,
    b: f32,
}

struct EngineState {
    corpus: Vec<String>,
    tokenized_corpus: Vec<Vec<String>>,
    metadata: Vec<DocumentMetadata>,
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f32,
}

impl EngineState {
    fn empty() -> Self {
        Self {
            corpus: Vec::new(),
            tokenized_corpus: Vec::new(),
            metadata: Vec::new(),
            doc_freq: HashMap::new(),
            avg_doc_len: 0.0,
        }
    }

    fn rebuild(&mut self) {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for tokens in &self.tokenized_corpus {
            total_len += tokens.len();
            let mut seen = std::collections::HashSet::new();
            for token in tokens {
                if seen.insert(token.clone()) {
                    *doc_freq.entry(token.clone()).or_insert(0) += 1;
                }
            }
        }

        self.avg_doc_len = if self.tokenized_corpus.is_empty() {
            0.0
        } else {
            total_len as f32 / self.tokenized_corpus.len() as f32
        };
        self.doc_freq = doc_freq;
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.tokenized_corpus.len() as f32;
        let n_qi = *self.doc_freq.get(term).unwrap_or(&0) as f32;
        ((n - n_qi + 0.5) / (n_qi + 0.5) + 1.0).ln()
    }

    fn score_document(&self, query_tokens: &[String], doc_index: usize, k1: f32, b: f32) -> f32 {
        let tokens = &self.tokenized_corpus[doc_index];
        let doc_len = tokens.len() as f32;
        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        query_tokens
            .iter()
            .map(|term| {
                let f = *term_freq.get(term.as_str()).unwrap_or(&0) as f32;
                if f == 0.0 {
                    return 0.0;
                }
                let idf = self.idf(term);
                let denom = f + k1 * (1.0 - b + b * doc_len / self.avg_doc_len.max(1.0));
                idf * (f * (k1 + 1.0)) / denom
            })
            .sum()
    }

    fn matches_filters(&self, doc_index: usize, filters: &SearchFilterArgs) -> bool {
        let meta = &self.metadata[doc_index];
        if let Some(domain) = filters.domain.as_deref()
            && meta.domain != domain
        {
            return false;
        }
        if let Some(language) = filters.language.as_deref()
            && meta.language.as_deref() != Some(language)
        {
            return false;
        }
        if let Some(country) = filters.country.as_deref()
            && meta.country.as_deref() != Some(country)
        {
            return false;
        }
        if let Some(is_mobile) = filters.is_mobile
            && meta.is_mobile != is_mobile
        {
            return false;
        }
        true
    }
}

impl Bm25Engine {
    /// Build an engine using `bm25_k1`/`bm25_b` from configuration, with no
    /// disk-backed snapshot (purely in-memory; used in tests and `TEST_MODE`).
    pub fn new() -> Self {
        let config = get_config();
        Self {
            state: Mutex::new(EngineState::empty()),
            snapshot_path: None,
            lock_timeout: Duration::from_secs(30),
            k1: config.bm25_k1,
            b: config.bm25_b,
        }
    }

    /// Build an engine backed by a snapshot file, loading existing state if present.
    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Result<Self, Bm25Error> {
        let config = get_config();
        let engine = Self {
            state: Mutex::new(EngineState::empty()),
            snapshot_path: Some(path.into()),
            lock_timeout: Duration::from_secs(30),
            k1: config.bm25_k1,
            b: config.bm25_b,
        };
        engine.load();
        Ok(engine)
    }

    /// Index one document: reject empty/whitespace-only text, tokenize,
    /// append to the corpus, rebuild scoring statistics, and persist a
    /// snapshot. One entry is created per source document, not per chunk.
    pub fn index(&self, text: &str, metadata: DocumentMetadata) -> Result<(), Bm25Error> {
        if text.trim().is_empty() {
            return Ok(());
        }

        {
            let mut state = self.state.lock().expect("BM25 state mutex poisoned");
            let tokens = tokenize(text);
            state.corpus.push(text.to_string());
            state.tokenized_corpus.push(tokens);
            state.metadata.push(metadata);
            state.rebuild();
        }
        self.save()
    }

    /// Score every indexed document against `query`, applying conjunctive
    /// filters, and return the `[offset, offset+limit)` window in descending
    /// score order alongside the total number of filtered matches.
    ///
    /// Ties are broken by corpus insertion order (earlier documents first).
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        filters: &SearchFilterArgs,
    ) -> (Vec<Bm25Hit>, usize) {
        let state = self.state.lock().expect("BM25 state mutex poisoned");
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || state.corpus.is_empty() {
            return (Vec::new(), 0);
        }

        let mut scored: Vec<(usize, f32)> = (0..state.corpus.len())
            .filter(|&idx| state.matches_filters(idx, filters))
            .map(|idx| (idx, state.score_document(&query_tokens, idx, self.k1, self.b)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let total = scored.len();
        let page = scored.into_iter().skip(offset).take(limit);

        let hits = page
            .map(|(idx, score)| Bm25Hit {
                index: idx,
                score,
                text: state.corpus[idx].clone(),
                metadata: state.metadata[idx].clone(),
            })
            .collect();

        (hits, total)
    }

    /// Number of documents currently indexed.
    pub fn len(&self) -> usize {
        self.state.lock().expect("BM25 state mutex poisoned").corpus.len()
    }

    /// Whether the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self) -> Result<(), Bm25Error> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };

        let snapshot = {
            let state = self.state.lock().expect("BM25 state mutex poisoned");
            Snapshot {
                corpus: state.corpus.clone(),
                tokenized_corpus: state.tokenized_corpus.clone(),
                metadata: state.metadata.clone(),
            }
        };

        match acquire_exclusive_lock(path, self.lock_timeout) {
            Ok(lock_file) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(path)?;
                let bytes = serde_json::to_vec_pretty(&snapshot)?;
                file.write_all(&bytes)?;
                file.flush()?;
                FileExt::unlock(&lock_file)?;
                Ok(())
            }
            Err(Bm25Error::LockTimeout(timeout)) => {
                tracing::warn!(
                    ?timeout,
                    "Timed out acquiring BM25 snapshot lock for write; in-memory state remains authoritative"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Load the snapshot, resetting in-memory state to empty on corruption
    /// or decode errors, but never on lock timeout (the file is untouched
    /// and the next operation retries the load).
    fn load(&self) {
        let Some(path) = self.snapshot_path.as_ref() else {
            return;
        };
        if !path.exists() {
            return;
        }

        match acquire_shared_lock(path, self.lock_timeout) {
            Ok(lock_file) => {
                let mut contents = String::new();
                let read_result = File::open(path).and_then(|mut file| file.read_to_string(&mut contents));
                let _ = FileExt::unlock(&lock_file);
                if let Err(error) = read_result {
                    tracing::warn!(error = %error, "Failed to read BM25 snapshot; starting empty");
                    return;
                }

                if contents.trim().is_empty() {
                    return;
                }

                match serde_json::from_str::<Snapshot>(&contents) {
                    Ok(snapshot) => {
                        let mut state = self.state.lock().expect("BM25 state mutex poisoned");
                        state.corpus = snapshot.corpus;
                        state.tokenized_corpus = snapshot.tokenized_corpus;
                        state.metadata = snapshot.metadata;
                        state.rebuild();
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "BM25 snapshot corrupted; starting with an empty index");
                    }
                }
            }
            Err(Bm25Error::LockTimeout(timeout)) => {
                tracing::warn!(
                    ?timeout,
                    "Timed out acquiring BM25 snapshot lock at startup; proceeding with an empty index"
                );
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to open BM25 snapshot; starting empty");
            }
        }
    }
}

impl Default for Bm25Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Path of the sibling advisory-lock file for a snapshot path, e.g.
/// `index.json` -> `index.json.lock`. The lock file co-ordinates access
/// across processes; it is never read for snapshot content itself.
fn lock_file_path(snapshot_path: &Path) -> PathBuf {
    let mut lock_path = snapshot_path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

/// Acquire an exclusive advisory lock on `snapshot_path`'s sibling lock file,
/// returning the held lock file handle. The snapshot file itself is opened
/// separately once the lock is held.
fn acquire_exclusive_lock(snapshot_path: &Path, timeout: Duration) -> Result<File, Bm25Error> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(lock_file_path(snapshot_path))?;
    acquire_lock(&file, timeout, true)?;
    Ok(file)
}

/// Acquire a shared advisory lock on `snapshot_path`'s sibling lock file,
/// returning the held lock file handle.
fn acquire_shared_lock(snapshot_path: &Path, timeout: Duration) -> Result<File, Bm25Error> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .open(lock_file_path(snapshot_path))?;
    acquire_lock(&file, timeout, false)?;
    Ok(file)
}

fn acquire_lock(file: &File, timeout: Duration, exclusive: bool) -> Result<(), Bm25Error> {
    let deadline = Instant::now() + timeout;
    loop {
        let result = if exclusive {
            file.try_lock_exclusive()
        } else {
            file.try_lock_shared()
        };
        match result {
            Ok(()) => return Ok(()),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(_) => return Err(Bm25Error::LockTimeout(timeout)),
        }
    }
}

/// Lowercase whitespace-split tokenization, matching the reference BM25
/// implementation's simple tokenizer.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(domain: &str) -> DocumentMetadata {
        DocumentMetadata {
            url: format!("https://{domain}/"),
            canonical_url: format!("https://{domain}/"),
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    fn test_config() -> crate::config::Config {
        crate::config::tests::sample_config()
    }

    #[test]
    fn index_ranks_matching_documents_above_nonmatching() {
        crate::config::set_config_for_test(test_config());
        let engine = Bm25Engine::new();
        engine
            .index("rust programming language tutorial", meta("a.example"))
            .unwrap();
        engine
            .index("cooking recipes for pasta", meta("b.example"))
            .unwrap();
        engine
            .index("rust memory safety and ownership", meta("c.example"))
            .unwrap();

        let (hits, total) = engine.search("rust memory", 10, 0, &SearchFilterArgs::default());
        assert_eq!(total, 2);
        assert_eq!(hits[0].metadata.domain, "c.example");
    }

    #[test]
    fn index_rejects_blank_text() {
        crate::config::set_config_for_test(test_config());
        let engine = Bm25Engine::new();
        engine.index("   ", meta("a.example")).unwrap();
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn search_returns_empty_for_blank_query() {
        crate::config::set_config_for_test(test_config());
        let engine = Bm25Engine::new();
        engine.index("hello world", meta("a.example")).unwrap();
        let (hits, total) = engine.search("   ", 10, 0, &SearchFilterArgs::default());
        assert!(hits.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn search_applies_domain_filter() {
        crate::config::set_config_for_test(test_config());
        let engine = Bm25Engine::new();
        engine.index("alpha term", meta("a.example")).unwrap();
        engine.index("alpha term again", meta("b.example")).unwrap();

        let filters = SearchFilterArgs {
            domain: Some("a.example".into()),
            ..Default::default()
        };
        let (hits, total) = engine.search("alpha", 10, 0, &filters);
        assert_eq!(total, 1);
        assert_eq!(hits[0].metadata.domain, "a.example");
    }

    #[test]
    fn search_respects_offset_and_limit() {
        crate::config::set_config_for_test(test_config());
        let engine = Bm25Engine::new();
        for i in 0..3 {
            engine
                .index(&format!("alpha term {i}"), meta("a.example"))
                .unwrap();
        }
        let (hits, total) = engine.search("alpha", 1, 1, &SearchFilterArgs::default());
        assert_eq!(total, 3);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        crate::config::set_config_for_test(test_config());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");

        {
            let engine = Bm25Engine::with_snapshot_path(&path).unwrap();
            engine
                .index("persisted document text", meta("a.example"))
                .unwrap();
        }

        let reloaded = Bm25Engine::with_snapshot_path(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let (hits, total) = reloaded.search("persisted", 10, 0, &SearchFilterArgs::default());
        assert_eq!(total, 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn tokenize_lowercases() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello,", "world!"]);
    }

    #[test]
    fn lock_file_path_is_a_sibling_of_the_snapshot() {
        let path = Path::new("/tmp/data/index.json");
        assert_eq!(lock_file_path(path), Path::new("/tmp/data/index.json.lock"));
    }

    #[test]
    fn save_does_not_write_snapshot_contents_into_the_lock_file() {
        crate::config::set_config_for_test(test_config());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");

        let engine = Bm25Engine::with_snapshot_path(&path).unwrap();
        engine.index("locked write test", meta("a.example")).unwrap();

        let lock_contents = std::fs::read(lock_file_path(&path)).unwrap();
        assert!(lock_contents.is_empty());
        let snapshot_contents = std::fs::read_to_string(&path).unwrap();
        assert!(snapshot_contents.contains("locked write test"));
    }

    #[test]
    fn exclusive_lock_on_sibling_file_blocks_a_second_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");

        let held_lock = acquire_exclusive_lock(&path, Duration::from_secs(5)).unwrap();
        let result = acquire_exclusive_lock(&path, Duration::from_millis(200));
        assert!(matches!(result, Err(Bm25Error::LockTimeout(_))));
        FileExt::unlock(&held_lock).unwrap();
    }
}
