//! Shared data model types for documents, chunks, and persisted records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A scraped document ready for chunking and indexing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Document {
    /// Source URL of the document, as scraped.
    pub url: String,
    /// Markdown body; the indexing pipeline cleans and chunks this field.
    pub content: String,
    /// Resolved URL after redirects, if different from `url`.
    #[serde(default)]
    pub resolved_url: Option<String>,
    /// HTTP status of the scrape, if known.
    #[serde(default)]
    pub status: Option<u16>,
    /// MIME-type family reported by the crawler (e.g. `text/html`).
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Raw HTML body, retained for the content store but not indexed.
    #[serde(default)]
    pub html: Option<String>,
    /// Optional page title.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional page description/meta description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional detected language code (e.g. `en`).
    #[serde(default)]
    pub language: Option<String>,
    /// Optional detected country code.
    #[serde(default)]
    pub country: Option<String>,
    /// Whether the page was scraped with a mobile user agent.
    #[serde(default)]
    pub is_mobile: bool,
    /// Links discovered on the page.
    #[serde(default)]
    pub links: Vec<String>,
    /// Optional screenshot URL captured during scraping.
    #[serde(default)]
    pub screenshot: Option<String>,
    /// Free-form crawler-supplied metadata, passed through to the content store.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Timestamp at which the page was scraped, if known.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub scraped_at: Option<OffsetDateTime>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            url: String::new(),
            content: String::new(),
            resolved_url: None,
            status: None,
            mime_type: None,
            html: None,
            title: None,
            description: None,
            language: None,
            country: None,
            is_mobile: false,
            links: Vec::new(),
            screenshot: None,
            metadata: serde_json::Value::Null,
            scraped_at: None,
        }
    }
}

/// A single chunk produced by the tokenizer's sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text decoded back from its token window.
    pub text: String,
    /// Zero-based position of this chunk within its source document.
    pub chunk_index: usize,
    /// Number of tokens contained in this chunk.
    pub token_count: usize,
    /// Inclusive start offset into the document's token stream.
    pub start_token: usize,
    /// Exclusive end offset into the document's token stream.
    pub end_token: usize,
}

/// Document-level metadata attached to a BM25 entry and to every vector
/// point produced from the same document, used both for display and for
/// conjunctive search filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Raw URL as scraped.
    pub url: String,
    /// Canonical URL, used as the dedup key during fusion.
    pub canonical_url: String,
    /// Host extracted from the URL, used for domain filters.
    pub domain: String,
    /// Optional page title.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional page description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional language code.
    #[serde(default)]
    pub language: Option<String>,
    /// Optional country code.
    #[serde(default)]
    pub country: Option<String>,
    /// Whether the source page was scraped as mobile.
    #[serde(default)]
    pub is_mobile: bool,
}

/// Which ranking signals a search request should combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Combine vector and keyword rankings via reciprocal rank fusion.
    Hybrid,
    /// Vector similarity search only.
    Semantic,
    /// BM25 keyword search only.
    Keyword,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl SearchMode {
    /// Parse a raw `mode` string, case-insensitively. Unknown values are
    /// returned as `Err(raw)` so the caller can surface the offending value
    /// rather than a generic parse failure.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "semantic" => Ok(Self::Semantic),
            "keyword" | "bm25" => Ok(Self::Keyword),
            _ => Err(raw.to_string()),
        }
    }
}

/// Status of a crawl session, updated by lifecycle webhook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlSessionStatus {
    /// Session has started but not yet reached a terminal state.
    InProgress,
    /// Session finished successfully.
    Completed,
    /// Session finished with an error.
    Failed,
}

impl CrawlSessionStatus {
    /// Render the status the way it is stored in `webhook.crawl_sessions.status`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Aggregate per-crawl bookkeeping, persisted in the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSession {
    /// Unique crawl job id, as assigned by the crawler.
    pub job_id: String,
    /// Base URL the crawl or batch-scrape started from.
    pub base_url: Option<String>,
    /// Crawler-reported operation type (`crawl`, `batch_scrape`, `extract`).
    pub operation_type: String,
    /// Current lifecycle status.
    pub status: CrawlSessionStatus,
    /// Number of URLs submitted to this session.
    pub total_urls: usize,
    /// Number of URLs successfully indexed so far.
    pub completed_urls: usize,
    /// Number of URLs that failed to index.
    pub failed_urls: usize,
    /// When the session's start event was received.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// When the session reached a terminal state.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Duration between start and completion, in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Free-form additional metadata.
    #[serde(default)]
    pub extra_metadata: serde_json::Value,
}

/// A change notification received from an external monitoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Unique identifier for the event row.
    pub id: String,
    /// Watch identifier assigned by the monitoring service.
    pub watch_id: String,
    /// URL being watched.
    pub watch_url: String,
    /// When the change was detected upstream.
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
    /// Id of the rescrape job enqueued for this event, once known.
    #[serde(default)]
    pub rescrape_job_id: Option<String>,
    /// Rescrape status: `queued`, `in_progress`, `completed`, or `failed:<reason>`.
    pub rescrape_status: String,
    /// When the rescraped document was successfully indexed.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub indexed_at: Option<OffsetDateTime>,
    /// Free-form additional metadata (document id, crawler status, errors).
    #[serde(default)]
    pub extra_metadata: serde_json::Value,
}

/// A piece of scraped content persisted for idempotent re-ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredContent {
    /// Unique identifier for the stored row.
    pub id: String,
    /// Crawl session this content was scraped under.
    pub crawl_session_id: String,
    /// Canonicalized URL.
    pub url: String,
    /// Resolved URL after redirects, if different from `url`.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Crawler-reported content source (`single-scrape`, `crawl`, `batch-scrape`).
    pub content_source: String,
    /// Markdown body.
    pub markdown: String,
    /// HTML body.
    #[serde(default)]
    pub html: Option<String>,
    /// Links discovered on the page, as JSON.
    #[serde(default)]
    pub links: serde_json::Value,
    /// Optional screenshot URL.
    #[serde(default)]
    pub screenshot: Option<String>,
    /// Free-form additional metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// SHA-256 hex digest of `markdown`, used for idempotent inserts.
    pub content_hash: String,
    /// When the page was scraped.
    #[serde(with = "time::serde::rfc3339")]
    pub scraped_at: OffsetDateTime,
    /// When this row was first inserted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When this row was last touched.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A single recorded operation, used for `/api/stats` and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetric {
    /// Unique identifier for the metric row.
    pub id: String,
    /// When the operation was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Broad category: `indexing`, `search`, `webhook`, `rescrape`.
    pub operation_type: String,
    /// Specific operation name within the category.
    pub operation_name: String,
    /// Duration of the operation, in milliseconds.
    pub duration_ms: u64,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Optional error message when `success` is false.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Optional request id for correlation with logs.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Optional job id for correlation with the job queue.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Optional crawl id for correlation with a crawl session.
    #[serde(default)]
    pub crawl_id: Option<String>,
    /// Optional document URL the operation concerned.
    #[serde(default)]
    pub document_url: Option<String>,
    /// Free-form additional metadata.
    #[serde(default)]
    pub extra_metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_mode_parse_accepts_known_modes_case_insensitively() {
        assert_eq!(SearchMode::parse("Hybrid"), Ok(SearchMode::Hybrid));
        assert_eq!(SearchMode::parse("semantic"), Ok(SearchMode::Semantic));
        assert_eq!(SearchMode::parse("KEYWORD"), Ok(SearchMode::Keyword));
        assert_eq!(SearchMode::parse("bm25"), Ok(SearchMode::Keyword));
    }

    #[test]
    fn search_mode_parse_rejects_unknown_mode() {
        assert_eq!(SearchMode::parse("fuzzy"), Err("fuzzy".to_string()));
    }
}
