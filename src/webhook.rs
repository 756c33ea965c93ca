//! Webhook intake (C10): HMAC-verified ingestion of scraped documents from
//! Firecrawl and change notifications from changedetection.io.
//!
//! Both webhooks share the same verification shape — `sha256=<hex>` header,
//! HMAC-SHA256 over the raw body, constant-time comparison — but differ in
//! payload shape and dispatch, so each gets its own handler below while
//! sharing [`verify_signature`].

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::content_store::ContentStoreError;
use crate::models::{ChangeEvent, CrawlSession, CrawlSessionStatus, Document};
use crate::queue::QueueError;
use crate::service_pool::ServicePool;

type HmacSha256 = Hmac<Sha256>;

/// Event types carrying scraped page data.
const PAGE_EVENT_TYPES: &[&str] = &["crawl.page", "batch_scrape.page"];
/// Event types describing crawl/batch-scrape/extract lifecycle transitions.
const LIFECYCLE_EVENT_TYPES: &[&str] = &[
    "crawl.started",
    "crawl.completed",
    "crawl.failed",
    "batch_scrape.started",
    "batch_scrape.completed",
    "extract.started",
    "extract.completed",
    "extract.failed",
];

/// Errors raised while verifying or dispatching a webhook.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The signature header was missing entirely.
    #[error("missing signature header")]
    MissingSignature,
    /// The signature header was present but not `sha256=<64-hex>`.
    #[error("malformed signature header")]
    MalformedSignature,
    /// The computed HMAC did not match the supplied digest.
    #[error("signature mismatch")]
    SignatureMismatch,
    /// No webhook secret is configured for this endpoint.
    #[error("webhook secret is not configured")]
    SecretNotConfigured,
    /// The request body could not be parsed into the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// `type` did not match any known page or lifecycle event.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    /// The job queue could not be reached.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The content store could not be reached.
    #[error(transparent)]
    ContentStore(#[from] ContentStoreError),
}

/// Verify `sha256=<64-hex>` against `raw_body` using `secret`, in constant time.
///
/// Returns the specific failure reason so callers can map it to the right
/// status code, but never reveals *which* check failed to the far end of the
/// HTTP response — only the log line does.
pub fn verify_signature(
    secret: Option<&str>,
    header_value: Option<&str>,
    raw_body: &[u8],
) -> Result<(), WebhookError> {
    let secret = secret.ok_or(WebhookError::SecretNotConfigured)?;
    let header_value = header_value.ok_or(WebhookError::MissingSignature)?;

    let digest_hex = header_value
        .strip_prefix("sha256=")
        .ok_or(WebhookError::MalformedSignature)?;
    if digest_hex.len() != 64 || !digest_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(WebhookError::MalformedSignature);
    }
    let provided = hex::decode(digest_hex).map_err(|_| WebhookError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    let computed = mac.finalize().into_bytes();

    if computed.ct_eq(&provided).into() {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// One document in a Firecrawl page-event `data` array.
#[derive(Debug, Clone, Deserialize)]
pub struct FirecrawlDocumentPayload {
    /// Markdown content, if the scrape produced any.
    #[serde(default)]
    pub markdown: Option<String>,
    /// Raw HTML content, if requested.
    #[serde(default)]
    pub html: Option<String>,
    /// Per-document metadata.
    pub metadata: FirecrawlDocumentMetadata,
}

/// Metadata nested within a Firecrawl document payload.
#[derive(Debug, Clone, Deserialize)]
pub struct FirecrawlDocumentMetadata {
    /// Document URL.
    pub url: String,
    /// Page title, if known.
    #[serde(default)]
    pub title: Option<String>,
    /// Page description, if known.
    #[serde(default)]
    pub description: Option<String>,
    /// HTTP status code of the scrape.
    #[serde(rename = "statusCode", default)]
    pub status_code: Option<u16>,
    /// URL before redirects, if different from `url`.
    #[serde(rename = "sourceURL", default)]
    pub source_url: Option<String>,
    /// ISO language code, if detected.
    #[serde(default)]
    pub language: Option<String>,
    /// ISO country code, if detected.
    #[serde(default)]
    pub country: Option<String>,
}

/// A Firecrawl webhook event envelope, covering both page and lifecycle shapes.
#[derive(Debug, Clone, Deserialize)]
pub struct FirecrawlWebhookEvent {
    /// Whether the underlying crawl/scrape operation succeeded.
    pub success: bool,
    /// Firecrawl job or crawl identifier.
    #[serde(alias = "jobId")]
    pub id: String,
    /// Event discriminator, e.g. `crawl.page` or `crawl.completed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary metadata supplied by Firecrawl alongside the event.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Error message present when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Scraped documents (page events) or lifecycle detail objects.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// Response for a successfully dispatched page event.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    /// Always `"queued"`.
    pub status: &'static str,
    /// Number of batch jobs enqueued (currently always 0 or 1).
    pub queued_jobs: usize,
    /// Opaque ids of the enqueued jobs.
    pub job_ids: Vec<String>,
    /// Per-document validation failures, omitted from the response when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_documents: Vec<FailedDocument>,
}

/// One document in a page event that failed validation.
#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    /// Zero-based position of the document within the event's `data` array.
    pub index: usize,
    /// Human-readable validation failure reason.
    pub error: String,
}

/// Response for an acknowledged lifecycle event.
#[derive(Debug, Serialize)]
pub struct AcknowledgedResponse {
    /// Always `"acknowledged"`.
    pub status: &'static str,
    /// The lifecycle event type that was acknowledged.
    pub event_type: String,
}

/// Outcome of dispatching a verified Firecrawl event.
pub enum DispatchOutcome {
    /// A page event produced at least zero successfully-enqueued documents.
    Queued(QueuedResponse),
    /// A lifecycle event (or a `success: false` event) was recorded/ignored.
    Acknowledged(AcknowledgedResponse),
}

/// Dispatch a verified Firecrawl webhook event: enqueue page documents as one
/// batch, fire-and-forget their raw content to the content store, or record a
/// crawl-session lifecycle transition.
pub async fn dispatch_firecrawl_event(
    pool: &ServicePool,
    queue: &crate::queue::JobQueue,
    event: FirecrawlWebhookEvent,
) -> Result<DispatchOutcome, WebhookError> {
    if !event.success {
        return Ok(DispatchOutcome::Acknowledged(AcknowledgedResponse {
            status: "acknowledged",
            event_type: event.event_type,
        }));
    }

    if PAGE_EVENT_TYPES.contains(&event.event_type.as_str()) {
        return handle_page_event(pool, queue, event).await;
    }

    if LIFECYCLE_EVENT_TYPES.contains(&event.event_type.as_str()) {
        return handle_lifecycle_event(pool, event).await;
    }

    Err(WebhookError::UnknownEventType(event.event_type))
}

async fn handle_page_event(
    pool: &ServicePool,
    queue: &crate::queue::JobQueue,
    event: FirecrawlWebhookEvent,
) -> Result<DispatchOutcome, WebhookError> {
    let crawl_id = event.id.clone();
    let mut documents = Vec::with_capacity(event.data.len());
    let mut failed = Vec::new();

    for (index, raw) in event.data.into_iter().enumerate() {
        match coerce_document(raw) {
            Ok(document) => documents.push(document),
            Err(error) => {
                tracing::warn!(index, error = %error, crawl_id = %crawl_id, "Skipping invalid page document");
                failed.push(FailedDocument { index, error });
            }
        }
    }

    let job_ids = if documents.is_empty() {
        Vec::new()
    } else {
        for document in &documents {
            let metadata = document.metadata.clone();
            pool.content_store.store_async(
                crawl_id.clone(),
                document.url.clone(),
                document.resolved_url.clone(),
                "crawl".into(),
                document.content.clone(),
                document.html.clone(),
                serde_json::to_value(&document.links).unwrap_or(serde_json::Value::Null),
                document.screenshot.clone(),
                metadata,
                document.scraped_at.unwrap_or_else(OffsetDateTime::now_utc),
            );
        }

        let timeout = std::time::Duration::from_secs(
            crate::config::get_config().indexing_job_timeout_secs,
        );
        vec![
            queue
                .enqueue("index_batch", documents, Some(crawl_id), timeout)
                .await?,
        ]
    };

    Ok(DispatchOutcome::Queued(QueuedResponse {
        status: "queued",
        queued_jobs: job_ids.len(),
        job_ids,
        failed_documents: failed,
    }))
}

/// Validate and convert one raw page-event data item into a [`Document`].
/// Each document is validated independently: one invalid document never
/// fails its siblings.
fn coerce_document(raw: serde_json::Value) -> Result<Document, String> {
    let payload: FirecrawlDocumentPayload =
        serde_json::from_value(raw).map_err(|error| error.to_string())?;

    let markdown = payload.markdown.unwrap_or_default();
    if payload.metadata.url.trim().is_empty() {
        return Err("document metadata.url must not be empty".into());
    }

    Ok(Document {
        url: payload.metadata.url.clone(),
        content: markdown,
        resolved_url: payload.metadata.source_url.clone(),
        status: payload.metadata.status_code,
        mime_type: None,
        html: payload.html,
        title: payload.metadata.title,
        description: payload.metadata.description,
        language: payload.metadata.language,
        country: payload.metadata.country,
        is_mobile: false,
        links: Vec::new(),
        screenshot: None,
        metadata: serde_json::Value::Null,
        scraped_at: Some(OffsetDateTime::now_utc()),
    })
}

async fn handle_lifecycle_event(
    pool: &ServicePool,
    event: FirecrawlWebhookEvent,
) -> Result<DispatchOutcome, WebhookError> {
    let (operation_type, status) = match event.event_type.as_str() {
        "crawl.started" => ("crawl", CrawlSessionStatus::InProgress),
        "crawl.completed" => ("crawl", CrawlSessionStatus::Completed),
        "crawl.failed" => ("crawl", CrawlSessionStatus::Failed),
        "batch_scrape.started" => ("batch_scrape", CrawlSessionStatus::InProgress),
        "batch_scrape.completed" => ("batch_scrape", CrawlSessionStatus::Completed),
        // `extract.*` events currently update metadata only: whether they
        // should also transition a session's status is left unspecified by
        // the upstream crawler, so they are acknowledged without a session write.
        "extract.started" | "extract.completed" | "extract.failed" => {
            return Ok(DispatchOutcome::Acknowledged(AcknowledgedResponse {
                status: "acknowledged",
                event_type: event.event_type,
            }));
        }
        other => return Err(WebhookError::UnknownEventType(other.to_string())),
    };

    let now = OffsetDateTime::now_utc();
    let session = CrawlSession {
        job_id: event.id.clone(),
        base_url: event
            .metadata
            .get("url")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
        operation_type: operation_type.to_string(),
        status,
        total_urls: 0,
        completed_urls: 0,
        failed_urls: 0,
        started_at: now,
        completed_at: matches!(
            status,
            CrawlSessionStatus::Completed | CrawlSessionStatus::Failed
        )
        .then_some(now),
        duration_ms: None,
        extra_metadata: event.metadata.clone(),
    };
    pool.content_store.upsert_crawl_session(session).await?;

    Ok(DispatchOutcome::Acknowledged(AcknowledgedResponse {
        status: "acknowledged",
        event_type: event.event_type,
    }))
}

/// `changedetection.io` change-notification payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeDetectionPayload {
    /// Watch identifier assigned by changedetection.io.
    pub watch_id: String,
    /// URL being watched.
    pub watch_url: String,
    /// Human-readable watch title, if configured.
    #[serde(default)]
    pub watch_title: Option<String>,
    /// When the change was detected upstream.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub detected_at: Option<OffsetDateTime>,
    /// Snapshot text at detection time, truncated to 500 characters for storage.
    #[serde(default)]
    pub snapshot: Option<String>,
    /// URL to the full diff, if changedetection.io hosts one.
    #[serde(default)]
    pub diff_url: Option<String>,
}

/// Response for a successfully queued rescrape.
#[derive(Debug, Serialize)]
pub struct ChangeDetectionResponse {
    /// Always `"queued"`.
    pub status: &'static str,
    /// Opaque id of the enqueued rescrape job.
    pub job_id: String,
    /// Id of the change event row this rescrape is tied to.
    pub change_event_id: String,
    /// The watched URL being rescraped.
    pub url: String,
}

/// Record a verified change-detection event and hand it to the rescraper
/// (C13) for enqueue. Returns the change event id and the URL it watches;
/// the rescrape job id is assigned by the caller after enqueueing.
pub async fn record_change_event(
    pool: &ServicePool,
    payload: ChangeDetectionPayload,
) -> Result<ChangeEvent, WebhookError> {
    let event = ChangeEvent {
        id: uuid::Uuid::new_v4().to_string(),
        watch_id: payload.watch_id,
        watch_url: payload.watch_url,
        detected_at: payload.detected_at.unwrap_or_else(OffsetDateTime::now_utc),
        rescrape_job_id: None,
        rescrape_status: "queued".to_string(),
        indexed_at: None,
        extra_metadata: serde_json::json!({
            "watch_title": payload.watch_title,
            "diff_summary": payload.snapshot.as_ref().map(|s| s.chars().take(500).collect::<String>()),
            "snapshot_url": payload.diff_url,
        }),
    };

    pool.content_store.insert_change_event(event.clone()).await?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn verify_signature_accepts_matching_digest() {
        let body = br#"{"hello":"world"}"#;
        let header = sign("secret", body);
        assert!(verify_signature(Some("secret"), Some(&header), body).is_ok());
    }

    #[test]
    fn verify_signature_rejects_tampered_digest() {
        let body = br#"{"hello":"world"}"#;
        let mut header = sign("secret", body);
        header.pop();
        header.push('0');
        let result = verify_signature(Some("secret"), Some(&header), body);
        assert!(matches!(result, Err(WebhookError::SignatureMismatch)));
    }

    #[test]
    fn verify_signature_rejects_malformed_header() {
        let body = b"{}";
        let result = verify_signature(Some("secret"), Some("not-a-signature"), body);
        assert!(matches!(result, Err(WebhookError::MalformedSignature)));
    }

    #[test]
    fn verify_signature_requires_header() {
        let body = b"{}";
        let result = verify_signature(Some("secret"), None, body);
        assert!(matches!(result, Err(WebhookError::MissingSignature)));
    }

    #[test]
    fn verify_signature_requires_configured_secret() {
        let body = b"{}";
        let header = sign("secret", body);
        let result = verify_signature(None, Some(&header), body);
        assert!(matches!(result, Err(WebhookError::SecretNotConfigured)));
    }

    #[test]
    fn coerce_document_rejects_missing_url() {
        let raw = serde_json::json!({
            "markdown": "hello",
            "metadata": {"url": "", "statusCode": 200}
        });
        assert!(coerce_document(raw).is_err());
    }

    #[test]
    fn coerce_document_accepts_minimal_payload() {
        let raw = serde_json::json!({
            "markdown": "hello world",
            "metadata": {"url": "https://e.com/a", "statusCode": 200}
        });
        let document = coerce_document(raw).expect("valid document");
        assert_eq!(document.url, "https://e.com/a");
        assert_eq!(document.content, "hello world");
    }
}
