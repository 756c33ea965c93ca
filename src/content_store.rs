//! Content store: idempotent persistence of scraped content, crawl sessions,
//! change events, and operation metrics.
//!
//! Backed by a pooled synchronous Postgres client (`r2d2`/`r2d2_postgres`),
//! driven from async call sites via `tokio::task::spawn_blocking`, the same
//! pattern the vector store client uses to wrap a long-lived transport behind
//! an async-friendly service struct.

use std::sync::Arc;
use std::time::Duration;

use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::get_config;
use crate::models::{ChangeEvent, CrawlSession, CrawlSessionStatus, OperationMetric, StoredContent};

/// Errors raised by the content store.
#[derive(Debug, Error)]
pub enum ContentStoreError {
    /// Failed to establish or borrow a pooled connection.
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),
    /// A SQL statement failed.
    #[error("database query error: {0}")]
    Query(#[from] postgres::Error),
    /// Background task executing a blocking query panicked or was cancelled.
    #[error("database task failed to complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Pooled Postgres-backed content store.
#[derive(Clone)]
pub struct ContentStore {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl ContentStore {
    /// Build a connection pool from configuration and ensure the schema exists.
    pub fn new() -> Result<Self, ContentStoreError> {
        let config = get_config();
        let pg_config: postgres::Config = config
            .database_url
            .parse()
            .expect("DATABASE_URL must be a valid postgres connection string");
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(8)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)?;

        let mut conn = pool.get()?;
        ensure_schema(&mut conn)?;
        Ok(Self { pool })
    }

    /// Insert scraped content, keyed by `(crawl_session_id, url, content_hash)`.
    /// If a row with the same key already exists, the existing row is
    /// returned unchanged (idempotent re-ingestion of the same scrape).
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        crawl_session_id: String,
        url: String,
        source_url: Option<String>,
        content_source: String,
        markdown: String,
        html: Option<String>,
        links: serde_json::Value,
        screenshot: Option<String>,
        metadata: serde_json::Value,
        scraped_at: OffsetDateTime,
    ) -> Result<StoredContent, ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<StoredContent, ContentStoreError> {
            let mut conn = pool.get()?;
            let content_hash = hash_content(&markdown);
            let id = uuid::Uuid::new_v4().to_string();

            conn.execute(
                "INSERT INTO webhook.scraped_content
                    (id, crawl_session_id, url, source_url, content_source, markdown, html,
                     links, screenshot, metadata, content_hash, scraped_at, created_at, updated_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12, now(), now())
                 ON CONFLICT (crawl_session_id, url, content_hash) DO NOTHING",
                &[
                    &id,
                    &crawl_session_id,
                    &url,
                    &source_url,
                    &content_source,
                    &markdown,
                    &html,
                    &links,
                    &screenshot,
                    &metadata,
                    &content_hash,
                    &scraped_at,
                ],
            )?;

            let row = conn.query_one(
                "SELECT id, crawl_session_id, url, source_url, content_source, markdown, html,
                        links, screenshot, metadata, content_hash, scraped_at, created_at, updated_at
                 FROM webhook.scraped_content
                 WHERE crawl_session_id = $1 AND url = $2 AND content_hash = $3",
                &[&crawl_session_id, &url, &content_hash],
            )?;

            Ok(row_to_stored_content(&row))
        })
        .await?
    }

    /// Fire-and-forget variant of [`store`](Self::store): spawns a background
    /// task and never propagates its failure to the caller. Failures are only
    /// observable via the `operation_metric` row it records.
    #[allow(clippy::too_many_arguments)]
    pub fn store_async(
        self: &Arc<Self>,
        crawl_session_id: String,
        url: String,
        source_url: Option<String>,
        content_source: String,
        markdown: String,
        html: Option<String>,
        links: serde_json::Value,
        screenshot: Option<String>,
        metadata: serde_json::Value,
        scraped_at: OffsetDateTime,
    ) {
        let store = Arc::clone(self);
        let document_url = url.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = store
                .store(
                    crawl_session_id,
                    url,
                    source_url,
                    content_source,
                    markdown,
                    html,
                    links,
                    screenshot,
                    metadata,
                    scraped_at,
                )
                .await;

            let (success, error_message) = match &result {
                Ok(_) => (true, None),
                Err(error) => {
                    tracing::warn!(error = %error, url = %document_url, "Fire-and-forget content store write failed");
                    (false, Some(error.to_string()))
                }
            };

            store
                .record_operation_metric(OperationMetric {
                    id: uuid::Uuid::new_v4().to_string(),
                    timestamp: now(),
                    operation_type: "webhook".into(),
                    operation_name: "store_content_async".into(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    success,
                    error_message,
                    request_id: None,
                    job_id: None,
                    crawl_id: None,
                    document_url: Some(document_url),
                    extra_metadata: serde_json::Value::Null,
                })
                .await;
        });
    }

    /// Most recent stored content rows for a URL, newest first.
    pub async fn by_url(
        &self,
        url: String,
        limit: usize,
    ) -> Result<Vec<StoredContent>, ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<StoredContent>, ContentStoreError> {
            let mut conn = pool.get()?;
            let rows = conn.query(
                "SELECT id, crawl_session_id, url, source_url, content_source, markdown, html,
                        links, screenshot, metadata, content_hash, scraped_at, created_at, updated_at
                 FROM webhook.scraped_content
                 WHERE url = $1
                 ORDER BY scraped_at DESC
                 LIMIT $2",
                &[&url, &(limit as i64)],
            )?;
            Ok(rows.iter().map(row_to_stored_content).collect())
        })
        .await?
    }

    /// Stored content rows for a crawl session, oldest first.
    pub async fn by_session(
        &self,
        crawl_session_id: String,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredContent>, ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<StoredContent>, ContentStoreError> {
            let mut conn = pool.get()?;
            let rows = conn.query(
                "SELECT id, crawl_session_id, url, source_url, content_source, markdown, html,
                        links, screenshot, metadata, content_hash, scraped_at, created_at, updated_at
                 FROM webhook.scraped_content
                 WHERE crawl_session_id = $1
                 ORDER BY scraped_at ASC
                 LIMIT $2 OFFSET $3",
                &[&crawl_session_id, &(limit as i64), &(offset as i64)],
            )?;
            Ok(rows.iter().map(row_to_stored_content).collect())
        })
        .await?
    }

    /// Insert a new crawl session row, or update an existing one in place.
    /// A re-received `start` for a session already in a terminal state
    /// (`completed`/`failed`) is a no-op on the status column.
    pub async fn upsert_crawl_session(
        &self,
        session: CrawlSession,
    ) -> Result<(), ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ContentStoreError> {
            let mut conn = pool.get()?;
            conn.execute(
                "INSERT INTO webhook.crawl_sessions
                    (job_id, base_url, operation_type, started_at, completed_at, status,
                     total_urls, completed_urls, failed_urls, duration_ms, extra_metadata)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
                 ON CONFLICT (job_id) DO UPDATE SET
                    completed_at = EXCLUDED.completed_at,
                    status = CASE
                        WHEN webhook.crawl_sessions.status IN ('completed', 'failed')
                        THEN webhook.crawl_sessions.status
                        ELSE EXCLUDED.status
                    END,
                    total_urls = EXCLUDED.total_urls,
                    completed_urls = EXCLUDED.completed_urls,
                    failed_urls = EXCLUDED.failed_urls,
                    duration_ms = EXCLUDED.duration_ms,
                    extra_metadata = EXCLUDED.extra_metadata",
                &[
                    &session.job_id,
                    &session.base_url,
                    &session.operation_type,
                    &session.started_at,
                    &session.completed_at,
                    &session.status.as_str(),
                    &(session.total_urls as i64),
                    &(session.completed_urls as i64),
                    &(session.failed_urls as i64),
                    &session.duration_ms.map(|v| v as i64),
                    &session.extra_metadata,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Record a change event received from a monitoring webhook.
    pub async fn insert_change_event(&self, event: ChangeEvent) -> Result<(), ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ContentStoreError> {
            let mut conn = pool.get()?;
            conn.execute(
                "INSERT INTO webhook.change_events
                    (id, watch_id, watch_url, detected_at, rescrape_job_id, rescrape_status,
                     indexed_at, extra_metadata)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
                &[
                    &event.id,
                    &event.watch_id,
                    &event.watch_url,
                    &event.detected_at,
                    &event.rescrape_job_id,
                    &event.rescrape_status,
                    &event.indexed_at,
                    &event.extra_metadata,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Attach the rescrape job id and move a change event to `in_progress`.
    /// Committed in its own transaction, before the external crawler call.
    pub async fn mark_rescrape_in_progress(
        &self,
        change_event_id: String,
        rescrape_job_id: String,
    ) -> Result<(), ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ContentStoreError> {
            let mut conn = pool.get()?;
            conn.execute(
                "UPDATE webhook.change_events
                 SET rescrape_job_id = $2, rescrape_status = 'in_progress'
                 WHERE id = $1",
                &[&change_event_id, &rescrape_job_id],
            )?;
            Ok(())
        })
        .await?
    }

    /// Record the final outcome of a rescrape. Committed in its own
    /// transaction, after the external crawler call returns (success or
    /// failure) — never rolled back by that call failing.
    pub async fn finish_rescrape(
        &self,
        change_event_id: String,
        rescrape_status: String,
        indexed_at: Option<OffsetDateTime>,
        extra_metadata: serde_json::Value,
    ) -> Result<(), ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ContentStoreError> {
            let mut conn = pool.get()?;
            conn.execute(
                "UPDATE webhook.change_events
                 SET rescrape_status = $2, indexed_at = $3, extra_metadata = $4
                 WHERE id = $1",
                &[&change_event_id, &rescrape_status, &indexed_at, &extra_metadata],
            )?;
            Ok(())
        })
        .await?
    }

    /// Record an operation metric. Callers typically fire this without
    /// awaiting the result on the hot path; failures are logged, not
    /// propagated, since a metrics write must never fail an indexing or
    /// search request.
    pub async fn record_operation_metric(&self, metric: OperationMetric) {
        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(), ContentStoreError> {
            let mut conn = pool.get()?;
            conn.execute(
                "INSERT INTO webhook.operation_metrics
                    (id, timestamp, operation_type, operation_name, duration_ms, success,
                     error_message, request_id, job_id, crawl_id, document_url, extra_metadata)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
                &[
                    &metric.id,
                    &metric.timestamp,
                    &metric.operation_type,
                    &metric.operation_name,
                    &(metric.duration_ms as i64),
                    &metric.success,
                    &metric.error_message,
                    &metric.request_id,
                    &metric.job_id,
                    &metric.crawl_id,
                    &metric.document_url,
                    &metric.extra_metadata,
                ],
            )?;
            Ok(())
        })
        .await;

        match result {
            Err(error) => tracing::warn!(error = %error, "Failed to join operation metric write task"),
            Ok(Err(error)) => tracing::warn!(error = %error, "Failed to record operation metric"),
            Ok(Ok(())) => {}
        }
    }

    /// Total number of distinct documents (scraped_content rows) stored,
    /// used by `/api/stats`.
    pub async fn count_documents(&self) -> Result<u64, ContentStoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, ContentStoreError> {
            let mut conn = pool.get()?;
            let row = conn.query_one("SELECT count(*) FROM webhook.scraped_content", &[])?;
            let count: i64 = row.get(0);
            Ok(count as u64)
        })
        .await?
    }
}

fn row_to_stored_content(row: &postgres::Row) -> StoredContent {
    StoredContent {
        id: row.get("id"),
        crawl_session_id: row.get("crawl_session_id"),
        url: row.get("url"),
        source_url: row.get("source_url"),
        content_source: row.get("content_source"),
        markdown: row.get("markdown"),
        html: row.get("html"),
        links: row.get("links"),
        screenshot: row.get("screenshot"),
        metadata: row.get("metadata"),
        content_hash: row.get("content_hash"),
        scraped_at: row.get("scraped_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn ensure_schema(
    conn: &mut r2d2::PooledConnection<PostgresConnectionManager<NoTls>>,
) -> Result<(), ContentStoreError> {
    conn.batch_execute(
        "
        CREATE SCHEMA IF NOT EXISTS webhook;

        CREATE TABLE IF NOT EXISTS webhook.scraped_content (
            id TEXT PRIMARY KEY,
            crawl_session_id TEXT NOT NULL,
            url TEXT NOT NULL,
            source_url TEXT,
            content_source TEXT NOT NULL,
            markdown TEXT NOT NULL,
            html TEXT,
            links JSONB NOT NULL DEFAULT '[]',
            screenshot TEXT,
            metadata JSONB NOT NULL DEFAULT '{}',
            content_hash CHAR(64) NOT NULL,
            scraped_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (crawl_session_id, url, content_hash)
        );

        CREATE TABLE IF NOT EXISTS webhook.crawl_sessions (
            job_id TEXT PRIMARY KEY,
            base_url TEXT,
            operation_type TEXT NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ,
            status TEXT NOT NULL,
            total_urls BIGINT NOT NULL DEFAULT 0,
            completed_urls BIGINT NOT NULL DEFAULT 0,
            failed_urls BIGINT NOT NULL DEFAULT 0,
            duration_ms BIGINT,
            extra_metadata JSONB NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS webhook.change_events (
            id TEXT PRIMARY KEY,
            watch_id TEXT NOT NULL,
            watch_url TEXT NOT NULL,
            detected_at TIMESTAMPTZ NOT NULL,
            rescrape_job_id TEXT,
            rescrape_status TEXT NOT NULL,
            indexed_at TIMESTAMPTZ,
            extra_metadata JSONB NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS webhook.operation_metrics (
            id TEXT PRIMARY KEY,
            timestamp TIMESTAMPTZ NOT NULL,
            operation_type TEXT NOT NULL,
            operation_name TEXT NOT NULL,
            duration_ms BIGINT NOT NULL,
            success BOOLEAN NOT NULL,
            error_message TEXT,
            request_id TEXT,
            job_id TEXT,
            crawl_id TEXT,
            document_url TEXT,
            extra_metadata JSONB NOT NULL DEFAULT '{}'
        );
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_content_is_stable_and_distinguishes_inputs() {
        let a = hash_content("hello");
        let b = hash_content("hello");
        let c = hash_content("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
