//! Change-event rescraper (C13): on a change notification, re-fetch the
//! watched page from the crawler and funnel it through the indexing pipeline
//! exactly like a webhook-delivered document.
//!
//! The state transition around the external call is split into two separate
//! transactions on purpose: `in_progress` commits before the HTTP call to the
//! crawler, and the final outcome commits after it returns, so a crawler
//! failure can never roll back the fact that the rescrape was attempted.

use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

use crate::content_store::ContentStoreError;
use crate::models::Document;
use crate::processing::IndexingPipeline;
use crate::service_pool::ServicePool;

/// Errors raised while rescraping a changed URL.
#[derive(Debug, Error)]
pub enum RescrapeError {
    /// The content store could not be reached.
    #[error(transparent)]
    ContentStore(#[from] ContentStoreError),
    /// The crawler's HTTP API could not be reached or returned an error status.
    #[error("crawler request failed: {0}")]
    Crawler(#[from] reqwest::Error),
    /// The crawler responded successfully but reported `success: false`.
    #[error("crawler reported failure: {0}")]
    CrawlerFailed(String),
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    metadata: ScrapeMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Re-fetch `watch_url` from the configured crawler and return its scraped content.
async fn fetch_from_crawler(client: &Client, watch_url: &str) -> Result<ScrapeData, RescrapeError> {
    let config = crate::config::get_config();
    let base_url = config
        .firecrawl_api_url
        .clone()
        .unwrap_or_else(|| "http://firecrawl:3002".to_string());
    let api_key = config
        .firecrawl_api_key
        .clone()
        .unwrap_or_else(|| "self-hosted-no-auth".to_string());

    let response = client
        .post(format!("{}/v2/scrape", base_url.trim_end_matches('/')))
        .bearer_auth(api_key)
        .json(&serde_json::json!({
            "url": watch_url,
            "formats": ["markdown", "html"],
            "onlyMainContent": true,
        }))
        .timeout(Duration::from_secs(120))
        .send()
        .await?
        .error_for_status()?;

    let scrape: ScrapeResponse = response.json().await?;
    if !scrape.success {
        return Err(RescrapeError::CrawlerFailed(
            "crawler reported success=false".into(),
        ));
    }
    Ok(scrape.data.unwrap_or(ScrapeData {
        markdown: String::new(),
        html: None,
        metadata: ScrapeMetadata::default(),
    }))
}

/// Rescrape the URL behind `change_event_id`, re-index it, and record the
/// outcome. Never propagates a crawler failure past recording `failed:
/// <reason>` on the change event row — the caller only needs to know the job
/// finished, not whether it succeeded.
pub async fn rescrape_changed_url(
    pool: &ServicePool,
    pipeline: &Arc<IndexingPipeline>,
    client: &Client,
    change_event_id: String,
    watch_url: String,
    watch_id: String,
    rescrape_job_id: String,
) {
    if let Err(error) = pool
        .content_store
        .mark_rescrape_in_progress(change_event_id.clone(), rescrape_job_id.clone())
        .await
    {
        tracing::error!(error = %error, change_event_id = %change_event_id, "Failed to record rescrape start");
        return;
    }

    tracing::info!(url = %watch_url, change_event_id = %change_event_id, "Calling crawler for rescrape");

    match fetch_from_crawler(client, &watch_url).await {
        Ok(scraped) => {
            let document = Document {
                url: watch_url.clone(),
                content: scraped.markdown,
                html: scraped.html,
                title: scraped.metadata.title,
                description: scraped.metadata.description,
                language: Some("en".to_string()),
                scraped_at: Some(OffsetDateTime::now_utc()),
                ..Document::default()
            };

            let outcome = pipeline.index(&document).await;
            if outcome.success {
                let extra_metadata = serde_json::json!({
                    "watch_id": watch_id,
                    "chunks_indexed": outcome.chunks_indexed,
                });
                if let Err(error) = pool
                    .content_store
                    .finish_rescrape(
                        change_event_id.clone(),
                        "completed".to_string(),
                        Some(OffsetDateTime::now_utc()),
                        extra_metadata,
                    )
                    .await
                {
                    tracing::error!(error = %error, change_event_id = %change_event_id, "Failed to record rescrape completion");
                }
                tracing::info!(url = %watch_url, change_event_id = %change_event_id, "Rescrape completed");
            } else {
                record_failure(pool, &change_event_id, &watch_id, outcome.error.as_deref().unwrap_or("indexing failed")).await;
            }
        }
        Err(error) => {
            tracing::error!(error = %error, url = %watch_url, change_event_id = %change_event_id, "Rescrape crawler call failed");
            record_failure(pool, &change_event_id, &watch_id, &error.to_string()).await;
        }
    }
}

async fn record_failure(pool: &ServicePool, change_event_id: &str, watch_id: &str, reason: &str) {
    let truncated: String = reason.chars().take(200).collect();
    let extra_metadata = serde_json::json!({
        "watch_id": watch_id,
        "error": reason,
    });
    if let Err(error) = pool
        .content_store
        .finish_rescrape(
            change_event_id.to_string(),
            format!("failed: {truncated}"),
            None,
            extra_metadata,
        )
        .await
    {
        tracing::error!(error = %error, change_event_id, "Failed to record rescrape failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_metadata_defaults_when_absent() {
        let response: ScrapeResponse = serde_json::from_value(serde_json::json!({
            "success": true,
        }))
        .unwrap();
        assert!(response.success);
        assert!(response.data.is_none());
    }

    #[test]
    fn scrape_response_parses_nested_metadata() {
        let response: ScrapeResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "data": {
                "markdown": "# hi",
                "metadata": {"title": "Hi"}
            }
        }))
        .unwrap();
        let data = response.data.unwrap();
        assert_eq!(data.markdown, "# hi");
        assert_eq!(data.metadata.title.as_deref(), Some("Hi"));
    }
}
