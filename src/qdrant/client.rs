//! HTTP client for the Qdrant vector store REST API.

use crate::config::get_config;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::json;
use std::time::Duration;

use super::payload::build_payload;
use super::types::{
    CollectionInfoResponse, IndexSummary, ListCollectionsResponse, QdrantError, QueryResponse,
    QueryResponseResult, ScoredPoint, UpsertPoint,
};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// HTTP client for Qdrant collection and point operations.
pub struct QdrantService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantService {
    /// Construct a new client using configuration derived from the environment.
    pub fn new() -> Result<Self, QdrantError> {
        let config = get_config();
        let client = Client::builder()
            .user_agent("search-bridge/0.1")
            .timeout(Duration::from_secs(config.qdrant_timeout_secs))
            .build()?;

        let base_url = normalize_base_url(&config.qdrant_url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(url = %base_url, "Initialized Qdrant HTTP client");

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone(),
        })
    }

    /// Create the collection only when it is missing, sized to `vector_size`.
    pub async fn ensure_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }
        tracing::debug!(collection = collection_name, vector_size, "Creating collection");
        self.create_collection(collection_name, vector_size).await
    }

    /// Create or resize a collection with the specified vector size.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": { "size": vector_size, "distance": "Cosine" }
        });

        let response = self
            .send_with_retry(|| {
                self.request(Method::PUT, &format!("collections/{collection_name}"))
                    .map(|req| req.json(&body))
            })
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection ensured/created");
        })
        .await
    }

    /// Retrieve the names of all collections present in the vector store.
    pub async fn list_collections(&self) -> Result<Vec<String>, QdrantError> {
        let response = self
            .send_with_retry(|| self.request(Method::GET, "collections"))
            .await?;

        if response.status().is_success() {
            let payload: ListCollectionsResponse = response.json().await?;
            Ok(payload
                .result
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect())
        } else {
            Err(self.unexpected_status(response).await)
        }
    }

    /// Count the points currently stored in a collection. Observational: any
    /// failure (unreachable store, missing collection, decode error) is
    /// logged and reported as `0` rather than propagated.
    pub async fn count_points(&self, collection_name: &str) -> u64 {
        let result = async {
            let response = self
                .send_with_retry(|| {
                    self.request(Method::GET, &format!("collections/{collection_name}"))
                })
                .await?;

            if response.status().is_success() {
                let payload: CollectionInfoResponse = response.json().await?;
                Ok(payload.result.points_count.unwrap_or(0))
            } else {
                Err(self.unexpected_status(response).await)
            }
        }
        .await;

        match result {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(error = %error, collection_name, "Failed to count Qdrant points; reporting 0");
                0
            }
        }
    }

    /// Upsert a batch of points, rejecting the whole batch if any vector's
    /// dimension does not match `expected_dim` before issuing any network call.
    pub async fn upsert(
        &self,
        collection_name: &str,
        points: Vec<UpsertPoint>,
        expected_dim: usize,
    ) -> Result<IndexSummary, QdrantError> {
        for point in &points {
            if point.vector.len() != expected_dim {
                return Err(QdrantError::DimensionMismatch {
                    actual: point.vector.len(),
                    expected: expected_dim,
                });
            }
        }

        if points.is_empty() {
            return Ok(IndexSummary::default());
        }

        let inserted = points.len();
        let body = json!({
            "points": points
                .iter()
                .map(|point| {
                    json!({
                        "id": point.id,
                        "vector": point.vector,
                        "payload": build_payload(point),
                    })
                })
                .collect::<Vec<_>>()
        });

        let response = self
            .send_with_retry(|| {
                self.request(
                    Method::PUT,
                    &format!("collections/{collection_name}/points"),
                )
                .map(|req| req.query(&[("wait", true)]).json(&body))
            })
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, points = inserted, "Points upserted");
        })
        .await?;

        Ok(IndexSummary {
            inserted,
            updated: 0,
        })
    }

    /// Search for the nearest neighbors of `vector`, applying an optional filter.
    pub async fn search(
        &self,
        collection_name: &str,
        vector: Vec<f32>,
        filter: Option<serde_json::Value>,
        limit: usize,
        offset: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if offset > 0 {
            body["offset"] = json!(offset);
        }
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }

        let response = self
            .send_with_retry(|| {
                self.request(
                    Method::POST,
                    &format!("collections/{collection_name}/points/search"),
                )
                .map(|req| req.json(&body))
            })
            .await?;

        if !response.status().is_success() {
            return Err(self.unexpected_status(response).await);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        Ok(points
            .into_iter()
            .map(|point| ScoredPoint {
                id: point
                    .id
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| point.id.to_string()),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .send_with_retry(|| {
                self.request(Method::GET, &format!("collections/{collection_name}"))
            })
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.unexpected_status(response).await),
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    /// Issue a request, retrying transient (server-error or transport) failures
    /// up to `MAX_ATTEMPTS` times with exponential backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, QdrantError>
    where
        F: Fn() -> Result<RequestBuilder, QdrantError>,
    {
        let mut attempt = 0;
        let mut backoff = BASE_BACKOFF;
        loop {
            attempt += 1;
            let builder = build()?;
            let outcome = builder.send().await;
            match outcome {
                Ok(response) if response.status().is_server_error() => {
                    if attempt >= MAX_ATTEMPTS {
                        return Ok(response);
                    }
                    tracing::warn!(attempt, status = %response.status(), "Qdrant request failed, retrying");
                }
                Ok(response) => return Ok(response),
                Err(err) if attempt >= MAX_ATTEMPTS => {
                    tracing::error!(attempt, error = %err, "Qdrant request failed, giving up");
                    return Err(QdrantError::Http(err));
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Qdrant request failed, retrying");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn unexpected_status(&self, response: reqwest::Response) -> QdrantError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = QdrantError::UnexpectedStatus { status, body };
        tracing::error!(error = %error, "Qdrant request failed");
        error
    }

    async fn ensure_success<F>(&self, response: reqwest::Response, on_success: F) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            Err(self.unexpected_status(response).await)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn service_for(server: &MockServer) -> QdrantService {
        QdrantService {
            client: Client::new(),
            base_url: server.base_url(),
            api_key: None,
        }
    }

    fn sample_point(id: &str, vector: Vec<f32>) -> UpsertPoint {
        UpsertPoint {
            id: id.into(),
            vector,
            text: "hello".into(),
            canonical_url: "https://example.com/".into(),
            url: "https://example.com/".into(),
            domain: "example.com".into(),
            chunk_index: 0,
            title: None,
            description: None,
            language: None,
            country: None,
            is_mobile: false,
        }
    }

    #[tokio::test]
    async fn upsert_rejects_dimension_mismatch_without_any_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT);
            then.status(200);
        });

        let service = service_for(&server);
        let result = service
            .upsert("docs", vec![sample_point("a", vec![0.1, 0.2])], 3)
            .await;

        assert!(matches!(
            result,
            Err(QdrantError::DimensionMismatch { actual: 2, expected: 3 })
        ));
        assert_eq!(mock.hits(), 0);
    }

    #[tokio::test]
    async fn upsert_sends_points_with_payload() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT).path("/collections/docs/points");
            then.status(200).json_body(serde_json::json!({"result": {}}));
        });

        let service = service_for(&server);
        let summary = service
            .upsert("docs", vec![sample_point("a", vec![0.1, 0.2])], 2)
            .await
            .expect("upsert succeeds");

        assert_eq!(summary.inserted, 1);
        mock.assert();
    }

    #[tokio::test]
    async fn search_parses_bare_points_array() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/collections/docs/points/search");
            then.status(200).json_body(serde_json::json!({
                "result": [
                    { "id": "p1", "score": 0.9, "payload": { "text": "hi" } }
                ]
            }));
        });

        let service = service_for(&server);
        let hits = service
            .search("docs", vec![0.1, 0.2], None, 10, 0, None)
            .await
            .expect("search succeeds");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p1");
    }

    #[tokio::test]
    async fn ensure_collection_skips_create_when_present() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/collections/docs");
            then.status(200);
        });
        let create_mock = server.mock(|when, then| {
            when.method(PUT).path("/collections/docs");
            then.status(200);
        });

        let service = service_for(&server);
        service.ensure_collection("docs", 8).await.expect("ensure ok");
        assert_eq!(create_mock.hits(), 0);
    }
}
