//! HTTP surface for the search-indexing bridge.
//!
//! Exposes the webhook intake, search, stats, and health endpoints over a
//! compact Axum router:
//!
//! - `POST /api/webhook/firecrawl` – HMAC-verified Firecrawl page/lifecycle events.
//! - `POST /api/webhook/changedetection` – HMAC-verified changedetection.io change notifications.
//! - `POST /api/search` – Bearer-authenticated hybrid/semantic/keyword search.
//! - `GET /api/stats` – Aggregate indexing counters.
//! - `GET /health` – Liveness of the broker, vector store, and embedding provider.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tower_http::cors::CorsLayer;

use crate::config::get_config;
use crate::metrics::gather_stats;
use crate::models::SearchMode;
use crate::qdrant::SearchFilterArgs;
use crate::queue::JobQueue;
use crate::search::{SearchError, SearchOrchestrator, SearchResultRow};
use crate::service_pool::ServicePool;
use crate::webhook::{
    self, ChangeDetectionPayload, DispatchOutcome, FirecrawlWebhookEvent, WebhookError,
};

/// Shared state handed to every route: the long-lived service pool plus the
/// job queue handle used to enqueue webhook-triggered work.
#[derive(Clone)]
pub struct AppState {
    pool: Arc<ServicePool>,
    queue: Arc<JobQueue>,
}

/// Build the HTTP router exposing the webhook, search, stats, and health surface.
pub fn create_router(pool: Arc<ServicePool>, queue: Arc<JobQueue>) -> Router {
    let state = AppState { pool, queue };

    let mut router = Router::new()
        .route("/api/webhook/firecrawl", post(webhook_firecrawl))
        .route(
            "/api/webhook/changedetection",
            post(webhook_changedetection),
        )
        .route("/api/search", post(search))
        .route("/api/stats", get(stats))
        .route("/health", get(health))
        .with_state(state);

    if let Some(cors) = build_cors_layer() {
        router = router.layer(cors);
    }

    router
}

fn build_cors_layer() -> Option<CorsLayer> {
    let config = get_config();
    if config.cors_origins.is_empty() {
        return None;
    }

    if config.cors_origins.iter().any(|origin| origin == "*") {
        // `validate_cors_origins` already rejected this at startup unless the
        // operator explicitly opted in via `CORS_ALLOW_WILDCARD`.
        return Some(CorsLayer::permissive());
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}

async fn webhook_firecrawl(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let config = get_config();
    let header_value = headers
        .get("x-firecrawl-signature")
        .and_then(|value| value.to_str().ok());

    if let Err(error) = webhook::verify_signature(
        config.firecrawl_webhook_secret.as_deref(),
        header_value,
        &body,
    ) {
        return signature_error_response(error);
    }

    let event: FirecrawlWebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => return invalid_payload_response(&body, &error),
    };

    match webhook::dispatch_firecrawl_event(&state.pool, &state.queue, event).await {
        Ok(DispatchOutcome::Queued(response)) => (StatusCode::ACCEPTED, Json(response)).into_response(),
        Ok(DispatchOutcome::Acknowledged(response)) => (StatusCode::OK, Json(response)).into_response(),
        Err(WebhookError::UnknownEventType(event_type)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown event type: {event_type}") })),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(error = %error, "Failed to dispatch firecrawl webhook event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response()
        }
    }
}

async fn webhook_changedetection(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let config = get_config();
    let header_value = headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok());

    if let Err(error) = webhook::verify_signature(
        config.changedetection_webhook_secret.as_deref(),
        header_value,
        &body,
    ) {
        return signature_error_response(error);
    }

    let payload: ChangeDetectionPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(error = %error, "Rejected malformed changedetection payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response();
        }
    };

    let change_event = match webhook::record_change_event(&state.pool, payload).await {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(error = %error, "Failed to record change event");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response();
        }
    };

    let job_id = match state
        .queue
        .enqueue_rescrape(
            change_event.id.clone(),
            change_event.watch_url.clone(),
            change_event.watch_id.clone(),
        )
        .await
    {
        Ok(job_id) => job_id,
        Err(error) => {
            tracing::error!(error = %error, "Failed to enqueue rescrape job");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response();
        }
    };

    (
        StatusCode::ACCEPTED,
        Json(crate::webhook::ChangeDetectionResponse {
            status: "queued",
            job_id,
            change_event_id: change_event.id,
            url: change_event.watch_url,
        }),
    )
        .into_response()
}

fn signature_error_response(error: WebhookError) -> Response {
    let status = match error {
        WebhookError::MalformedSignature => StatusCode::BAD_REQUEST,
        WebhookError::MissingSignature | WebhookError::SignatureMismatch => StatusCode::UNAUTHORIZED,
        WebhookError::SecretNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %error, "Rejected webhook signature");
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn invalid_payload_response(body: &[u8], error: &serde_json::Error) -> Response {
    let sample: String = String::from_utf8_lossy(body).chars().take(500).collect();
    tracing::warn!(error = %error, sample = %sample, "Rejected malformed webhook payload");
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": "invalid payload",
            "validation_errors": [error.to_string()],
            "hint": "expected a webhook event envelope matching the documented schema",
        })),
    )
        .into_response()
}

/// Request body for `POST /api/search`.
#[derive(Debug, Deserialize)]
struct SearchRequestBody {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    filters: Option<SearchFiltersBody>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchFiltersBody {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, rename = "isMobile")]
    is_mobile: Option<bool>,
}

impl From<SearchFiltersBody> for SearchFilterArgs {
    fn from(body: SearchFiltersBody) -> Self {
        SearchFilterArgs {
            domain: body.domain,
            language: body.language,
            country: body.country,
            is_mobile: body.is_mobile,
        }
    }
}

/// Response body for `POST /api/search`.
#[derive(Debug, Serialize)]
struct SearchResponseBody {
    results: Vec<SearchResultRow>,
    total: usize,
    query: String,
    mode: SearchMode,
}

async fn search(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let config = get_config();
    let Some(secret) = config.api_secret.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "search API secret is not configured" })),
        )
            .into_response();
    };
    if !bearer_authorized(&headers, secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "unauthorized" })),
        )
            .into_response();
    }

    let request: SearchRequestBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": error.to_string() })),
            )
                .into_response();
        }
    };

    let mode = match request.mode.as_deref() {
        None => SearchMode::default(),
        Some(raw) => match SearchMode::parse(raw) {
            Ok(mode) => mode,
            Err(raw_mode) => return search_error_response(SearchError::InvalidMode(raw_mode)),
        },
    };
    let limit = request.limit.unwrap_or(config.search_default_limit);
    if limit == 0 || limit > 100 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": "limit must be between 1 and 100" })),
        )
            .into_response();
    }
    let offset = request.offset.unwrap_or(0);
    let filters: SearchFilterArgs = request.filters.unwrap_or_default().into();

    let orchestrator = SearchOrchestrator::new(&state.pool);
    match orchestrator
        .search(&request.query, mode, limit, offset, &filters)
        .await
    {
        Ok((results, total)) => (
            StatusCode::OK,
            Json(SearchResponseBody {
                results,
                total,
                query: request.query,
                mode,
            }),
        )
            .into_response(),
        Err(error) => search_error_response(error),
    }
}

fn search_error_response(error: SearchError) -> Response {
    match error {
        SearchError::InvalidMode(raw_mode) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": format!("unknown search mode: {raw_mode}") })),
        )
            .into_response(),
        error => {
            tracing::error!(error = %error, "search request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": error.to_string() })),
            )
                .into_response()
        }
    }
}

/// Accept either a bare secret or a `Bearer <secret>` header, comparing in
/// constant time so response latency cannot leak how many bytes matched.
fn bearer_authorized(headers: &HeaderMap, expected: &str) -> bool {
    let Some(header) = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) else {
        return false;
    };
    let provided = header.strip_prefix("Bearer ").unwrap_or(header);
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

async fn stats(State(state): State<AppState>) -> Response {
    match gather_stats(&state.pool).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "failed to gather stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": error.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    services: HealthServices,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

#[derive(Debug, Serialize)]
struct HealthServices {
    redis: String,
    qdrant: String,
    tei: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let redis_status = match state.queue.ping().await {
        Ok(()) => "healthy".to_string(),
        Err(error) => format!("unhealthy: {error}"),
    };

    let config = get_config();
    let qdrant_status = match state.pool.qdrant.list_collections().await {
        Ok(_) => "healthy".to_string(),
        Err(error) => format!("unhealthy: {error}"),
    };

    let embedding_status = if config.test_mode {
        "healthy".to_string()
    } else {
        match check_embedding_health(&config.embedding_url).await {
            Ok(()) => "healthy".to_string(),
            Err(reason) => format!("unhealthy: {reason}"),
        }
    };

    let degraded = [&redis_status, &qdrant_status, &embedding_status]
        .iter()
        .any(|status| status.starts_with("unhealthy"));

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" },
        services: HealthServices {
            redis: redis_status,
            qdrant: qdrant_status,
            tei: embedding_status,
        },
        timestamp: OffsetDateTime::now_utc(),
    })
}

async fn check_embedding_health(embedding_url: &str) -> Result<(), String> {
    let url = format!("{}/health", embedding_url.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|error| error.to_string())?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("status {}", response.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn bearer_authorized_accepts_bearer_prefixed_secret() {
        let headers = headers_with_auth("Bearer s3cr3t");
        assert!(bearer_authorized(&headers, "s3cr3t"));
    }

    #[test]
    fn bearer_authorized_accepts_bare_secret() {
        let headers = headers_with_auth("s3cr3t");
        assert!(bearer_authorized(&headers, "s3cr3t"));
    }

    #[test]
    fn bearer_authorized_rejects_wrong_secret() {
        let headers = headers_with_auth("Bearer wrong");
        assert!(!bearer_authorized(&headers, "s3cr3t"));
    }

    #[test]
    fn bearer_authorized_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(!bearer_authorized(&headers, "s3cr3t"));
    }

    #[test]
    fn search_filters_body_maps_is_mobile_camel_case() {
        let parsed: SearchFiltersBody =
            serde_json::from_value(json!({ "domain": "example.com", "isMobile": true })).unwrap();
        assert_eq!(parsed.domain.as_deref(), Some("example.com"));
        assert_eq!(parsed.is_mobile, Some(true));

        let filters: SearchFilterArgs = parsed.into();
        assert_eq!(filters.domain.as_deref(), Some("example.com"));
        assert_eq!(filters.is_mobile, Some(true));
    }
}
