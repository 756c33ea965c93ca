//! Process-wide pool of long-lived service handles: embedding client, vector
//! store client, BM25 engine, and content store. Constructed once and shared
//! across every per-document pipeline instance and every request handler.
//!
//! Generalizes the config module's `OnceLock<Config>` singleton from a single
//! value to a pool of service handles, guarded by an async mutex so
//! construction (which talks to the vector store over HTTP) only happens
//! once even under concurrent first-use.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::bm25::Bm25Engine;
use crate::config::get_config;
use crate::content_store::{ContentStore, ContentStoreError};
use crate::embedding::{EmbeddingClient, get_embedding_client};
use crate::qdrant::{QdrantError, QdrantService};

/// Errors raised while constructing or resolving the service pool.
#[derive(Debug, Error)]
pub enum ServicePoolError {
    /// The vector store client could not be constructed or the primary
    /// collection could not be ensured.
    #[error("vector store initialization failed: {0}")]
    VectorStore(#[from] QdrantError),
    /// The content store connection pool could not be established.
    #[error("content store initialization failed: {0}")]
    ContentStore(#[from] ContentStoreError),
}

/// Shared service handles owned by the pool.
pub struct ServicePool {
    /// Embedding HTTP client (or deterministic stub under `TEST_MODE`).
    pub embedding_client: Arc<dyn EmbeddingClient + Send + Sync>,
    /// Vector store HTTP client.
    pub qdrant: Arc<QdrantService>,
    /// In-process BM25 keyword index.
    pub bm25: Arc<Bm25Engine>,
    /// Pooled Postgres-backed content store.
    pub content_store: Arc<ContentStore>,
}

static POOL: Mutex<Option<Arc<ServicePool>>> = Mutex::const_new(None);

/// Return the process-wide service pool, constructing it on first use.
///
/// Uses double-checked locking: the common case (pool already built) only
/// takes the mutex to clone an `Arc`, never re-running the expensive
/// construction path.
pub async fn get_service_pool() -> Result<Arc<ServicePool>, ServicePoolError> {
    {
        let guard = POOL.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
    }

    let mut guard = POOL.lock().await;
    if let Some(pool) = guard.as_ref() {
        return Ok(pool.clone());
    }

    let pool = Arc::new(build_pool().await?);
    *guard = Some(pool.clone());
    Ok(pool)
}

/// Drop the cached pool so the next `get_service_pool` call rebuilds it.
/// Used by tests that need a fresh set of service handles.
pub async fn reset_service_pool() {
    let mut guard = POOL.lock().await;
    *guard = None;
}

async fn build_pool() -> Result<ServicePool, ServicePoolError> {
    let config = get_config();

    let embedding_client: Arc<dyn EmbeddingClient + Send + Sync> = get_embedding_client().into();
    let qdrant = QdrantService::new()?;
    qdrant
        .ensure_collection(&config.qdrant_collection_name, config.vector_dim as u64)
        .await?;

    let content_store = ContentStore::new()?;

    let bm25 = if config.test_mode {
        Bm25Engine::new()
    } else {
        Bm25Engine::with_snapshot_path(&config.bm25_index_path).unwrap_or_else(|error| {
            tracing::warn!(error = %error, "Failed to open BM25 snapshot; starting empty");
            Bm25Engine::new()
        })
    };

    tracing::info!(
        collection = %config.qdrant_collection_name,
        vector_dim = config.vector_dim,
        bm25_documents = bm25.len(),
        "Service pool initialized"
    );

    Ok(ServicePool {
        embedding_client,
        qdrant: Arc::new(qdrant),
        bm25: Arc::new(bm25),
        content_store: Arc::new(content_store),
    })
}
