#![deny(missing_docs)]

//! Core library for the hybrid search-indexing bridge: webhook intake,
//! background indexing, dual vector/BM25 search, and the HTTP surface tying
//! them together.

/// HTTP routing and REST handlers (search API surface, stats, health).
pub mod api;
/// In-process BM25 keyword index with crash-safe snapshot persistence.
pub mod bm25;
/// Environment-driven configuration management.
pub mod config;
/// Permanent content store: scraped content, crawl sessions, change events, metrics.
pub mod content_store;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structured logging and tracing setup.
pub mod logging;
/// Aggregate stats gathering for `/api/stats`.
pub mod metrics;
/// Shared data model types for documents, chunks, and persisted records.
pub mod models;
/// Document processing pipeline: chunk, embed, upsert vectors, update BM25.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Job queue adapter: pipelined batch enqueue and background dequeue loop.
pub mod queue;
/// Change-event rescraper: re-fetches and re-indexes pages on change notifications.
pub mod rescrape;
/// Hybrid search orchestrator: semantic, keyword, and RRF-fused search.
pub mod search;
/// Process-wide pool of long-lived service handles.
pub mod service_pool;
/// Canonical URL normalization shared by indexing and search/dedup logic.
pub mod url;
/// Webhook intake: HMAC verification and event dispatch.
pub mod webhook;
