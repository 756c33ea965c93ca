//! Document processing pipeline: cleaning, chunking, embedding, and dual
//! vector/BM25 indexing (C7).

pub mod batch;
pub mod chunking;
mod mappers;
pub mod sanitize;
mod service;
pub mod types;

pub use batch::process_batch;
pub use service::IndexingPipeline;
pub use types::{ChunkingError, IndexOutcome};
