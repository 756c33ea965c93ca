//! Batch worker (C8): run one indexing pipeline (C7) per document in a
//! dequeued job, in parallel, isolating any single document's failure from
//! the rest of the batch.
//!
//! Each document runs in its own `tokio::spawn` task so a panic inside the
//! tokenizer mutex or an embedding client future cannot take down its
//! siblings; `futures_util::future::join_all` then awaits every task,
//! translating a join failure into a typed `"panic"` outcome rather than
//! propagating it. Result order always matches input order, regardless of
//! completion order, because each task's output is paired with its original
//! index before collection.

use std::sync::Arc;

use futures_util::future::join_all;

use crate::models::Document;
use crate::processing::IndexingPipeline;
use crate::processing::types::IndexOutcome;

/// Run the indexing pipeline over every document in `documents`, in
/// parallel, returning one [`IndexOutcome`] per input in the same order.
/// An empty input produces an empty result list.
///
/// Takes an already-constructed [`IndexingPipeline`] (built once from the
/// service pool by the caller) rather than the pool itself, so this function
/// has no dependency on the content store or any other service it does not
/// actually use.
pub async fn process_batch(
    pipeline: &Arc<IndexingPipeline>,
    documents: Vec<Document>,
) -> Vec<IndexOutcome> {
    if documents.is_empty() {
        return Vec::new();
    }

    let tasks = documents.into_iter().enumerate().map(|(index, document)| {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let url = document.url.clone();
            let outcome = pipeline.index(&document).await;
            (index, url, outcome)
        })
    });

    let joined = join_all(tasks).await;

    let mut results: Vec<(usize, IndexOutcome)> = joined
        .into_iter()
        .enumerate()
        .map(|(index, joined)| match joined {
            Ok((index, _url, outcome)) => (index, outcome),
            Err(join_error) => {
                tracing::error!(error = %join_error, "Indexing task panicked");
                (
                    index,
                    IndexOutcome::failure_typed(
                        String::new(),
                        format!("Indexing task failed: {join_error}"),
                        "panic",
                    ),
                )
            }
        })
        .collect();

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, outcome)| outcome).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::Bm25Engine;
    use crate::config;
    use crate::embedding::DeterministicEmbeddingClient;
    use crate::processing::IndexingPipeline;
    use crate::qdrant::QdrantService;

    fn init() {
        config::set_config_for_test(config::tests::sample_config());
    }

    fn pipeline() -> Arc<IndexingPipeline> {
        Arc::new(IndexingPipeline::new_with_parts(
            Arc::new(DeterministicEmbeddingClient),
            Arc::new(QdrantService::new().expect("qdrant client")),
            Arc::new(Bm25Engine::new()),
        ))
    }

    fn document(url: &str, content: &str) -> Document {
        Document {
            url: url.into(),
            content: content.into(),
            ..Document::default()
        }
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_results() {
        init();
        let results = process_batch(&pipeline(), Vec::new()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn preserves_input_order_regardless_of_completion_order() {
        init();
        let docs = vec![
            document("https://e.com/a", "alpha content here"),
            document("https://e.com/b", "bravo content here"),
            document("https://e.com/c", ""),
        ];
        let urls: Vec<String> = docs.iter().map(|d| d.url.clone()).collect();

        let results = process_batch(&pipeline(), docs).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].url, urls[0]);
        assert_eq!(results[1].url, urls[1]);
        assert!(results[0].success);
        assert!(results[1].success);
        assert!(!results[2].success);
    }
}
