//! Search orchestrator (C11): route a query to semantic, keyword, or fused
//! hybrid search, deduplicating and scoring with Reciprocal Rank Fusion.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::bm25::Bm25Hit;
use crate::models::SearchMode;
use crate::qdrant::{ScoredPoint, SearchFilterArgs, build_search_filter};
use crate::service_pool::ServicePool;

/// Errors raised while running a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// `mode` did not match any of `hybrid`, `semantic`, `keyword`/`bm25`.
    #[error("unknown search mode: {0}")]
    InvalidMode(String),
    /// The embedding provider failed while embedding the query.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingClientError),
    /// The vector store failed while searching.
    #[error("vector store search failed: {0}")]
    VectorStore(#[from] crate::qdrant::QdrantError),
}

/// One ranked, deduplicated search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultRow {
    /// Document URL.
    pub url: String,
    /// Optional document title.
    pub title: Option<String>,
    /// Optional document description.
    pub description: Option<String>,
    /// Matched text snippet.
    pub text: String,
    /// Relevance score. For hybrid results this is the RRF score.
    pub score: f32,
    /// Additional metadata carried through from the source hit.
    pub metadata: Value,
}

/// Runs searches against the shared embedding, vector store, and BM25 services.
pub struct SearchOrchestrator<'a> {
    pool: &'a ServicePool,
}

impl<'a> SearchOrchestrator<'a> {
    /// Build an orchestrator over the process-wide service pool.
    pub fn new(pool: &'a ServicePool) -> Self {
        Self { pool }
    }

    /// Run a search and return `(results, total_matches)`.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        offset: usize,
        filters: &SearchFilterArgs,
    ) -> Result<(Vec<SearchResultRow>, usize), SearchError> {
        if query.trim().is_empty() {
            return Ok((Vec::new(), 0));
        }

        match mode {
            SearchMode::Semantic => self.semantic_search(query, limit, offset, filters).await,
            SearchMode::Keyword => Ok(self.keyword_search(query, limit, offset, filters)),
            SearchMode::Hybrid => self.hybrid_search(query, limit, offset, filters).await,
        }
    }

    async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        filters: &SearchFilterArgs,
    ) -> Result<(Vec<SearchResultRow>, usize), SearchError> {
        let embeddings = self
            .pool
            .embedding_client
            .generate_embeddings(vec![query.to_string()])
            .await?;
        let Some(vector) = embeddings.into_iter().next() else {
            return Ok((Vec::new(), 0));
        };
        if vector.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let config = crate::config::get_config();
        let filter = build_search_filter(filters);
        let points = self
            .pool
            .qdrant
            .search(
                &config.qdrant_collection_name,
                vector,
                filter,
                limit,
                offset,
                None,
            )
            .await?;

        let total = points.len();
        let rows = points.into_iter().map(scored_point_to_row).collect();
        Ok((rows, total))
    }

    fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        filters: &SearchFilterArgs,
    ) -> (Vec<SearchResultRow>, usize) {
        let (hits, total) = self.pool.bm25.search(query, limit, offset, filters);
        (hits.into_iter().map(bm25_hit_to_row).collect(), total)
    }

    async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        filters: &SearchFilterArgs,
    ) -> Result<(Vec<SearchResultRow>, usize), SearchError> {
        let config = crate::config::get_config();
        let fetch_limit =
            (((limit + offset) as f32) * config.hybrid_fetch_buffer).ceil() as usize;
        let fetch_limit = fetch_limit.max(limit + offset).max(1);

        let (vector_rows, vector_total) =
            self.semantic_search(query, fetch_limit, 0, filters).await?;
        let (keyword_rows, keyword_total) = self.keyword_search(query, fetch_limit, 0, filters);

        let fused = reciprocal_rank_fusion(vec![vector_rows, keyword_rows], config.rrf_k);

        let total = vector_total.max(keyword_total);
        let page = fused
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|ranked| ranked.row)
            .collect();
        Ok((page, total))
    }
}

/// One result plus the canonical key it was deduplicated on and the RRF score
/// accumulated for it.
struct RankedResult {
    key: String,
    row: SearchResultRow,
}

/// Fuse `ranked_lists` (already sorted best-first, 0-indexed) via Reciprocal
/// Rank Fusion with constant `k`, deduplicating by the precedence chain
/// described in the module's owning component (`payload.canonical_url` →
/// `metadata.canonical_url` → `payload.url` → `metadata.url` → `result.id` →
/// a deterministic fallback). Ties are broken by first-occurrence order;
/// each result's row is rebuilt from its first occurrence so downstream
/// field extraction stays consistent.
fn reciprocal_rank_fusion(ranked_lists: Vec<Vec<SearchResultRow>>, k: f32) -> Vec<RankedResult> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut first_seen: HashMap<String, (usize, SearchResultRow)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for list in ranked_lists {
        for (index, row) in list.into_iter().enumerate() {
            let rank = index + 1;
            let key = dedup_key(&row, rank);
            let contribution = 1.0 / (k + rank as f32);
            *scores.entry(key.clone()).or_insert(0.0) += contribution;

            if let std::collections::hash_map::Entry::Vacant(entry) = first_seen.entry(key.clone()) {
                entry.insert((order.len(), row));
                order.push(key);
            }
        }
    }

    let mut fused: Vec<RankedResult> = order
        .into_iter()
        .map(|key| {
            let score = scores[&key];
            let (_, mut row) = first_seen.remove(&key).expect("key was just inserted");
            row.score = score;
            RankedResult { key, row }
        })
        .collect();

    // `sort_by` is stable, so ties keep their first-occurrence relative order.
    fused.sort_by(|a, b| b.row.score.partial_cmp(&a.row.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

fn dedup_key(row: &SearchResultRow, rank: usize) -> String {
    if let Some(value) = string_field(&row.metadata, "canonical_url") {
        return value;
    }
    if let Some(value) = string_field(&row.metadata, "url") {
        return value;
    }
    if !row.url.is_empty() {
        return row.url.clone();
    }
    format!("__rank_{rank}_{}", hash_row(row))
}

fn string_field(metadata: &Value, field: &str) -> Option<String> {
    metadata.get(field).and_then(Value::as_str).map(str::to_string)
}

fn hash_row(row: &SearchResultRow) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    row.url.hash(&mut hasher);
    row.text.hash(&mut hasher);
    hasher.finish()
}

fn scored_point_to_row(point: ScoredPoint) -> SearchResultRow {
    let payload = point.payload.unwrap_or_default();
    let metadata = Value::Object(payload.clone());
    SearchResultRow {
        url: field_str(&payload, "url").unwrap_or_default(),
        title: field_str(&payload, "title"),
        description: field_str(&payload, "description"),
        text: field_str(&payload, "text").unwrap_or_default(),
        score: point.score,
        metadata,
    }
}

fn bm25_hit_to_row(hit: Bm25Hit) -> SearchResultRow {
    let metadata = serde_json::to_value(&hit.metadata).unwrap_or(Value::Null);
    SearchResultRow {
        url: hit.metadata.url.clone(),
        title: hit.metadata.title.clone(),
        description: hit.metadata.description.clone(),
        text: hit.text,
        score: hit.score,
        metadata,
    }
}

fn field_str(payload: &Map<String, Value>, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(url: &str, canonical_url: Option<&str>) -> SearchResultRow {
        SearchResultRow {
            url: url.to_string(),
            title: None,
            description: None,
            text: "snippet".into(),
            score: 0.0,
            metadata: canonical_url
                .map(|c| json!({"canonical_url": c}))
                .unwrap_or(Value::Null),
        }
    }

    #[test]
    fn fuses_and_dedupes_by_canonical_url_across_lists() {
        let vector_list = vec![row("https://e.com/x", Some("x")), row("https://e.com/y", Some("y"))];
        let keyword_list = vec![row("https://e.com/x", Some("x")), row("https://e.com/z", Some("z"))];

        let fused = reciprocal_rank_fusion(vec![vector_list, keyword_list], 60.0);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].key, "x");
        let expected_x_score = 1.0 / 61.0 + 1.0 / 61.0;
        assert!((fused[0].row.score - expected_x_score).abs() < 1e-6);
    }

    #[test]
    fn falls_back_to_raw_url_when_no_canonical_metadata() {
        let list = vec![row("https://e.com/a", None)];
        let fused = reciprocal_rank_fusion(vec![list], 60.0);
        assert_eq!(fused[0].key, "https://e.com/a");
    }

    #[test]
    fn preserves_first_occurrence_order_on_tied_scores() {
        let list_a = vec![row("https://e.com/a", Some("a"))];
        let list_b = vec![row("https://e.com/b", Some("b"))];
        let fused = reciprocal_rank_fusion(vec![list_a, list_b], 60.0);
        assert_eq!(fused[0].key, "a");
        assert_eq!(fused[1].key, "b");
    }

    #[test]
    fn empty_ranked_lists_produce_no_results() {
        let fused = reciprocal_rank_fusion(Vec::<Vec<SearchResultRow>>::new(), 60.0);
        assert!(fused.is_empty());
    }
}
