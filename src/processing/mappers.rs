//! Mapping helpers for turning chunks and document attributes into vector
//! store points and shared metadata.

use uuid::Uuid;

use crate::models::{Chunk, Document, DocumentMetadata};
use crate::qdrant::UpsertPoint;

/// Build the metadata attached to every chunk and to the BM25 entry for one document.
pub(crate) fn build_metadata(
    document: &Document,
    canonical_url: &str,
    domain: &str,
) -> DocumentMetadata {
    DocumentMetadata {
        url: document.url.clone(),
        canonical_url: canonical_url.to_string(),
        domain: domain.to_string(),
        title: document.title.clone(),
        description: document.description.clone(),
        language: document.language.clone(),
        country: document.country.clone(),
        is_mobile: document.is_mobile,
    }
}

/// Zip chunks with their embeddings into vector store points, one per chunk,
/// each assigned a fresh opaque id.
pub(crate) fn build_points(
    chunks: &[Chunk],
    embeddings: Vec<Vec<f32>>,
    metadata: &DocumentMetadata,
) -> Vec<UpsertPoint> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, vector)| UpsertPoint {
            id: Uuid::new_v4().to_string(),
            vector,
            text: chunk.text.clone(),
            canonical_url: metadata.canonical_url.clone(),
            url: metadata.url.clone(),
            domain: metadata.domain.clone(),
            chunk_index: chunk.chunk_index,
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            language: metadata.language.clone(),
            country: metadata.country.clone(),
            is_mobile: metadata.is_mobile,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        Document {
            url: "https://example.com/a?utm_source=x".into(),
            content: "hello world".into(),
            title: Some("Title".into()),
            language: Some("en".into()),
            is_mobile: true,
            ..Document::default()
        }
    }

    #[test]
    fn build_metadata_copies_document_attributes() {
        let document = sample_document();
        let metadata = build_metadata(&document, "https://example.com/a", "example.com");
        assert_eq!(metadata.url, document.url);
        assert_eq!(metadata.canonical_url, "https://example.com/a");
        assert_eq!(metadata.domain, "example.com");
        assert_eq!(metadata.title.as_deref(), Some("Title"));
        assert!(metadata.is_mobile);
    }

    #[test]
    fn build_points_assigns_one_point_per_chunk_with_unique_ids() {
        let document = sample_document();
        let metadata = build_metadata(&document, "https://example.com/a", "example.com");
        let chunks = vec![
            Chunk {
                text: "hello".into(),
                chunk_index: 0,
                token_count: 1,
                start_token: 0,
                end_token: 1,
            },
            Chunk {
                text: "world".into(),
                chunk_index: 1,
                token_count: 1,
                start_token: 1,
                end_token: 2,
            },
        ];
        let embeddings = vec![vec![0.1, 0.2], vec![0.3, 0.4]];

        let points = build_points(&chunks, embeddings, &metadata);
        assert_eq!(points.len(), 2);
        assert_ne!(points[0].id, points[1].id);
        assert_eq!(points[0].chunk_index, 0);
        assert_eq!(points[1].chunk_index, 1);
        assert_eq!(points[0].domain, "example.com");
    }
}
