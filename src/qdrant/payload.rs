//! Helpers for constructing vector-store payloads from chunk metadata.

use super::types::UpsertPoint;
use serde_json::{Map, Value};

/// Build the payload object stored alongside each indexed chunk.
pub(crate) fn build_payload(point: &UpsertPoint) -> Value {
    let mut payload = Map::new();
    payload.insert("text".into(), Value::String(point.text.clone()));
    payload.insert(
        "canonical_url".into(),
        Value::String(point.canonical_url.clone()),
    );
    payload.insert("url".into(), Value::String(point.url.clone()));
    payload.insert("domain".into(), Value::String(point.domain.clone()));
    payload.insert(
        "chunk_index".into(),
        Value::Number(point.chunk_index.into()),
    );
    payload.insert("is_mobile".into(), Value::Bool(point.is_mobile));

    if let Some(title) = point.title.as_ref().filter(|v| !v.is_empty()) {
        payload.insert("title".into(), Value::String(title.clone()));
    }
    if let Some(description) = point.description.as_ref().filter(|v| !v.is_empty()) {
        payload.insert("description".into(), Value::String(description.clone()));
    }
    if let Some(language) = point.language.as_ref().filter(|v| !v.is_empty()) {
        payload.insert("language".into(), Value::String(language.clone()));
    }
    if let Some(country) = point.country.as_ref().filter(|v| !v.is_empty()) {
        payload.insert("country".into(), Value::String(country.clone()));
    }

    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_includes_required_fields() {
        let point = UpsertPoint {
            id: "id-1".into(),
            vector: vec![0.1, 0.2],
            text: "hello".into(),
            canonical_url: "https://example.com/".into(),
            url: "https://example.com/?utm_source=x".into(),
            domain: "example.com".into(),
            chunk_index: 0,
            title: None,
            description: None,
            language: None,
            country: None,
            is_mobile: false,
        };
        let payload = build_payload(&point);
        assert_eq!(payload["text"], "hello");
        assert_eq!(payload["canonical_url"], "https://example.com/");
        assert_eq!(payload["domain"], "example.com");
        assert_eq!(payload["chunk_index"], 0);
        assert!(payload.get("title").is_none());
    }

    #[test]
    fn payload_includes_optional_fields_when_present() {
        let point = UpsertPoint {
            id: "id-2".into(),
            vector: vec![0.1],
            text: "hello".into(),
            canonical_url: "https://example.com/".into(),
            url: "https://example.com/".into(),
            domain: "example.com".into(),
            chunk_index: 1,
            title: Some("Title".into()),
            description: Some("Desc".into()),
            language: Some("en".into()),
            country: Some("US".into()),
            is_mobile: true,
        };
        let payload = build_payload(&point);
        assert_eq!(payload["title"], "Title");
        assert_eq!(payload["description"], "Desc");
        assert_eq!(payload["language"], "en");
        assert_eq!(payload["country"], "US");
        assert_eq!(payload["is_mobile"], true);
    }
}
