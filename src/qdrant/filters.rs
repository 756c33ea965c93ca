//! Filter helpers for vector-store search queries.

use serde_json::{Value, json};

use super::types::SearchFilterArgs;

/// Compose a conjunctive Qdrant filter payload from optional search arguments.
pub fn build_search_filter(args: &SearchFilterArgs) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();

    if let Some(domain) = args.domain.as_ref().and_then(|value| non_empty(value)) {
        must.push(json!({
            "key": "domain",
            "match": { "value": domain }
        }));
    }

    if let Some(language) = args.language.as_ref().and_then(|value| non_empty(value)) {
        must.push(json!({
            "key": "language",
            "match": { "value": language }
        }));
    }

    if let Some(country) = args.country.as_ref().and_then(|value| non_empty(value)) {
        must.push(json!({
            "key": "country",
            "match": { "value": country }
        }));
    }

    if let Some(is_mobile) = args.is_mobile {
        must.push(json!({
            "key": "is_mobile",
            "match": { "value": is_mobile }
        }));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_search_filter_handles_domain() {
        let filter = build_search_filter(&SearchFilterArgs {
            domain: Some("example.com".into()),
            ..Default::default()
        })
        .expect("filter");

        assert_eq!(
            filter,
            json!({
                "must": [
                    { "key": "domain", "match": { "value": "example.com" } }
                ]
            })
        );
    }

    #[test]
    fn build_search_filter_combines_multiple_constraints() {
        let filter = build_search_filter(&SearchFilterArgs {
            domain: Some("example.com".into()),
            language: Some("en".into()),
            country: None,
            is_mobile: Some(true),
        })
        .expect("filter");

        let must = filter["must"].as_array().expect("must array");
        assert_eq!(must.len(), 3);
    }

    #[test]
    fn build_search_filter_returns_none_when_empty() {
        assert!(build_search_filter(&SearchFilterArgs::default()).is_none());
    }

    #[test]
    fn build_search_filter_ignores_blank_strings() {
        assert!(
            build_search_filter(&SearchFilterArgs {
                domain: Some("   ".into()),
                ..Default::default()
            })
            .is_none()
        );
    }
}
