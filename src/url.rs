//! Canonical URL normalization shared by indexing and search/dedup logic.

use reqwest::Url;

/// Query parameters stripped from canonical URLs as known tracking noise.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "ref",
];

/// Normalize a URL for use as a dedup/identity key: lowercase host, fragment
/// stripped, and known tracking query parameters removed. Query parameter
/// order is preserved for parameters that survive.
pub fn canonicalize(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.trim().to_string();
    };

    parsed.set_fragment(None);

    if let Some(host) = parsed.host_str() {
        let lower = host.to_lowercase();
        let _ = parsed.set_host(Some(&lower));
    }

    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if retained.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = parsed.query_pairs_mut();
        serializer.clear();
        for (key, value) in &retained {
            serializer.append_pair(key, value);
        }
        drop(serializer);
    }

    parsed.to_string()
}

/// Extract the registrable host component from a URL for domain filters.
/// Returns an empty string if the URL cannot be parsed or has no host.
pub fn extract_domain(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_lowercases_host() {
        assert_eq!(
            canonicalize("https://Example.COM/path"),
            "https://example.com/path"
        );
    }

    #[test]
    fn canonicalize_strips_fragment() {
        assert_eq!(
            canonicalize("https://example.com/path#section-2"),
            "https://example.com/path"
        );
    }

    #[test]
    fn canonicalize_strips_tracking_params_but_keeps_others() {
        let result = canonicalize("https://example.com/path?utm_source=x&id=42");
        assert_eq!(result, "https://example.com/path?id=42");
    }

    #[test]
    fn canonicalize_falls_back_to_trimmed_input_on_parse_failure() {
        assert_eq!(canonicalize("  not a url  "), "not a url");
    }

    #[test]
    fn extract_domain_returns_lowercase_host() {
        assert_eq!(extract_domain("https://Sub.Example.COM/x"), "sub.example.com");
    }

    #[test]
    fn extract_domain_empty_on_invalid_url() {
        assert_eq!(extract_domain("not a url"), "");
    }
}
