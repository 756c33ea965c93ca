//! Text cleaning applied before chunking.

/// Collapse runs of whitespace to single spaces and drop non-printable
/// characters (keeping `\n` and `\t`), producing plain text suitable for
/// tokenization. Returns an empty string for blank input.
pub fn clean_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let filtered: String = collapsed
        .chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .collect();

    filtered.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("line one\n\n  line   two"), "line one line two");
    }

    #[test]
    fn clean_text_drops_control_characters() {
        assert_eq!(clean_text("hello\u{0007}world"), "helloworld");
    }

    #[test]
    fn clean_text_returns_empty_for_blank_input() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn clean_text_trims_surrounding_whitespace() {
        assert_eq!(clean_text("  padded text  "), "padded text");
    }
}
