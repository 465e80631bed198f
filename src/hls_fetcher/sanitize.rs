//! Filename sanitization, idempotent by construction
//! (`sanitize(sanitize(s)) == sanitize(s)`). Grounded on
//! `original_source/tests/test_streamingcommunity.py`'s
//! `HLSDownloader._sanitize_filename`: strip `< > : " / \ | ? *`, collapse
//! internal whitespace.

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip characters forbidden in filenames on common filesystems and
/// collapse runs of whitespace to a single space.
pub fn sanitize_filename(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_forbidden_characters() {
        let sanitized = sanitize_filename(r#"Test: Movie/Show "Title""#);
        assert!(!sanitized.contains(':'));
        assert!(!sanitized.contains('/'));
        assert!(!sanitized.contains('"'));
    }

    #[test]
    fn leaves_normal_titles_unchanged() {
        assert_eq!(
            sanitize_filename("Normal Movie Title 2024"),
            "Normal Movie Title 2024"
        );
    }

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(sanitize_filename("Too   Many    Spaces"), "Too Many Spaces");
    }

    #[test]
    fn is_idempotent() {
        let once = sanitize_filename(r#"Weird: "Name" / Here   *now*"#);
        let twice = sanitize_filename(&once);
        assert_eq!(once, twice);
        assert!(!once.chars().any(|c| FORBIDDEN.contains(&c)));
    }
}
