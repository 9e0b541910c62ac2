//! Hostname patterns and matching.
//!
//! Services are keyed by case-folded hostname. A pattern is either an exact
//! host or a single leading wildcard (`*.suffix`). Exact matches win over
//! wildcards; among wildcards the longest suffix wins.

/// Case-fold a Host header value and strip any port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    // IPv6 literals keep their brackets; everything after ']' is the port.
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };
    without_port.to_ascii_lowercase()
}

/// Whether a pattern is an exact host or a single leading `*.suffix`.
pub fn is_valid_pattern(pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return is_valid_host(suffix);
    }
    is_valid_host(pattern)
}

fn is_valid_host(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Test a pattern against a normalized host.
///
/// Returns `Some(captured_label)` on match: `None` for an exact match, the
/// matched prefix for a wildcard (the value `$1` expands to).
pub fn pattern_matches(pattern: &str, host: &str) -> Option<Option<String>> {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        let dotted = format!(".{suffix}");
        let prefix = host.strip_suffix(dotted.as_str())?;
        if prefix.is_empty() {
            return None;
        }
        return Some(Some(prefix.to_string()));
    }
    if pattern == host {
        return Some(None);
    }
    None
}

/// Suffix length used to rank wildcard patterns (longer suffix = more
/// specific).
pub fn wildcard_specificity(pattern: &str) -> usize {
    pattern.strip_prefix("*.").map(str::len).unwrap_or(0)
}

/// Expand `$1` back-references with the label captured by a wildcard match.
pub fn expand_backrefs(template: &str, label: Option<&str>) -> String {
    match label {
        Some(label) if template.contains("$1") => template.replace("$1", label),
        _ => template.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_port_and_case() {
        assert_eq!(normalize_host("App.Example.COM:8443"), "app.example.com");
        assert_eq!(normalize_host("127.0.0.1:8080"), "127.0.0.1");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
    }

    #[test]
    fn pattern_validity() {
        assert!(is_valid_pattern("app.example.com"));
        assert!(is_valid_pattern("*.example.com"));
        assert!(is_valid_pattern("localhost"));
        assert!(!is_valid_pattern("*example.com"));
        assert!(!is_valid_pattern("a.*.example.com"));
        assert!(!is_valid_pattern(""));
        assert!(!is_valid_pattern("app..example.com"));
    }

    #[test]
    fn exact_beats_nothing_wildcard_captures() {
        assert_eq!(
            pattern_matches("app.example.com", "app.example.com"),
            Some(None)
        );
        assert_eq!(
            pattern_matches("*.example.com", "api.example.com"),
            Some(Some("api".to_string()))
        );
        assert_eq!(
            pattern_matches("*.example.com", "a.b.example.com"),
            Some(Some("a.b".to_string()))
        );
        assert_eq!(pattern_matches("*.example.com", "example.com"), None);
        assert_eq!(pattern_matches("*.example.com", "other.test"), None);
    }

    #[test]
    fn longer_suffix_is_more_specific() {
        assert!(
            wildcard_specificity("*.api.example.com") > wildcard_specificity("*.example.com")
        );
    }

    #[test]
    fn backref_expansion() {
        assert_eq!(
            expand_backrefs("http://$1.internal:8080", Some("api")),
            "http://api.internal:8080"
        );
        assert_eq!(
            expand_backrefs("http://static.internal", Some("api")),
            "http://static.internal"
        );
        assert_eq!(expand_backrefs("http://$1.internal", None), "http://$1.internal");
    }
}
