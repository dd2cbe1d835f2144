//! Narrowing rules for capability delegation.
//!
//! A delegated capability may only shrink what its parent grants. The rules
//! are keyed by parameter name convention: `path` restricts to sub-paths,
//! `domain` to equal-or-sub-domains, `namespace` to longer prefixes, arrays
//! to subsets. Anything unrecognized requires an exact match.

use serde_json::Value;

/// Returns true if `child` is an acceptable restriction of `parent` for the
/// given parameter key.
pub fn is_narrowing(parent: &Value, child: &Value, key: &str) -> bool {
    if parent == child {
        return true;
    }

    match key {
        // The universal override may be dropped by a child, never added.
        "*" => match (parent, child) {
            (Value::Bool(true), Value::Bool(_)) => true,
            _ => false,
        },
        "path" => match (parent.as_str(), child.as_str()) {
            (Some(p), Some(c)) => is_sub_path(p, c),
            _ => false,
        },
        "domain" => match (parent.as_str(), child.as_str()) {
            (Some(p), Some(c)) => c == p || c.ends_with(&format!(".{}", p)),
            _ => false,
        },
        "namespace" => match (parent.as_str(), child.as_str()) {
            (Some("*"), Some(_)) => true,
            (Some(p), Some(c)) => c.starts_with(p),
            _ => false,
        },
        _ => match (parent, child) {
            // Subsetting an allow-list is always a restriction.
            (Value::Array(p), Value::Array(c)) => c.iter().all(|item| p.contains(item)),
            // A permissive flag may be tightened, not loosened.
            (Value::Bool(p), Value::Bool(c)) => !*p || *c,
            _ => false,
        },
    }
}

fn is_sub_path(parent: &str, child: &str) -> bool {
    if parent == child {
        return true;
    }
    let parent_dir = if parent.ends_with('/') {
        parent.to_string()
    } else {
        format!("{}/", parent)
    };
    child.starts_with(&parent_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_values_always_narrow() {
        assert!(is_narrowing(&json!("x"), &json!("x"), "whatever"));
        assert!(!is_narrowing(&json!("x"), &json!("y"), "whatever"));
    }

    #[test]
    fn wildcard_can_be_dropped_not_added() {
        assert!(is_narrowing(&json!(true), &json!(false), "*"));
        assert!(!is_narrowing(&json!(false), &json!(true), "*"));
    }

    #[test]
    fn path_must_stay_under_parent() {
        assert!(is_narrowing(&json!("/srv/data"), &json!("/srv/data/logs"), "path"));
        assert!(!is_narrowing(&json!("/srv/data"), &json!("/srv/other"), "path"));
        // Prefix of the path string is not enough; it must be a sub-path.
        assert!(!is_narrowing(&json!("/srv/data"), &json!("/srv/database"), "path"));
    }

    #[test]
    fn domain_accepts_subdomains() {
        assert!(is_narrowing(&json!("example.com"), &json!("api.example.com"), "domain"));
        assert!(!is_narrowing(&json!("example.com"), &json!("evil.com"), "domain"));
    }

    #[test]
    fn namespace_requires_prefix() {
        assert!(is_narrowing(&json!("*"), &json!("player1."), "namespace"));
        assert!(is_narrowing(&json!("player1."), &json!("player1.chat"), "namespace"));
        assert!(!is_narrowing(&json!("player1."), &json!("sys"), "namespace"));
    }

    #[test]
    fn arrays_must_be_subsets() {
        assert!(is_narrowing(
            &json!(["GET", "POST", "DELETE"]),
            &json!(["GET"]),
            "methods"
        ));
        assert!(!is_narrowing(
            &json!(["GET"]),
            &json!(["GET", "DELETE"]),
            "methods"
        ));
    }

    #[test]
    fn booleans_only_tighten() {
        assert!(is_narrowing(&json!(false), &json!(true), "readonly"));
        assert!(!is_narrowing(&json!(true), &json!(false), "readonly"));
    }

    #[test]
    fn numbers_require_exact_match() {
        assert!(is_narrowing(&json!(42), &json!(42), "target_id"));
        assert!(!is_narrowing(&json!(42), &json!(43), "target_id"));
    }
}
