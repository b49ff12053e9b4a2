//! SQL utility functions

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("identifier regex is valid")
});

/// Whether `s` is a plain lowercase PostgreSQL identifier.
///
/// Table, column and schema names from profile definitions are checked against
/// this once at startup; only names that pass are ever spliced into SQL text.
pub fn is_valid_identifier(s: &str) -> bool {
    IDENTIFIER_RE.is_match(s)
}

/// Quote an identifier for PostgreSQL, doubling embedded quotes
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Qualified `"schema"."relation"` reference
pub fn qualified(schema: &str, relation: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(relation))
}

/// Escape SQL LIKE metacharacters (%, _, \) in user input
///
/// Use this when building LIKE patterns from user input to prevent
/// unintended pattern matching.
///
/// # Example
///
/// ```
/// use expertq_server::utils::sql::escape_like_pattern;
///
/// let user_input = "100% match_test";
/// let pattern = format!("%{}%", escape_like_pattern(user_input));
/// assert_eq!(pattern, "%100\\% match\\_test%");
/// ```
pub fn escape_like_pattern(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_identifier("assessmentunitid"));
        assert!(is_valid_identifier("schema_1700000000000"));
        assert!(is_valid_identifier("_private"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1table"));
        assert!(!is_valid_identifier("Actions"));
        assert!(!is_valid_identifier("actions; drop table x"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("actions"), "\"actions\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("schema_1", "actions"), "\"schema_1\".\"actions\"");
    }

    #[test]
    fn test_escape_like_pattern_percent() {
        assert_eq!(escape_like_pattern("100%"), "100\\%");
    }

    #[test]
    fn test_escape_like_pattern_multiple() {
        assert_eq!(escape_like_pattern("100%_\\test"), "100\\%\\_\\\\test");
    }

    #[test]
    fn test_escape_like_pattern_empty() {
        assert_eq!(escape_like_pattern(""), "");
    }
}
