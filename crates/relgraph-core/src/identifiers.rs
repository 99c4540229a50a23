//! SQL identifier validation.
//!
//! The compiler splices table and column names into statements unquoted, so
//! every name is checked once when the registry is built.

use std::sync::OnceLock;

use regex::Regex;

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Check whether `name` is a plain SQL identifier (letters, digits, underscore,
/// not starting with a digit).
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}

/// Prefix a table name with an optional schema.
pub fn qualify_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", schema, table),
        None => table.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_identifier("hero"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("team_id2"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("hero name"));
        assert!(!is_valid_identifier("hero;DROP TABLE x"));
        assert!(!is_valid_identifier("\"quoted\""));
    }

    #[test]
    fn test_qualify_table() {
        assert_eq!(qualify_table(None, "hero"), "hero");
        assert_eq!(qualify_table(Some("main"), "hero"), "main.hero");
    }
}
