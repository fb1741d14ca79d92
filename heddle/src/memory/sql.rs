//! Shared SQL backend pieces: identifier validation and statement text.
//!
//! Table and schema names are interpolated into statements, so they are
//! validated against a strict identifier pattern before any SQL is built.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::memory::service::MemoryError;

/// Default memories table name.
pub const DEFAULT_TABLE_NAME: &str = "memories";

/// Postgres caps identifiers at 63 bytes, MySQL at 64.
pub const MAX_IDENT_POSTGRES: usize = 63;
pub const MAX_IDENT_MYSQL: usize = 64;

static IDENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Validates a table or schema name before it is spliced into SQL.
///
/// Rejects anything outside `^[A-Za-z_][A-Za-z0-9_]*$` or longer than
/// `max_len`, which precludes injection through identifiers.
pub fn validate_identifier(name: &str, max_len: usize) -> Result<(), MemoryError> {
    if name.is_empty() {
        return Err(MemoryError::InvalidIdentifier("identifier is empty".into()));
    }
    if name.len() > max_len {
        return Err(MemoryError::InvalidIdentifier(format!(
            "identifier {:?} exceeds {} characters",
            name, max_len
        )));
    }
    if !IDENT_RE.is_match(name) {
        return Err(MemoryError::InvalidIdentifier(format!(
            "identifier {:?} must match ^[A-Za-z_][A-Za-z0-9_]*$",
            name
        )));
    }
    Ok(())
}

/// Index names derived from the table name, shared by DDL and verification.
pub fn index_names(table: &str) -> [String; 3] {
    [
        format!("idx_{}_app_user", table),
        format!("idx_{}_deleted_at", table),
        format!("idx_{}_updated_at", table),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Well-formed identifiers pass; injection attempts and
    /// over-long names are rejected before SQL is built.
    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("memories", MAX_IDENT_POSTGRES).is_ok());
        assert!(validate_identifier("_m2", MAX_IDENT_MYSQL).is_ok());
        assert!(validate_identifier("", MAX_IDENT_MYSQL).is_err());
        assert!(validate_identifier("mem-ories", MAX_IDENT_MYSQL).is_err());
        assert!(validate_identifier("m; DROP TABLE x", MAX_IDENT_MYSQL).is_err());
        assert!(validate_identifier("1table", MAX_IDENT_MYSQL).is_err());
        assert!(validate_identifier(&"a".repeat(64), MAX_IDENT_POSTGRES).is_err());
        assert!(validate_identifier(&"a".repeat(64), MAX_IDENT_MYSQL).is_ok());
        assert!(validate_identifier(&"a".repeat(65), MAX_IDENT_MYSQL).is_err());
    }
}
