//! Input validation for relcms
//!
//! Collection slugs, field names, the table prefix and the relationship
//! suffix end up inside SQL text as quoted identifiers, so they are held to
//! a strict character set before any DDL or query is built.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid {0} '{1}': {2}")]
    InvalidIdentifier(&'static str, String, &'static str),

    #[error("{0} '{1}' is too long (max {2} characters)")]
    TooLong(&'static str, String, usize),

    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("Reserved name: '{0}'")]
    Reserved(String),
}

/// MySQL's limit on table and column names
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Names owned by the database engines themselves
const RESERVED_TABLE_NAMES: &[&str] = &[
    "information_schema",
    "mysql",
    "performance_schema",
    "sys",
    "sqlite_master",
    "sqlite_sequence",
];

/// Columns every primary table carries; fields using them are skipped
pub const RESERVED_COLUMNS: &[&str] = &["id", "createdAt", "updatedAt"];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("identifier pattern"))
}

fn affix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]*$").expect("affix pattern"))
}

/// Validate a collection slug
///
/// Rules:
/// - Must be 1-64 characters
/// - Only alphanumeric, underscore, and hyphen allowed
/// - Must start with a letter
/// - Cannot be an engine-reserved table name
pub fn validate_collection_slug(slug: &str) -> Result<(), ValidationError> {
    validate_identifier(slug, "collection slug")?;
    if RESERVED_TABLE_NAMES.contains(&slug.to_lowercase().as_str()) || slug.starts_with("sqlite_") {
        return Err(ValidationError::Reserved(slug.to_string()));
    }
    Ok(())
}

/// Validate a field (column) name. Same rules as slugs.
pub fn validate_field_name(name: &str) -> Result<(), ValidationError> {
    validate_identifier(name, "field name")
}

/// Validate a fully composed table name
pub fn validate_table_name(name: &str) -> Result<(), ValidationError> {
    validate_identifier(name, "table name")
}

/// Validate the table prefix or relationship suffix. Empty is allowed.
pub fn validate_affix(value: &str, kind: &'static str) -> Result<(), ValidationError> {
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(kind, value.to_string(), MAX_IDENTIFIER_LENGTH));
    }
    if !affix_pattern().is_match(value) {
        return Err(ValidationError::InvalidIdentifier(
            kind,
            value.to_string(),
            "contains invalid characters (only alphanumeric, underscore, and hyphen allowed)",
        ));
    }
    Ok(())
}

/// True for the columns the adapter manages itself
pub fn is_reserved_column(name: &str) -> bool {
    RESERVED_COLUMNS.contains(&name)
}

/// Core identifier validation
fn validate_identifier(name: &str, kind: &'static str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty(kind));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(kind, name.to_string(), MAX_IDENTIFIER_LENGTH));
    }

    if !identifier_pattern().is_match(name) {
        let reason = if name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            "contains invalid characters (only alphanumeric, underscore, and hyphen allowed)"
        } else {
            "must start with a letter"
        };
        return Err(ValidationError::InvalidIdentifier(kind, name.to_string(), reason));
    }

    Ok(())
}
