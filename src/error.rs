//! Error types for relcms
//!
//! Every failure a caller can see names the collection and operation
//! involved. Database errors are wrapped with that context; the SQL text
//! itself never appears in a message.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for relcms operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Configuration & Connection Errors
    // ==========================================================================
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Could not connect to the database after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Adapter is not ready: {reason}")]
    NotReady { reason: String },

    // ==========================================================================
    // Schema Errors
    // ==========================================================================
    #[error("Schema compilation failed for {} collection(s): {}", failures.len(), CompileFailures(failures))]
    SchemaCompilation { failures: Vec<CollectionFailure> },

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Reserved name '{name}' cannot be used")]
    ReservedName { name: String },

    #[error("Refusing to {operation}: schema changes are locked in production")]
    SchemaLocked { operation: &'static str },

    // ==========================================================================
    // Collection & Document Errors
    // ==========================================================================
    #[error("Collection '{name}' does not exist")]
    CollectionNotFound { name: String },

    #[error("Document '{id}' not found in collection '{collection}'")]
    DocumentNotFound { collection: String, id: String },

    #[error("Unknown field '{field}' in collection '{collection}'")]
    UnknownField { collection: String, field: String },

    #[error("Missing required field '{field}' in collection '{collection}'")]
    MissingRequiredField { collection: String, field: String },

    #[error("Invalid value for '{collection}.{field}': {message}")]
    InvalidValue {
        collection: String,
        field: String,
        message: String,
    },

    #[error("Relationship '{collection}.{field}' references missing '{target}' document '{id}'")]
    RelationshipIntegrity {
        collection: String,
        field: String,
        target: String,
        id: String,
    },

    // ==========================================================================
    // Query Errors
    // ==========================================================================
    #[error("Unsupported operator '{operator}' on '{collection}.{field}'")]
    UnsupportedOperator {
        collection: String,
        field: String,
        operator: String,
    },

    #[error("Invalid query on '{collection}': {message}")]
    Parse { collection: String, message: String },

    #[error("{operation} on '{collection}' failed: {source}")]
    Query {
        collection: String,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    #[error("Transaction '{id}' is not open")]
    UnknownTransaction { id: String },

    // ==========================================================================
    // IO & Serialization Errors
    // ==========================================================================
    #[error("Failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    YamlParseError { path: PathBuf, message: String },
}

/// Result type alias for relcms operations
pub type Result<T> = std::result::Result<T, Error>;

/// One collection that could not be compiled or reconciled
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionFailure {
    pub collection: String,
    pub reason: String,
}

impl CollectionFailure {
    pub fn new(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CollectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.collection, self.reason)
    }
}

struct CompileFailures<'a>(&'a [CollectionFailure]);

impl fmt::Display for CompileFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<crate::validation::ValidationError> for Error {
    fn from(err: crate::validation::ValidationError) -> Self {
        use crate::validation::ValidationError;
        match err {
            ValidationError::InvalidIdentifier(kind, value, reason) => {
                Error::InvalidIdentifier { kind, value, reason }
            }
            ValidationError::TooLong(kind, value, _max) => Error::InvalidIdentifier {
                kind,
                value,
                reason: "exceeds maximum length",
            },
            ValidationError::Empty(kind) => Error::InvalidIdentifier {
                kind,
                value: String::new(),
                reason: "cannot be empty",
            },
            ValidationError::Reserved(name) => Error::ReservedName { name },
        }
    }
}

impl Error {
    /// Wrap a driver error with the collection and operation it came from
    pub fn query<'a>(collection: &'a str, operation: &'static str) -> impl FnOnce(sqlx::Error) -> Error + 'a {
        move |source| Error::Query {
            collection: collection.to_string(),
            operation,
            source,
        }
    }

    /// Map a filter/sort parse failure onto the public taxonomy
    pub fn from_parse(collection: &str, err: relq::ParseError) -> Error {
        match err.unsupported() {
            Some(operator) => Error::UnsupportedOperator {
                collection: collection.to_string(),
                field: err.field.clone().unwrap_or_default(),
                operator: operator.to_string(),
            },
            None => Error::Parse {
                collection: collection.to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn invalid_value(collection: &str, field: &str, message: impl Into<String>) -> Error {
        Error::InvalidValue {
            collection: collection.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn unknown_field(collection: &str, field: &str) -> Error {
        Error::UnknownField {
            collection: collection.to_string(),
            field: field.to_string(),
        }
    }
}

// =============================================================================
// Error Display Helpers
// =============================================================================

impl Error {
    /// Returns a user-friendly suggestion for fixing the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Configuration { .. } => {
                Some("Set host, user and database (or url) in the adapter config")
            }
            Error::Connection { .. } => Some("Check that the database server is reachable"),
            Error::CollectionNotFound { .. } => {
                Some("Add the collection definition and run init again")
            }
            Error::DocumentNotFound { .. } => Some("Check the document ID and collection name"),
            Error::InvalidIdentifier { .. } => {
                Some("Use only letters, numbers, underscores, and hyphens")
            }
            Error::UnsupportedOperator { .. } => Some(
                "Use one of: equals, not_equals, greater_than, greater_than_equal, less_than, less_than_equal, like, contains, in, not_in, exists",
            ),
            Error::MissingRequiredField { .. } => Some("Provide a value for the required field"),
            Error::SchemaLocked { .. } => {
                Some("Run schema changes through migrations when in production")
            }
            _ => None,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CollectionNotFound { .. }
                | Error::DocumentNotFound { .. }
                | Error::UnknownField { .. }
                | Error::InvalidValue { .. }
                | Error::MissingRequiredField { .. }
                | Error::UnsupportedOperator { .. }
                | Error::RelationshipIntegrity { .. }
                | Error::Parse { .. }
        )
    }

    /// True for the not-found family (missing collection or document)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::CollectionNotFound { .. } | Error::DocumentNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CollectionNotFound {
            name: "posts".to_string(),
        };
        assert_eq!(err.to_string(), "Collection 'posts' does not exist");
    }

    #[test]
    fn test_error_suggestion() {
        let err = Error::DocumentNotFound {
            collection: "posts".to_string(),
            id: "7".to_string(),
        };
        assert!(err.suggestion().is_some());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_schema_compilation_lists_every_collection() {
        let err = Error::SchemaCompilation {
            failures: vec![
                CollectionFailure::new("posts", "bad field"),
                CollectionFailure::new("tags", "unknown target"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 collection(s)"));
        assert!(msg.contains("posts (bad field)"));
        assert!(msg.contains("tags (unknown target)"));
    }

    #[test]
    fn test_unsupported_operator_from_parse() {
        let parse = relq::parse_where(&serde_json::json!({ "title": { "near": 1 } })).unwrap_err();
        let err = Error::from_parse("posts", parse);
        assert!(matches!(
            err,
            Error::UnsupportedOperator { ref field, ref operator, .. } if field == "title" && operator == "near"
        ));
    }
}
