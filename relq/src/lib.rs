//! RELQ - relational collection query language
//!
//! The filter, sort and path language accepted by relcms collection
//! queries. Filters arrive as JSON objects, sorts and paths as short strings.
//!
//! # Syntax Overview
//!
//! ```text
//! // Filters: field -> { operator: value }, top-level fields are AND-ed
//! { "title":  { "equals": "Example" },
//!   "views":  { "greater_than_equal": 10 },
//!   "status": { "in": ["draft", "review"] },
//!   "meta.tags[0]": { "contains": "rust" } }
//!
//! // Explicit conjunction (flattened)
//! { "and": [ { "title": { "like": "Ex" } }, { "author": { "exists": true } } ] }
//!
//! // Sorts: comma separated, leading '-' for descending
//! -createdAt,title
//! ```
//!
//! # Operators
//!
//! `equals`, `not_equals`, `greater_than`, `greater_than_equal`,
//! `less_than`, `less_than_equal`, `like`, `contains`, `in`, `not_in`,
//! `exists`. Anything else (including `or`) is rejected with an
//! unsupported-operator error.

mod ast;
mod error;
mod parser;

pub use ast::*;
pub use error::{ParseError, ParseErrorKind};

/// Parse a `where` object
pub fn parse_where(value: &serde_json::Value) -> Result<Where, ParseError> {
    parser::parse_where(value)
}

/// Parse a sort string such as `-createdAt,title`
pub fn parse_sort(input: &str) -> Result<Sort, ParseError> {
    parser::parse_sort(input)
}

/// Parse a dotted field path such as `meta.tags[0]`
pub fn parse_path(input: &str) -> Result<FieldPath, ParseError> {
    parser::parse_path(input)
}
