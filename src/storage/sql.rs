//! Parameterized statements and the values bound into them
//!
//! Statements carry SQL text with `?` placeholders plus the values for
//! them. Values never become part of the SQL text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::config::IdType;
use crate::schema::LogicalType;
use crate::storage::document::{DocumentId, Value};

/// A value bound to a placeholder or read back from a row
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(NaiveDateTime),
}

/// How to decode a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Bool,
    Text,
    Json,
    Timestamp,
}

impl ValueKind {
    pub fn of(logical: &LogicalType) -> Self {
        match logical {
            LogicalType::ShortText { .. } | LogicalType::LongText | LogicalType::Enumerated { .. } => {
                ValueKind::Text
            }
            LogicalType::Integer { .. } => ValueKind::Int,
            LogicalType::Boolean => ValueKind::Bool,
            LogicalType::Timestamp => ValueKind::Timestamp,
            LogicalType::Json => ValueKind::Json,
        }
    }

    pub fn of_id(id_type: IdType) -> Self {
        match id_type {
            IdType::Number => ValueKind::Int,
            IdType::Uuid => ValueKind::Text,
        }
    }
}

/// SQL text plus its bound parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: SqlValue) -> Self {
        self.params.push(value);
        self
    }

    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn push_param(&mut self, value: SqlValue) {
        self.params.push(value);
    }

    /// Append another fragment's text and parameters
    pub fn append(&mut self, other: Statement) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    /// `?, ?, ?` for `n` placeholders
    pub fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Timestamp text as stored; same shape as `strftime('%Y-%m-%d %H:%M:%f')`
/// so bound values and column defaults compare lexically
pub const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn stored_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(STORED_TIMESTAMP_FORMAT).to_string()
}

/// Render a timestamp the way documents expose it
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Accept RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` and bare dates
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc).naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(input, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl SqlValue {
    /// Coerce a document value into what a column of `logical` type stores
    pub fn coerce(value: &Value, logical: &LogicalType) -> Result<SqlValue, String> {
        if matches!(value, Value::Null) {
            return Ok(SqlValue::Null);
        }
        match logical {
            LogicalType::ShortText { length } => {
                let text = scalar_text(value)?;
                if text.chars().count() > *length as usize {
                    return Err(format!("longer than {} characters", length));
                }
                Ok(SqlValue::Text(text))
            }
            LogicalType::LongText => scalar_text(value).map(SqlValue::Text),
            LogicalType::Enumerated { options } => {
                let text = scalar_text(value)?;
                if options.iter().any(|o| *o == text) {
                    Ok(SqlValue::Text(text))
                } else {
                    Err(format!("'{}' is not one of: {}", text, options.join(", ")))
                }
            }
            LogicalType::Integer { .. } => match value {
                Value::Int(i) => Ok(SqlValue::Int(*i)),
                Value::Float(f) if f.fract() == 0.0 => Ok(SqlValue::Int(*f as i64)),
                Value::Float(f) => Err(format!("{} is not a whole number", f)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(SqlValue::Int)
                    .map_err(|_| format!("'{}' is not a number", s)),
                other => Err(format!("expected a number, got {}", other.type_name())),
            },
            LogicalType::Boolean => match value {
                Value::Bool(b) => Ok(SqlValue::Bool(*b)),
                Value::Int(0) => Ok(SqlValue::Bool(false)),
                Value::Int(1) => Ok(SqlValue::Bool(true)),
                Value::String(s) if s == "true" || s == "false" => Ok(SqlValue::Bool(s == "true")),
                other => Err(format!("expected a boolean, got {}", other.type_name())),
            },
            LogicalType::Timestamp => match value {
                Value::String(s) => parse_timestamp(s)
                    .map(SqlValue::Timestamp)
                    .ok_or_else(|| format!("'{}' is not a date", s)),
                other => Err(format!("expected a date string, got {}", other.type_name())),
            },
            LogicalType::Json => Ok(SqlValue::Json(value.clone().into())),
        }
    }

    /// Coerce a document id for binding
    pub fn from_id(id: &DocumentId) -> SqlValue {
        match id {
            DocumentId::Number(n) => SqlValue::Int(*n),
            DocumentId::Uuid(s) => SqlValue::Text(s.clone()),
        }
    }

    /// Turn a decoded column back into a document value
    pub fn into_value(self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(b),
            SqlValue::Int(i) => Value::Int(i),
            SqlValue::Float(f) => Value::Float(f),
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Json(json) => Value::from(json),
            SqlValue::Timestamp(ts) => Value::String(format_timestamp(&ts)),
        }
    }

    /// Read an id column
    pub fn into_id(self) -> Option<DocumentId> {
        match self {
            SqlValue::Int(i) => Some(DocumentId::Number(i)),
            SqlValue::Text(s) => Some(DocumentId::Uuid(s)),
            _ => None,
        }
    }
}

fn scalar_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected text, got {}", other.type_name())),
    }
}

// ============================================================================
// Driver glue
// ============================================================================

/// Bind every parameter of a statement onto an sqlx query
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Bool(b) => query.bind(*b),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Float(f) => query.bind(*f),
                SqlValue::Text(s) => query.bind(s.as_str()),
                SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
                SqlValue::Timestamp(ts) => query.bind($crate::storage::sql::stored_timestamp(ts)),
            };
        }
        query
    }};
}

/// Decode a row by position according to the expected kinds
macro_rules! decode_row {
    ($row:expr, $kinds:expr) => {{
        use sqlx::Row as _;
        let row = $row;
        let mut values = Vec::with_capacity($kinds.len());
        for (index, kind) in $kinds.iter().enumerate() {
            let value = match kind {
                ValueKind::Int => row.try_get_unchecked::<Option<i64>, _>(index)?.map(SqlValue::Int),
                ValueKind::Bool => row.try_get_unchecked::<Option<bool>, _>(index)?.map(SqlValue::Bool),
                ValueKind::Text => row.try_get_unchecked::<Option<String>, _>(index)?.map(SqlValue::Text),
                ValueKind::Json => row
                    .try_get_unchecked::<Option<sqlx::types::Json<serde_json::Value>>, _>(index)?
                    .map(|json| SqlValue::Json(json.0)),
                ValueKind::Timestamp => row
                    .try_get_unchecked::<Option<NaiveDateTime>, _>(index)?
                    .map(SqlValue::Timestamp),
            };
            values.push(value.unwrap_or(SqlValue::Null));
        }
        values
    }};
}

pub(crate) use bind_params;
pub(crate) use decode_row;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Statement::placeholders(3), "?, ?, ?");
        assert_eq!(Statement::placeholders(0), "");
    }

    #[test]
    fn test_append_keeps_param_order() {
        let mut stmt = Statement::new("SELECT * FROM t WHERE a = ?").bind(SqlValue::Int(1));
        stmt.append(Statement::new(" AND b = ?").bind(SqlValue::Text("x".into())));
        assert_eq!(stmt.sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(stmt.params, vec![SqlValue::Int(1), SqlValue::Text("x".into())]);
    }

    #[test]
    fn test_timestamp_parsing() {
        let ts = parse_timestamp("2024-01-15T10:30:00.250Z").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-15T10:30:00.250Z");
        let ts = parse_timestamp("2024-01-15T12:30:00+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-15T10:30:00.000Z");
        assert!(parse_timestamp("2024-01-15").is_some());
        assert!(parse_timestamp("2024-01-15 10:30:00.5").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_stored_timestamp_keeps_millis() {
        let whole = parse_timestamp("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(stored_timestamp(&whole), "2024-01-15 10:30:00.000");
        let fraction = parse_timestamp("2024-01-15T10:30:00.25Z").unwrap();
        assert_eq!(stored_timestamp(&fraction), "2024-01-15 10:30:00.250");
        assert!(stored_timestamp(&whole) < stored_timestamp(&fraction));
    }

    #[test]
    fn test_coerce_text() {
        let short = LogicalType::ShortText { length: 5 };
        assert_eq!(SqlValue::coerce(&Value::from("abc"), &short), Ok(SqlValue::Text("abc".into())));
        assert!(SqlValue::coerce(&Value::from("abcdef"), &short).is_err());
        assert_eq!(SqlValue::coerce(&Value::Int(42), &short), Ok(SqlValue::Text("42".into())));
        assert!(SqlValue::coerce(&Value::Array(vec![]), &short).is_err());
        assert_eq!(SqlValue::coerce(&Value::Null, &short), Ok(SqlValue::Null));
    }

    #[test]
    fn test_coerce_enum() {
        let status = LogicalType::Enumerated {
            options: vec!["draft".into(), "published".into()],
        };
        assert!(SqlValue::coerce(&Value::from("draft"), &status).is_ok());
        assert!(SqlValue::coerce(&Value::from("archived"), &status).is_err());
    }

    #[test]
    fn test_coerce_numbers_and_bools() {
        let int = LogicalType::Integer { big: false };
        assert_eq!(SqlValue::coerce(&Value::Float(3.0), &int), Ok(SqlValue::Int(3)));
        assert_eq!(
            SqlValue::coerce(&Value::Float(2.5), &int),
            Err("2.5 is not a whole number".to_string())
        );
        assert_eq!(SqlValue::coerce(&Value::from("12"), &int), Ok(SqlValue::Int(12)));
        assert!(SqlValue::coerce(&Value::from("twelve"), &int).is_err());
        assert_eq!(SqlValue::coerce(&Value::Int(1), &LogicalType::Boolean), Ok(SqlValue::Bool(true)));
        assert!(SqlValue::coerce(&Value::Int(2), &LogicalType::Boolean).is_err());
    }

    #[test]
    fn test_coerce_json_keeps_structure() {
        let value = Value::from(serde_json::json!({"a": [1, 2]}));
        assert_eq!(
            SqlValue::coerce(&value, &LogicalType::Json),
            Ok(SqlValue::Json(serde_json::json!({"a": [1, 2]})))
        );
    }

    #[test]
    fn test_into_value_formats_timestamps() {
        let ts = parse_timestamp("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).into_value(),
            Value::String("2024-01-15T10:30:00.000Z".into())
        );
    }
}
