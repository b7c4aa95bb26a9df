//! Field type to column mapping
//!
//! `map_field` is total: every field yields a column, unknown types become
//! short text. Structural wrappers are flattened by the caller before
//! mapping, and the reserved names are skipped before it is called.

use serde_json::Value as Json;

use super::{Field, FieldKind};
use crate::config::IdType;

/// Length of a UUID rendered as text
pub const UUID_LENGTH: u32 = 36;

/// The fixed set of logical column types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalType {
    ShortText { length: u32 },
    LongText,
    Integer { big: bool },
    Boolean,
    Timestamp,
    Enumerated { options: Vec<String> },
    Json,
}

impl LogicalType {
    /// Column type that stores a document id
    pub fn id_reference(id_type: IdType) -> Self {
        match id_type {
            IdType::Number => LogicalType::Integer { big: true },
            IdType::Uuid => LogicalType::ShortText {
                length: UUID_LENGTH,
            },
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, LogicalType::Json)
    }
}

/// A column of a primary table
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub logical: LogicalType,
    pub nullable: bool,
    pub default: Option<Json>,
    pub unique: bool,
    pub indexed: bool,
}

impl ColumnSpec {
    /// NOT NULL with nothing to fill existing rows or omitted values
    pub fn needs_value(&self) -> bool {
        !self.nullable && self.default.is_none()
    }
}

/// Sizing knobs for the mapper
#[derive(Debug, Clone, PartialEq)]
pub struct MapperOptions {
    pub short_text_length: u32,
    pub big_integers: bool,
    pub id_type: IdType,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            short_text_length: 255,
            big_integers: false,
            id_type: IdType::Number,
        }
    }
}

/// Map a named field to its column
pub fn map_field(field: &Field, options: &MapperOptions) -> ColumnSpec {
    let short_text = |length: Option<u32>| LogicalType::ShortText {
        length: length.unwrap_or(options.short_text_length),
    };

    let logical = match &field.kind {
        FieldKind::Text { max_length } => short_text(*max_length),
        FieldKind::Email => short_text(None),
        FieldKind::Textarea | FieldKind::Code | FieldKind::RichText => LogicalType::LongText,
        FieldKind::Number => LogicalType::Integer {
            big: options.big_integers,
        },
        FieldKind::Checkbox => LogicalType::Boolean,
        FieldKind::Date => LogicalType::Timestamp,
        FieldKind::Select { has_many: true, .. } => LogicalType::Json,
        FieldKind::Select { options: choices, .. } | FieldKind::Radio { options: choices } => {
            if choices.is_empty() {
                short_text(None)
            } else {
                LogicalType::Enumerated {
                    options: choices.clone(),
                }
            }
        }
        FieldKind::Json | FieldKind::Point => LogicalType::Json,
        // Rows of an array or blocks field live together in one JSON value
        FieldKind::Array { .. } | FieldKind::Blocks { .. } => LogicalType::Json,
        FieldKind::Relationship { .. } | FieldKind::Upload { .. } => {
            LogicalType::id_reference(options.id_type)
        }
        FieldKind::Group { .. } | FieldKind::Row { .. } | FieldKind::Collapsible { .. } | FieldKind::Tabs { .. } => {
            LogicalType::Json
        }
        FieldKind::Other(_) => short_text(None),
    };

    let default = field
        .default_value
        .as_ref()
        .filter(|value| default_fits(value, &logical))
        .cloned();

    ColumnSpec {
        name: field.name.clone().unwrap_or_default(),
        nullable: !field.required,
        default,
        unique: field.unique,
        indexed: field.index,
        logical,
    }
}

/// Only keep defaults the column can actually hold
fn default_fits(value: &Json, logical: &LogicalType) -> bool {
    match logical {
        LogicalType::ShortText { .. } | LogicalType::LongText => value.is_string(),
        LogicalType::Integer { .. } => value.is_i64(),
        LogicalType::Boolean => value.is_boolean(),
        LogicalType::Timestamp => value.is_string(),
        LogicalType::Enumerated { options } => {
            value.as_str().map(|v| options.iter().any(|o| o == v)).unwrap_or(false)
        }
        LogicalType::Json => !value.is_null(),
    }
}
