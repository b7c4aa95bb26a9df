//! Document representation
//!
//! A Document is one row of a collection's primary table, keyed by column
//! name, extended with its relationship fields: raw ids at depth 0, nested
//! documents once resolved.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::IdType;

/// A document in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Column and relationship values, in table order
    #[serde(flatten)]
    pub fields: Fields,
}

/// Primary key of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Number(i64),
    Uuid(String),
}

/// Field values as stored in or returned from a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(Fields),
}

/// A map of field names to values
pub type Fields = IndexMap<String, Value>;

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DocumentId> for Value {
    fn from(id: DocumentId) -> Self {
        match id {
            DocumentId::Number(n) => Value::Int(n),
            DocumentId::Uuid(s) => Value::String(s),
        }
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        let mut fields = Fields::with_capacity(doc.fields.len() + 1);
        fields.insert("id".to_string(), doc.id.into());
        fields.extend(doc.fields);
        Value::Object(fields)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => serde_json::Value::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl DocumentId {
    /// Read an id out of a document value for the configured id type.
    /// Populated documents (`{ "id": .. }`) are accepted too.
    pub fn from_value(value: &Value, id_type: IdType) -> Option<Self> {
        match (value, id_type) {
            (Value::Int(i), IdType::Number) => Some(DocumentId::Number(*i)),
            (Value::Float(f), IdType::Number) if f.fract() == 0.0 => Some(DocumentId::Number(*f as i64)),
            (Value::String(s), IdType::Number) => s.trim().parse().ok().map(DocumentId::Number),
            (Value::String(s), IdType::Uuid) if !s.is_empty() => Some(DocumentId::Uuid(s.clone())),
            (Value::Object(fields), _) => fields.get("id").and_then(|id| Self::from_value(id, id_type)),
            _ => None,
        }
    }

    /// Parse an id typed on the command line or in a URL
    pub fn parse(input: &str, id_type: IdType) -> Option<Self> {
        Self::from_value(&Value::String(input.to_string()), id_type)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Number(n) => write!(f, "{}", n),
            DocumentId::Uuid(s) => f.write_str(s),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(n: i64) -> Self {
        DocumentId::Number(n)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId::Uuid(s.to_string())
    }
}

impl Document {
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            fields: Fields::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Serialize to a JSON object with `id` first
    pub fn to_json(&self) -> serde_json::Value {
        Value::from(self.clone()).into()
    }
}
