//! Abstract syntax for collection filters and sorts

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Filters
// ============================================================================

/// A conjunction of conditions. An empty `Where` matches every document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Where {
    pub conditions: Vec<Condition>,
}

impl Where {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Conditions whose path starts at `field`
    pub fn on_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Condition> {
        self.conditions.iter().filter(move |c| c.path.field() == field)
    }
}

/// One `field operator value` comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub path: FieldPath,
    pub operator: Operator,
    pub value: serde_json::Value,
}

/// Comparison operators understood by the translator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Like,
    Contains,
    In,
    NotIn,
    Exists,
}

impl Operator {
    pub const ALL: [Operator; 11] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::GreaterThan,
        Operator::GreaterThanEqual,
        Operator::LessThan,
        Operator::LessThanEqual,
        Operator::Like,
        Operator::Contains,
        Operator::In,
        Operator::NotIn,
        Operator::Exists,
    ];

    /// Look up an operator by its wire name (`greater_than_equal`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterThanEqual => "greater_than_equal",
            Operator::LessThan => "less_than",
            Operator::LessThanEqual => "less_than_equal",
            Operator::Like => "like",
            Operator::Contains => "contains",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Exists => "exists",
        }
    }

    /// Operators whose value must be a list
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Paths
// ============================================================================

/// A dotted field path: `title`, `meta.tags[0]`, `meta.tags.0.label`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPath {
    /// Always at least one segment; the first is a field name
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl FieldPath {
    pub fn field(&self) -> &str {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => key,
            _ => "",
        }
    }

    /// Segments below the top-level field
    pub fn rest(&self) -> &[PathSegment] {
        self.segments.get(1..).unwrap_or(&[])
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Render the segments below the field as a JSON path (`$.a.b[0]`)
    pub fn json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in self.rest() {
            match segment {
                PathSegment::Key(key) if is_plain_key(key) => {
                    out.push('.');
                    out.push_str(key);
                }
                PathSegment::Key(key) => {
                    out.push_str(".\"");
                    out.push_str(&key.replace('"', "\\\""));
                    out.push('"');
                }
                PathSegment::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

fn is_plain_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Sorting
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub keys: Vec<SortKey>,
}

impl Sort {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub path: FieldPath,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}
