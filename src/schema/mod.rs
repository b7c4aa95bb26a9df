//! Collection definitions and their relational compilation
//!
//! Collections define the structure of documents:
//! - Field definitions with types
//! - Required / unique / indexed flags
//! - Default values
//! - Relationships to other collections
//!
//! Definitions are loaded from `{dir}/{collection}.yaml` or built in code,
//! then compiled into a [`tables::TableRegistry`] and reconciled against the
//! live database by [`reconcile`].

pub mod columns;
pub mod reconcile;
pub mod relations;
pub mod tables;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

pub use columns::{map_field, ColumnSpec, LogicalType, MapperOptions};
pub use relations::{Cardinality, Naming, RelationRegistry, RelationSpec};
pub use tables::{build_registry, CompileOutput, FieldPartition, IndexSpec, JunctionSpec, TableRegistry, TableSpec};

/// A collection: a slug plus its ordered fields
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CollectionConfig {
    pub slug: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl CollectionConfig {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field definition
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn from_yaml_str(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Load every `*.yaml` / `*.yml` file in `dir`, sorted by file name
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        let read_err = |source| Error::FileReadError {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path
                .extension()
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false)
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut collections = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path).map_err(|source| Error::FileReadError {
                path: path.clone(),
                source,
            })?;
            let collection = Self::from_yaml_str(&content).map_err(|e| Error::YamlParseError {
                path: path.clone(),
                message: e.to_string(),
            })?;
            collections.push(collection);
        }
        Ok(collections)
    }
}

// ============================================================================
// Field Definitions
// ============================================================================

/// One field of a collection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawField")]
pub struct Field {
    /// Structural wrappers like `row` may be unnamed
    pub name: Option<String>,
    pub required: bool,
    pub unique: bool,
    pub index: bool,
    pub default_value: Option<serde_json::Value>,
    pub kind: FieldKind,
}

/// The closed set of field types
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text { max_length: Option<u32> },
    Email,
    Textarea,
    Code,
    RichText,
    Number,
    Checkbox,
    Date,
    Select { options: Vec<String>, has_many: bool },
    Radio { options: Vec<String> },
    Json,
    Point,
    Relationship { relation_to: RelationTo, has_many: bool },
    Upload { relation_to: String },
    Array { fields: Vec<Field> },
    Blocks { blocks: Vec<Block> },
    Group { fields: Vec<Field> },
    Row { fields: Vec<Field> },
    Collapsible { fields: Vec<Field> },
    Tabs { tabs: Vec<Tab> },
    /// A type tag this adapter does not know; stored as short text
    Other(String),
}

/// Target(s) of a relationship field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationTo {
    One(String),
    Many(Vec<String>),
}

impl RelationTo {
    /// The single target, if there is exactly one
    pub fn single(&self) -> Option<&str> {
        match self {
            RelationTo::One(target) => Some(target),
            RelationTo::Many(targets) if targets.len() == 1 => Some(&targets[0]),
            RelationTo::Many(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Block {
    pub slug: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tab {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl FieldKind {
    /// Wrappers whose children are flattened into the owning table
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FieldKind::Group { .. } | FieldKind::Row { .. } | FieldKind::Collapsible { .. } | FieldKind::Tabs { .. }
        )
    }

    /// Children to flatten, for structural wrappers
    pub fn nested_fields(&self) -> Vec<&Field> {
        match self {
            FieldKind::Group { fields } | FieldKind::Row { fields } | FieldKind::Collapsible { fields } => {
                fields.iter().collect()
            }
            FieldKind::Tabs { tabs } => tabs.iter().flat_map(|t| t.fields.iter()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Text { .. } => "text",
            FieldKind::Email => "email",
            FieldKind::Textarea => "textarea",
            FieldKind::Code => "code",
            FieldKind::RichText => "richText",
            FieldKind::Number => "number",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Date => "date",
            FieldKind::Select { .. } => "select",
            FieldKind::Radio { .. } => "radio",
            FieldKind::Json => "json",
            FieldKind::Point => "point",
            FieldKind::Relationship { .. } => "relationship",
            FieldKind::Upload { .. } => "upload",
            FieldKind::Array { .. } => "array",
            FieldKind::Blocks { .. } => "blocks",
            FieldKind::Group { .. } => "group",
            FieldKind::Row { .. } => "row",
            FieldKind::Collapsible { .. } => "collapsible",
            FieldKind::Tabs { .. } => "tabs",
            FieldKind::Other(name) => name,
        }
    }
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: Some(name.into()),
            required: false,
            unique: false,
            index: false,
            default_value: None,
            kind,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text { max_length: None })
    }

    pub fn textarea(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Textarea)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn checkbox(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Checkbox)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Json)
    }

    pub fn select(name: impl Into<String>, options: &[&str]) -> Self {
        Self::new(
            name,
            FieldKind::Select {
                options: options.iter().map(|o| o.to_string()).collect(),
                has_many: false,
            },
        )
    }

    /// Single-valued relationship
    pub fn relationship(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Relationship {
                relation_to: RelationTo::One(target.into()),
                has_many: false,
            },
        )
    }

    /// Many-valued relationship, stored in a junction table
    pub fn relationship_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Relationship {
                relation_to: RelationTo::One(target.into()),
                has_many: true,
            },
        )
    }

    pub fn array(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::new(name, FieldKind::Array { fields })
    }

    pub fn group(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::new(name, FieldKind::Group { fields })
    }

    pub fn row(fields: Vec<Field>) -> Self {
        Self {
            name: None,
            ..Self::new("", FieldKind::Row { fields })
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

// ============================================================================
// Wire Format
// ============================================================================

/// Select options are either bare strings or `{ label, value }` pairs
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SelectOption {
    Value(String),
    Labeled {
        #[allow(dead_code)]
        #[serde(default)]
        label: Option<String>,
        value: String,
    },
}

impl SelectOption {
    fn into_value(self) -> String {
        match self {
            SelectOption::Value(v) | SelectOption::Labeled { value: v, .. } => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    index: bool,
    #[serde(default)]
    default_value: Option<serde_json::Value>,
    #[serde(default)]
    max_length: Option<u32>,
    #[serde(default)]
    options: Vec<SelectOption>,
    #[serde(default)]
    has_many: bool,
    #[serde(default)]
    relation_to: Option<RelationTo>,
    #[serde(default)]
    fields: Vec<Field>,
    #[serde(default)]
    blocks: Vec<Block>,
    #[serde(default)]
    tabs: Vec<Tab>,
}

impl TryFrom<RawField> for Field {
    type Error = String;

    fn try_from(raw: RawField) -> std::result::Result<Self, Self::Error> {
        let RawField {
            field_type,
            name,
            required,
            unique,
            index,
            default_value,
            max_length,
            options,
            has_many,
            relation_to,
            fields,
            blocks,
            tabs,
        } = raw;
        let target = |kind: &str| -> std::result::Result<RelationTo, String> {
            relation_to
                .clone()
                .ok_or_else(|| format!("'{}' field requires relationTo", kind))
        };

        let kind = match field_type.as_str() {
            "text" => FieldKind::Text { max_length },
            "email" => FieldKind::Email,
            "textarea" => FieldKind::Textarea,
            "code" => FieldKind::Code,
            "richText" => FieldKind::RichText,
            "number" => FieldKind::Number,
            "checkbox" => FieldKind::Checkbox,
            "date" => FieldKind::Date,
            "select" => FieldKind::Select {
                options: options.into_iter().map(SelectOption::into_value).collect(),
                has_many,
            },
            "radio" => FieldKind::Radio {
                options: options.into_iter().map(SelectOption::into_value).collect(),
            },
            "json" => FieldKind::Json,
            "point" => FieldKind::Point,
            "relationship" => FieldKind::Relationship {
                relation_to: target("relationship")?,
                has_many,
            },
            "upload" => match target("upload")? {
                RelationTo::One(target) => FieldKind::Upload { relation_to: target },
                RelationTo::Many(_) => return Err("'upload' field takes a single relationTo".into()),
            },
            "array" => FieldKind::Array { fields },
            "blocks" => FieldKind::Blocks { blocks },
            "group" => FieldKind::Group { fields },
            "row" => FieldKind::Row { fields },
            "collapsible" => FieldKind::Collapsible { fields },
            "tabs" => FieldKind::Tabs { tabs },
            other => FieldKind::Other(other.to_string()),
        };

        if name.is_none() && !kind.is_structural() {
            return Err(format!("'{}' field requires a name", kind.type_name()));
        }

        Ok(Field {
            name,
            required,
            unique,
            index,
            default_value,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSTS: &str = r#"
slug: posts
fields:
  - name: title
    type: text
    required: true
  - name: status
    type: select
    options:
      - draft
      - label: Published
        value: published
    defaultValue: draft
  - type: row
    fields:
      - name: views
        type: number
  - name: tags
    type: relationship
    relationTo: tags
    hasMany: true
  - name: rating
    type: starRating
"#;

    #[test]
    fn test_parse_collection_yaml() {
        let posts = CollectionConfig::from_yaml_str(POSTS).unwrap();
        assert_eq!(posts.slug, "posts");
        assert_eq!(posts.fields.len(), 5);
        assert!(posts.fields[0].required);
        assert_eq!(
            posts.fields[1].kind,
            FieldKind::Select {
                options: vec!["draft".into(), "published".into()],
                has_many: false
            }
        );
        assert_eq!(posts.fields[1].default_value, Some(serde_json::json!("draft")));
        assert!(posts.fields[2].kind.is_structural());
        assert!(posts.fields[2].name.is_none());
        assert!(matches!(
            posts.fields[3].kind,
            FieldKind::Relationship { has_many: true, .. }
        ));
        assert_eq!(posts.fields[4].kind, FieldKind::Other("starRating".into()));
    }

    #[test]
    fn test_relationship_requires_target() {
        let result = CollectionConfig::from_yaml_str(
            "slug: posts\nfields:\n  - name: author\n    type: relationship\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_data_field_requires_name() {
        let result = CollectionConfig::from_yaml_str("slug: posts\nfields:\n  - type: text\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_polymorphic_relation_parses() {
        let posts = CollectionConfig::from_yaml_str(
            "slug: posts\nfields:\n  - name: parent\n    type: relationship\n    relationTo: [pages, posts]\n",
        )
        .unwrap();
        let FieldKind::Relationship { relation_to, .. } = &posts.fields[0].kind else {
            panic!("Expected relationship field");
        };
        assert_eq!(relation_to.single(), None);
    }

    #[test]
    fn test_builder() {
        let posts = CollectionConfig::new("posts")
            .field(Field::text("title").required().unique())
            .field(Field::relationship_many("tags", "tags"));
        assert_eq!(posts.fields.len(), 2);
        assert!(posts.fields[0].unique);
    }

    #[test]
    fn test_load_dir_sorted() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b-posts.yaml"), POSTS).unwrap();
        std::fs::write(tmp.path().join("a-tags.yml"), "slug: tags\nfields:\n  - name: name\n    type: text\n").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let collections = CollectionConfig::load_dir(tmp.path()).unwrap();
        let slugs: Vec<_> = collections.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["tags", "posts"]);
    }
}
