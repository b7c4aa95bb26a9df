//! Relationship registry
//!
//! Tracks which fields of each collection point at other collections, with
//! what cardinality, and where their values are stored: a reference column
//! on the owning table (single) or a junction table (many).

use std::collections::HashMap;

/// Table naming rules shared by the compiler and the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    pub prefix: String,
    pub relationship_suffix: String,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            relationship_suffix: "_rels".to_string(),
        }
    }
}

impl Naming {
    pub fn new(prefix: impl Into<String>, relationship_suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            relationship_suffix: relationship_suffix.into(),
        }
    }

    /// `{prefix}{slug}`
    pub fn table_name(&self, slug: &str) -> String {
        format!("{}{}", self.prefix, slug)
    }

    /// `{prefix}{from}_{to}{suffix}`
    pub fn junction_table_name(&self, from: &str, to: &str) -> String {
        format!("{}{}_{}{}", self.prefix, from, to, self.relationship_suffix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Many,
}

/// One relationship field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    pub field: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Junction table, for many-valued relationships
    pub junction: Option<String>,
}

impl RelationSpec {
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    naming: Naming,
    by_collection: HashMap<String, Vec<RelationSpec>>,
}

impl RelationRegistry {
    pub fn new(naming: Naming) -> Self {
        Self {
            naming,
            by_collection: HashMap::new(),
        }
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub(crate) fn register(&mut self, collection: &str, relations: Vec<RelationSpec>) {
        self.by_collection.insert(collection.to_string(), relations);
    }

    pub(crate) fn remove(&mut self, collection: &str) {
        self.by_collection.remove(collection);
    }

    /// Relationship fields of a collection, in definition order
    pub fn relationships_of(&self, collection: &str) -> &[RelationSpec] {
        self.by_collection
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn junction_table_name(&self, from: &str, to: &str) -> String {
        self.naming.junction_table_name(from, to)
    }

    /// Target collection and cardinality of a relationship field
    pub fn target_of(&self, collection: &str, field: &str) -> Option<(&str, Cardinality)> {
        self.relationships_of(collection)
            .iter()
            .find(|r| r.field == field)
            .map(|r| (r.target.as_str(), r.cardinality))
    }

    pub fn get(&self, collection: &str, field: &str) -> Option<&RelationSpec> {
        self.relationships_of(collection).iter().find(|r| r.field == field)
    }

    /// Many-valued relationships from any collection that point at `target`
    pub fn referencing(&self, target: &str) -> Vec<(&str, &RelationSpec)> {
        let mut found: Vec<_> = self
            .by_collection
            .iter()
            .flat_map(|(collection, relations)| {
                relations
                    .iter()
                    .filter(move |r| r.is_many() && r.target == target)
                    .map(move |r| (collection.as_str(), r))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.field.cmp(&b.1.field)));
        found
    }
}
