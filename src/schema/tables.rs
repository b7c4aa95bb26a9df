//! Table registry: collections compiled into table definitions
//!
//! This is the pure half of schema compilation. It never touches the
//! database; [`super::reconcile`] applies the result to a live schema.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use super::columns::{map_field, ColumnSpec, LogicalType, MapperOptions};
use super::relations::{Cardinality, Naming, RelationRegistry, RelationSpec};
use super::{CollectionConfig, Field, FieldKind};
use crate::config::IdType;
use crate::error::{CollectionFailure, Error, Result};
use crate::validation::{self, MAX_IDENTIFIER_LENGTH};

/// A secondary index on one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub column: String,
    pub unique: bool,
}

/// The primary table of one collection
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub collection: String,
    pub name: String,
    /// Field columns, in definition order. `id`, `createdAt` and
    /// `updatedAt` are implied and not listed.
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A junction table for one many-valued relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionSpec {
    pub name: String,
    pub collection: String,
    pub field: String,
    pub target: String,
    pub parent_table: String,
}

/// Fields of a collection split by how they are stored
#[derive(Debug)]
pub struct FieldPartition<'a> {
    pub relationships: &'a [RelationSpec],
    /// Plain columns; reference columns of single relationships excluded
    pub columns: Vec<&'a ColumnSpec>,
}

/// Everything the CRUD engine needs to know about the schema
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    id_type: IdType,
    tables: IndexMap<String, TableSpec>,
    relations: RelationRegistry,
    junctions: Vec<JunctionSpec>,
}

impl TableRegistry {
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn table(&self, collection: &str) -> Option<&TableSpec> {
        self.tables.get(collection)
    }

    /// The table of a collection, or `CollectionNotFound`
    pub fn require(&self, collection: &str) -> Result<&TableSpec> {
        self.table(collection).ok_or_else(|| Error::CollectionNotFound {
            name: collection.to_string(),
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn relations(&self) -> &RelationRegistry {
        &self.relations
    }

    pub fn junctions(&self) -> &[JunctionSpec] {
        &self.junctions
    }

    pub fn junction(&self, name: &str) -> Option<&JunctionSpec> {
        self.junctions.iter().find(|j| j.name == name)
    }

    pub fn fields_of(&self, collection: &str) -> Option<FieldPartition<'_>> {
        let table = self.table(collection)?;
        let relationships = self.relations.relationships_of(collection);
        let columns = table
            .columns
            .iter()
            .filter(|c| !relationships.iter().any(|r| r.field == c.name))
            .collect();
        Some(FieldPartition {
            relationships,
            columns,
        })
    }

    /// Drop collections that could not be brought live, along with every
    /// collection whose relationships point at one of them. Returns the
    /// failures caused by that cascade.
    pub fn exclude(&mut self, failed: &[CollectionFailure]) -> Vec<CollectionFailure> {
        let mut removed: HashSet<String> = failed.iter().map(|f| f.collection.clone()).collect();
        let mut cascaded = Vec::new();
        loop {
            let dependent: Vec<(String, String)> = self
                .tables
                .keys()
                .filter(|slug| !removed.contains(*slug))
                .filter_map(|slug| {
                    self.relations
                        .relationships_of(slug)
                        .iter()
                        .find(|r| removed.contains(&r.target))
                        .map(|r| (slug.clone(), r.target.clone()))
                })
                .collect();
            if dependent.is_empty() {
                break;
            }
            for (slug, target) in dependent {
                cascaded.push(CollectionFailure::new(
                    &slug,
                    format!("depends on '{}', which is not available", target),
                ));
                removed.insert(slug);
            }
        }

        for slug in &removed {
            self.tables.shift_remove(slug);
            self.relations.remove(slug);
        }
        self.junctions.retain(|j| !removed.contains(&j.collection));
        cascaded
    }
}

/// Result of compiling a set of collections
#[derive(Debug)]
pub struct CompileOutput {
    /// Every collection that compiled; failed ones are absent
    pub registry: TableRegistry,
    pub failures: Vec<CollectionFailure>,
    pub warnings: Vec<String>,
}

/// Compile collection definitions into a table registry
///
/// A collection that fails is reported and left out; the rest still
/// compile. Collections whose relationships point at a failed collection
/// fail too, since their references could never be resolved.
pub fn build_registry(
    collections: &[CollectionConfig],
    naming: &Naming,
    mapper: &MapperOptions,
) -> CompileOutput {
    let mut failures = Vec::new();
    let mut warnings = Vec::new();

    let mut slugs = HashSet::new();
    let mut unique_collections = Vec::new();
    for collection in collections {
        if slugs.insert(collection.slug.as_str()) {
            unique_collections.push(collection);
        } else {
            failures.push(CollectionFailure::new(&collection.slug, "collection is defined more than once"));
        }
    }

    let mut compiled = Vec::new();
    for collection in &unique_collections {
        match compile_collection(collection, &slugs, naming, mapper) {
            Ok(mut output) => {
                warnings.append(&mut output.warnings);
                compiled.push(output);
            }
            Err(reason) => failures.push(CollectionFailure::new(&collection.slug, reason)),
        }
    }

    // Junction names must not collide with each other or with primary tables
    let table_names: HashSet<String> = compiled.iter().map(|c| c.table.name.clone()).collect();
    let mut claimed: HashMap<String, String> = HashMap::new();
    compiled.retain(|c| {
        for relation in &c.relations {
            let Some(junction) = &relation.junction else { continue };
            if table_names.contains(junction) {
                failures.push(CollectionFailure::new(
                    &c.slug,
                    format!("junction table '{}' collides with a collection table", junction),
                ));
                return false;
            }
            if let Some(owner) = claimed.get(junction) {
                failures.push(CollectionFailure::new(
                    &c.slug,
                    format!("junction table '{}' is already used by '{}'", junction, owner),
                ));
                return false;
            }
        }
        for relation in &c.relations {
            if let Some(junction) = &relation.junction {
                claimed.insert(junction.clone(), c.slug.clone());
            }
        }
        true
    });

    // Drop collections that point at a collection that did not compile
    loop {
        let present: HashSet<String> = compiled.iter().map(|c| c.slug.clone()).collect();
        let before = compiled.len();
        compiled.retain(|c| match c.relations.iter().find(|r| !present.contains(&r.target)) {
            Some(relation) => {
                failures.push(CollectionFailure::new(
                    &c.slug,
                    format!(
                        "relationship '{}' targets '{}', which failed to compile",
                        relation.field, relation.target
                    ),
                ));
                false
            }
            None => true,
        });
        if compiled.len() == before {
            break;
        }
    }

    let mut registry = TableRegistry {
        id_type: mapper.id_type,
        tables: IndexMap::new(),
        relations: RelationRegistry::new(naming.clone()),
        junctions: Vec::new(),
    };
    for c in compiled {
        for relation in c.relations.iter().filter(|r| r.is_many()) {
            if let Some(junction) = &relation.junction {
                registry.junctions.push(JunctionSpec {
                    name: junction.clone(),
                    collection: c.slug.clone(),
                    field: relation.field.clone(),
                    target: relation.target.clone(),
                    parent_table: c.table.name.clone(),
                });
            }
        }
        registry.relations.register(&c.slug, c.relations);
        registry.tables.insert(c.slug, c.table);
    }

    for failure in &failures {
        tracing::warn!("Collection '{}' was not compiled: {}", failure.collection, failure.reason);
    }

    CompileOutput {
        registry,
        failures,
        warnings,
    }
}

// ============================================================================
// Per-collection compilation
// ============================================================================

struct CompiledCollection {
    slug: String,
    table: TableSpec,
    relations: Vec<RelationSpec>,
    warnings: Vec<String>,
}

struct Flattener<'a> {
    slug: &'a str,
    known: &'a HashSet<&'a str>,
    naming: &'a Naming,
    mapper: &'a MapperOptions,
    seen: HashSet<String>,
    columns: Vec<ColumnSpec>,
    relations: Vec<RelationSpec>,
    warnings: Vec<String>,
}

fn compile_collection(
    collection: &CollectionConfig,
    known: &HashSet<&str>,
    naming: &Naming,
    mapper: &MapperOptions,
) -> std::result::Result<CompiledCollection, String> {
    let slug = collection.slug.as_str();
    validation::validate_collection_slug(slug).map_err(|e| e.to_string())?;

    let table_name = naming.table_name(slug);
    validation::validate_table_name(&table_name).map_err(|e| e.to_string())?;

    let mut flattener = Flattener {
        slug,
        known,
        naming,
        mapper,
        seen: HashSet::new(),
        columns: Vec::new(),
        relations: Vec::new(),
        warnings: Vec::new(),
    };
    let fields: Vec<&Field> = collection.fields.iter().collect();
    flattener.visit(&fields)?;

    let mut indexes = vec![IndexSpec {
        name: index_name(&table_name, "createdAt", "idx"),
        column: "createdAt".to_string(),
        unique: false,
    }];
    for column in &flattener.columns {
        // MySQL cannot key LONGTEXT or JSON columns without a prefix length
        if (column.unique || column.indexed) && matches!(column.logical, LogicalType::LongText | LogicalType::Json) {
            return Err(format!(
                "field '{}' cannot be unique or indexed: long text and JSON columns have no key support",
                column.name
            ));
        }
        if column.unique {
            indexes.push(IndexSpec {
                name: index_name(&table_name, &column.name, "key"),
                column: column.name.clone(),
                unique: true,
            });
        } else if column.indexed || is_reference(&flattener.relations, &column.name) {
            indexes.push(IndexSpec {
                name: index_name(&table_name, &column.name, "idx"),
                column: column.name.clone(),
                unique: false,
            });
        }
    }

    Ok(CompiledCollection {
        slug: slug.to_string(),
        table: TableSpec {
            collection: slug.to_string(),
            name: table_name,
            columns: flattener.columns,
            indexes,
        },
        relations: flattener.relations,
        warnings: flattener.warnings,
    })
}

fn is_reference(relations: &[RelationSpec], column: &str) -> bool {
    relations.iter().any(|r| r.field == column && r.cardinality == Cardinality::Single)
}

/// `{table}_{column}_{suffix}`. Names over the identifier limit are cut and
/// end in a hash of the full name, so distinct columns keep distinct indexes.
fn index_name(table: &str, column: &str, suffix: &str) -> String {
    let name = format!("{}_{}_{}", table, column, suffix);
    if name.len() <= MAX_IDENTIFIER_LENGTH {
        return name;
    }
    let digest = Sha256::digest(name.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    let keep = MAX_IDENTIFIER_LENGTH - hash.len() - 1;
    let head: String = name.chars().take(keep).collect();
    format!("{}_{}", head, hash)
}

impl Flattener<'_> {
    fn visit(&mut self, fields: &[&Field]) -> std::result::Result<(), String> {
        for field in fields {
            if field.kind.is_structural() {
                self.visit(&field.kind.nested_fields())?;
                continue;
            }

            let Some(name) = field.name.as_deref() else {
                continue;
            };
            validation::validate_field_name(name).map_err(|e| e.to_string())?;

            if validation::is_reserved_column(name) {
                self.warn(format!("field '{}' uses a reserved column name and was skipped", name));
                continue;
            }
            if !self.seen.insert(name.to_string()) {
                self.warn(format!("field '{}' is defined more than once; keeping the first", name));
                continue;
            }

            match &field.kind {
                FieldKind::Relationship {
                    relation_to,
                    has_many,
                } => {
                    let target = relation_to.single().ok_or_else(|| {
                        format!(
                            "relationship '{}' targets several collections; polymorphic relationships are not supported",
                            name
                        )
                    })?;
                    self.relationship(field, name, target, *has_many)?;
                }
                FieldKind::Upload { relation_to } => self.relationship(field, name, relation_to, false)?,
                _ => self.columns.push(map_field(field, self.mapper)),
            }
        }
        Ok(())
    }

    fn relationship(
        &mut self,
        field: &Field,
        name: &str,
        target: &str,
        has_many: bool,
    ) -> std::result::Result<(), String> {
        if !self.known.contains(target) {
            return Err(format!("relationship '{}' targets unknown collection '{}'", name, target));
        }

        if has_many {
            let junction = self.naming.junction_table_name(self.slug, target);
            validation::validate_table_name(&junction).map_err(|e| e.to_string())?;
            if let Some(existing) = self.relations.iter().find(|r| r.junction.as_deref() == Some(junction.as_str())) {
                return Err(format!(
                    "relationships '{}' and '{}' would share junction table '{}'",
                    existing.field, name, junction
                ));
            }
            self.relations.push(RelationSpec {
                field: name.to_string(),
                target: target.to_string(),
                cardinality: Cardinality::Many,
                junction: Some(junction),
            });
        } else {
            self.relations.push(RelationSpec {
                field: name.to_string(),
                target: target.to_string(),
                cardinality: Cardinality::Single,
                junction: None,
            });
            let mut column = map_field(field, self.mapper);
            column.logical = LogicalType::id_reference(self.mapper.id_type);
            self.columns.push(column);
        }
        Ok(())
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}: {}", self.slug, message);
        self.warnings.push(format!("{}: {}", self.slug, message));
    }
}
