//! CRUD engine
//!
//! Runs collection operations against one connection. The caller decides
//! whether that connection is inside a transaction; every multi-statement
//! write here assumes it is.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::args::{CreateArgs, DeleteArgs, FindArgs, FindByIdArgs, FindOneArgs, PaginatedDocs, UpdateArgs, WhereArgs};
use super::filter::{translate_filter, translate_sort, Scope};
use crate::config::IdType;
use crate::error::{Error, Result};
use crate::schema::{Cardinality, ColumnSpec, RelationSpec, TableRegistry, TableSpec};
use crate::storage::{Conn, Dialect, Document, DocumentId, Fields, SqlValue, Statement, Value, ValueKind};

/// Columns every primary table carries besides its fields
const BUILTIN_COLUMNS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// Ids bound per `IN (...)` list; keeps statements under the drivers'
/// bind-parameter limits
const ID_BATCH: usize = 500;

/// Write-time behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub allow_id_on_create: bool,
    pub validate_relationships: bool,
}

/// CRUD operations over a compiled registry
pub struct Engine<'r> {
    pub(crate) registry: &'r TableRegistry,
    pub(crate) dialect: Dialect,
    options: EngineOptions,
}

impl<'r> Engine<'r> {
    pub fn new(registry: &'r TableRegistry, dialect: Dialect, options: EngineOptions) -> Self {
        Self {
            registry,
            dialect,
            options,
        }
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn find(&self, conn: &mut Conn<'_>, args: &FindArgs) -> Result<PaginatedDocs> {
        let collection = args.collection.as_str();
        let scope = Scope::new(collection, self.registry, self.dialect)?;
        let filter = where_clause(&scope, &args.filter)?;
        let sort = relq::parse_sort(args.sort.as_deref().unwrap_or(""))
            .map_err(|e| Error::from_parse(collection, e))?;
        let order = translate_sort(&scope, &sort)?;

        let mut count = Statement::new(format!("SELECT COUNT(*) FROM {}", self.quote(&scope.table.name)));
        count.append(filter.clone());
        let total = conn.fetch_count(&count).await.map_err(Error::query(collection, "find"))?;

        let (limit, page) = args.window();
        let (mut select, kinds) = self.select(scope.table);
        select.append(filter);
        select.append(order);
        if let Some(limit) = limit {
            select.push_sql(" LIMIT ? OFFSET ?");
            select.push_param(SqlValue::Int(to_i64(limit)));
            select.push_param(SqlValue::Int(to_i64((page - 1).saturating_mul(limit))));
        }

        let docs = self.load(conn, collection, scope.table, &select, &kinds, "find").await?;
        let docs = self.resolve_all(conn, collection, docs, args.depth).await?;
        Ok(PaginatedDocs::new(docs, total, limit, page))
    }

    /// First match, or `None` when nothing matches
    pub async fn find_one(&self, conn: &mut Conn<'_>, args: &FindOneArgs) -> Result<Option<Document>> {
        let find = FindArgs {
            collection: args.collection.clone(),
            filter: args.filter.clone(),
            sort: args.sort.clone(),
            limit: Some(1),
            depth: args.depth,
            ..FindArgs::default()
        };
        let result = self.find(conn, &find).await?;
        Ok(result.docs.into_iter().next())
    }

    pub async fn find_by_id(&self, conn: &mut Conn<'_>, args: &FindByIdArgs) -> Result<Document> {
        let collection = args.collection.as_str();
        let doc = self
            .fetch_by_ids(conn, collection, std::slice::from_ref(&args.id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(collection, &args.id))?;
        self.resolve(conn, collection, doc, args.depth, 0).await
    }

    pub async fn count(&self, conn: &mut Conn<'_>, args: &WhereArgs) -> Result<u64> {
        let collection = args.collection.as_str();
        let scope = Scope::new(collection, self.registry, self.dialect)?;
        let mut count = Statement::new(format!("SELECT COUNT(*) FROM {}", self.quote(&scope.table.name)));
        count.append(where_clause(&scope, &args.filter)?);
        conn.fetch_count(&count).await.map_err(Error::query(collection, "count"))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn create(&self, conn: &mut Conn<'_>, args: &CreateArgs) -> Result<Document> {
        let collection = args.collection.as_str();
        let table = self.registry.require(collection)?;
        let relations = self.registry.relations().relationships_of(collection);
        self.check_keys(collection, table, &args.data)?;
        if let Some(column) = table.columns.iter().find(|c| {
            !c.nullable && c.default.is_none() && args.data.get(&c.name).map_or(true, Value::is_null)
        }) {
            return Err(Error::MissingRequiredField {
                collection: collection.to_string(),
                field: column.name.clone(),
            });
        }

        let explicit_id = self.explicit_id(collection, &args.data)?;

        let mut names = Vec::new();
        let mut params = Vec::new();
        if let Some(id) = &explicit_id {
            names.push(self.quote("id"));
            params.push(SqlValue::from_id(id));
        }
        for column in &table.columns {
            let value = match args.data.get(&column.name) {
                Some(value) => self.column_value(conn, collection, column, relations, value).await?,
                None => match &column.default {
                    Some(default) => coerce(collection, column, &Value::from(default.clone()))?,
                    None if !column.nullable => {
                        return Err(Error::MissingRequiredField {
                            collection: collection.to_string(),
                            field: column.name.clone(),
                        })
                    }
                    None => continue,
                },
            };
            names.push(self.quote(&column.name));
            params.push(value);
        }

        let quoted_table = self.quote(&table.name);
        let stmt = if names.is_empty() {
            Statement::new(match self.dialect {
                Dialect::MySql => format!("INSERT INTO {} () VALUES ()", quoted_table),
                Dialect::Sqlite => format!("INSERT INTO {} DEFAULT VALUES", quoted_table),
            })
        } else {
            Statement {
                sql: format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quoted_table,
                    names.join(", "),
                    Statement::placeholders(params.len())
                ),
                params,
            }
        };
        let outcome = conn.execute(&stmt).await.map_err(Error::query(collection, "create"))?;

        let id = match explicit_id {
            Some(id) => id,
            None => outcome
                .last_insert_id
                .map(DocumentId::Number)
                .ok_or_else(|| Error::invalid_value(collection, "id", "database returned no id"))?,
        };

        for relation in relations.iter().filter(|r| r.is_many()) {
            if let Some(value) = args.data.get(&relation.field) {
                let children = self.relation_ids(collection, relation, value)?;
                self.write_junction(conn, collection, relation, &id, &children, "create").await?;
            }
        }

        tracing::debug!("Created {} in {}", id, collection);
        self.find_by_id(
            conn,
            &FindByIdArgs {
                collection: args.collection.clone(),
                id,
                depth: args.depth,
                transaction: None,
            },
        )
        .await
    }

    pub async fn update(&self, conn: &mut Conn<'_>, args: &UpdateArgs) -> Result<Document> {
        let collection = args.collection.as_str();
        let table = self.registry.require(collection)?;
        let relations = self.registry.relations().relationships_of(collection);
        self.check_keys(collection, table, &args.data)?;

        if !self.exists(conn, collection, table, &args.id).await? {
            return Err(not_found(collection, &args.id));
        }

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for column in &table.columns {
            let Some(value) = args.data.get(&column.name) else {
                continue;
            };
            assignments.push(format!("{} = ?", self.quote(&column.name)));
            params.push(self.column_value(conn, collection, column, relations, value).await?);
        }
        // Always touched, even when nothing else changed
        assignments.push(format!("{} = {}", self.quote("updatedAt"), self.dialect.now()));
        params.push(SqlValue::from_id(&args.id));

        let stmt = Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {} = ?",
                self.quote(&table.name),
                assignments.join(", "),
                self.quote("id")
            ),
            params,
        };
        conn.execute(&stmt).await.map_err(Error::query(collection, "update"))?;

        for relation in relations.iter().filter(|r| r.is_many()) {
            if let Some(value) = args.data.get(&relation.field) {
                let children = self.relation_ids(collection, relation, value)?;
                self.clear_junction(conn, collection, relation, std::slice::from_ref(&args.id), "update")
                    .await?;
                self.write_junction(conn, collection, relation, &args.id, &children, "update")
                    .await?;
            }
        }

        self.find_by_id(
            conn,
            &FindByIdArgs {
                collection: args.collection.clone(),
                id: args.id.clone(),
                depth: args.depth,
                transaction: None,
            },
        )
        .await
    }

    /// Delete one document and return it as it was
    pub async fn delete(&self, conn: &mut Conn<'_>, args: &DeleteArgs) -> Result<Document> {
        let doc = self
            .find_by_id(conn, &FindByIdArgs::new(args.collection.clone(), args.id.clone()))
            .await?;
        self.remove(conn, &args.collection, std::slice::from_ref(&args.id), "delete")
            .await?;
        tracing::debug!("Deleted {} from {}", args.id, args.collection);
        Ok(doc)
    }

    /// Delete every match; returns how many were deleted
    pub async fn delete_many(&self, conn: &mut Conn<'_>, args: &WhereArgs) -> Result<u64> {
        let collection = args.collection.as_str();
        let scope = Scope::new(collection, self.registry, self.dialect)?;
        let mut select = Statement::new(format!("SELECT {} FROM {}", scope.column_sql("id"), self.quote(&scope.table.name)));
        select.append(where_clause(&scope, &args.filter)?);
        let rows = conn
            .fetch_all(&select, &[ValueKind::of_id(self.registry.id_type())])
            .await
            .map_err(Error::query(collection, "delete many"))?;
        let ids: Vec<DocumentId> = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().and_then(SqlValue::into_id))
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.remove(conn, collection, &ids, "delete many").await
    }

    /// Junction rows first, then the primary rows
    async fn remove(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        ids: &[DocumentId],
        operation: &'static str,
    ) -> Result<u64> {
        let table = self.registry.require(collection)?;
        for relation in self.registry.relations().relationships_of(collection) {
            if relation.is_many() {
                self.clear_junction(conn, collection, relation, ids, operation).await?;
            }
        }
        for (_, relation) in self.registry.relations().referencing(collection) {
            if let Some(junction) = &relation.junction {
                for batch in ids.chunks(ID_BATCH) {
                    let stmt = in_list(
                        format!("DELETE FROM {} WHERE {}", self.quote(junction), self.quote("childId")),
                        batch,
                    );
                    conn.execute(&stmt).await.map_err(Error::query(collection, operation))?;
                }
            }
        }
        let mut deleted = 0;
        for batch in ids.chunks(ID_BATCH) {
            let stmt = in_list(
                format!("DELETE FROM {} WHERE {}", self.quote(&table.name), self.quote("id")),
                batch,
            );
            let outcome = conn.execute(&stmt).await.map_err(Error::query(collection, operation))?;
            deleted += outcome.rows_affected;
        }
        Ok(deleted)
    }

    // ========================================================================
    // Row plumbing
    // ========================================================================

    /// `SELECT id, createdAt, updatedAt, <columns> FROM table` and its kinds
    fn select(&self, table: &TableSpec) -> (Statement, Vec<ValueKind>) {
        let mut columns: Vec<String> = BUILTIN_COLUMNS
            .iter()
            .map(|c| format!("{}.{}", self.quote(&table.name), self.quote(c)))
            .collect();
        let mut kinds = vec![
            ValueKind::of_id(self.registry.id_type()),
            ValueKind::Timestamp,
            ValueKind::Timestamp,
        ];
        for column in &table.columns {
            columns.push(format!("{}.{}", self.quote(&table.name), self.quote(&column.name)));
            kinds.push(ValueKind::of(&column.logical));
        }
        let stmt = Statement::new(format!("SELECT {} FROM {}", columns.join(", "), self.quote(&table.name)));
        (stmt, kinds)
    }

    /// Run a select built by [`Self::select`] and attach many-valued ids
    async fn load(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        table: &TableSpec,
        stmt: &Statement,
        kinds: &[ValueKind],
        operation: &'static str,
    ) -> Result<Vec<Document>> {
        let rows = conn.fetch_all(stmt, kinds).await.map_err(Error::query(collection, operation))?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            docs.push(self.document_from_row(collection, table, row)?);
        }
        self.attach_many(conn, collection, &mut docs).await?;
        Ok(docs)
    }

    fn document_from_row(&self, collection: &str, table: &TableSpec, row: Vec<SqlValue>) -> Result<Document> {
        let mut values = row.into_iter();
        let id = values
            .next()
            .and_then(SqlValue::into_id)
            .ok_or_else(|| Error::invalid_value(collection, "id", "row has no id"))?;
        let created = values.next().unwrap_or(SqlValue::Null);
        let updated = values.next().unwrap_or(SqlValue::Null);

        let mut doc = Document::new(id);
        for (column, value) in table.columns.iter().zip(values) {
            doc.fields.insert(column.name.clone(), value.into_value());
        }
        doc.fields.insert("createdAt".to_string(), created.into_value());
        doc.fields.insert("updatedAt".to_string(), updated.into_value());
        Ok(doc)
    }

    /// Fill every many-valued relationship with its ordered child ids
    async fn attach_many(&self, conn: &mut Conn<'_>, collection: &str, docs: &mut [Document]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.id.clone()).collect();
        let id_kind = ValueKind::of_id(self.registry.id_type());

        for relation in self.registry.relations().relationships_of(collection) {
            let Some(junction) = relation.junction.as_deref().filter(|_| relation.is_many()) else {
                continue;
            };
            // Each parent falls in exactly one batch, so per-parent order holds
            let mut children: HashMap<DocumentId, Vec<Value>> = HashMap::new();
            for batch in ids.chunks(ID_BATCH) {
                let mut stmt = in_list(
                    format!(
                        "SELECT {p}, {c} FROM {j} WHERE {p}",
                        p = self.quote("parentId"),
                        c = self.quote("childId"),
                        j = self.quote(junction)
                    ),
                    batch,
                );
                stmt.push_sql(&format!(
                    " ORDER BY {}, {}, {}",
                    self.quote("parentId"),
                    self.quote("order"),
                    self.quote("id")
                ));
                let rows = conn
                    .fetch_all(&stmt, &[id_kind, id_kind])
                    .await
                    .map_err(Error::query(collection, "load relationships"))?;

                for row in rows {
                    let mut values = row.into_iter();
                    if let (Some(parent), Some(child)) = (
                        values.next().and_then(SqlValue::into_id),
                        values.next().and_then(SqlValue::into_id),
                    ) {
                        children.entry(parent).or_default().push(child.into());
                    }
                }
            }
            for doc in docs.iter_mut() {
                let ordered = children.remove(&doc.id).unwrap_or_default();
                doc.fields.insert(relation.field.clone(), Value::Array(ordered));
            }
        }
        Ok(())
    }

    /// Documents with the given ids, in no particular order
    pub(crate) async fn fetch_by_ids(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        ids: &[DocumentId],
    ) -> Result<Vec<Document>> {
        let table = self.registry.require(collection)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (select, kinds) = self.select(table);
        let mut docs = Vec::with_capacity(ids.len());
        for batch in ids.chunks(ID_BATCH) {
            let stmt = in_list(
                format!("{} WHERE {}.{}", select.sql, self.quote(&table.name), self.quote("id")),
                batch,
            );
            docs.extend(self.load(conn, collection, table, &stmt, &kinds, "find by id").await?);
        }
        Ok(docs)
    }

    async fn exists(&self, conn: &mut Conn<'_>, collection: &str, table: &TableSpec, id: &DocumentId) -> Result<bool> {
        let stmt = Statement::new(format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            self.quote(&table.name),
            self.quote("id")
        ))
        .bind(SqlValue::from_id(id));
        let count = conn.fetch_count(&stmt).await.map_err(Error::query(collection, "find by id"))?;
        Ok(count > 0)
    }

    // ========================================================================
    // Input handling
    // ========================================================================

    /// Only known fields may be written
    fn check_keys(&self, collection: &str, table: &TableSpec, data: &Fields) -> Result<()> {
        let relations = self.registry.relations();
        for key in data.keys() {
            let known = BUILTIN_COLUMNS.contains(&key.as_str())
                || table.column(key).is_some()
                || relations.get(collection, key).is_some();
            if !known {
                return Err(Error::unknown_field(collection, key));
            }
        }
        Ok(())
    }

    /// An id supplied by the caller, when the configuration accepts one
    fn explicit_id(&self, collection: &str, data: &Fields) -> Result<Option<DocumentId>> {
        let supplied = data.get("id").filter(|v| !v.is_null());
        match (self.registry.id_type(), supplied) {
            (IdType::Uuid, Some(value)) => DocumentId::from_value(value, IdType::Uuid)
                .map(Some)
                .ok_or_else(|| Error::invalid_value(collection, "id", "expected a UUID string")),
            (IdType::Uuid, None) => Ok(Some(DocumentId::Uuid(Uuid::new_v4().to_string()))),
            (IdType::Number, Some(value)) if self.options.allow_id_on_create => {
                DocumentId::from_value(value, IdType::Number)
                    .map(Some)
                    .ok_or_else(|| Error::invalid_value(collection, "id", "expected an integer"))
            }
            (IdType::Number, Some(_)) => {
                tracing::debug!("Ignoring supplied id on create in {}", collection);
                Ok(None)
            }
            (IdType::Number, None) => Ok(None),
        }
    }

    /// Value bound for one column. Single relationships accept an id or a
    /// populated document and are checked against their target.
    async fn column_value(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        column: &ColumnSpec,
        relations: &[RelationSpec],
        value: &Value,
    ) -> Result<SqlValue> {
        if value.is_null() && !column.nullable {
            return Err(Error::MissingRequiredField {
                collection: collection.to_string(),
                field: column.name.clone(),
            });
        }
        let relation = relations
            .iter()
            .find(|r| r.field == column.name && r.cardinality == Cardinality::Single);
        match relation {
            Some(relation) if !value.is_null() => {
                let ids = self.relation_ids(collection, relation, value)?;
                self.ensure_targets(conn, collection, relation, &ids).await?;
                Ok(ids.first().map(SqlValue::from_id).unwrap_or(SqlValue::Null))
            }
            _ => coerce(collection, column, value),
        }
    }

    /// Ids out of a relationship value: an id, `{ id }`, or a list of those
    fn relation_ids(&self, collection: &str, relation: &RelationSpec, value: &Value) -> Result<Vec<DocumentId>> {
        let id_type = self.registry.id_type();
        let parse = |item: &Value| {
            DocumentId::from_value(item, id_type).ok_or_else(|| {
                Error::invalid_value(
                    collection,
                    &relation.field,
                    format!("'{}' is not a valid id", serde_json::Value::from(item.clone())),
                )
            })
        };
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) if relation.is_many() => items.iter().map(parse).collect(),
            Value::Array(_) => Err(Error::invalid_value(
                collection,
                &relation.field,
                "expected a single id, got a list",
            )),
            single => Ok(vec![parse(single)?]),
        }
    }

    /// Append ordered rows for one parent
    async fn write_junction(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        relation: &RelationSpec,
        parent: &DocumentId,
        children: &[DocumentId],
        operation: &'static str,
    ) -> Result<()> {
        let Some(junction) = relation.junction.as_deref() else {
            return Ok(());
        };
        if children.is_empty() {
            return Ok(());
        }
        self.ensure_targets(conn, collection, relation, children).await?;

        for (batch_no, batch) in children.chunks(ID_BATCH).enumerate() {
            let mut stmt = Statement::new(format!(
                "INSERT INTO {} ({}, {}, {}) VALUES ",
                self.quote(junction),
                self.quote("parentId"),
                self.quote("childId"),
                self.quote("order")
            ));
            for (offset, child) in batch.iter().enumerate() {
                if offset > 0 {
                    stmt.push_sql(", ");
                }
                let order = batch_no * ID_BATCH + offset;
                stmt.push_sql("(?, ?, ?)");
                stmt.push_param(SqlValue::from_id(parent));
                stmt.push_param(SqlValue::from_id(child));
                stmt.push_param(SqlValue::Int(to_i64(order as u64)));
            }
            conn.execute(&stmt).await.map_err(Error::query(collection, operation))?;
        }
        Ok(())
    }

    async fn clear_junction(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        relation: &RelationSpec,
        parents: &[DocumentId],
        operation: &'static str,
    ) -> Result<()> {
        let Some(junction) = relation.junction.as_deref() else {
            return Ok(());
        };
        for batch in parents.chunks(ID_BATCH) {
            let stmt = in_list(
                format!("DELETE FROM {} WHERE {}", self.quote(junction), self.quote("parentId")),
                batch,
            );
            conn.execute(&stmt).await.map_err(Error::query(collection, operation))?;
        }
        Ok(())
    }

    /// Every referenced id must exist in the target collection
    async fn ensure_targets(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        relation: &RelationSpec,
        ids: &[DocumentId],
    ) -> Result<()> {
        if !self.options.validate_relationships || ids.is_empty() {
            return Ok(());
        }
        let target = self.registry.require(&relation.target)?;
        let mut found: HashSet<DocumentId> = HashSet::with_capacity(ids.len());
        for batch in ids.chunks(ID_BATCH) {
            let stmt = in_list(
                format!(
                    "SELECT {} FROM {} WHERE {}",
                    self.quote("id"),
                    self.quote(&target.name),
                    self.quote("id")
                ),
                batch,
            );
            let rows = conn
                .fetch_all(&stmt, &[ValueKind::of_id(self.registry.id_type())])
                .await
                .map_err(Error::query(collection, "check relationship"))?;
            found.extend(
                rows.into_iter()
                    .filter_map(|row| row.into_iter().next().and_then(SqlValue::into_id)),
            );
        }
        match ids.iter().find(|id| !found.contains(*id)) {
            Some(missing) => Err(Error::RelationshipIntegrity {
                collection: collection.to_string(),
                field: relation.field.clone(),
                target: relation.target.clone(),
                id: missing.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn where_clause(scope: &Scope<'_>, filter: &serde_json::Value) -> Result<Statement> {
    let parsed = relq::parse_where(filter).map_err(|e| Error::from_parse(scope.collection, e))?;
    let condition = translate_filter(scope, &parsed)?;
    if condition.sql.is_empty() {
        return Ok(Statement::default());
    }
    let mut stmt = Statement::new(" WHERE ");
    stmt.append(condition);
    Ok(stmt)
}

/// `<prefix> IN (?, ...)` over a set of ids
fn in_list(prefix: String, ids: &[DocumentId]) -> Statement {
    Statement {
        sql: format!("{} IN ({})", prefix, Statement::placeholders(ids.len())),
        params: ids.iter().map(SqlValue::from_id).collect(),
    }
}

fn coerce(collection: &str, column: &ColumnSpec, value: &Value) -> Result<SqlValue> {
    SqlValue::coerce(value, &column.logical).map_err(|message| Error::invalid_value(collection, &column.name, message))
}

fn not_found(collection: &str, id: &DocumentId) -> Error {
    Error::DocumentNotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
