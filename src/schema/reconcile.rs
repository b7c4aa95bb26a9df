//! Bringing a live database in line with a compiled registry
//!
//! Reconciliation only ever adds: missing tables, junction tables, columns
//! and their indexes. Existing columns are never altered or dropped; type
//! differences are reported as drift.

use std::collections::HashSet;

use super::columns::ColumnSpec;
use super::tables::{IndexSpec, JunctionSpec, TableRegistry, TableSpec};
use crate::config::IdType;
use crate::error::{CollectionFailure, Error, Result};
use crate::schema::LogicalType;
use crate::storage::{Conn, Dialect, SqlValue, ValueKind};

/// What happened to one primary table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableReport {
    pub collection: String,
    pub table: String,
    pub created: bool,
    pub added_columns: Vec<String>,
    /// Columns whose live type differs from the definition
    pub drift: Vec<String>,
}

/// Outcome of reconciling every table in a registry
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub tables: Vec<TableReport>,
    pub junctions_created: Vec<String>,
    pub failures: Vec<CollectionFailure>,
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    /// True when nothing had to be created or added
    pub fn is_noop(&self) -> bool {
        self.junctions_created.is_empty()
            && self.tables.iter().all(|t| !t.created && t.added_columns.is_empty())
    }
}

// ============================================================================
// DDL
// ============================================================================

pub fn create_table_sql(dialect: Dialect, table: &TableSpec, id_type: IdType) -> String {
    let mut defs = vec![dialect.identity_column(id_type)];
    for column in &table.columns {
        defs.push(dialect.column_definition(column, column.nullable));
    }
    defs.push(dialect.timestamp_column("createdAt"));
    defs.push(dialect.timestamp_column("updatedAt"));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n){}",
        dialect.quote(&table.name),
        defs.join(",\n  "),
        dialect.table_options()
    )
}

pub fn create_junction_sql(dialect: Dialect, junction: &JunctionSpec, id_type: IdType) -> String {
    let reference = dialect.column_type("", &LogicalType::id_reference(id_type));
    // Junction rows are never addressed by id, so a counter is enough
    let id_column = dialect.identity_column(IdType::Number);
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n  {id},\n  `parentId` {r} NOT NULL,\n  `childId` {r} NOT NULL,\n  \
         `order` INT NOT NULL DEFAULT 0,\n  FOREIGN KEY (`parentId`) REFERENCES {parent} (`id`)\n){options}",
        table = dialect.quote(&junction.name),
        id = id_column,
        r = reference,
        parent = dialect.quote(&junction.parent_table),
        options = dialect.table_options()
    )
}

/// Lookup indexes of a junction table
pub fn junction_indexes(junction: &JunctionSpec) -> Vec<IndexSpec> {
    ["parentId", "childId"]
        .iter()
        .map(|column| IndexSpec {
            name: truncate(format!("{}_{}_idx", junction.name, column)),
            column: column.to_string(),
            unique: false,
        })
        .collect()
}

/// `ALTER TABLE .. ADD COLUMN`. Columns that are NOT NULL without a default
/// are added nullable, since existing rows have nothing to hold.
pub fn add_column_sql(dialect: Dialect, table: &str, column: &ColumnSpec) -> (String, bool) {
    let relaxed = column.needs_value();
    let nullable = column.nullable || relaxed;
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote(table),
        dialect.column_definition(column, nullable)
    );
    (sql, relaxed)
}

pub fn drop_table_sql(dialect: Dialect, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", dialect.quote(table))
}

/// Every statement that creates the registry's schema from scratch
pub fn schema_statements(dialect: Dialect, registry: &TableRegistry) -> Vec<String> {
    let mut statements = Vec::new();
    for table in registry.tables() {
        statements.push(create_table_sql(dialect, table, registry.id_type()));
        statements.extend(table.indexes.iter().map(|i| dialect.create_index(&table.name, i)));
    }
    for junction in registry.junctions() {
        statements.push(create_junction_sql(dialect, junction, registry.id_type()));
        statements.extend(junction_indexes(junction).iter().map(|i| dialect.create_index(&junction.name, i)));
    }
    statements
}

fn truncate(mut name: String) -> String {
    name.truncate(crate::validation::MAX_IDENTIFIER_LENGTH);
    name
}

// ============================================================================
// Live reconciliation
// ============================================================================

/// Create or extend every table of the registry
///
/// With `locked` set nothing is changed; missing tables and columns become
/// failures of their collection instead. A failure never stops the other
/// collections from being reconciled.
pub async fn reconcile(conn: &mut Conn<'_>, registry: &TableRegistry, locked: bool) -> Result<ReconcileReport> {
    let dialect = conn.dialect();
    let mut report = ReconcileReport::default();
    let existing = existing_tables(conn).await?;

    for table in registry.tables() {
        match reconcile_table(conn, registry.id_type(), table, &existing, locked).await {
            Ok((table_report, mut warnings)) => {
                report.warnings.append(&mut warnings);
                report.tables.push(table_report);
            }
            Err(reason) => {
                tracing::error!("Schema for '{}' could not be reconciled: {}", table.collection, reason);
                report.failures.push(CollectionFailure::new(&table.collection, reason));
            }
        }
    }

    let failed: HashSet<String> = report.failures.iter().map(|f| f.collection.clone()).collect();
    for junction in registry.junctions() {
        if failed.contains(&junction.collection) || existing.contains(&junction.name) {
            continue;
        }
        if locked {
            report.failures.push(CollectionFailure::new(
                &junction.collection,
                format!("junction table '{}' does not exist and schema push is disabled", junction.name),
            ));
            continue;
        }
        let mut statements = vec![create_junction_sql(dialect, junction, registry.id_type())];
        statements.extend(junction_indexes(junction).iter().map(|i| dialect.create_index(&junction.name, i)));
        match run_all(conn, &statements).await {
            Ok(()) => {
                tracing::info!("Created junction table {}", junction.name);
                report.junctions_created.push(junction.name.clone());
            }
            Err(e) => report.failures.push(CollectionFailure::new(
                &junction.collection,
                format!("could not create junction table '{}': {}", junction.name, e),
            )),
        }
    }

    Ok(report)
}

async fn reconcile_table(
    conn: &mut Conn<'_>,
    id_type: IdType,
    table: &TableSpec,
    existing: &HashSet<String>,
    locked: bool,
) -> std::result::Result<(TableReport, Vec<String>), String> {
    let dialect = conn.dialect();
    let mut report = TableReport {
        collection: table.collection.clone(),
        table: table.name.clone(),
        ..TableReport::default()
    };
    let mut warnings = Vec::new();

    if !existing.contains(&table.name) {
        if locked {
            return Err(format!("table '{}' does not exist and schema push is disabled", table.name));
        }
        let mut statements = vec![create_table_sql(dialect, table, id_type)];
        statements.extend(table.indexes.iter().map(|i| dialect.create_index(&table.name, i)));
        run_all(conn, &statements)
            .await
            .map_err(|e| format!("could not create table '{}': {}", table.name, e))?;
        tracing::info!("Created table {}", table.name);
        report.created = true;
        return Ok((report, warnings));
    }

    let live = live_columns(conn, &table.name)
        .await
        .map_err(|e| format!("could not read columns of '{}': {}", table.name, e))?;

    for column in &table.columns {
        match live.iter().find(|(name, _)| *name == column.name) {
            Some((_, live_type)) => {
                let expected = dialect.catalog_type(&column.logical);
                if !live_type.to_ascii_lowercase().starts_with(expected) {
                    report.drift.push(column.name.clone());
                    let message = format!(
                        "{}.{} is {} in the database but defined as {}",
                        table.name, column.name, live_type, expected
                    );
                    tracing::warn!("{}", message);
                    warnings.push(message);
                }
            }
            None if locked => {
                return Err(format!(
                    "column '{}' is missing from '{}' and schema push is disabled",
                    column.name, table.name
                ));
            }
            None => {
                let (sql, relaxed) = add_column_sql(dialect, &table.name, column);
                let mut statements = vec![sql];
                statements.extend(
                    table
                        .indexes
                        .iter()
                        .filter(|i| i.column == column.name)
                        .map(|i| dialect.create_index(&table.name, i)),
                );
                run_all(conn, &statements)
                    .await
                    .map_err(|e| format!("could not add column '{}': {}", column.name, e))?;
                if relaxed {
                    let message = format!(
                        "{}.{} was added as nullable because existing rows have no value for it",
                        table.name, column.name
                    );
                    tracing::warn!("{}", message);
                    warnings.push(message);
                }
                tracing::info!("Added column {}.{}", table.name, column.name);
                report.added_columns.push(column.name.clone());
            }
        }
    }

    Ok((report, warnings))
}

async fn run_all(conn: &mut Conn<'_>, statements: &[String]) -> std::result::Result<(), sqlx::Error> {
    for sql in statements {
        conn.execute_ddl(sql).await?;
    }
    Ok(())
}

async fn existing_tables(conn: &mut Conn<'_>) -> Result<HashSet<String>> {
    let stmt = conn.dialect().list_tables();
    let rows = conn
        .fetch_all(&stmt, &[ValueKind::Text])
        .await
        .map_err(Error::query("*", "list tables"))?;
    Ok(rows.into_iter().filter_map(first_text).collect())
}

async fn live_columns(conn: &mut Conn<'_>, table: &str) -> std::result::Result<Vec<(String, String)>, sqlx::Error> {
    let stmt = conn.dialect().list_columns(table);
    let rows = conn.fetch_all(&stmt, &[ValueKind::Text, ValueKind::Text]).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let mut values = row.into_iter();
            match (values.next(), values.next()) {
                (Some(SqlValue::Text(name)), Some(SqlValue::Text(data_type))) => Some((name, data_type)),
                (Some(SqlValue::Text(name)), _) => Some((name, String::new())),
                _ => None,
            }
        })
        .collect())
}

fn first_text(row: Vec<SqlValue>) -> Option<String> {
    match row.into_iter().next() {
        Some(SqlValue::Text(name)) => Some(name),
        _ => None,
    }
}

/// Names of every table in the connected database
pub async fn list_tables(conn: &mut Conn<'_>) -> Result<Vec<String>> {
    let mut tables: Vec<String> = existing_tables(conn).await?.into_iter().collect();
    tables.sort();
    Ok(tables)
}

/// Drop the junction tables, then the primary tables, of a registry
pub async fn drop_managed(conn: &mut Conn<'_>, registry: &TableRegistry) -> Result<Vec<String>> {
    let dialect = conn.dialect();
    let existing = existing_tables(conn).await?;
    let tables: Vec<String> = registry
        .junctions()
        .iter()
        .map(|j| j.name.clone())
        .chain(registry.tables().map(|t| t.name.clone()))
        .filter(|name| existing.contains(name))
        .collect();

    conn.execute_ddl(dialect.foreign_key_checks(false))
        .await
        .map_err(Error::query("*", "drop database"))?;
    let mut result = Ok(());
    for table in &tables {
        if let Err(e) = conn.execute_ddl(&drop_table_sql(dialect, table)).await {
            result = Err(e);
            break;
        }
    }
    // Checks come back on even when a drop failed
    let restored = conn.execute_ddl(dialect.foreign_key_checks(true)).await;
    result.and(restored).map_err(Error::query("*", "drop database"))?;

    tracing::info!("Dropped {} table(s)", tables.len());
    Ok(tables)
}
