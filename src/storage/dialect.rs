//! SQL dialect differences
//!
//! MySQL is the production target. SQLite speaks the same adapter for local
//! development and tests; everything that differs between the two is here.

use crate::config::IdType;
use crate::schema::{ColumnSpec, IndexSpec, LogicalType};
use crate::storage::sql::{SqlValue, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Backtick-quote an identifier. Both engines accept backticks.
    pub fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    // ========================================================================
    // Column types
    // ========================================================================

    pub fn column_type(&self, column: &str, logical: &LogicalType) -> String {
        match (self, logical) {
            (_, LogicalType::ShortText { length }) => format!("VARCHAR({})", length),
            (Dialect::MySql, LogicalType::LongText) => "LONGTEXT".to_string(),
            (Dialect::Sqlite, LogicalType::LongText) => "TEXT".to_string(),
            (Dialect::MySql, LogicalType::Integer { big: false }) => "INT".to_string(),
            (Dialect::MySql, LogicalType::Integer { big: true }) => "BIGINT".to_string(),
            (Dialect::Sqlite, LogicalType::Integer { .. }) => "INTEGER".to_string(),
            (_, LogicalType::Boolean) => "BOOLEAN".to_string(),
            (Dialect::MySql, LogicalType::Timestamp) => "DATETIME(3)".to_string(),
            (Dialect::Sqlite, LogicalType::Timestamp) => "DATETIME".to_string(),
            (Dialect::MySql, LogicalType::Enumerated { options }) => {
                format!("ENUM({})", self.string_list(options))
            }
            (Dialect::Sqlite, LogicalType::Enumerated { options }) => format!(
                "TEXT CHECK ({} IN ({}))",
                self.quote(column),
                self.string_list(options)
            ),
            (Dialect::MySql, LogicalType::Json) => "JSON".to_string(),
            (Dialect::Sqlite, LogicalType::Json) => "TEXT".to_string(),
        }
    }

    /// Base type name as the catalog reports it, for drift checks
    pub fn catalog_type(&self, logical: &LogicalType) -> &'static str {
        match (self, logical) {
            (_, LogicalType::ShortText { .. }) => "varchar",
            (Dialect::MySql, LogicalType::LongText) => "longtext",
            (Dialect::MySql, LogicalType::Integer { big: false }) => "int",
            (Dialect::MySql, LogicalType::Integer { big: true }) => "bigint",
            (Dialect::MySql, LogicalType::Boolean) => "tinyint",
            (Dialect::MySql, LogicalType::Timestamp) => "datetime",
            (Dialect::MySql, LogicalType::Enumerated { .. }) => "enum",
            (Dialect::MySql, LogicalType::Json) => "json",
            (Dialect::Sqlite, LogicalType::Integer { .. }) => "integer",
            (Dialect::Sqlite, LogicalType::Boolean) => "boolean",
            (Dialect::Sqlite, LogicalType::Timestamp) => "datetime",
            (Dialect::Sqlite, _) => "text",
        }
    }

    /// Full column definition for CREATE TABLE / ADD COLUMN
    pub fn column_definition(&self, column: &ColumnSpec, nullable: bool) -> String {
        let mut def = format!(
            "{} {}",
            self.quote(&column.name),
            self.column_type(&column.name, &column.logical)
        );
        if !nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(literal) = column.default.as_ref().and_then(|v| self.default_literal(v, &column.logical)) {
            def.push_str(" DEFAULT ");
            def.push_str(&literal);
        }
        def
    }

    /// DDL literal for a column default. Only scalar column types get one;
    /// MySQL rejects literal defaults on TEXT and JSON columns.
    fn default_literal(&self, value: &serde_json::Value, logical: &LogicalType) -> Option<String> {
        match (logical, value) {
            (LogicalType::ShortText { .. } | LogicalType::Enumerated { .. }, serde_json::Value::String(s)) => {
                Some(self.string_literal(s))
            }
            (LogicalType::LongText, serde_json::Value::String(s)) if *self == Dialect::Sqlite => {
                Some(self.string_literal(s))
            }
            (LogicalType::Integer { .. }, serde_json::Value::Number(n)) if n.is_i64() => Some(n.to_string()),
            (LogicalType::Boolean, serde_json::Value::Bool(b)) => Some(if *b { "1" } else { "0" }.to_string()),
            _ => None,
        }
    }

    pub fn identity_column(&self, id_type: IdType) -> String {
        match (self, id_type) {
            (Dialect::MySql, IdType::Number) => "`id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY".to_string(),
            (Dialect::Sqlite, IdType::Number) => "`id` INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            (_, IdType::Uuid) => "`id` VARCHAR(36) NOT NULL PRIMARY KEY".to_string(),
        }
    }

    pub fn timestamp_column(&self, name: &str) -> String {
        match self {
            Dialect::MySql => format!(
                "{} DATETIME(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)",
                self.quote(name)
            ),
            Dialect::Sqlite => format!(
                "{} DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))",
                self.quote(name)
            ),
        }
    }

    /// Quoted string literal for DDL. MySQL also treats backslash as an escape.
    fn string_literal(&self, value: &str) -> String {
        let value = match self {
            Dialect::MySql => value.replace('\\', "\\\\"),
            Dialect::Sqlite => value.to_string(),
        };
        format!("'{}'", value.replace('\'', "''"))
    }

    fn string_list(&self, values: &[String]) -> String {
        values
            .iter()
            .map(|v| self.string_literal(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Expression for the current time, matching the timestamp defaults
    pub fn now(&self) -> &'static str {
        match self {
            Dialect::MySql => "CURRENT_TIMESTAMP(3)",
            Dialect::Sqlite => "strftime('%Y-%m-%d %H:%M:%f', 'now')",
        }
    }

    pub fn create_index(&self, table: &str, index: &IndexSpec) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let if_not_exists = match self {
            Dialect::MySql => "",
            Dialect::Sqlite => "IF NOT EXISTS ",
        };
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            unique,
            if_not_exists,
            self.quote(&index.name),
            self.quote(table),
            self.quote(&index.column)
        )
    }

    pub fn table_options(&self) -> &'static str {
        match self {
            Dialect::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            Dialect::Sqlite => "",
        }
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Names of every table in the current database
    pub fn list_tables(&self) -> Statement {
        match self {
            Dialect::MySql => Statement::new(
                "SELECT TABLE_NAME FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE()",
            ),
            Dialect::Sqlite => Statement::new(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            ),
        }
    }

    /// (name, type) of every column of a table
    pub fn list_columns(&self, table: &str) -> Statement {
        match self {
            Dialect::MySql => Statement::new(
                "SELECT COLUMN_NAME, DATA_TYPE FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
            )
            .bind(SqlValue::Text(table.to_string())),
            Dialect::Sqlite => Statement::new("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
                .bind(SqlValue::Text(table.to_string())),
        }
    }

    /// Statements wrapped around a bulk drop
    pub fn foreign_key_checks(&self, enabled: bool) -> &'static str {
        match (self, enabled) {
            (Dialect::MySql, false) => "SET FOREIGN_KEY_CHECKS = 0",
            (Dialect::MySql, true) => "SET FOREIGN_KEY_CHECKS = 1",
            (Dialect::Sqlite, false) => "PRAGMA foreign_keys = OFF",
            (Dialect::Sqlite, true) => "PRAGMA foreign_keys = ON",
        }
    }

    // ========================================================================
    // JSON
    // ========================================================================

    /// Extract the value at a bound JSON path (`?`)
    pub fn json_extract(&self, column_sql: &str) -> String {
        match self {
            Dialect::MySql => format!("JSON_EXTRACT({}, ?)", column_sql),
            Dialect::Sqlite => format!("json_extract({}, ?)", column_sql),
        }
    }

    /// Extract as unquoted text, for substring matching
    pub fn json_extract_text(&self, column_sql: &str) -> String {
        match self {
            Dialect::MySql => format!("JSON_UNQUOTE(JSON_EXTRACT({}, ?))", column_sql),
            Dialect::Sqlite => format!("json_extract({}, ?)", column_sql),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, logical: LogicalType) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            logical,
            nullable: true,
            default: None,
            unique: false,
            indexed: false,
        }
    }

    #[test]
    fn test_quote() {
        assert_eq!(Dialect::MySql.quote("order"), "`order`");
        assert_eq!(Dialect::MySql.quote("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_enum_columns() {
        let status = LogicalType::Enumerated {
            options: vec!["draft".into(), "it's".into()],
        };
        assert_eq!(
            Dialect::MySql.column_type("status", &status),
            "ENUM('draft', 'it''s')"
        );
        assert_eq!(
            Dialect::Sqlite.column_type("status", &status),
            "TEXT CHECK (`status` IN ('draft', 'it''s'))"
        );
    }

    #[test]
    fn test_column_definition_with_default() {
        let mut col = column("status", LogicalType::ShortText { length: 32 });
        col.default = Some(json!("draft"));
        assert_eq!(
            Dialect::MySql.column_definition(&col, false),
            "`status` VARCHAR(32) NOT NULL DEFAULT 'draft'"
        );

        let mut col = column("done", LogicalType::Boolean);
        col.default = Some(json!(false));
        assert_eq!(Dialect::Sqlite.column_definition(&col, true), "`done` BOOLEAN DEFAULT 0");

        // No literal defaults on JSON columns
        let mut col = column("meta", LogicalType::Json);
        col.default = Some(json!({"a": 1}));
        assert_eq!(Dialect::MySql.column_definition(&col, true), "`meta` JSON");
    }

    #[test]
    fn test_identity_columns() {
        assert!(Dialect::MySql.identity_column(IdType::Number).contains("AUTO_INCREMENT"));
        assert!(Dialect::Sqlite.identity_column(IdType::Number).contains("AUTOINCREMENT"));
        assert!(Dialect::MySql.identity_column(IdType::Uuid).contains("VARCHAR(36)"));
    }

    #[test]
    fn test_create_index() {
        let index = IndexSpec {
            name: "posts_slug_key".into(),
            column: "slug".into(),
            unique: true,
        };
        assert_eq!(
            Dialect::MySql.create_index("posts", &index),
            "CREATE UNIQUE INDEX `posts_slug_key` ON `posts` (`slug`)"
        );
        assert!(Dialect::Sqlite.create_index("posts", &index).contains("IF NOT EXISTS"));
    }

    #[test]
    fn test_list_columns_is_parameterized() {
        let stmt = Dialect::MySql.list_columns("posts");
        assert!(!stmt.sql.contains("posts"));
        assert_eq!(stmt.params, vec![SqlValue::Text("posts".into())]);
    }
}
