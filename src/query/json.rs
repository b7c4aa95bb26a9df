//! Conditions on paths inside JSON columns
//!
//! `meta.tags[0]` on a JSON column `meta` becomes an extraction of
//! `$.tags[0]` compared against the value. The path is always bound as a
//! parameter, never spliced into SQL.

use relq::{Condition, FieldPath, Operator};
use serde_json::Value as Json;

use super::filter::like_pattern;
use crate::storage::{Dialect, SqlValue, Statement};

/// Translate one condition whose path points into a JSON column
pub fn translate_json_path(dialect: Dialect, column_sql: &str, condition: &Condition) -> Statement {
    let path = json_path(&condition.path);
    let extract = || Statement::new(dialect.json_extract(column_sql)).bind(SqlValue::Text(path.clone()));
    let extract_text =
        || Statement::new(dialect.json_extract_text(column_sql)).bind(SqlValue::Text(path.clone()));

    let mut stmt = Statement::default();
    match (condition.operator, &condition.value) {
        (Operator::Equals, Json::Null) | (Operator::Exists, Json::Bool(false)) => {
            stmt.append(extract());
            stmt.push_sql(" IS NULL");
        }
        (Operator::NotEquals, Json::Null) | (Operator::Exists, _) => {
            stmt.append(extract());
            stmt.push_sql(" IS NOT NULL");
        }
        (Operator::Equals, value) => {
            stmt.append(extract());
            stmt.push_sql(" = ");
            stmt.append(operand(dialect, value));
        }
        (Operator::NotEquals, value) => {
            stmt.push_sql("(");
            stmt.append(extract());
            stmt.push_sql(" <> ");
            stmt.append(operand(dialect, value));
            stmt.push_sql(" OR ");
            stmt.append(extract());
            stmt.push_sql(" IS NULL)");
        }
        (
            op @ (Operator::GreaterThan | Operator::GreaterThanEqual | Operator::LessThan | Operator::LessThanEqual),
            value,
        ) => {
            stmt.append(extract());
            stmt.push_sql(match op {
                Operator::GreaterThan => " > ",
                Operator::GreaterThanEqual => " >= ",
                Operator::LessThan => " < ",
                _ => " <= ",
            });
            stmt.append(operand(dialect, value));
        }
        (Operator::Like | Operator::Contains, value) => {
            stmt.append(extract_text());
            stmt.push_sql(" LIKE ? ESCAPE '!'");
            stmt.push_param(SqlValue::Text(like_pattern(&scalar_text(value))));
        }
        (op @ (Operator::In | Operator::NotIn), value) => {
            let items = value.as_array().cloned().unwrap_or_default();
            let negated = op == Operator::NotIn;
            if items.is_empty() {
                stmt.push_sql(if negated { "1 = 1" } else { "1 = 0" });
                return stmt;
            }
            if negated {
                stmt.push_sql("(");
            }
            stmt.append(extract());
            stmt.push_sql(if negated { " NOT IN (" } else { " IN (" });
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    stmt.push_sql(", ");
                }
                stmt.append(operand(dialect, item));
            }
            stmt.push_sql(")");
            if negated {
                stmt.push_sql(" OR ");
                stmt.append(extract());
                stmt.push_sql(" IS NULL)");
            }
        }
    }
    stmt
}

/// `$.a.b[0]` below the column
pub fn json_path(path: &FieldPath) -> String {
    path.json_path()
}

/// A comparison operand that matches what extraction yields. MySQL
/// compares JSON with JSON; SQLite extracts plain SQL scalars.
fn operand(dialect: Dialect, value: &Json) -> Statement {
    match dialect {
        Dialect::MySql => Statement::new("CAST(? AS JSON)").bind(SqlValue::Text(value.to_string())),
        Dialect::Sqlite => Statement::new("?").bind(match value {
            Json::Null => SqlValue::Null,
            Json::Bool(b) => SqlValue::Int(i64::from(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }),
    }
}

fn scalar_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}
