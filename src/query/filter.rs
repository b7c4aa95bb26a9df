//! Filter and sort translation
//!
//! Parsed `relq` filters become parameterized SQL fragments against one
//! collection's primary table. Every field reference is checked against the
//! registry first, so only known, quoted identifiers reach the SQL text.

use relq::{Condition, Operator, Sort, SortDirection, Where};
use serde_json::Value as Json;

use super::json::{json_path, translate_json_path};
use crate::error::{Error, Result};
use crate::schema::{LogicalType, RelationSpec, TableRegistry, TableSpec};
use crate::storage::{Dialect, SqlValue, Statement, Value};

/// The collection a filter or sort is translated against
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub collection: &'a str,
    pub table: &'a TableSpec,
    pub registry: &'a TableRegistry,
    pub dialect: Dialect,
}

/// What a field name refers to
enum Target<'a> {
    Column { sql: String, logical: LogicalType },
    Junction(&'a RelationSpec),
}

impl<'a> Scope<'a> {
    pub fn new(collection: &'a str, registry: &'a TableRegistry, dialect: Dialect) -> Result<Self> {
        Ok(Self {
            collection,
            table: registry.require(collection)?,
            registry,
            dialect,
        })
    }

    /// Qualified, quoted column reference
    pub fn column_sql(&self, column: &str) -> String {
        format!("{}.{}", self.dialect.quote(&self.table.name), self.dialect.quote(column))
    }

    fn target(&self, field: &str) -> Result<Target<'a>> {
        let logical = match field {
            "id" => Some(LogicalType::id_reference(self.registry.id_type())),
            "createdAt" | "updatedAt" => Some(LogicalType::Timestamp),
            _ => self.table.column(field).map(|c| c.logical.clone()),
        };
        if let Some(logical) = logical {
            return Ok(Target::Column {
                sql: self.column_sql(field),
                logical,
            });
        }
        match self.registry.relations().get(self.collection, field) {
            Some(relation) if relation.is_many() => Ok(Target::Junction(relation)),
            _ => Err(Error::unknown_field(self.collection, field)),
        }
    }

    fn unsupported(&self, condition: &Condition) -> Error {
        Error::UnsupportedOperator {
            collection: self.collection.to_string(),
            field: condition.path.to_string(),
            operator: condition.operator.name().to_string(),
        }
    }

    fn coerce(&self, field: &str, value: &Json, logical: &LogicalType) -> Result<SqlValue> {
        // Comparing an integer column with a fraction is still meaningful
        if let (LogicalType::Integer { .. }, Some(f)) = (logical, value.as_f64()) {
            if value.is_f64() && f.fract() != 0.0 {
                return Ok(SqlValue::Float(f));
            }
        }
        SqlValue::coerce(&Value::from(value.clone()), logical)
            .map_err(|message| Error::invalid_value(self.collection, field, message))
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Translate a filter to a boolean SQL expression; empty for "match all"
pub fn translate_filter(scope: &Scope<'_>, filter: &Where) -> Result<Statement> {
    let mut stmt = Statement::default();
    for (i, condition) in filter.conditions.iter().enumerate() {
        if i > 0 {
            stmt.push_sql(" AND ");
        }
        stmt.append(translate_condition(scope, condition)?);
    }
    Ok(stmt)
}

fn translate_condition(scope: &Scope<'_>, condition: &Condition) -> Result<Statement> {
    let field = condition.path.field();
    let target = scope.target(field)?;
    let ordering = matches!(
        condition.operator,
        Operator::GreaterThan | Operator::GreaterThanEqual | Operator::LessThan | Operator::LessThanEqual
    );
    if ordering && condition.value.is_null() {
        return Err(Error::invalid_value(
            scope.collection,
            &condition.path.to_string(),
            format!("'{}' needs a non-null value", condition.operator.name()),
        ));
    }
    match target {
        Target::Column { sql, logical } if logical.is_json() => {
            Ok(translate_json_path(scope.dialect, &sql, condition))
        }
        Target::Column { .. } | Target::Junction(_) if condition.path.is_nested() => {
            Err(Error::unknown_field(scope.collection, &condition.path.to_string()))
        }
        Target::Column { sql, logical } => scalar_condition(scope, &sql, &logical, condition),
        Target::Junction(relation) => junction_condition(scope, relation, condition),
    }
}

fn scalar_condition(
    scope: &Scope<'_>,
    column: &str,
    logical: &LogicalType,
    condition: &Condition,
) -> Result<Statement> {
    let field = condition.path.field();
    let is_text = matches!(
        logical,
        LogicalType::ShortText { .. } | LogicalType::LongText | LogicalType::Enumerated { .. }
    );

    let stmt = match (condition.operator, &condition.value) {
        (Operator::Equals, Json::Null) | (Operator::Exists, Json::Bool(false)) => {
            Statement::new(format!("{} IS NULL", column))
        }
        (Operator::NotEquals, Json::Null) | (Operator::Exists, _) => {
            Statement::new(format!("{} IS NOT NULL", column))
        }
        (Operator::Equals, value) => {
            Statement::new(format!("{} = ?", column)).bind(scope.coerce(field, value, logical)?)
        }
        (Operator::NotEquals, value) => Statement::new(format!("({} <> ? OR {} IS NULL)", column, column))
            .bind(scope.coerce(field, value, logical)?),
        (Operator::GreaterThan, value) => {
            Statement::new(format!("{} > ?", column)).bind(scope.coerce(field, value, logical)?)
        }
        (Operator::GreaterThanEqual, value) => {
            Statement::new(format!("{} >= ?", column)).bind(scope.coerce(field, value, logical)?)
        }
        (Operator::LessThan, value) => {
            Statement::new(format!("{} < ?", column)).bind(scope.coerce(field, value, logical)?)
        }
        (Operator::LessThanEqual, value) => {
            Statement::new(format!("{} <= ?", column)).bind(scope.coerce(field, value, logical)?)
        }
        (Operator::Like | Operator::Contains, value) if is_text => {
            let text = match value {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            };
            Statement::new(format!("{} LIKE ? ESCAPE '!'", column)).bind(SqlValue::Text(like_pattern(&text)))
        }
        (Operator::Like | Operator::Contains, _) => return Err(scope.unsupported(condition)),
        (op @ (Operator::In | Operator::NotIn), value) => {
            let mut params = Vec::new();
            for item in value.as_array().map(Vec::as_slice).unwrap_or(&[]) {
                params.push(scope.coerce(field, item, logical)?);
            }
            list_condition(column, op == Operator::NotIn, params, true)
        }
    };
    Ok(stmt)
}

/// `col IN (...)`. Negated lists also match NULL when `nullable` is set.
fn list_condition(column: &str, negated: bool, params: Vec<SqlValue>, nullable: bool) -> Statement {
    if params.is_empty() {
        return Statement::new(if negated { "1 = 1" } else { "1 = 0" });
    }
    let placeholders = Statement::placeholders(params.len());
    let sql = match (negated, nullable) {
        (false, _) => format!("{} IN ({})", column, placeholders),
        (true, false) => format!("{} NOT IN ({})", column, placeholders),
        (true, true) => format!("({} NOT IN ({}) OR {} IS NULL)", column, placeholders, column),
    };
    Statement { sql, params }
}

/// Many-valued relationships filter through a sub-select on the junction
fn junction_condition(scope: &Scope<'_>, relation: &RelationSpec, condition: &Condition) -> Result<Statement> {
    let Some(junction) = relation.junction.as_deref() else {
        return Err(scope.unsupported(condition));
    };
    let q = |ident: &str| scope.dialect.quote(ident);
    let id = scope.column_sql("id");
    let children = format!("SELECT {} FROM {}", q("parentId"), q(junction));
    let child_type = LogicalType::id_reference(scope.registry.id_type());
    let field = condition.path.field();

    let matching = |negated: bool, params: Vec<SqlValue>| -> Statement {
        if params.is_empty() {
            return Statement::new(if negated { "1 = 1" } else { "1 = 0" });
        }
        let inner = list_condition(&q("childId"), false, params, false);
        let keyword = if negated { "NOT IN" } else { "IN" };
        Statement {
            sql: format!("{} {} ({} WHERE {})", id, keyword, children, inner.sql),
            params: inner.params,
        }
    };

    let stmt = match (condition.operator, &condition.value) {
        (Operator::Exists, Json::Bool(exists)) => {
            let keyword = if *exists { "IN" } else { "NOT IN" };
            Statement::new(format!("{} {} ({})", id, keyword, children))
        }
        (Operator::Equals, value) => matching(false, vec![scope.coerce(field, value, &child_type)?]),
        (Operator::NotEquals, value) => matching(true, vec![scope.coerce(field, value, &child_type)?]),
        (op @ (Operator::In | Operator::NotIn), value) => {
            let mut params = Vec::new();
            for item in value.as_array().map(Vec::as_slice).unwrap_or(&[]) {
                params.push(scope.coerce(field, item, &child_type)?);
            }
            matching(op == Operator::NotIn, params)
        }
        _ => return Err(scope.unsupported(condition)),
    };
    Ok(stmt)
}

/// `%value%` with LIKE wildcards in the value escaped by `!`
pub fn like_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '!' | '%' | '_') {
            pattern.push('!');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// ============================================================================
// Sorting
// ============================================================================

/// ` ORDER BY ...`, defaulting to newest first. `id` always breaks ties.
pub fn translate_sort(scope: &Scope<'_>, sort: &Sort) -> Result<Statement> {
    let default_sort;
    let sort = if sort.is_empty() {
        default_sort = relq::parse_sort("-createdAt").map_err(|e| Error::from_parse(scope.collection, e))?;
        &default_sort
    } else {
        sort
    };

    let mut stmt = Statement::new(" ORDER BY ");
    let mut has_id = false;
    for (i, key) in sort.keys.iter().enumerate() {
        if i > 0 {
            stmt.push_sql(", ");
        }
        let field = key.path.field();
        has_id |= field == "id" && !key.path.is_nested();
        match scope.target(field)? {
            Target::Column { sql, logical } if logical.is_json() && key.path.is_nested() => {
                stmt.push_sql(&scope.dialect.json_extract(&sql));
                stmt.push_param(SqlValue::Text(json_path(&key.path)));
            }
            Target::Column { sql, .. } if !key.path.is_nested() => stmt.push_sql(&sql),
            _ => return Err(Error::unknown_field(scope.collection, &key.path.to_string())),
        }
        stmt.push_sql(" ");
        stmt.push_sql(key.direction.keyword());
    }

    if !has_id {
        let direction = sort.keys.first().map(|k| k.direction).unwrap_or(SortDirection::Desc);
        stmt.push_sql(&format!(", {} {}", scope.column_sql("id"), direction.keyword()));
    }
    Ok(stmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{build_registry, CollectionConfig, Field, MapperOptions, Naming};
    use serde_json::json;

    fn registry() -> TableRegistry {
        build_registry(
            &[
                CollectionConfig::new("tags").field(Field::text("label")),
                CollectionConfig::new("posts")
                    .field(Field::text("title"))
                    .field(Field::number("views"))
                    .field(Field::checkbox("featured"))
                    .field(Field::json("meta"))
                    .field(Field::relationship("author", "tags"))
                    .field(Field::relationship_many("tags", "tags")),
            ],
            &Naming::default(),
            &MapperOptions::default(),
        )
        .registry
    }

    fn filter(registry: &TableRegistry, dialect: Dialect, value: Json) -> Result<Statement> {
        let scope = Scope::new("posts", registry, dialect)?;
        let parsed = relq::parse_where(&value).map_err(|e| Error::from_parse("posts", e))?;
        translate_filter(&scope, &parsed)
    }

    #[test]
    fn test_equals_and_conjunction() {
        let registry = registry();
        let stmt = filter(
            &registry,
            Dialect::MySql,
            json!({ "title": { "equals": "Example" }, "views": { "greater_than": 10 } }),
        )
        .unwrap();
        assert_eq!(stmt.sql, "`posts`.`title` = ? AND `posts`.`views` > ?");
        assert_eq!(stmt.params, vec![SqlValue::Text("Example".into()), SqlValue::Int(10)]);
    }

    #[test]
    fn test_value_never_in_sql() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::MySql, json!({ "title": "x' OR 1=1 --" })).unwrap();
        assert!(!stmt.sql.contains("OR 1=1"));
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_like_wraps_and_escapes() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::Sqlite, json!({ "title": { "like": "100%_done" } })).unwrap();
        assert_eq!(stmt.sql, "`posts`.`title` LIKE ? ESCAPE '!'");
        assert_eq!(stmt.params, vec![SqlValue::Text("%100!%!_done%".into())]);
    }

    #[test]
    fn test_not_equals_and_not_in_include_nulls() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::MySql, json!({ "title": { "not_equals": "a" } })).unwrap();
        assert_eq!(stmt.sql, "(`posts`.`title` <> ? OR `posts`.`title` IS NULL)");

        let stmt = filter(&registry, Dialect::MySql, json!({ "views": { "not_in": [1, 2] } })).unwrap();
        assert_eq!(stmt.sql, "(`posts`.`views` NOT IN (?, ?) OR `posts`.`views` IS NULL)");
    }

    #[test]
    fn test_in_accepts_comma_string_and_empty() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::MySql, json!({ "title": { "in": "a, b" } })).unwrap();
        assert_eq!(stmt.sql, "`posts`.`title` IN (?, ?)");

        let stmt = filter(&registry, Dialect::MySql, json!({ "title": { "in": [] } })).unwrap();
        assert_eq!(stmt.sql, "1 = 0");
    }

    #[test]
    fn test_exists_and_null_equality() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::MySql, json!({ "author": { "exists": false } })).unwrap();
        assert_eq!(stmt.sql, "`posts`.`author` IS NULL");
        let stmt = filter(&registry, Dialect::MySql, json!({ "title": null })).unwrap();
        assert_eq!(stmt.sql, "`posts`.`title` IS NULL");
    }

    #[test]
    fn test_many_relationship_subselect() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::MySql, json!({ "tags": { "in": [1, 2] } })).unwrap();
        assert_eq!(
            stmt.sql,
            "`posts`.`id` IN (SELECT `parentId` FROM `posts_tags_rels` WHERE `childId` IN (?, ?))"
        );
        let stmt = filter(&registry, Dialect::MySql, json!({ "tags": { "exists": false } })).unwrap();
        assert_eq!(stmt.sql, "`posts`.`id` NOT IN (SELECT `parentId` FROM `posts_tags_rels`)");

        let err = filter(&registry, Dialect::MySql, json!({ "tags": { "like": "x" } })).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_json_path_condition() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::Sqlite, json!({ "meta.source": { "equals": "rss" } })).unwrap();
        assert_eq!(stmt.sql, "json_extract(`posts`.`meta`, ?) = ?");
    }

    #[test]
    fn test_unknown_field_and_operator() {
        let registry = registry();
        let err = filter(&registry, Dialect::MySql, json!({ "nope": { "equals": 1 } })).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));

        let err = filter(&registry, Dialect::MySql, json!({ "title": { "near": 1 } })).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator { .. }));

        let err = filter(&registry, Dialect::MySql, json!({ "views": { "contains": "1" } })).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator { .. }));

        let err = filter(&registry, Dialect::MySql, json!({ "title.deep": { "equals": 1 } })).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }

    #[test]
    fn test_invalid_value() {
        let registry = registry();
        let err = filter(&registry, Dialect::MySql, json!({ "views": { "equals": "many" } })).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref field, .. } if field == "views"));
    }

    #[test]
    fn test_fractional_operand_on_integer_column() {
        let registry = registry();
        let stmt = filter(&registry, Dialect::MySql, json!({ "views": { "greater_than": 2.5 } })).unwrap();
        assert_eq!(stmt.params, vec![SqlValue::Float(2.5)]);
    }

    #[test]
    fn test_ordering_against_null_rejected() {
        let registry = registry();
        let err = filter(&registry, Dialect::MySql, json!({ "views": { "greater_than": null } })).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref field, .. } if field == "views"));

        let err = filter(&registry, Dialect::Sqlite, json!({ "meta.rank": { "less_than_equal": null } })).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref field, .. } if field == "meta.rank"));

        // Null stays meaningful for equality
        let stmt = filter(&registry, Dialect::MySql, json!({ "views": { "not_equals": null } })).unwrap();
        assert_eq!(stmt.sql, "`posts`.`views` IS NOT NULL");
    }

    #[test]
    fn test_sort() {
        let registry = registry();
        let scope = Scope::new("posts", &registry, Dialect::MySql).unwrap();

        let stmt = translate_sort(&scope, &Sort::default()).unwrap();
        assert_eq!(stmt.sql, " ORDER BY `posts`.`createdAt` DESC, `posts`.`id` DESC");

        let stmt = translate_sort(&scope, &relq::parse_sort("title,-views").unwrap()).unwrap();
        assert_eq!(
            stmt.sql,
            " ORDER BY `posts`.`title` ASC, `posts`.`views` DESC, `posts`.`id` ASC"
        );

        let stmt = translate_sort(&scope, &relq::parse_sort("-meta.rank").unwrap()).unwrap();
        assert_eq!(stmt.sql, " ORDER BY JSON_EXTRACT(`posts`.`meta`, ?) DESC, `posts`.`id` DESC");
        assert_eq!(stmt.params, vec![SqlValue::Text("$.rank".into())]);

        assert!(translate_sort(&scope, &relq::parse_sort("tags").unwrap()).is_err());
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("plain"), "%plain%");
        assert_eq!(like_pattern("a!b"), "%a!!b%");
    }
}
