//! Integration tests for relcms
//!
//! Runs the full adapter (schema push, CRUD, relationships, transactions)
//! against a SQLite database file in a temporary directory.

use relcms::{
    Adapter, AdapterConfig, CollectionConfig, CreateArgs, DeleteArgs, Document, DocumentId, Error, Field, Fields,
    FindArgs, FindByIdArgs, FindOneArgs, IdType, UpdateArgs, Value, WhereArgs,
};
use serde_json::json;
use tempfile::TempDir;

fn database_url(tmp: &TempDir) -> String {
    format!("sqlite://{}", tmp.path().join("cms.db").display())
}

fn config_for(tmp: &TempDir) -> AdapterConfig {
    AdapterConfig::from_url(database_url(tmp))
}

fn collections() -> Vec<CollectionConfig> {
    vec![
        CollectionConfig::new("authors").field(Field::text("name").required()),
        CollectionConfig::new("tags").field(Field::text("label").required()),
        CollectionConfig::new("posts")
            .field(Field::text("title").required())
            .field(Field::number("views").default_value(0))
            .field(Field::checkbox("published").default_value(false))
            .field(Field::json("meta"))
            .field(Field::relationship("author", "authors"))
            .field(Field::relationship_many("tags", "tags")),
        CollectionConfig::new("comments")
            .field(Field::textarea("body"))
            .field(Field::relationship("post", "posts")),
    ]
}

/// Helper to create an initialized adapter on a fresh database
async fn setup_test_db() -> (TempDir, Adapter) {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let adapter = open_with(config_for(&tmp), &collections()).await;
    (tmp, adapter)
}

async fn open_with(config: AdapterConfig, collections: &[CollectionConfig]) -> Adapter {
    let adapter = Adapter::new(config).expect("Failed to create adapter");
    adapter.connect().await.expect("Failed to connect");
    adapter.init(collections).await.expect("Failed to init");
    adapter
}

fn data(value: serde_json::Value) -> Fields {
    match Value::from(value) {
        Value::Object(fields) => fields,
        other => panic!("expected an object, got {:?}", other),
    }
}

/// Helper to create a document and unwrap the result
async fn create(adapter: &Adapter, collection: &str, value: serde_json::Value) -> Document {
    adapter
        .create(CreateArgs::new(collection, data(value)))
        .await
        .unwrap_or_else(|e| panic!("create in {} failed: {}", collection, e))
}

fn id_json(doc: &Document) -> serde_json::Value {
    serde_json::to_value(&doc.id).unwrap()
}

fn ids_of(value: Option<&Value>) -> Vec<DocumentId> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| DocumentId::from_value(v, IdType::Number))
                .collect()
        })
        .unwrap_or_default()
}

async fn count_posts(adapter: &Adapter, filter: serde_json::Value) -> u64 {
    adapter.count(WhereArgs::new("posts", filter)).await.unwrap()
}

async fn junction_rows(tmp: &TempDir, table: &str) -> i64 {
    let pool = sqlx::SqlitePool::connect(&database_url(tmp)).await.unwrap();
    let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM `{}`", table))
        .fetch_one(&pool)
        .await
        .unwrap();
    pool.close().await;
    count
}

async fn execute_raw(tmp: &TempDir, sql: &str) {
    let pool = sqlx::SqlitePool::connect(&database_url(tmp)).await.unwrap();
    sqlx::query(sql).execute(&pool).await.unwrap();
    pool.close().await;
}

// =============================================================================
// Schema Tests
// =============================================================================

#[tokio::test]
async fn test_init_creates_tables_and_junctions() {
    let (_tmp, adapter) = setup_test_db().await;

    let tables = adapter.list_tables().await.unwrap();
    for table in ["authors", "tags", "posts", "posts_tags_rels", "comments"] {
        assert!(tables.contains(&table.to_string()), "missing table {}", table);
    }
    assert!(adapter.is_ready());
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let (tmp, adapter) = setup_test_db().await;
    adapter.destroy().await;

    let again = Adapter::new(config_for(&tmp)).unwrap();
    let report = again.init(&collections()).await.unwrap();
    assert!(report.reconcile.is_noop());
    assert!(report.reconcile.tables.iter().all(|t| t.drift.is_empty()));
}

#[tokio::test]
async fn test_extending_a_collection_adds_column_with_default() {
    let (tmp, adapter) = setup_test_db().await;
    let author = create(&adapter, "authors", json!({ "name": "Ada" })).await;
    adapter.destroy().await;

    let mut extended = collections();
    extended[0] = CollectionConfig::new("authors")
        .field(Field::text("name").required())
        .field(Field::text("role").default_value("writer"));

    let adapter = Adapter::new(config_for(&tmp)).unwrap();
    let report = adapter.init(&extended).await.unwrap();
    let authors = report
        .reconcile
        .tables
        .iter()
        .find(|t| t.collection == "authors")
        .unwrap();
    assert!(!authors.created);
    assert_eq!(authors.added_columns, vec!["role".to_string()]);

    let existing = adapter
        .find_by_id(FindByIdArgs::new("authors", author.id))
        .await
        .unwrap();
    assert_eq!(existing.get("role"), Some(&Value::from("writer")));
}

#[tokio::test]
async fn test_broken_collection_does_not_block_the_rest() {
    let tmp = TempDir::new().unwrap();
    let mut defs = collections();
    defs.push(CollectionConfig::new("broken").field(Field::relationship("owner", "ghosts")));
    defs.push(CollectionConfig::new("dependent").field(Field::relationship("broken", "broken")));

    let adapter = Adapter::new(config_for(&tmp)).unwrap();
    let err = adapter.init(&defs).await.unwrap_err();
    match err {
        Error::SchemaCompilation { failures } => {
            let failed: Vec<&str> = failures.iter().map(|f| f.collection.as_str()).collect();
            assert!(failed.contains(&"broken"));
            assert!(failed.contains(&"dependent"));
            assert!(!failed.contains(&"posts"));
        }
        other => panic!("expected SchemaCompilation, got {}", other),
    }

    // Healthy collections still work
    assert!(adapter.is_ready());
    create(&adapter, "authors", json!({ "name": "Grace" })).await;
    let err = adapter.count(WhereArgs::new("broken", json!({}))).await.unwrap_err();
    assert!(matches!(err, Error::CollectionNotFound { .. }));
}

// =============================================================================
// Create / Read Tests
// =============================================================================

#[tokio::test]
async fn test_create_applies_defaults_and_timestamps() {
    let (_tmp, adapter) = setup_test_db().await;

    let post = create(&adapter, "posts", json!({ "title": "Hello" })).await;
    assert!(matches!(post.id, DocumentId::Number(_)));
    assert_eq!(post.get("title"), Some(&Value::from("Hello")));
    assert_eq!(post.get("views"), Some(&Value::Int(0)));
    assert_eq!(post.get("published"), Some(&Value::Bool(false)));
    assert_eq!(post.get("author"), Some(&Value::Null));
    assert_eq!(post.get("tags"), Some(&Value::Array(vec![])));

    let created = post.get("createdAt").and_then(Value::as_str).unwrap();
    assert!(created.ends_with('Z'), "unexpected timestamp {}", created);
}

#[tokio::test]
async fn test_create_rejects_unknown_and_missing_fields() {
    let (_tmp, adapter) = setup_test_db().await;

    let err = adapter
        .create(CreateArgs::new("posts", data(json!({ "title": "x", "nope": 1 }))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownField { field, .. } if field == "nope"));

    let err = adapter
        .create(CreateArgs::new("posts", data(json!({ "views": 3 }))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingRequiredField { field, .. } if field == "title"));

    let err = adapter
        .create(CreateArgs::new("ghosts", data(json!({}))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CollectionNotFound { .. }));
}

#[tokio::test]
async fn test_create_rejects_fractional_integer() {
    let (_tmp, adapter) = setup_test_db().await;

    let err = adapter
        .create(CreateArgs::new("posts", data(json!({ "title": "x", "views": 2.5 }))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidValue { ref field, .. } if field == "views"));

    let post = create(&adapter, "posts", json!({ "title": "x", "views": 3.0 })).await;
    assert_eq!(post.get("views"), Some(&Value::Int(3)));
    // Fractions still work as filter bounds
    assert_eq!(count_posts(&adapter, json!({ "views": { "greater_than": 2.5 } })).await, 1);
}

#[tokio::test]
async fn test_missing_relationship_target_rolls_back() {
    let (tmp, adapter) = setup_test_db().await;
    let tag = create(&adapter, "tags", json!({ "label": "a" })).await;

    let err = adapter
        .create(CreateArgs::new(
            "posts",
            data(json!({ "title": "x", "tags": [id_json(&tag), 999] })),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RelationshipIntegrity { ref id, .. } if id == "999"));

    // Neither the row nor any junction rows survived
    assert_eq!(adapter.count(WhereArgs::new("posts", json!({}))).await.unwrap(), 0);
    assert_eq!(junction_rows(&tmp, "posts_tags_rels").await, 0);
}

#[tokio::test]
async fn test_find_by_id_missing_document() {
    let (_tmp, adapter) = setup_test_db().await;

    let err = adapter
        .find_by_id(FindByIdArgs::new("posts", 404i64))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound { ref id, .. } if id == "404"));
}

#[tokio::test]
async fn test_find_one_returns_none_when_nothing_matches() {
    let (_tmp, adapter) = setup_test_db().await;
    create(&adapter, "authors", json!({ "name": "Ada" })).await;

    let found = adapter
        .find_one(FindOneArgs::new("authors", json!({ "name": "Ada" })))
        .await
        .unwrap();
    assert!(found.is_some());

    let missing = adapter
        .find_one(FindOneArgs::new("authors", json!({ "name": "Nobody" })))
        .await
        .unwrap();
    assert!(missing.is_none());
}

// =============================================================================
// Relationship Tests
// =============================================================================

#[tokio::test]
async fn test_has_many_keeps_order() {
    let (_tmp, adapter) = setup_test_db().await;
    let a = create(&adapter, "tags", json!({ "label": "a" })).await;
    let b = create(&adapter, "tags", json!({ "label": "b" })).await;
    let c = create(&adapter, "tags", json!({ "label": "c" })).await;

    // Populated documents are accepted as well as raw ids
    let post = create(
        &adapter,
        "posts",
        json!({ "title": "Ordered", "tags": [id_json(&c), { "id": id_json(&a) }, id_json(&b)] }),
    )
    .await;
    assert_eq!(ids_of(post.get("tags")), vec![c.id.clone(), a.id.clone(), b.id.clone()]);

    let resolved = adapter
        .find_by_id(FindByIdArgs::new("posts", post.id.clone()).depth(1))
        .await
        .unwrap();
    let labels: Vec<&str> = resolved
        .get("tags")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(|t| t.as_object().and_then(|o| o.get("label")).and_then(Value::as_str))
        .collect();
    assert_eq!(labels, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn test_update_replaces_junction_rows() {
    let (tmp, adapter) = setup_test_db().await;
    let a = create(&adapter, "tags", json!({ "label": "a" })).await;
    let b = create(&adapter, "tags", json!({ "label": "b" })).await;
    let post = create(
        &adapter,
        "posts",
        json!({ "title": "x", "tags": [id_json(&a), id_json(&b)] }),
    )
    .await;
    assert_eq!(junction_rows(&tmp, "posts_tags_rels").await, 2);

    let updated = adapter
        .update(UpdateArgs::new("posts", post.id.clone(), data(json!({ "tags": [id_json(&b)] }))))
        .await
        .unwrap();
    assert_eq!(ids_of(updated.get("tags")), vec![b.id.clone()]);
    assert_eq!(junction_rows(&tmp, "posts_tags_rels").await, 1);

    // Fields left out of the update keep their relationships
    let renamed = adapter
        .update(UpdateArgs::new("posts", post.id, data(json!({ "title": "y" }))))
        .await
        .unwrap();
    assert_eq!(ids_of(renamed.get("tags")), vec![b.id]);
    assert_eq!(renamed.get("title"), Some(&Value::from("y")));
}

#[tokio::test]
async fn test_depth_bounds_resolution() {
    let (_tmp, adapter) = setup_test_db().await;
    let author = create(&adapter, "authors", json!({ "name": "Ada" })).await;
    let post = create(&adapter, "posts", json!({ "title": "x", "author": id_json(&author) })).await;
    let comment = create(&adapter, "comments", json!({ "body": "hi", "post": id_json(&post) })).await;

    let shallow = adapter
        .find_by_id(FindByIdArgs::new("comments", comment.id.clone()))
        .await
        .unwrap();
    assert_eq!(shallow.get("post"), Some(&Value::from(id_json(&post))));

    let one = adapter
        .find_by_id(FindByIdArgs::new("comments", comment.id.clone()).depth(1))
        .await
        .unwrap();
    let one_post = one.get("post").and_then(Value::as_object).unwrap();
    assert_eq!(one_post.get("author"), Some(&Value::from(id_json(&author))));

    let two = adapter
        .find_by_id(FindByIdArgs::new("comments", comment.id).depth(2))
        .await
        .unwrap();
    let two_author = two
        .get("post")
        .and_then(Value::as_object)
        .and_then(|p| p.get("author"))
        .and_then(Value::as_object)
        .unwrap();
    assert_eq!(two_author.get("name"), Some(&Value::from("Ada")));
}

#[tokio::test]
async fn test_dangling_single_relationship_resolves_to_null() {
    let (_tmp, adapter) = setup_test_db().await;
    let author = create(&adapter, "authors", json!({ "name": "Ada" })).await;
    let post = create(&adapter, "posts", json!({ "title": "x", "author": id_json(&author) })).await;

    adapter.delete(DeleteArgs::new("authors", author.id)).await.unwrap();

    let resolved = adapter
        .find_by_id(FindByIdArgs::new("posts", post.id).depth(1))
        .await
        .unwrap();
    assert_eq!(resolved.get("author"), Some(&Value::Null));
}

// =============================================================================
// Query Tests
// =============================================================================

#[tokio::test]
async fn test_pagination() {
    let (_tmp, adapter) = setup_test_db().await;
    for i in 0..25 {
        create(&adapter, "authors", json!({ "name": format!("author-{:02}", i) })).await;
    }

    let page = adapter
        .find(FindArgs::new("authors").sort("name").limit(10).page(3))
        .await
        .unwrap();
    assert_eq!(page.docs.len(), 5);
    assert_eq!(page.total_docs, 25);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.paging_counter, 21);
    assert!(page.has_prev_page);
    assert!(!page.has_next_page);
    assert_eq!(page.prev_page, Some(2));
    assert_eq!(page.docs[0].get("name"), Some(&Value::from("author-20")));

    let all = adapter
        .find(FindArgs::new("authors").without_pagination())
        .await
        .unwrap();
    assert_eq!(all.docs.len(), 25);
    assert_eq!(all.total_pages, 1);
}

#[tokio::test]
async fn test_default_sort_is_newest_first() {
    let (_tmp, adapter) = setup_test_db().await;
    create(&adapter, "authors", json!({ "name": "first" })).await;
    create(&adapter, "authors", json!({ "name": "second" })).await;
    let last = create(&adapter, "authors", json!({ "name": "third" })).await;

    let page = adapter.find(FindArgs::new("authors")).await.unwrap();
    assert_eq!(page.docs[0].id, last.id);
}

#[tokio::test]
async fn test_filters_round_trip() {
    let (_tmp, adapter) = setup_test_db().await;
    let rust = create(&adapter, "tags", json!({ "label": "rust" })).await;
    create(
        &adapter,
        "posts",
        json!({ "title": "Learning Rust", "views": 120, "published": true,
                "meta": { "category": "lang", "rank": 1 }, "tags": [id_json(&rust)] }),
    )
    .await;
    create(
        &adapter,
        "posts",
        json!({ "title": "100% coverage", "views": 5, "meta": { "category": "testing" } }),
    )
    .await;
    create(&adapter, "posts", json!({ "title": "Drafts", "views": 50 })).await;

    assert_eq!(count_posts(&adapter, json!({ "views": { "greater_than": 10 } })).await, 2);
    assert_eq!(count_posts(&adapter, json!({ "title": { "like": "rust" } })).await, 1);
    assert_eq!(count_posts(&adapter, json!({ "title": { "contains": "100%" } })).await, 1);
    assert_eq!(count_posts(&adapter, json!({ "views": { "in": [5, 50] } })).await, 2);
    assert_eq!(count_posts(&adapter, json!({ "views": { "in": [] } })).await, 0);
    assert_eq!(count_posts(&adapter, json!({ "published": true })).await, 1);
    assert_eq!(count_posts(&adapter, json!({ "meta": { "exists": false } })).await, 1);
    assert_eq!(count_posts(&adapter, json!({ "meta.category": "testing" })).await, 1);
    // NULL meta still counts as "not equal"
    assert_eq!(count_posts(&adapter, json!({ "meta.category": { "not_equals": "lang" } })).await, 2);
    assert_eq!(count_posts(&adapter, json!({ "tags": { "in": [id_json(&rust)] } })).await, 1);
    assert_eq!(count_posts(&adapter, json!({ "tags": { "exists": false } })).await, 2);
    assert_eq!(
        count_posts(&adapter, json!({ "and": [{ "views": { "less_than_equal": 50 } }, { "title": { "like": "draft" } }] })).await,
        1
    );
}

#[tokio::test]
async fn test_timestamp_filters_match_stored_values() {
    let (tmp, adapter) = setup_test_db().await;
    let post = create(&adapter, "posts", json!({ "title": "x" })).await;
    let created = post.get("createdAt").and_then(Value::as_str).unwrap().to_string();

    assert_eq!(count_posts(&adapter, json!({ "createdAt": { "equals": created.clone() } })).await, 1);
    assert_eq!(count_posts(&adapter, json!({ "createdAt": { "less_than_equal": created.clone() } })).await, 1);
    assert_eq!(count_posts(&adapter, json!({ "createdAt": { "greater_than": created } })).await, 0);

    // A whole second, written the way the column default writes it
    execute_raw(&tmp, "UPDATE `posts` SET `createdAt` = '2024-01-15 10:30:00.000'").await;
    assert_eq!(count_posts(&adapter, json!({ "createdAt": "2024-01-15T10:30:00Z" })).await, 1);
    assert_eq!(
        count_posts(&adapter, json!({ "createdAt": { "greater_than_equal": "2024-01-15T10:30:00Z" } })).await,
        1
    );
    assert_eq!(
        count_posts(&adapter, json!({ "createdAt": { "greater_than": "2024-01-15T10:30:00Z" } })).await,
        0
    );
}

#[tokio::test]
async fn test_unbounded_reads_and_deletes_span_batches() {
    let (tmp, adapter) = setup_test_db().await;

    let tx = adapter.begin_transaction().await.unwrap();
    let mut tags = Vec::new();
    for i in 0..600 {
        let tag = adapter
            .create(CreateArgs::new("tags", data(json!({ "label": format!("t{}", i) }))).transaction(&tx))
            .await
            .unwrap();
        tags.push(tag);
    }
    let tag_ids: Vec<serde_json::Value> = tags.iter().map(id_json).collect();
    let big = adapter
        .create(CreateArgs::new("posts", data(json!({ "title": "big", "tags": tag_ids }))).transaction(&tx))
        .await
        .unwrap();
    for _ in 0..700 {
        adapter
            .create(
                CreateArgs::new("posts", data(json!({ "title": "small", "tags": [id_json(&tags[0])] })))
                    .transaction(&tx),
            )
            .await
            .unwrap();
    }
    adapter.commit_transaction(&tx).await.unwrap();

    let expected: Vec<DocumentId> = tags.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids_of(big.get("tags")), expected);

    let all = adapter.find(FindArgs::new("posts").limit(0)).await.unwrap();
    assert_eq!(all.docs.len(), 701);
    assert_eq!(all.total_docs, 701);
    for doc in &all.docs {
        let tags_of = ids_of(doc.get("tags"));
        if doc.id == big.id {
            assert_eq!(tags_of, expected);
        } else {
            assert_eq!(tags_of, vec![tags[0].id.clone()]);
        }
    }

    let resolved = adapter
        .find_by_id(FindByIdArgs::new("posts", big.id.clone()).depth(1))
        .await
        .unwrap();
    let labels: Vec<&str> = resolved
        .get("tags")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(|t| t.as_object().and_then(|o| o.get("label")).and_then(Value::as_str))
        .collect();
    assert_eq!(labels.len(), 600);
    assert_eq!(labels[599], "t599");

    assert_eq!(adapter.delete_many(WhereArgs::new("posts", json!({}))).await.unwrap(), 701);
    assert_eq!(junction_rows(&tmp, "posts_tags_rels").await, 0);
    assert_eq!(adapter.delete_many(WhereArgs::new("tags", json!({}))).await.unwrap(), 600);
}

#[tokio::test]
async fn test_unsupported_filters_are_rejected() {
    let (_tmp, adapter) = setup_test_db().await;

    let err = adapter
        .count(WhereArgs::new("posts", json!({ "views": { "like": "1" } })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperator { ref operator, .. } if operator == "like"));

    let err = adapter
        .count(WhereArgs::new("posts", json!({ "or": [{ "views": 1 }, { "views": 2 }] })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperator { ref operator, .. } if operator == "or"));

    let err = adapter
        .count(WhereArgs::new("posts", json!({ "views": { "near": 1 } })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperator { .. }));

    let err = adapter
        .count(WhereArgs::new("posts", json!({ "missing": 1 })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownField { .. }));
}

// =============================================================================
// Delete Tests
// =============================================================================

#[tokio::test]
async fn test_delete_returns_document_and_clears_references() {
    let (tmp, adapter) = setup_test_db().await;
    let a = create(&adapter, "tags", json!({ "label": "a" })).await;
    let b = create(&adapter, "tags", json!({ "label": "b" })).await;
    let post = create(
        &adapter,
        "posts",
        json!({ "title": "x", "tags": [id_json(&a), id_json(&b)] }),
    )
    .await;

    // Deleting a child removes it from every parent's list
    let deleted = adapter.delete(DeleteArgs::new("tags", a.id.clone())).await.unwrap();
    assert_eq!(deleted.get("label"), Some(&Value::from("a")));
    let reloaded = adapter
        .find_by_id(FindByIdArgs::new("posts", post.id.clone()))
        .await
        .unwrap();
    assert_eq!(ids_of(reloaded.get("tags")), vec![b.id.clone()]);

    // Deleting the parent removes its junction rows first
    adapter.delete(DeleteArgs::new("posts", post.id.clone())).await.unwrap();
    assert_eq!(junction_rows(&tmp, "posts_tags_rels").await, 0);

    let err = adapter.delete(DeleteArgs::new("posts", post.id)).await.unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound { .. }));
}

#[tokio::test]
async fn test_count_and_delete_many() {
    let (_tmp, adapter) = setup_test_db().await;
    for views in [1, 20, 30, 40] {
        create(&adapter, "posts", json!({ "title": "p", "views": views })).await;
    }

    let filter = json!({ "views": { "greater_than_equal": 20 } });
    assert_eq!(adapter.count(WhereArgs::new("posts", filter.clone())).await.unwrap(), 3);
    assert_eq!(adapter.delete_many(WhereArgs::new("posts", filter.clone())).await.unwrap(), 3);
    assert_eq!(adapter.count(WhereArgs::new("posts", json!({}))).await.unwrap(), 1);
    assert_eq!(adapter.delete_many(WhereArgs::new("posts", filter)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_update_missing_document() {
    let (_tmp, adapter) = setup_test_db().await;

    let err = adapter
        .update(UpdateArgs::new("posts", 77i64, data(json!({ "title": "x" }))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound { .. }));
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[tokio::test]
async fn test_transaction_rollback_discards_writes() {
    let (_tmp, adapter) = setup_test_db().await;

    let tx = adapter.begin_transaction().await.unwrap();
    let author = adapter
        .create(CreateArgs::new("authors", data(json!({ "name": "Temp" }))).transaction(&tx))
        .await
        .unwrap();

    // Visible inside the transaction
    adapter
        .find_by_id(FindByIdArgs::new("authors", author.id.clone()).transaction(&tx))
        .await
        .unwrap();

    adapter.rollback_transaction(&tx).await.unwrap();
    assert_eq!(adapter.count(WhereArgs::new("authors", json!({}))).await.unwrap(), 0);

    let err = adapter.commit_transaction(&tx).await.unwrap_err();
    assert!(matches!(err, Error::UnknownTransaction { .. }));
}

#[tokio::test]
async fn test_transaction_commit_keeps_writes() {
    let (_tmp, adapter) = setup_test_db().await;

    let tx = adapter.begin_transaction().await.unwrap();
    let tag = adapter
        .create(CreateArgs::new("tags", data(json!({ "label": "t" }))).transaction(&tx))
        .await
        .unwrap();
    adapter
        .create(
            CreateArgs::new("posts", data(json!({ "title": "x", "tags": [id_json(&tag)] }))).transaction(&tx),
        )
        .await
        .unwrap();
    adapter.commit_transaction(&tx).await.unwrap();

    assert_eq!(adapter.count(WhereArgs::new("posts", json!({}))).await.unwrap(), 1);
}

#[tokio::test]
async fn test_destroy_rolls_back_open_transactions() {
    let (tmp, adapter) = setup_test_db().await;

    let tx = adapter.begin_transaction().await.unwrap();
    adapter
        .create(CreateArgs::new("authors", data(json!({ "name": "Pending" }))).transaction(&tx))
        .await
        .unwrap();
    adapter.destroy().await;

    let err = adapter.count(WhereArgs::new("authors", json!({}))).await.unwrap_err();
    assert!(matches!(err, Error::NotReady { .. }));

    let reopened = open_with(config_for(&tmp), &collections()).await;
    assert_eq!(reopened.count(WhereArgs::new("authors", json!({}))).await.unwrap(), 0);
}

// =============================================================================
// Id Tests
// =============================================================================

#[tokio::test]
async fn test_uuid_ids() {
    let tmp = TempDir::new().unwrap();
    let config = AdapterConfig {
        id_type: IdType::Uuid,
        ..config_for(&tmp)
    };
    let adapter = open_with(config, &collections()).await;

    let a = create(&adapter, "tags", json!({ "label": "a" })).await;
    let b = create(&adapter, "tags", json!({ "label": "b" })).await;
    let DocumentId::Uuid(raw) = &a.id else {
        panic!("expected a uuid id, got {:?}", a.id);
    };
    assert_eq!(raw.len(), 36);

    let post = create(&adapter, "posts", json!({ "title": "x", "tags": [id_json(&b), id_json(&a)] })).await;
    let tags: Vec<DocumentId> = post
        .get("tags")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(|v| DocumentId::from_value(v, IdType::Uuid))
        .collect();
    assert_eq!(tags, vec![b.id, a.id.clone()]);

    let found = adapter.find_by_id(FindByIdArgs::new("tags", a.id.clone())).await.unwrap();
    assert_eq!(found.id, a.id);
}

#[tokio::test]
async fn test_supplied_numeric_id() {
    let tmp = TempDir::new().unwrap();
    let config = AdapterConfig {
        allow_id_on_create: true,
        ..config_for(&tmp)
    };
    let adapter = open_with(config, &collections()).await;

    let author = create(&adapter, "authors", json!({ "id": 42, "name": "Fixed" })).await;
    assert_eq!(author.id, DocumentId::Number(42));

    // Without the option the id is generated
    let (_tmp, plain) = setup_test_db().await;
    let generated = create(&plain, "authors", json!({ "id": 42, "name": "Generated" })).await;
    assert_eq!(generated.id, DocumentId::Number(1));
}

// =============================================================================
// Maintenance Tests
// =============================================================================

#[tokio::test]
async fn test_drop_database_closes_the_gate() {
    let (_tmp, adapter) = setup_test_db().await;
    create(&adapter, "authors", json!({ "name": "Ada" })).await;

    let dropped = adapter.drop_database().await.unwrap();
    assert!(dropped.contains(&"posts_tags_rels".to_string()));
    assert!(dropped.contains(&"authors".to_string()));
    assert!(adapter.list_tables().await.unwrap().is_empty());

    let err = adapter.count(WhereArgs::new("authors", json!({}))).await.unwrap_err();
    assert!(matches!(err, Error::NotReady { .. }));

    adapter.init(&collections()).await.unwrap();
    assert_eq!(adapter.count(WhereArgs::new("authors", json!({}))).await.unwrap(), 0);
}

#[tokio::test]
async fn test_production_refuses_drop() {
    let tmp = TempDir::new().unwrap();
    let adapter = open_with(config_for(&tmp), &collections()).await;
    adapter.destroy().await;

    let config = AdapterConfig {
        production: true,
        ..config_for(&tmp)
    };
    let adapter = open_with(config, &collections()).await;
    let err = adapter.drop_database().await.unwrap_err();
    assert!(matches!(err, Error::SchemaLocked { .. }));
}

#[tokio::test]
async fn test_production_does_not_create_tables() {
    let tmp = TempDir::new().unwrap();
    let config = AdapterConfig {
        production: true,
        ..config_for(&tmp)
    };
    let adapter = Adapter::new(config).unwrap();
    let err = adapter.init(&collections()).await.unwrap_err();
    assert!(matches!(err, Error::SchemaCompilation { .. }));
    assert!(adapter.list_tables().await.unwrap().is_empty());
}
