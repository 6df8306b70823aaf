use super::*;
use crate::Database;
use crate::schema::{Column, ColumnType, Table};
use serde_json::json;

fn schema() -> Schema {
    use ColumnTag::*;
    use ColumnType::*;
    Schema::new([
        Table::new(
            "files",
            vec![
                Column::new("id", Integer).tagged(Id),
                Column::new("path", String),
                Column::new("category", String),
                Column::new("status", String),
                Column::new("commit", String).tagged(Version),
                Column::new("author", String),
            ],
        )
        .unwrap(),
        Table::new(
            "posts",
            vec![
                Column::new("id", Integer).tagged(Id),
                Column::new("title", String),
                Column::new("commit", String).tagged(Version),
            ],
        )
        .unwrap(),
        Table::new(
            "commits",
            vec![Column::new("commit", String).tagged(Id), Column::new("subject", String)],
        )
        .unwrap(),
        Table::new(
            "authors",
            vec![
                Column::new("id", String).tagged(Id),
                Column::new("name", String),
                Column::new("commit", String).tagged(Version),
            ],
        )
        .unwrap(),
        Table::new(
            "meta",
            vec![
                Column::new("id", String).tagged(Id).formatted("{fileid}:{key}"),
                Column::new("fileid", Integer).tagged(OwnerId),
                Column::new("key", String).tagged(Key),
                Column::new("value", String),
                Column::new("commit", String).tagged(Version),
            ],
        )
        .unwrap(),
        Table::new(
            "gallery",
            vec![
                Column::new("id", Integer).tagged(Id),
                Column::new("fileid", Integer).tagged(OwnerId),
                Column::new("position", Integer).tagged(Index),
                Column::new("url", String),
                Column::new("commit", String).tagged(Version),
            ],
        )
        .unwrap(),
    ])
}

fn mappings() -> BTreeMap<std::string::String, MappingConfig> {
    BTreeMap::from([
        ("post".to_string(), MappingConfig::new(Relation::Object, "posts")),
        ("commit".to_string(), MappingConfig::new(Relation::SharedObject, "commits")),
        ("author".to_string(), MappingConfig::new(Relation::SharedObject, "authors")),
        ("meta".to_string(), MappingConfig::new(Relation::Map, "meta")),
        ("gallery".to_string(), MappingConfig::new(Relation::Array, "gallery")),
    ])
}

async fn setup() -> (Store, Orm) {
    let schema = Arc::new(schema());
    let db = Database::connect_in_memory().await.unwrap();
    let store = Store::open(db, schema.clone()).await.unwrap();
    let orm = Orm::new(schema, "files", &mappings()).unwrap();
    (store, orm)
}

async fn insert(store: &Store, table: &str, value: Value) {
    store.upsert(table, &Record::from_value(value).unwrap()).await.unwrap();
}

async fn seed(store: &Store) {
    insert(store, "commits", json!({"commit": "c1", "subject": "First"})).await;
    insert(store, "authors", json!({"id": "jo", "name": "Jo", "commit": "c1"})).await;
    insert(
        store,
        "files",
        json!({"id": 42, "path": "2024/article.html", "category": "posts", "status": "published", "commit": "c1", "author": "jo"}),
    )
    .await;
    insert(store, "posts", json!({"id": 42, "title": "Article", "commit": "c1"})).await;
    insert(store, "meta", json!({"fileid": 42, "key": "lang", "value": "en", "commit": "c1"})).await;
    insert(store, "meta", json!({"fileid": 42, "key": "tone", "value": "dry", "commit": "c1"})).await;
    // Inserted out of order to check the index ordering.
    insert(store, "gallery", json!({"id": 3, "fileid": 42, "position": 2, "url": "c.png", "commit": "c1"})).await;
    insert(store, "gallery", json!({"id": 1, "fileid": 42, "position": 0, "url": "a.png", "commit": "c1"})).await;
    insert(store, "gallery", json!({"id": 2, "fileid": 42, "position": 1, "url": "b.png", "commit": "c1"})).await;
    insert(store, "files", json!({"id": 43, "path": "logo.png", "category": "images", "status": "published", "commit": "c1"}))
        .await;
}

#[tokio::test]
async fn test_select_key_hydrates_objects() {
    let (store, orm) = setup().await;
    seed(&store).await;
    let record = orm.select_key(&store, 42, &["post", "commit", "author"]).await.unwrap().unwrap();
    assert_eq!(record.get("path"), Some(&json!("2024/article.html")));
    assert_eq!(record.get("post"), Some(&json!({"id": 42, "title": "Article", "commit": "c1"})));
    assert_eq!(record.get("commit"), Some(&json!({"commit": "c1", "subject": "First"})));
    assert_eq!(record.get("author"), Some(&json!({"id": "jo", "name": "Jo", "commit": "c1"})));
}

#[tokio::test]
async fn test_collection_fan_out_is_folded() {
    let (store, orm) = setup().await;
    seed(&store).await;
    // Both collections at once: 2 meta rows x 3 gallery rows = 6 joined rows.
    let results = orm.select_where(&store, &["meta", "gallery"], "", &[]).await.unwrap();
    assert_eq!(results.len(), 2);
    let record = &results[0];
    assert_eq!(record.get("id"), Some(&json!(42)));
    assert_eq!(
        record.get("meta"),
        Some(&json!([
            {"id": "42:lang", "fileid": 42, "key": "lang", "value": "en", "commit": "c1"},
            {"id": "42:tone", "fileid": 42, "key": "tone", "value": "dry", "commit": "c1"},
        ]))
    );
    let urls: Vec<_> = record["gallery"].as_array().unwrap().iter().map(|g| g["url"].clone()).collect();
    assert_eq!(urls, vec![json!("a.png"), json!("b.png"), json!("c.png")]);
}

#[tokio::test]
async fn test_map_keeps_every_row_sharing_a_key() {
    let (store, orm) = setup().await;
    seed(&store).await;
    insert(&store, "meta", json!({"id": "m1", "fileid": 42, "key": "tag", "value": "rust", "commit": "c1"})).await;
    insert(&store, "meta", json!({"id": "m2", "fileid": 42, "key": "tag", "value": "sqlite", "commit": "c1"})).await;
    let record = orm.select_key(&store, 42, &["meta"]).await.unwrap().unwrap();
    let meta = record["meta"].as_array().unwrap();
    assert_eq!(meta.len(), 4);
    let mut tags: Vec<_> = meta.iter().filter(|m| m["key"] == "tag").map(|m| m["value"].clone()).collect();
    tags.sort_by_key(|v| v.to_string());
    assert_eq!(tags, vec![json!("rust"), json!("sqlite")]);
}

#[tokio::test]
async fn test_unmatched_joins_leave_fields_untouched() {
    let (store, orm) = setup().await;
    seed(&store).await;
    let record = orm.select_key(&store, 43, &["post", "commit", "meta", "gallery"]).await.unwrap().unwrap();
    assert!(record.get("post").is_none());
    // No posts row, but the commit row exists and the shared join matches.
    assert_eq!(record.get("commit"), Some(&json!({"commit": "c1", "subject": "First"})));
    assert_eq!(record.get("meta"), Some(&json!([])));
    assert_eq!(record.get("gallery"), Some(&json!([])));
    assert!(record.get("author").is_none());
}

#[tokio::test]
async fn test_select_where_with_predicate() {
    let (store, orm) = setup().await;
    seed(&store).await;
    let predicate = format!("{} = ?", orm.source_column("category").unwrap());
    let results = orm.select_where(&store, &["post"], &predicate, &[json!("images")]).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get("path"), Some(&json!("logo.png")));
    assert!(orm.source_column("nope").is_err());
}

#[tokio::test]
async fn test_unknown_mapping() {
    let (store, orm) = setup().await;
    let err = orm.select_where(&store, &["comments"], "", &[]).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::UnknownMapping(name) if name == "comments"));
}

#[tokio::test]
async fn test_repeated_upserts_are_idempotent() {
    let (store, orm) = setup().await;
    seed(&store).await;
    let once = orm.select_key(&store, 42, &["post", "meta", "gallery"]).await.unwrap();
    seed(&store).await;
    let twice = orm.select_key(&store, 42, &["post", "meta", "gallery"]).await.unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_delete_key_removes_owned_rows() {
    let (store, orm) = setup().await;
    seed(&store).await;
    orm.delete_key(&store, 42).await.unwrap();
    assert!(store.read("files", 42).await.unwrap().is_none());
    let meta = store.perform_query("SELECT * FROM meta WHERE fileid = 42", &[]).await.unwrap();
    assert!(meta.is_empty());
    let gallery = store.perform_query("SELECT * FROM gallery", &[]).await.unwrap();
    assert!(gallery.is_empty());
    // Shared rows are not owned by the deleted file.
    assert!(store.read("commits", "c1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_prune_related() {
    let (store, orm) = setup().await;
    seed(&store).await;
    // File 42 moves to c2 and re-supplies one meta value; file 43 is gone.
    insert(&store, "files", json!({"id": 42, "commit": "c2", "author": null})).await;
    insert(&store, "meta", json!({"fileid": 42, "key": "lang", "value": "fr", "commit": "c2"})).await;
    insert(&store, "posts", json!({"id": 43, "title": "Orphan", "commit": "c1"})).await;
    store.delete("files", 43).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let deleted = orm.prune_related(&mut tx).await.unwrap();
    tx.commit().await.unwrap();
    // author "jo" (unreferenced), post 42 (stale), post 43 (orphan),
    // meta tone (stale) and all three gallery rows (stale).
    assert_eq!(deleted, 7);

    let record = orm.select_key(&store, 42, &["post", "meta", "gallery", "author"]).await.unwrap().unwrap();
    assert!(record.get("post").is_none());
    assert!(record.get("author").is_none());
    assert_eq!(record["meta"].as_array().unwrap().len(), 1);
    assert_eq!(record["meta"][0]["value"], json!("fr"));
    assert_eq!(record.get("gallery"), Some(&json!([])));
    assert!(store.read("posts", 43).await.unwrap().is_none());
    // Shared rows without a version column are never pruned.
    assert!(store.read("commits", "c1").await.unwrap().is_some());
}

#[test]
fn test_shared_mapping_requires_source_column() {
    let schema = Arc::new(schema());
    let mappings = BTreeMap::from([("editor".to_string(), MappingConfig::new(Relation::SharedObject, "authors"))]);
    assert!(Orm::new(schema, "files", &mappings).is_err());
}

#[test]
fn test_statement_shape() {
    let schema = Arc::new(schema());
    let orm = Orm::new(schema, "files", &mappings()).unwrap();
    let mapping = orm.mapping("gallery").unwrap();
    let sql = select::statement(&orm, &[mapping], "").unwrap();
    assert!(sql.contains(r#"LEFT OUTER JOIN "gallery" AS "gallery" ON "gallery"."fileid" = "files"."id""#));
    assert!(sql.contains(r#""gallery"."url" AS "gallery.url""#));
    assert!(sql.ends_with(r#"ORDER BY "files"."id", "gallery"."position""#));
    assert!(!sql.contains("WHERE"));
}
