//! Context, Registry and Reference Tests
//!
//! Repositories handed out by a context share its cache, are built once
//! per collection, and follow references into other collections and other
//! databases attached to the same context.

use std::sync::Arc;

use tessera_test_utils::assertions::*;
use tessera_test_utils::fixtures::*;
use tessera_test_utils::*;

// ============================================================================
// REGISTRY
// ============================================================================

#[tokio::test]
async fn test_repositories_are_memoised() {
    init_tracing();
    let (context, _cache) = context_with(&[("app", "users"), ("app", "posts")]).await.unwrap();

    let a = context.repository("app", "users").unwrap();
    let b = context.repository("app", "users").unwrap();
    let c = context.database("app").unwrap().repository("users").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert!(!Arc::ptr_eq(&a, &context.repository("app", "posts").unwrap()));
}

#[tokio::test]
async fn test_unknown_names_are_reference_errors() {
    let (context, _cache) = context_with(&[("app", "users")]).await.unwrap();
    assert_reference_error(&context.repository("app", "ghosts"));
    assert_reference_error(&context.repository("nowhere", "users"));
}

#[tokio::test]
async fn test_discovery_registers_existing_collections() {
    let connector = InMemoryConnector::new();
    let raw = connector.database("app");
    raw.in_memory_collection("users");
    raw.in_memory_collection("posts");

    let config = TesseraConfig::default().with_database(DatabaseConfig::new("app"));
    let context = TesseraContext::configure(&config, &connector).await.unwrap();
    assert_eq!(
        context.database("app").unwrap().collection_names(),
        vec!["posts", "users"]
    );
    assert_ok(&context.repository("app", "posts").map(|_| ()));
}

#[tokio::test]
async fn test_configured_defaults_apply_to_new_documents() {
    let context = TesseraContext::new(None, TEST_NAMESPACE);
    let database = Arc::new(InMemoryDatabase::new("app"));
    let registry = context
        .attach(database, &DatabaseConfig::new("app").without_discovery())
        .await
        .unwrap();
    registry
        .register(
            "users",
            RepositoryConfig::new(|| doc(json!({"role": "member", "tags": []}))),
        )
        .unwrap();

    let users = context.repository("app", "users").unwrap();
    let fresh = users.create_new(Some(doc(json!({"name": "ada"}))));
    assert_eq!(
        fresh,
        doc(json!({"name": "ada", "role": "member", "tags": []}))
    );
}

// ============================================================================
// CACHE SHARING
// ============================================================================

#[tokio::test]
async fn test_keys_never_collide_across_databases() {
    let (context, cache) =
        context_with(&[("app", "users"), ("archive", "users")]).await.unwrap();
    let live = context.repository("app", "users").unwrap();
    let archived = context.repository("archive", "users").unwrap();

    live.store(doc(json!({"_id": "u1", "state": "live"}))).await.unwrap();
    archived
        .store(doc(json!({"_id": "u1", "state": "archived"})))
        .await
        .unwrap();

    assert_eq!(cache.len(), 2);
    let id = DocumentId::from("u1");
    assert_eq!(
        live.get_field(&id, "state").await.unwrap(),
        Some(json!("live"))
    );
    assert_eq!(
        archived.get_field(&id, "state").await.unwrap(),
        Some(json!("archived"))
    );
}

#[tokio::test]
async fn test_underscored_names_keep_separate_entries() {
    let (context, cache) =
        context_with(&[("app", "user_logs"), ("app_user", "logs")]).await.unwrap();
    let a = context.repository("app", "user_logs").unwrap();
    let b = context.repository("app_user", "logs").unwrap();
    let id = DocumentId::from("k");

    a.store(doc(json!({"_id": "k", "owner": "A"}))).await.unwrap();
    assert_ne!(a.cache_key(&id), b.cache_key(&id));
    assert_ne!(a.cache_key(&id).encode(), b.cache_key(&id).encode());
    assert_eq!(b.load(&id).await.unwrap(), None);

    b.store(doc(json!({"_id": "k", "owner": "B"}))).await.unwrap();
    assert_eq!(cache.len(), 2);
    assert_eq!(a.get_field(&id, "owner").await.unwrap(), Some(json!("A")));
    assert_eq!(b.get_field(&id, "owner").await.unwrap(), Some(json!("B")));
}

// ============================================================================
// REFERENCES
// ============================================================================

#[tokio::test]
async fn test_manual_reference_into_other_collection() {
    let (context, _cache) = context_with(&[("app", "users"), ("app", "posts")]).await.unwrap();
    let users = context.repository("app", "users").unwrap();
    let posts = context.repository("app", "posts").unwrap();

    users.store(doc(json!({"_id": "u1", "name": "ada"}))).await.unwrap();
    posts
        .store(doc(json!({"_id": "p1", "author": "u1"})))
        .await
        .unwrap();

    let author = posts
        .load_field(&DocumentId::from("p1"), "author", Some("users"), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(author.get("name"), Some(&json!("ada")));
}

#[tokio::test]
async fn test_embedded_reference_into_other_database() {
    let (context, _cache) =
        context_with(&[("app", "posts"), ("accounts", "users")]).await.unwrap();
    let users = context.repository("accounts", "users").unwrap();
    let posts = context.repository("app", "posts").unwrap();

    users.store(doc(json!({"_id": 42, "name": "grace"}))).await.unwrap();
    let author = DbRef::new("users", &DocumentId::Int(42)).with_database("accounts");
    posts
        .store(doc(json!({"_id": "p1", "author": author.to_value()})))
        .await
        .unwrap();

    let loaded = posts
        .load_field(&DocumentId::from("p1"), "author", None, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.get("name"), Some(&json!("grace")));
}

#[tokio::test]
async fn test_reference_to_missing_target() {
    let (context, _cache) = context_with(&[("app", "users"), ("app", "posts")]).await.unwrap();
    let posts = context.repository("app", "posts").unwrap();
    posts
        .store(doc(json!({"_id": "p1", "author": "nobody"})))
        .await
        .unwrap();

    let loaded = posts
        .load_field(&DocumentId::from("p1"), "author", Some("users"), None)
        .await
        .unwrap();
    assert!(loaded.is_none());

    let err = posts
        .load_field(&DocumentId::from("p1"), "author", Some("ghosts"), None)
        .await;
    assert_reference_error(&err);
}

#[tokio::test]
async fn test_dropped_context_stops_cross_collection_references() {
    let (context, _cache) = context_with(&[("app", "users"), ("app", "posts")]).await.unwrap();
    let posts = context.repository("app", "posts").unwrap();
    posts
        .store(doc(json!({"_id": "p1", "author": "u1", "parent": "p0"})))
        .await
        .unwrap();
    posts.store(doc(json!({"_id": "p0"}))).await.unwrap();
    drop(context);

    let err = posts
        .load_field(&DocumentId::from("p1"), "author", Some("users"), None)
        .await;
    assert_reference_error(&err);

    let parent = posts
        .load_field(&DocumentId::from("p1"), "parent", None, None)
        .await
        .unwrap();
    assert!(parent.is_some());
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[tokio::test]
async fn test_close_flushes_cache_and_databases() {
    let (context, cache) = context_with(&[("app", "users")]).await.unwrap();
    let users = context.repository("app", "users").unwrap();
    users.store(doc(json!({"_id": "u1"}))).await.unwrap();

    assert_ok(&context.close().await);
    assert_eq!(cache.stats().sets, 1);
}
