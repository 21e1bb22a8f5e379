//! Unit tests for the `SQLite` record store.

use instance_control::persistence::{RecordStore, SqliteStore};
use instance_control::StoreError;

#[tokio::test]
async fn missing_key_is_not_found() {
    let store = SqliteStore::connect_memory().await.expect("db");
    let result = store.get("instancecontrol:/nowhere").await;
    assert_eq!(
        result,
        Err(StoreError::NotFound("instancecontrol:/nowhere".into()))
    );
}

#[tokio::test]
async fn set_then_get_returns_value() {
    let store = SqliteStore::connect_memory().await.expect("db");
    store
        .set("instancecontrol:/a", r#"{"state":"stopped"}"#.to_owned())
        .await
        .expect("set");

    let value = store.get("instancecontrol:/a").await.expect("get");
    assert_eq!(value, r#"{"state":"stopped"}"#);
}

#[tokio::test]
async fn set_replaces_previous_value() {
    let store = SqliteStore::connect_memory().await.expect("db");
    store
        .set("instancecontrol:/a", "first".to_owned())
        .await
        .expect("set");
    store
        .set("instancecontrol:/a", "second".to_owned())
        .await
        .expect("set");

    assert_eq!(store.get("instancecontrol:/a").await.expect("get"), "second");

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instance_record")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn keys_are_independent() {
    let store = SqliteStore::connect_memory().await.expect("db");
    store.set("instancecontrol:/a", "a".to_owned()).await.expect("set");
    store.set("instancecontrol:/b", "b".to_owned()).await.expect("set");

    assert_eq!(store.get("instancecontrol:/a").await.expect("get"), "a");
    assert_eq!(store.get("instancecontrol:/b").await.expect("get"), "b");
}

#[tokio::test]
async fn file_store_survives_reconnect() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("state").join("records.db");

    {
        let store = SqliteStore::connect(&db_path).await.expect("db");
        store
            .set("instancecontrol:/srv/api", "persisted".to_owned())
            .await
            .expect("set");
        store.pool().close().await;
    }

    assert!(db_path.exists(), "database file must be created");

    let reopened = SqliteStore::connect(&db_path).await.expect("db");
    assert_eq!(
        reopened.get("instancecontrol:/srv/api").await.expect("get"),
        "persisted"
    );
}
