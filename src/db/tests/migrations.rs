use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteStore::new(temp_file.path()).await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(store.pool())
            .await
            .unwrap();

    assert!(tables.contains(&"schema_version".to_string()));
    assert!(tables.contains(&"stories".to_string()));
    assert!(tables.contains(&"settings".to_string()));

    store.close().await;
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let temp_file = NamedTempFile::new().unwrap();

    let store = SqliteStore::new(temp_file.path()).await.unwrap();
    store.close().await;

    // Reopening must not re-apply v1
    let store = SqliteStore::new(temp_file.path()).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);

    store.close().await;
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("nested").join("dir").join("stories.db");

    let store = SqliteStore::new(&path).await.unwrap();
    assert!(path.exists());

    store.close().await;
}
