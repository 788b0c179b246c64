//! Story snapshot CRUD.

use crate::error::StorageError;
use crate::types::{Story, StoryId};
use crate::{Error, Result};

use super::SqliteStore;

impl SqliteStore {
    /// Load a story snapshot
    pub async fn get_story(&self, id: &StoryId) -> Result<Option<Story>> {
        let snapshot: Option<String> =
            sqlx::query_scalar("SELECT snapshot FROM stories WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Storage(StorageError::QueryFailed(format!(
                        "Failed to load story: {}",
                        e
                    )))
                })?;

        snapshot
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    Error::Storage(StorageError::Corrupt {
                        key: id.to_string(),
                        reason: e.to_string(),
                    })
                })
            })
            .transpose()
    }

    /// Insert or replace a story snapshot
    pub async fn put_story(&self, story: &Story) -> Result<()> {
        let snapshot = serde_json::to_string(story)?;
        sqlx::query(
            r#"
            INSERT INTO stories (id, snapshot, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at
            "#,
        )
        .bind(story.id.as_str())
        .bind(snapshot)
        .bind(story.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Storage(StorageError::QueryFailed(format!(
                "Failed to save story: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Delete a story snapshot; returns false if none existed
    pub async fn remove_story(&self, id: &StoryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stories WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Storage(StorageError::QueryFailed(format!(
                    "Failed to delete story: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Ids of all stored stories, sorted
    pub async fn story_ids(&self) -> Result<Vec<StoryId>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM stories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Storage(StorageError::QueryFailed(format!(
                    "Failed to list stories: {}",
                    e
                )))
            })?;

        Ok(ids.into_iter().map(StoryId::from).collect())
    }
}
