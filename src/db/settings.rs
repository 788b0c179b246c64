//! Download settings and the [`StoryStore`] implementation.

use crate::config::DownloadSettings;
use crate::error::StorageError;
use crate::store::StoryStore;
use crate::types::{Story, StoryId};
use crate::{Error, Result};
use async_trait::async_trait;

use super::SqliteStore;

const DOWNLOAD_SETTINGS_KEY: &str = "download_settings";

impl SqliteStore {
    /// Load the saved download settings
    pub async fn get_settings(&self) -> Result<Option<DownloadSettings>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(DOWNLOAD_SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Storage(StorageError::QueryFailed(format!(
                    "Failed to load settings: {}",
                    e
                )))
            })?;

        value
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    Error::Storage(StorageError::Corrupt {
                        key: DOWNLOAD_SETTINGS_KEY.to_string(),
                        reason: e.to_string(),
                    })
                })
            })
            .transpose()
    }

    /// Save download settings
    pub async fn put_settings(&self, settings: &DownloadSettings) -> Result<()> {
        let value = serde_json::to_string(settings)?;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(DOWNLOAD_SETTINGS_KEY)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Storage(StorageError::QueryFailed(format!(
                "Failed to save settings: {}",
                e
            )))
        })?;

        Ok(())
    }
}

#[async_trait]
impl StoryStore for SqliteStore {
    async fn load_story(&self, id: &StoryId) -> Result<Option<Story>> {
        self.get_story(id).await
    }

    async fn save_story(&self, story: &Story) -> Result<()> {
        self.put_story(story).await
    }

    async fn delete_story(&self, id: &StoryId) -> Result<bool> {
        self.remove_story(id).await
    }

    async fn list_story_ids(&self) -> Result<Vec<StoryId>> {
        self.story_ids().await
    }

    async fn load_settings(&self) -> Result<Option<DownloadSettings>> {
        self.get_settings().await
    }

    async fn save_settings(&self, settings: &DownloadSettings) -> Result<()> {
        self.put_settings(settings).await
    }
}
