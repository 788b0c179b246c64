//! Story and settings persistence seam.
//!
//! The downloader never caches stories: every read goes through [`StoryStore`]
//! and every mutation saves a whole snapshot back. Two implementations ship with
//! the crate:
//! - [`MemoryStore`] for tests and hosts that persist elsewhere
//! - [`crate::db::SqliteStore`] for a durable local key/value store

use crate::config::DownloadSettings;
use crate::error::Result;
use crate::types::{Story, StoryId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Key/value persistence of story snapshots and download settings
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Load a story snapshot, `None` if it does not exist
    async fn load_story(&self, id: &StoryId) -> Result<Option<Story>>;

    /// Insert or replace a story snapshot
    async fn save_story(&self, story: &Story) -> Result<()>;

    /// Delete a story; returns false if it did not exist
    async fn delete_story(&self, id: &StoryId) -> Result<bool>;

    /// Ids of every stored story
    async fn list_story_ids(&self) -> Result<Vec<StoryId>>;

    /// Saved download settings, `None` until first saved
    async fn load_settings(&self) -> Result<Option<DownloadSettings>>;

    /// Persist download settings
    async fn save_settings(&self, settings: &DownloadSettings) -> Result<()>;
}

/// In-process [`StoryStore`]
#[derive(Default)]
pub struct MemoryStore {
    stories: RwLock<BTreeMap<StoryId, Story>>,
    settings: RwLock<Option<DownloadSettings>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `stories`
    pub fn with_stories(stories: impl IntoIterator<Item = Story>) -> Self {
        Self {
            stories: RwLock::new(stories.into_iter().map(|s| (s.id.clone(), s)).collect()),
            settings: RwLock::new(None),
        }
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn load_story(&self, id: &StoryId) -> Result<Option<Story>> {
        Ok(self.stories.read().await.get(id).cloned())
    }

    async fn save_story(&self, story: &Story) -> Result<()> {
        self.stories
            .write()
            .await
            .insert(story.id.clone(), story.clone());
        Ok(())
    }

    async fn delete_story(&self, id: &StoryId) -> Result<bool> {
        Ok(self.stories.write().await.remove(id).is_some())
    }

    async fn list_story_ids(&self) -> Result<Vec<StoryId>> {
        Ok(self.stories.read().await.keys().cloned().collect())
    }

    async fn load_settings(&self) -> Result<Option<DownloadSettings>> {
        Ok(*self.settings.read().await)
    }

    async fn save_settings(&self, settings: &DownloadSettings) -> Result<()> {
        *self.settings.write().await = Some(*settings);
        Ok(())
    }
}
