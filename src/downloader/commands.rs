//! Job submission, cancellation, queries and settings.

use crate::config::DownloadSettings;
use crate::error::{Error, Result};
use crate::types::{ChapterId, DownloadJob, Event, QueueStats, Story, StoryId, StoryStatus};
use std::collections::HashSet;
use std::sync::atomic::Ordering;

use super::ChapterDownloader;

impl ChapterDownloader {
    /// Queue the given chapters of a story for download
    ///
    /// Downloaded chapters, unknown ids and chapters that already have a pending or
    /// downloading job are skipped, so submitting the same ids twice is a no-op. The
    /// requested ids are recorded in the story's `pending_new_chapter_ids` before
    /// anything is queued, which lets [`Self::resume`] pick them up after a restart.
    ///
    /// Returns the jobs that were created.
    pub async fn submit(
        &self,
        story_id: &StoryId,
        chapter_ids: &[ChapterId],
    ) -> Result<Vec<DownloadJob>> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let created = {
            let _guard = self.story_locks.lock(story_id).await;
            let mut story = self.load_story_or_not_found(story_id).await?;

            let requested: HashSet<&ChapterId> = chapter_ids.iter().collect();
            let selected: Vec<_> = story
                .chapters
                .iter()
                .filter(|c| requested.contains(&c.id) && !c.downloaded)
                .cloned()
                .collect();

            if selected.len() < requested.len() {
                tracing::debug!(
                    story_id = %story_id,
                    requested = requested.len(),
                    selected = selected.len(),
                    "Skipping downloaded or unknown chapters"
                );
            }

            for chapter in &selected {
                if !story.pending_new_chapter_ids.contains(&chapter.id) {
                    story.pending_new_chapter_ids.push(chapter.id.clone());
                }
            }

            let (created, stats) = {
                let mut inner = self.queue_state.inner.lock().await;
                let created = inner.queue.enqueue(story_id, &selected);
                (created, inner.queue.stats_for_story(story_id))
            };

            story.status = if stats.active() > 0 {
                StoryStatus::Downloading
            } else {
                StoryStatus::from_counts(story.downloaded_chapters, story.total_chapters)
            };
            story.updated_at = chrono::Utc::now();
            self.services.store.save_story(&story).await?;

            if !created.is_empty() {
                self.emit_event(Event::QueueUpdated {
                    story_id: story_id.clone(),
                    stats,
                });
            }
            created
        };

        tracing::info!(
            story_id = %story_id,
            jobs_created = created.len(),
            "Chapters submitted for download"
        );

        if !created.is_empty() {
            self.ensure_workers().await;
        }
        Ok(created)
    }

    /// Queue every undownloaded chapter of a story
    pub async fn download_all_chapters(&self, story_id: &StoryId) -> Result<Vec<DownloadJob>> {
        let story = self.load_story_or_not_found(story_id).await?;
        let ids: Vec<ChapterId> = story.undownloaded().map(|c| c.id.clone()).collect();
        self.submit(story_id, &ids).await
    }

    /// Queue specific chapters of a story
    pub async fn download_chapters_by_ids(
        &self,
        story_id: &StoryId,
        chapter_ids: &[ChapterId],
    ) -> Result<Vec<DownloadJob>> {
        self.submit(story_id, chapter_ids).await
    }

    /// Queue the undownloaded chapters at positions `start..=end`
    ///
    /// `end` is clamped to the last chapter. Fails with [`Error::InvalidRange`] if
    /// `start > end` or `start` is past the end of the chapter list.
    pub async fn download_range(
        &self,
        story_id: &StoryId,
        start: usize,
        end: usize,
    ) -> Result<Vec<DownloadJob>> {
        let story = self.load_story_or_not_found(story_id).await?;
        let len = story.chapters.len();
        if start > end || start >= len {
            return Err(Error::InvalidRange { start, end, len });
        }

        let end = end.min(len - 1);
        let ids: Vec<ChapterId> = story.chapters[start..=end]
            .iter()
            .filter(|c| !c.downloaded)
            .map(|c| c.id.clone())
            .collect();
        self.submit(story_id, &ids).await
    }

    /// Stop downloading a story
    ///
    /// Pending jobs are removed and the story's requested ids are cleared, so a
    /// restart does not bring them back. Jobs already being fetched finish their
    /// fetch but their result is discarded and they are never retried.
    ///
    /// Returns the number of pending jobs removed.
    pub async fn cancel_for_story(&self, story_id: &StoryId) -> Result<usize> {
        let (removed, stats, settled) = {
            let mut inner = self.queue_state.inner.lock().await;
            let removed = inner.queue.cancel_for_story(story_id);
            let stats = inner.queue.stats_for_story(story_id);
            let settled = if removed > 0 {
                inner.take_settled(story_id)
            } else {
                None
            };
            (removed, stats, settled)
        };

        {
            let _guard = self.story_locks.lock(story_id).await;
            if let Some(mut story) = self.services.store.load_story(story_id).await? {
                story.pending_new_chapter_ids.clear();
                story.updated_at = chrono::Utc::now();
                self.services.store.save_story(&story).await?;
            }
        }

        tracing::info!(
            story_id = %story_id,
            removed,
            in_flight = stats.downloading,
            "Cancelled downloads for story"
        );

        if removed > 0 {
            self.emit_event(Event::QueueUpdated {
                story_id: story_id.clone(),
                stats,
            });
        }
        if let Some(failed) = settled {
            self.settle_story(story_id, failed).await;
        }
        Ok(removed)
    }

    /// Register a story by the URL of its chapter index
    ///
    /// The story starts empty; [`Self::sync_chapters`] fills in its chapters. An
    /// already stored story is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedSource`] if no provider handles `source_url`.
    pub async fn add_story(&self, story_id: &StoryId, source_url: &str) -> Result<Story> {
        let provider = self.services.registry.provider_for(source_url)?;

        let _guard = self.story_locks.lock(story_id).await;
        if let Some(existing) = self.services.store.load_story(story_id).await? {
            tracing::debug!(story_id = %story_id, "Story already registered");
            return Ok(existing);
        }

        let story = Story::new(story_id.clone(), source_url);
        self.services.store.save_story(&story).await?;
        tracing::info!(
            story_id = %story_id,
            provider = provider.name(),
            url = source_url,
            "Story added"
        );
        Ok(story)
    }

    /// Current snapshot of a story, `None` if it is not stored
    pub async fn get_story(&self, story_id: &StoryId) -> Result<Option<Story>> {
        self.services.store.load_story(story_id).await
    }

    /// Cancel a story's downloads and remove it from the store
    ///
    /// Chapter bodies written for the story are removed too. Returns false if the
    /// story did not exist.
    pub async fn delete_story(&self, story_id: &StoryId) -> Result<bool> {
        {
            let mut inner = self.queue_state.inner.lock().await;
            inner.queue.cancel_for_story(story_id);
            inner.failures.remove(story_id);
        }

        let existed = {
            let _guard = self.story_locks.lock(story_id).await;
            let existed = self.services.store.delete_story(story_id).await?;
            self.services.writer.remove_story(story_id).await?;
            existed
        };
        self.story_locks.forget(story_id).await;

        tracing::info!(story_id = %story_id, existed, "Story deleted");
        Ok(existed)
    }

    /// Snapshot of every queued job of a story, in enqueue order
    pub async fn jobs_for_story(&self, story_id: &StoryId) -> Vec<DownloadJob> {
        self.queue_state
            .inner
            .lock()
            .await
            .queue
            .jobs_for_story(story_id)
    }

    /// Queue occupancy across all stories
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue_state.inner.lock().await.queue.stats()
    }

    /// Current download settings
    pub async fn settings(&self) -> DownloadSettings {
        *self.settings.read().await
    }

    /// Change and persist the download settings
    ///
    /// Concurrency is clamped to `1..=10`. Raising it starts extra workers right
    /// away; lowering it lets surplus workers exit after their current job.
    pub async fn update_settings(&self, settings: DownloadSettings) -> Result<DownloadSettings> {
        let settings = settings.clamped();
        self.services.store.save_settings(&settings).await?;
        *self.settings.write().await = settings;

        tracing::info!(
            download_concurrency = settings.download_concurrency,
            download_delay_ms = settings.download_delay.as_millis() as u64,
            "Download settings updated"
        );

        self.ensure_workers().await;
        Ok(settings)
    }

    pub(crate) async fn load_story_or_not_found(&self, story_id: &StoryId) -> Result<Story> {
        self.services
            .store
            .load_story(story_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("story {}", story_id)))
    }
}
