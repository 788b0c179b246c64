//! Chapter index re-scrape and merge.

use crate::error::{Error, FetchError, Result};
use crate::events::EventBus;
use crate::merge::merge;
use crate::retry::download_with_retry;
use crate::source::ProgressSink;
use crate::types::{Event, StoryId, StoryStatus, SyncOutcome, SyncProgress, SyncStage};
use std::collections::HashSet;

use super::ChapterDownloader;

/// Forwards provider progress as [`Event::SyncProgress`]
struct SyncProgressEmitter {
    events: EventBus,
    story_id: StoryId,
}

impl ProgressSink for SyncProgressEmitter {
    fn report(&self, progress: SyncProgress) {
        self.events.emit(Event::SyncProgress {
            story_id: self.story_id.clone(),
            progress,
        });
    }
}

impl ChapterDownloader {
    /// Re-scrape a story's chapter index, merge it and queue what is missing
    ///
    /// The stored chapter list is only replaced after the scrape succeeded and
    /// returned at least one chapter; already downloaded chapters and the bookmark
    /// survive as long as the source still lists them. Every chapter left in the
    /// story's `pending_new_chapter_ids` is then submitted for download.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the story is not stored
    /// - [`Error::UnsupportedSource`] if no provider handles the story URL
    /// - [`Error::Fetch`] once index fetch retries are exhausted
    /// - [`Error::Parse`] if the provider cannot read the chapter list
    /// - [`Error::EmptyChapterList`] if the scrape yielded no chapters
    pub async fn sync_chapters(&self, story_id: &StoryId) -> Result<SyncOutcome> {
        let story = self.load_story_or_not_found(story_id).await?;
        let provider = self.services.registry.provider_for(&story.source_url)?;
        let progress = SyncProgressEmitter {
            events: self.events.clone(),
            story_id: story_id.clone(),
        };

        tracing::info!(
            story_id = %story_id,
            provider = provider.name(),
            url = %story.source_url,
            "Syncing chapter list"
        );

        progress.report(SyncProgress::stage(SyncStage::FetchingIndex));
        let timeout = self.config.download.fetch_timeout;
        let fetcher = &self.services.fetcher;
        let url = story.source_url.as_str();
        let index_html = download_with_retry(&self.config.retry, || async move {
            tokio::time::timeout(timeout, fetcher.fetch_page(url))
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                    timeout,
                })
                .and_then(|fetched| fetched)
                .map_err(Error::from)
        })
        .await?;

        progress.report(SyncProgress::stage(SyncStage::ParsingChapters));
        let fresh = provider
            .chapter_list(
                &index_html,
                &story.source_url,
                self.services.fetcher.as_ref(),
                &progress,
            )
            .await?;
        if fresh.is_empty() {
            tracing::warn!(
                story_id = %story_id,
                url = %story.source_url,
                "Chapter index returned no chapters, keeping stored list"
            );
            return Err(Error::EmptyChapterList {
                url: story.source_url.clone(),
            });
        }

        let metadata = match provider.parse_metadata(&index_html, &story.source_url) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(story_id = %story_id, error = %e, "Metadata refresh failed, keeping previous metadata");
                None
            }
        };

        progress.report(SyncProgress {
            stage: SyncStage::Merging,
            current: 0,
            total: Some(fresh.len()),
        });

        let (outcome, pending) = {
            let _guard = self.story_locks.lock(story_id).await;
            // Reload: downloads may have completed while the index was fetched
            let mut story = self.load_story_or_not_found(story_id).await?;
            let result = merge(
                &story.chapters,
                &fresh,
                story.last_read_chapter_id.as_ref(),
            );

            story.chapters = result.chapters;
            story.last_read_chapter_id = result.last_read_chapter_id;

            let undownloaded: HashSet<_> = story.undownloaded().map(|c| c.id.clone()).collect();
            story
                .pending_new_chapter_ids
                .retain(|id| undownloaded.contains(id));
            for id in &result.new_chapter_ids {
                if !story.pending_new_chapter_ids.contains(id) {
                    story.pending_new_chapter_ids.push(id.clone());
                }
            }

            story.recount();
            if let Some(metadata) = metadata {
                story.metadata = Some(metadata);
            }
            let active = self
                .queue_state
                .inner
                .lock()
                .await
                .queue
                .stats_for_story(story_id)
                .active();
            story.status = if active > 0 {
                StoryStatus::Downloading
            } else {
                StoryStatus::from_counts(story.downloaded_chapters, story.total_chapters)
            };
            story.updated_at = chrono::Utc::now();
            self.services.store.save_story(&story).await?;

            tracing::info!(
                story_id = %story_id,
                total = story.total_chapters,
                downloaded = story.downloaded_chapters,
                new = result.new_chapter_ids.len(),
                removed = result.removed_chapter_ids.len(),
                "Chapter list merged"
            );
            if !result.removed_chapter_ids.is_empty() {
                tracing::debug!(
                    story_id = %story_id,
                    removed = ?result.removed_chapter_ids,
                    "Chapters no longer listed by source"
                );
            }

            let outcome = SyncOutcome {
                story_id: story_id.clone(),
                new_chapter_ids: result.new_chapter_ids,
                removed_chapter_ids: result.removed_chapter_ids,
                total_chapters: story.total_chapters,
                downloaded_chapters: story.downloaded_chapters,
                jobs_created: 0,
            };
            (outcome, story.pending_new_chapter_ids)
        };

        let jobs = if pending.is_empty() {
            Vec::new()
        } else {
            self.submit(story_id, &pending).await?
        };
        progress.report(SyncProgress {
            stage: SyncStage::Queueing,
            current: jobs.len(),
            total: Some(pending.len()),
        });

        Ok(SyncOutcome {
            jobs_created: jobs.len(),
            ..outcome
        })
    }
}
