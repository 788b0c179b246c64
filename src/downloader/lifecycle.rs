//! Startup and shutdown coordination.

use crate::error::Result;
use crate::types::{ChapterId, Event, StoryId, StoryStatus};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::ChapterDownloader;

/// Upper bound for in-flight jobs to finish during shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl ChapterDownloader {
    /// Rebuild the queue from persisted state
    ///
    /// The queue itself is never persisted. Instead every story records the chapters
    /// that were requested (or discovered by a sync) and not yet downloaded in
    /// `pending_new_chapter_ids`; this re-submits those, dropping ids that were
    /// downloaded or are no longer listed. Stories left in `Downloading` by an
    /// unclean exit get their settled status back.
    ///
    /// Called by [`Self::new`]. Returns the number of jobs created.
    pub async fn resume(&self) -> Result<usize> {
        let story_ids = self.services.store.list_story_ids().await?;
        let mut restored = 0;

        for story_id in story_ids {
            let pending = self.reconcile_pending(&story_id).await?;
            if pending.is_empty() {
                continue;
            }
            let jobs = self.submit(&story_id, &pending).await?;
            restored += jobs.len();
        }

        if restored > 0 {
            tracing::info!(jobs = restored, "Restored chapter downloads from previous session");
        }
        Ok(restored)
    }

    /// Prune a story's pending ids and fix a stale status; returns what is left
    async fn reconcile_pending(&self, story_id: &StoryId) -> Result<Vec<ChapterId>> {
        let _guard = self.story_locks.lock(story_id).await;
        let Some(mut story) = self.services.store.load_story(story_id).await? else {
            return Ok(Vec::new());
        };

        let before = story.pending_new_chapter_ids.len();
        let chapters = &story.chapters;
        let pending: Vec<ChapterId> = story
            .pending_new_chapter_ids
            .iter()
            .filter(|id| chapters.iter().any(|c| &c.id == *id && !c.downloaded))
            .cloned()
            .collect();

        let active = self
            .queue_state
            .inner
            .lock()
            .await
            .queue
            .stats_for_story(story_id)
            .active();
        let stale = pending.is_empty()
            && active == 0
            && story.status == StoryStatus::Downloading;

        if pending.len() != before || stale {
            story.pending_new_chapter_ids = pending.clone();
            story.recount();
            if stale {
                story.status =
                    StoryStatus::from_counts(story.downloaded_chapters, story.total_chapters);
            }
            story.updated_at = chrono::Utc::now();
            self.services.store.save_story(&story).await?;
            tracing::debug!(
                story_id = %story_id,
                dropped = before - pending.len(),
                "Pruned pending chapter ids"
            );
        }
        Ok(pending)
    }

    /// Wait until no job is pending or downloading
    ///
    /// With `Some(story_id)` only that story's jobs are considered. When this
    /// returns, the settled status of every drained story has been saved and
    /// [`Event::StorySettled`] emitted. Returns immediately if there is nothing
    /// to wait for.
    pub async fn wait_until_settled(&self, story_id: Option<&StoryId>) {
        loop {
            let settled = self.queue_state.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let busy = self.queue_state.inner.lock().await.busy(story_id);
            if busy == 0 {
                return;
            }
            settled.await;
        }
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new submissions
    /// 2. Signals workers to stop after their current job
    /// 3. Waits for workers to exit with a timeout (30 seconds)
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Pending jobs are not lost: their chapters stay in the stories'
    /// `pending_new_chapter_ids` and are re-queued by the next [`Self::resume`].
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        self.queue_state.shutdown.cancel();
        self.queue_state.wake.notify_waiters();
        tracing::info!("Stopped accepting new downloads");

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_workers()).await {
            Ok(()) => tracing::info!("All workers stopped"),
            Err(_) => {
                tracing::warn!("Timeout waiting for workers to stop, proceeding with shutdown")
            }
        }

        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_workers(&self) {
        loop {
            let stopped = self.queue_state.settled.notified();
            tokio::pin!(stopped);
            stopped.as_mut().enable();

            let workers = self.queue_state.inner.lock().await.workers;
            if workers == 0 {
                return;
            }
            tracing::debug!(workers, "Waiting for workers to stop");
            stopped.await;
        }
    }
}
