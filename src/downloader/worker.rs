//! Worker pool draining the chapter queue.
//!
//! Workers are global across stories. Each one loops:
//! 1. Dequeues the oldest ready job (atomic with marking it downloading)
//! 2. Fetches, parses and writes the chapter body without holding the queue lock
//! 3. Marks the chapter downloaded under the story's lock
//! 4. Requeues with backoff or reports a terminal failure
//! 5. Waits the politeness delay before taking the next job
//!
//! Workers are spawned on demand and exit once no pending job is left, or when
//! the configured concurrency drops below the number of running workers.

use crate::error::{Error, FetchError, Result};
use crate::retry::{IsRetryable, backoff_delay};
use crate::types::{
    Chapter, DownloadJob, Event, JobFailure, JobStatus, Story, StoryId, StoryStatus,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;

use super::ChapterDownloader;

enum Next {
    Job(DownloadJob),
    WaitUntil(Instant),
    Exit,
}

enum Completion {
    Persisted(DownloadJob),
    /// The story was cancelled while the job was in flight
    Cancelled,
    /// The story or the chapter is gone from the store
    Dropped,
}

impl ChapterDownloader {
    /// Spawn workers until the pool matches the configured concurrency
    /// (or the number of pending jobs, whichever is lower)
    pub(crate) async fn ensure_workers(&self) {
        let concurrency = self.settings.read().await.download_concurrency;

        let spawned = {
            let mut inner = self.queue_state.inner.lock().await;
            let wanted = concurrency.min(inner.queue.stats().pending);
            let mut spawned = Vec::new();
            while inner.workers < wanted {
                inner.workers += 1;
                spawned.push(inner.workers);
            }
            spawned
        };

        for slot in spawned {
            let downloader = self.clone();
            tokio::spawn(async move { downloader.run_worker(slot).await });
        }
        self.queue_state.wake.notify_waiters();
    }

    async fn run_worker(self, slot: usize) {
        tracing::debug!(slot, "Worker started");

        loop {
            if self.queue_state.shutdown.is_cancelled() {
                self.queue_state.inner.lock().await.workers -= 1;
                break;
            }

            let concurrency = self.settings.read().await.download_concurrency;
            let wake = self.queue_state.wake.notified();
            tokio::pin!(wake);

            let next = {
                let mut inner = self.queue_state.inner.lock().await;
                // Register for wake-ups before releasing the lock so a submit
                // between here and the wait below is not missed
                wake.as_mut().enable();

                if inner.workers > concurrency {
                    inner.workers -= 1;
                    Next::Exit
                } else if let Some(job) = inner.queue.dequeue_next(None, Instant::now()) {
                    Next::Job(job)
                } else if let Some(at) = inner.queue.next_ready_at() {
                    Next::WaitUntil(at)
                } else {
                    inner.workers -= 1;
                    Next::Exit
                }
            };

            match next {
                Next::Job(job) => {
                    self.process_job(job).await;

                    let delay = self.settings.read().await.download_delay;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.queue_state.shutdown.cancelled() => {}
                        }
                    }
                }
                Next::WaitUntil(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = &mut wake => {}
                        _ = self.queue_state.shutdown.cancelled() => {}
                    }
                }
                Next::Exit => break,
            }
        }

        tracing::debug!(slot, "Worker stopped");
        self.queue_state.settled.notify_waiters();
    }

    /// Run one fetch attempt and fold its outcome into the queue and the store
    async fn process_job(&self, job: DownloadJob) {
        tracing::info!(
            job_id = %job.id,
            story_id = %job.story_id,
            chapter_id = %job.chapter.id,
            attempt = job.attempt,
            "Downloading chapter"
        );
        self.emit_event(Event::JobStarted { job: job.clone() });

        let outcome = AssertUnwindSafe(self.download_chapter(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(job_id = %job.id, panic = %message, "Chapter job panicked");
                Err(Error::Other(format!("chapter job panicked: {}", message)))
            });

        match outcome {
            Ok(Completion::Persisted(completed)) => {
                tracing::info!(
                    job_id = %job.id,
                    story_id = %job.story_id,
                    chapter_id = %job.chapter.id,
                    "Chapter downloaded"
                );
                self.emit_event(Event::JobCompleted { job: completed });
                self.finish(&job, false).await;
            }
            Ok(Completion::Cancelled) => self.discard(&job, true).await,
            Ok(Completion::Dropped) => self.discard(&job, false).await,
            Err(e) => self.handle_failure(job, e).await,
        }
    }

    /// Fetch, parse, write and persist one chapter
    async fn download_chapter(&self, job: &DownloadJob) -> Result<Completion> {
        let provider = self.services.registry.provider_for(&job.chapter.url)?;

        let timeout = self.config.download.fetch_timeout;
        let html = tokio::time::timeout(timeout, self.services.fetcher.fetch_page(&job.chapter.url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: job.chapter.url.clone(),
                timeout,
            })??;

        let body = provider.parse_chapter(&html, &job.chapter)?;

        if !self.queue_state.inner.lock().await.queue.is_wanted(job.id) {
            return Ok(Completion::Cancelled);
        }
        let path = self
            .services
            .writer
            .write_chapter(&job.story_id, &job.chapter, &body)
            .await?;

        self.persist_completion(job, path).await
    }

    /// Mark the chapter downloaded in the stored story, then complete the job
    async fn persist_completion(&self, job: &DownloadJob, path: String) -> Result<Completion> {
        let _guard = self.story_locks.lock(&job.story_id).await;

        let wanted = self.queue_state.inner.lock().await.queue.is_wanted(job.id);
        let story = self.services.store.load_story(&job.story_id).await?;

        // Cancellation may have happened while the body was being written
        if !wanted {
            self.remove_unclaimed_body(job, story.as_ref(), &path).await;
            return Ok(Completion::Cancelled);
        }

        let Some(mut story) = story else {
            tracing::warn!(story_id = %job.story_id, "Story disappeared while downloading");
            self.remove_unclaimed_body(job, None, &path).await;
            return Ok(Completion::Dropped);
        };
        let Some(chapter) = story.chapters.iter_mut().find(|c| c.id == job.chapter.id) else {
            tracing::warn!(
                story_id = %job.story_id,
                chapter_id = %job.chapter.id,
                "Chapter no longer listed, discarding download"
            );
            self.remove_unclaimed_body(job, None, &path).await;
            return Ok(Completion::Dropped);
        };

        mark_downloaded(chapter, path);
        story.pending_new_chapter_ids.retain(|id| id != &job.chapter.id);
        story.recount();
        story.updated_at = chrono::Utc::now();
        self.services.store.save_story(&story).await?;

        let completed = self
            .queue_state
            .inner
            .lock()
            .await
            .queue
            .mark_completed(job.id)?;
        Ok(Completion::Persisted(completed))
    }

    /// Delete a written body unless the stored story already points at it
    async fn remove_unclaimed_body(&self, job: &DownloadJob, story: Option<&Story>, path: &str) {
        let claimed = story
            .and_then(|s| s.chapters.iter().find(|c| c.id == job.chapter.id))
            .is_some_and(|c| c.downloaded && c.file_path.as_deref() == Some(path));
        if claimed {
            return;
        }
        if let Err(e) = self.services.writer.remove_chapter(&job.story_id, path).await {
            tracing::warn!(
                job_id = %job.id,
                path,
                error = %e,
                "Failed to remove discarded chapter body"
            );
        }
    }

    /// Requeue a failed job with backoff, or report it as terminally failed
    async fn handle_failure(&self, job: DownloadJob, error: Error) {
        let retry = &self.config.retry;
        // `attempt` counts started attempts, so `attempt - 1` retries have happened
        let retry_at = (error.is_retryable() && job.attempt <= retry.max_attempts)
            .then(|| Instant::now() + backoff_delay(retry, job.attempt));

        let (snapshot, stats) = {
            let mut inner = self.queue_state.inner.lock().await;
            let wanted = inner.queue.is_wanted(job.id);
            let snapshot = inner.queue.mark_failed(job.id, retry_at);
            (
                snapshot.map(|s| (s, wanted)),
                inner.queue.stats_for_story(&job.story_id),
            )
        };

        match snapshot {
            Ok((requeued, _)) if requeued.status == JobStatus::Pending => {
                tracing::warn!(
                    job_id = %job.id,
                    story_id = %job.story_id,
                    attempt = job.attempt,
                    max_attempts = retry.max_attempts,
                    error = %error,
                    "Chapter download failed, retrying"
                );
                self.emit_event(Event::QueueUpdated {
                    story_id: job.story_id.clone(),
                    stats,
                });
                self.queue_state.wake.notify_waiters();
            }
            Ok((_, false)) => self.discard(&job, false).await,
            Ok((failed, true)) => {
                tracing::error!(
                    job_id = %job.id,
                    story_id = %job.story_id,
                    chapter_id = %job.chapter.id,
                    attempt = job.attempt,
                    error_code = error.error_code(),
                    error = %error,
                    "Chapter download failed"
                );
                self.emit_event(Event::JobFailed {
                    job: failed,
                    error: JobFailure::from(&error),
                });
                self.finish(&job, true).await;
            }
            Err(e) => {
                // The job was removed or settled behind our back
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job failure");
                self.finish(&job, false).await;
            }
        }
    }

    /// Settle an unwanted job without events
    ///
    /// With `revivable`, a job that was requested again after its story was
    /// cancelled goes back to pending instead.
    async fn discard(&self, job: &DownloadJob, revivable: bool) {
        let revived = {
            let mut inner = self.queue_state.inner.lock().await;
            let in_flight = inner
                .queue
                .get(job.id)
                .is_some_and(|j| j.status == JobStatus::Downloading);

            if in_flight && revivable && inner.queue.is_wanted(job.id) {
                inner.queue.restart(job.id).is_ok()
            } else {
                if in_flight && let Err(e) = inner.queue.mark_failed(job.id, None) {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to record discarded job");
                }
                false
            }
        };

        if revived {
            tracing::debug!(
                job_id = %job.id,
                story_id = %job.story_id,
                "Cancelled job requested again, requeued"
            );
            self.queue_state.wake.notify_waiters();
            return;
        }

        tracing::debug!(
            job_id = %job.id,
            story_id = %job.story_id,
            "Discarding result of unwanted job"
        );
        self.finish(job, false).await;
    }

    /// Remove a finished job and settle its story if it was the last one
    async fn finish(&self, job: &DownloadJob, failed: bool) {
        let settled = self
            .queue_state
            .inner
            .lock()
            .await
            .finish_job(job.id, &job.story_id, failed);

        if let Some(failed) = settled {
            self.settle_story(&job.story_id, failed).await;
        }
    }

    /// Derive the settled status of a story and announce it
    pub(crate) async fn settle_story(&self, story_id: &StoryId, failed: usize) {
        let result: Result<Option<(usize, usize, StoryStatus)>> = async {
            let _guard = self.story_locks.lock(story_id).await;

            // A submit may have raced in after the last job finished
            if self
                .queue_state
                .inner
                .lock()
                .await
                .queue
                .stats_for_story(story_id)
                .active()
                > 0
            {
                return Ok(None);
            }

            let Some(mut story) = self.services.store.load_story(story_id).await? else {
                return Ok(None);
            };
            story.recount();
            story.status = StoryStatus::from_counts(story.downloaded_chapters, story.total_chapters);
            story.updated_at = chrono::Utc::now();
            self.services.store.save_story(&story).await?;
            Ok(Some((story.downloaded_chapters, story.total_chapters, story.status)))
        }
        .await;

        match result {
            Ok(Some((downloaded, total, status))) => {
                tracing::info!(
                    story_id = %story_id,
                    downloaded,
                    total,
                    failed,
                    ?status,
                    "Story downloads settled"
                );
                self.emit_event(Event::StorySettled {
                    story_id: story_id.clone(),
                    downloaded,
                    total,
                    failed,
                    status,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(story_id = %story_id, error = %e, "Failed to persist settled story");
            }
        }
        self.queue_state.inner.lock().await.settle_done(story_id);
        self.queue_state.settled.notify_waiters();
    }
}

fn mark_downloaded(chapter: &mut Chapter, path: String) {
    chapter.downloaded = true;
    chapter.file_path = Some(path);
}
