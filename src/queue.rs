//! Chapter download job queue.
//!
//! [`DownloadQueue`] is a plain data structure: it owns the job records and
//! enforces the job state machine, but does no locking and spawns nothing. The
//! downloader wraps it in a mutex, which is what makes [`DownloadQueue::dequeue_next`]
//! atomic with respect to the `pending -> downloading` transition.
//!
//! State machine:
//!
//! ```text
//! pending -> downloading -> completed
//!                        -> failed -> pending   (retry)
//!                                  -> (stays failed: exhausted)
//! ```
//!
//! Completed and failed jobs stay in the queue until the downloader has folded
//! their outcome into the persisted story and calls [`DownloadQueue::remove`].

use crate::error::{Error, Result};
use crate::types::{Chapter, DownloadJob, JobId, JobStatus, QueueStats, StoryId};
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct QueueEntry {
    job: DownloadJob,
    /// Earliest instant a requeued job may be dequeued again
    ready_at: Option<Instant>,
}

/// Ordered collection of chapter download jobs across all stories
#[derive(Debug, Default)]
pub struct DownloadQueue {
    /// Jobs in enqueue order
    entries: Vec<QueueEntry>,
    /// Jobs whose story was cancelled while they were in flight
    cancelled: HashSet<JobId>,
    next_id: u64,
}

impl DownloadQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create jobs for `chapters` of `story_id`
    ///
    /// Downloaded chapters and chapters that already have a pending or downloading
    /// job for this story are skipped. An in-flight job whose story was cancelled
    /// is wanted again instead of duplicated. Returns the jobs that were created
    /// or revived.
    pub fn enqueue<'a, I>(&mut self, story_id: &StoryId, chapters: I) -> Vec<DownloadJob>
    where
        I: IntoIterator<Item = &'a Chapter>,
    {
        let mut active: HashMap<_, _> = self
            .entries
            .iter()
            .filter(|e| &e.job.story_id == story_id && e.job.status.is_active())
            .map(|e| (e.job.chapter.id.clone(), Some(e.job.id)))
            .collect();

        let mut created = Vec::new();
        for chapter in chapters {
            if chapter.downloaded {
                continue;
            }
            match active.get_mut(&chapter.id) {
                Some(existing) => {
                    let revived = existing
                        .take()
                        .filter(|id| self.cancelled.remove(id))
                        .and_then(|id| self.get(id).cloned());
                    created.extend(revived);
                    continue;
                }
                None => {
                    active.insert(chapter.id.clone(), None);
                }
            }

            self.next_id += 1;
            let job = DownloadJob {
                id: JobId(self.next_id),
                story_id: story_id.clone(),
                chapter: chapter.clone(),
                status: JobStatus::Pending,
                attempt: 0,
                created_at: chrono::Utc::now(),
            };
            self.entries.push(QueueEntry {
                job: job.clone(),
                ready_at: None,
            });
            created.push(job);
        }
        created
    }

    /// Snapshot of every job of a story, in enqueue order
    pub fn jobs_for_story(&self, story_id: &StoryId) -> Vec<DownloadJob> {
        self.entries
            .iter()
            .filter(|e| &e.job.story_id == story_id)
            .map(|e| e.job.clone())
            .collect()
    }

    /// Look up a job
    pub fn get(&self, job_id: JobId) -> Option<&DownloadJob> {
        self.entries
            .iter()
            .find(|e| e.job.id == job_id)
            .map(|e| &e.job)
    }

    /// Take the oldest ready pending job, optionally scoped to one story
    ///
    /// The returned job is already marked `downloading` and its `attempt` counter
    /// incremented.
    pub fn dequeue_next(&mut self, story_id: Option<&StoryId>, now: Instant) -> Option<DownloadJob> {
        let entry = self.entries.iter_mut().find(|e| {
            e.job.status == JobStatus::Pending
                && story_id.is_none_or(|s| &e.job.story_id == s)
                && e.ready_at.is_none_or(|at| at <= now)
        })?;

        entry.job.status = JobStatus::Downloading;
        entry.job.attempt += 1;
        entry.ready_at = None;
        Some(entry.job.clone())
    }

    /// Earliest instant a delayed pending job becomes ready
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.job.status == JobStatus::Pending)
            .filter_map(|e| e.ready_at)
            .min()
    }

    /// `downloading -> completed`
    pub fn mark_completed(&mut self, job_id: JobId) -> Result<DownloadJob> {
        let entry = self.entry_mut(job_id)?;
        transition(&mut entry.job, JobStatus::Completed)?;
        Ok(entry.job.clone())
    }

    /// `downloading -> failed`, then back to `pending` when `retry_at` is given
    ///
    /// A job whose story was cancelled is never requeued. The returned snapshot is
    /// `pending` when the job will be retried and `failed` when it is terminal.
    pub fn mark_failed(&mut self, job_id: JobId, retry_at: Option<Instant>) -> Result<DownloadJob> {
        let wanted = !self.cancelled.contains(&job_id);
        let entry = self.entry_mut(job_id)?;
        transition(&mut entry.job, JobStatus::Failed)?;

        if let Some(at) = retry_at.filter(|_| wanted) {
            transition(&mut entry.job, JobStatus::Pending)?;
            entry.ready_at = Some(at);
        }
        Ok(entry.job.clone())
    }

    /// `downloading -> failed -> pending`, ready at once with a fresh attempt count
    ///
    /// Used when an in-flight job that was about to be discarded turns out to be
    /// wanted again.
    pub fn restart(&mut self, job_id: JobId) -> Result<DownloadJob> {
        let entry = self.entry_mut(job_id)?;
        transition(&mut entry.job, JobStatus::Failed)?;
        transition(&mut entry.job, JobStatus::Pending)?;
        entry.job.attempt = 0;
        entry.ready_at = None;
        Ok(entry.job.clone())
    }

    /// Drop a job record
    pub fn remove(&mut self, job_id: JobId) -> Option<DownloadJob> {
        self.cancelled.remove(&job_id);
        let index = self.entries.iter().position(|e| e.job.id == job_id)?;
        Some(self.entries.remove(index).job)
    }

    /// Remove a story's pending jobs and flag its in-flight jobs as unwanted
    ///
    /// Returns the number of pending jobs removed. In-flight jobs are not aborted;
    /// [`Self::is_wanted`] reports false for them from now on and they are never
    /// retried.
    pub fn cancel_for_story(&mut self, story_id: &StoryId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(&e.job.story_id == story_id && e.job.status == JobStatus::Pending));
        let removed = before - self.entries.len();

        for entry in &self.entries {
            if &entry.job.story_id == story_id && entry.job.status == JobStatus::Downloading {
                self.cancelled.insert(entry.job.id);
            }
        }
        removed
    }

    /// Whether the job is still queued and its story was not cancelled
    pub fn is_wanted(&self, job_id: JobId) -> bool {
        !self.cancelled.contains(&job_id) && self.get(job_id).is_some()
    }

    /// Queue occupancy across all stories
    pub fn stats(&self) -> QueueStats {
        self.count(|_| true)
    }

    /// Queue occupancy of one story
    pub fn stats_for_story(&self, story_id: &StoryId) -> QueueStats {
        self.count(|job| &job.story_id == story_id)
    }

    /// Whether any job is pending or downloading
    pub fn has_active(&self) -> bool {
        self.entries.iter().any(|e| e.job.status.is_active())
    }

    fn count(&self, filter: impl Fn(&DownloadJob) -> bool) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in self.entries.iter().filter(|e| filter(&e.job)) {
            match entry.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Downloading => stats.downloading += 1,
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }
        stats
    }

    fn entry_mut(&mut self, job_id: JobId) -> Result<&mut QueueEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.job.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }
}

fn transition(job: &mut DownloadJob, to: JobStatus) -> Result<()> {
    if !job.status.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            job_id: job.id,
            from: job.status,
            to,
        });
    }
    job.status = to;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChapterId;
    use std::time::Duration;

    fn chapter(id: &str) -> Chapter {
        Chapter {
            id: ChapterId::new(id),
            title: id.to_string(),
            url: format!("https://example.com/c/{id}"),
            downloaded: false,
            content: None,
            file_path: None,
        }
    }

    fn story(id: &str) -> StoryId {
        StoryId::new(id)
    }

    #[test]
    fn enqueue_skips_downloaded_chapters() {
        let mut queue = DownloadQueue::new();
        let done = Chapter {
            downloaded: true,
            ..chapter("a")
        };
        let chapters = vec![done, chapter("b")];

        let jobs = queue.enqueue(&story("s"), &chapters);

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].chapter.id.as_str(), "b");
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].attempt, 0);
    }

    #[test]
    fn enqueue_twice_creates_one_job() {
        let mut queue = DownloadQueue::new();
        let chapters = vec![chapter("a")];

        let first = queue.enqueue(&story("s"), &chapters);
        let second = queue.enqueue(&story("s"), &chapters);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(queue.jobs_for_story(&story("s")).len(), 1);
    }

    #[test]
    fn enqueue_dedups_within_one_call() {
        let mut queue = DownloadQueue::new();
        let chapters = vec![chapter("a"), chapter("a")];

        assert_eq!(queue.enqueue(&story("s"), &chapters).len(), 1);
    }

    #[test]
    fn same_chapter_id_in_different_stories_is_not_a_duplicate() {
        let mut queue = DownloadQueue::new();
        let chapters = vec![chapter("a")];

        queue.enqueue(&story("s1"), &chapters);
        queue.enqueue(&story("s2"), &chapters);

        assert_eq!(queue.stats().pending, 2);
    }

    #[test]
    fn enqueue_after_completion_creates_new_job() {
        let mut queue = DownloadQueue::new();
        let chapters = vec![chapter("a")];
        queue.enqueue(&story("s"), &chapters);
        let job = queue.dequeue_next(None, Instant::now()).unwrap();
        queue.mark_completed(job.id).unwrap();

        assert_eq!(queue.enqueue(&story("s"), &chapters).len(), 1);
    }

    #[test]
    fn dequeue_is_fifo_and_marks_downloading() {
        let mut queue = DownloadQueue::new();
        queue.enqueue(&story("s"), &[chapter("a"), chapter("b")]);

        let now = Instant::now();
        let first = queue.dequeue_next(None, now).unwrap();
        let second = queue.dequeue_next(None, now).unwrap();

        assert_eq!(first.chapter.id.as_str(), "a");
        assert_eq!(second.chapter.id.as_str(), "b");
        assert_eq!(first.status, JobStatus::Downloading);
        assert_eq!(first.attempt, 1);
        assert_ne!(first.id, second.id);
        assert!(queue.dequeue_next(None, now).is_none());
        assert_eq!(queue.stats().downloading, 2);
    }

    #[test]
    fn dequeue_can_be_scoped_to_a_story() {
        let mut queue = DownloadQueue::new();
        queue.enqueue(&story("s1"), &[chapter("a")]);
        queue.enqueue(&story("s2"), &[chapter("b")]);

        let job = queue
            .dequeue_next(Some(&story("s2")), Instant::now())
            .unwrap();

        assert_eq!(job.story_id, story("s2"));
        assert_eq!(queue.stats_for_story(&story("s1")).pending, 1);
    }

    #[test]
    fn failed_job_is_requeued_with_delay() {
        let mut queue = DownloadQueue::new();
        queue.enqueue(&story("s"), &[chapter("a")]);
        let now = Instant::now();
        let job = queue.dequeue_next(None, now).unwrap();

        let retry_at = now + Duration::from_secs(5);
        let requeued = queue.mark_failed(job.id, Some(retry_at)).unwrap();

        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(queue.next_ready_at(), Some(retry_at));
        assert!(queue.dequeue_next(None, now).is_none(), "not ready yet");

        let again = queue.dequeue_next(None, retry_at).unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempt, 2);
        assert_eq!(queue.next_ready_at(), None);
    }

    #[test]
    fn failed_without_retry_is_terminal() {
        let mut queue = DownloadQueue::new();
        queue.enqueue(&story("s"), &[chapter("a")]);
        let job = queue.dequeue_next(None, Instant::now()).unwrap();

        let failed = queue.mark_failed(job.id, None).unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert!(!queue.has_active());
        assert!(queue.remove(job.id).is_some());
        assert!(queue.jobs_for_story(&story("s")).is_empty());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut queue = DownloadQueue::new();
        let job = queue.enqueue(&story("s"), &[chapter("a")]).remove(0);

        match queue.mark_completed(job.id) {
            Err(Error::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, JobStatus::Pending);
                assert_eq!(to, JobStatus::Completed);
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
        assert!(matches!(
            queue.mark_failed(job.id, None),
            Err(Error::InvalidTransition { .. })
        ));

        queue.dequeue_next(None, Instant::now()).unwrap();
        queue.mark_completed(job.id).unwrap();
        assert!(matches!(
            queue.mark_completed(job.id),
            Err(Error::InvalidTransition {
                from: JobStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let mut queue = DownloadQueue::new();
        assert!(matches!(
            queue.mark_completed(JobId(42)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn cancel_removes_pending_and_flags_in_flight() {
        let mut queue = DownloadQueue::new();
        queue.enqueue(&story("s"), &[chapter("a"), chapter("b"), chapter("c")]);
        queue.enqueue(&story("other"), &[chapter("a")]);
        let in_flight = queue.dequeue_next(None, Instant::now()).unwrap();

        let removed = queue.cancel_for_story(&story("s"));

        assert_eq!(removed, 2);
        assert!(!queue.is_wanted(in_flight.id));
        assert_eq!(queue.stats_for_story(&story("s")).downloading, 1);
        assert_eq!(queue.stats_for_story(&story("other")).pending, 1);

        // a cancelled job is never retried
        let failed = queue
            .mark_failed(in_flight.id, Some(Instant::now()))
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
    }

    #[test]
    fn enqueue_revives_cancelled_in_flight_job() {
        let mut queue = DownloadQueue::new();
        queue.enqueue(&story("s"), &[chapter("a"), chapter("b")]);
        let in_flight = queue.dequeue_next(None, Instant::now()).unwrap();
        queue.cancel_for_story(&story("s"));

        let jobs = queue.enqueue(&story("s"), &[chapter("a"), chapter("b")]);

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, in_flight.id);
        assert_eq!(jobs[0].status, JobStatus::Downloading);
        assert_eq!(jobs[1].status, JobStatus::Pending);
        assert!(queue.is_wanted(in_flight.id));
        assert_eq!(queue.jobs_for_story(&story("s")).len(), 2);

        // once revived it is an ordinary active job again
        assert!(queue.enqueue(&story("s"), &[chapter("a")]).is_empty());
    }

    #[test]
    fn restart_makes_in_flight_job_ready_again() {
        let mut queue = DownloadQueue::new();
        queue.enqueue(&story("s"), &[chapter("a")]);
        let job = queue.dequeue_next(None, Instant::now()).unwrap();

        let restarted = queue.restart(job.id).unwrap();

        assert_eq!(restarted.status, JobStatus::Pending);
        assert_eq!(restarted.attempt, 0);
        let again = queue.dequeue_next(None, Instant::now()).unwrap();
        assert_eq!((again.id, again.attempt), (job.id, 1));
    }

    #[test]
    fn removed_job_is_no_longer_wanted() {
        let mut queue = DownloadQueue::new();
        let job = queue.enqueue(&story("s"), &[chapter("a")]).remove(0);
        assert!(queue.is_wanted(job.id));
        queue.remove(job.id);
        assert!(!queue.is_wanted(job.id));
    }
}
