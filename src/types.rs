//! Core types and events for chapter-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a story
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(pub String);

impl StoryId {
    /// Create a new StoryId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StoryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a chapter, unique within a story's chapter list
///
/// Usually the canonical chapter URL, sometimes a site-prefixed numeric id
/// assigned by a provider. Stable across re-scrapes as long as the source keeps
/// its URLs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(pub String);

impl ChapterId {
    /// Create a ChapterId from an explicit value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a ChapterId from a chapter URL
    ///
    /// The URL is canonicalized: the fragment is dropped and a trailing `/` on a
    /// non-root path is trimmed. Strings that do not parse as URLs are used
    /// as-is after trimming whitespace.
    pub fn from_url(raw: &str) -> Self {
        let trimmed = raw.trim();
        match url::Url::parse(trimmed) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                let path = parsed.path().to_string();
                if path.len() > 1 && path.ends_with('/') {
                    parsed.set_path(path.trim_end_matches('/'));
                }
                Self(parsed.to_string())
            }
            Err(_) => Self(trimmed.to_string()),
        }
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChapterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier for a download job (process-local, not persisted)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chapter of a story as persisted by the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter identity
    pub id: ChapterId,
    /// Display title
    pub title: String,
    /// Source URL of the chapter page
    pub url: String,
    /// Whether the chapter body has been fetched and persisted
    #[serde(default)]
    pub downloaded: bool,
    /// Inline body, when the host keeps content in the story record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Path of the persisted chapter body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Chapter {
    /// Create an undownloaded chapter whose id is derived from its URL
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: ChapterId::from_url(&url),
            title: title.into(),
            url,
            downloaded: false,
            content: None,
            file_path: None,
        }
    }
}

/// A chapter entry as extracted from a freshly scraped chapter index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshChapter {
    /// Display title
    pub title: String,
    /// Chapter URL
    pub url: String,
    /// Explicit id assigned by the provider (derived from `url` when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ChapterId>,
}

impl FreshChapter {
    /// Create a fresh entry without an explicit id
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            id: None,
        }
    }

    /// Resolve the identity of this entry
    pub fn chapter_id(&self) -> ChapterId {
        self.id
            .clone()
            .unwrap_or_else(|| ChapterId::from_url(&self.url))
    }
}

/// Story metadata extracted by a provider from the story index page
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryMetadata {
    /// Story title
    pub title: String,
    /// Author name
    #[serde(default)]
    pub author: Option<String>,
    /// Cover image URL
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Tags / genres
    #[serde(default)]
    pub tags: Vec<String>,
    /// Synopsis
    #[serde(default)]
    pub description: Option<String>,
    /// Rating as shown by the source
    #[serde(default)]
    pub score: Option<String>,
    /// Canonical URL of the story page
    #[serde(default)]
    pub canonical_url: Option<String>,
}

/// Lifecycle tag of a story's downloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    /// Nothing downloaded and nothing in flight
    #[default]
    Idle,
    /// Jobs for this story are pending or downloading
    Downloading,
    /// Some, but not all, chapters downloaded
    Partial,
    /// Every chapter downloaded
    Completed,
}

impl StoryStatus {
    /// Derive the settled status from chapter counters
    pub fn from_counts(downloaded: usize, total: usize) -> Self {
        if total > 0 && downloaded >= total {
            StoryStatus::Completed
        } else if downloaded == 0 {
            StoryStatus::Idle
        } else {
            StoryStatus::Partial
        }
    }
}

/// A story snapshot, owned by the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Story identity
    pub id: StoryId,
    /// URL of the chapter index page used for scraping
    pub source_url: String,
    /// Number of chapters in `chapters`
    #[serde(default)]
    pub total_chapters: usize,
    /// Number of chapters with `downloaded == true`
    #[serde(default)]
    pub downloaded_chapters: usize,
    /// Chapters in reading order
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    /// Bookmark (by id, never index)
    #[serde(default)]
    pub last_read_chapter_id: Option<ChapterId>,
    /// Chapters discovered by a merge or requested for download but not yet downloaded
    #[serde(default)]
    pub pending_new_chapter_ids: Vec<ChapterId>,
    /// Download lifecycle tag
    #[serde(default)]
    pub status: StoryStatus,
    /// Metadata from the last successful sync
    #[serde(default)]
    pub metadata: Option<StoryMetadata>,
    /// Last modification time
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Story {
    /// Create an empty story for a source URL
    pub fn new(id: impl Into<StoryId>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            total_chapters: 0,
            downloaded_chapters: 0,
            chapters: Vec::new(),
            last_read_chapter_id: None,
            pending_new_chapter_ids: Vec::new(),
            status: StoryStatus::Idle,
            metadata: None,
            updated_at: Utc::now(),
        }
    }

    /// Look up a chapter by id
    pub fn chapter(&self, id: &ChapterId) -> Option<&Chapter> {
        self.chapters.iter().find(|c| &c.id == id)
    }

    /// Recompute `total_chapters` and `downloaded_chapters` from the chapter list
    pub fn recount(&mut self) {
        self.total_chapters = self.chapters.len();
        self.downloaded_chapters = self.chapters.iter().filter(|c| c.downloaded).count();
    }

    /// Chapters that are not downloaded yet, in reading order
    pub fn undownloaded(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter().filter(|c| !c.downloaded)
    }
}

/// Lifecycle state of a download job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    Pending,
    /// A worker is fetching this chapter
    Downloading,
    /// Chapter fetched and persisted
    Completed,
    /// Fetch failed
    Failed,
}

impl JobStatus {
    /// Whether `self -> next` is an edge of the job state machine
    ///
    /// `Failed -> Pending` is the retry edge.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Downloading)
                | (JobStatus::Downloading, JobStatus::Completed)
                | (JobStatus::Downloading, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Pending)
        )
    }

    /// Pending or downloading
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Downloading)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One unit of work: fetching a single chapter body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Job identity
    pub id: JobId,
    /// Story the chapter belongs to
    pub story_id: StoryId,
    /// Chapter snapshot at enqueue time
    pub chapter: Chapter,
    /// Current state
    pub status: JobStatus,
    /// Number of fetch attempts started so far
    pub attempt: u32,
    /// Enqueue time
    pub created_at: DateTime<Utc>,
}

/// Why a job failed, as carried by [`Event::JobFailed`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable error code (e.g. "fetch_timeout", "unsupported_source")
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// Stage of a chapter index sync
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Fetching the index page
    FetchingIndex,
    /// Walking paginated chapter lists
    ParsingChapters,
    /// Reconciling with the stored list
    Merging,
    /// Submitting download jobs
    Queueing,
}

/// Structured progress of a chapter index sync
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Current stage
    pub stage: SyncStage,
    /// Units done within the stage
    pub current: usize,
    /// Units expected within the stage, when known
    pub total: Option<usize>,
}

impl SyncProgress {
    /// Progress at the start of a stage
    pub fn stage(stage: SyncStage) -> Self {
        Self {
            stage,
            current: 0,
            total: None,
        }
    }
}

/// Snapshot of queue occupancy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for a worker
    pub pending: usize,
    /// Jobs being fetched
    pub downloading: usize,
}

impl QueueStats {
    /// Pending plus downloading
    pub fn active(&self) -> usize {
        self.pending + self.downloading
    }
}

/// Result of [`crate::ChapterDownloader::sync_chapters`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Story that was synced
    pub story_id: StoryId,
    /// Chapters seen for the first time
    pub new_chapter_ids: Vec<ChapterId>,
    /// Chapters no longer listed by the source
    pub removed_chapter_ids: Vec<ChapterId>,
    /// Chapter count after the merge
    pub total_chapters: usize,
    /// Downloaded chapter count after the merge
    pub downloaded_chapters: usize,
    /// Jobs created by the follow-up submit
    pub jobs_created: usize,
}

/// Event emitted by the downloader
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Jobs were added to, requeued in, or removed from the queue
    QueueUpdated {
        /// Story whose jobs changed
        story_id: StoryId,
        /// Queue occupancy after the change
        stats: QueueStats,
    },

    /// A worker started a fetch attempt
    JobStarted {
        /// Job snapshot (status `downloading`)
        job: DownloadJob,
    },

    /// A chapter was fetched and persisted
    JobCompleted {
        /// Job snapshot (status `completed`)
        job: DownloadJob,
    },

    /// A job failed terminally (retries exhausted or error not retryable)
    JobFailed {
        /// Job snapshot (status `failed`)
        job: DownloadJob,
        /// Underlying error
        error: JobFailure,
    },

    /// A story has no pending or downloading jobs left
    StorySettled {
        /// Story id
        story_id: StoryId,
        /// Downloaded chapter count
        downloaded: usize,
        /// Total chapter count
        total: usize,
        /// Jobs of this batch that failed terminally
        failed: usize,
        /// Settled status
        status: StoryStatus,
    },

    /// Progress of a running chapter index sync
    SyncProgress {
        /// Story being synced
        story_id: StoryId,
        /// Progress value
        progress: SyncProgress,
    },

    /// Downloader is shutting down
    Shutdown,
}

/// Discriminant of [`Event`], used to filter handler subscriptions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// [`Event::QueueUpdated`]
    QueueUpdated,
    /// [`Event::JobStarted`]
    JobStarted,
    /// [`Event::JobCompleted`]
    JobCompleted,
    /// [`Event::JobFailed`]
    JobFailed,
    /// [`Event::StorySettled`]
    StorySettled,
    /// [`Event::SyncProgress`]
    SyncProgress,
    /// [`Event::Shutdown`]
    Shutdown,
}

impl Event {
    /// Discriminant of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::QueueUpdated { .. } => EventKind::QueueUpdated,
            Event::JobStarted { .. } => EventKind::JobStarted,
            Event::JobCompleted { .. } => EventKind::JobCompleted,
            Event::JobFailed { .. } => EventKind::JobFailed,
            Event::StorySettled { .. } => EventKind::StorySettled,
            Event::SyncProgress { .. } => EventKind::SyncProgress,
            Event::Shutdown => EventKind::Shutdown,
        }
    }
}
