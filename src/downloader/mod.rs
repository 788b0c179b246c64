//! Core downloader implementation split into focused submodules.
//!
//! The `ChapterDownloader` struct and its methods are organized by domain:
//! - [`commands`] - Job submission, cancellation, queries and settings
//! - [`worker`] - Worker pool draining the queue (fetch, persist, retry)
//! - [`sync`] - Chapter index re-scrape and merge
//! - [`lifecycle`] - Resume after restart, settle waits and shutdown

mod commands;
mod lifecycle;
mod sync;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::{Config, DownloadSettings};
use crate::db::SqliteStore;
use crate::error::Result;
use crate::events::{EventBus, SubscriptionId};
use crate::queue::DownloadQueue;
use crate::source::{HttpPageFetcher, PageFetcher, ProviderRegistry};
use crate::store::StoryStore;
use crate::types::{Event, EventKind, StoryId};
use crate::writer::{ChapterWriter, FsChapterWriter};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

/// External collaborators the downloader drives
#[derive(Clone)]
pub struct Services {
    /// Story snapshot and settings persistence
    pub store: Arc<dyn StoryStore>,
    /// Page retrieval
    pub fetcher: Arc<dyn PageFetcher>,
    /// Provider lookup by URL
    pub registry: Arc<ProviderRegistry>,
    /// Chapter body persistence
    pub writer: Arc<dyn ChapterWriter>,
}

/// Queue contents plus the bookkeeping that must change atomically with it
#[derive(Default)]
pub(crate) struct QueueInner {
    pub(crate) queue: DownloadQueue,
    /// Number of running worker tasks
    pub(crate) workers: usize,
    /// Terminal failures per story since the story last settled
    pub(crate) failures: HashMap<StoryId, usize>,
    /// Stories whose settled status is still being written
    pub(crate) settling: HashMap<StoryId, usize>,
}

impl QueueInner {
    /// Drop a finished job and report whether its story is now settled
    ///
    /// Returns the story's failure count when no job of the story is pending or
    /// downloading anymore. Only the caller that removes the last job sees `Some`.
    pub(crate) fn finish_job(
        &mut self,
        job_id: crate::types::JobId,
        story_id: &StoryId,
        failed: bool,
    ) -> Option<usize> {
        self.queue.remove(job_id);
        if failed {
            *self.failures.entry(story_id.clone()).or_default() += 1;
        }
        self.take_settled(story_id)
    }

    /// Failure count of `story_id` if it has no active jobs left
    ///
    /// A `Some` must be followed by [`ChapterDownloader::settle_story`], which
    /// calls [`Self::settle_done`].
    pub(crate) fn take_settled(&mut self, story_id: &StoryId) -> Option<usize> {
        if self.queue.stats_for_story(story_id).active() > 0 {
            return None;
        }
        *self.settling.entry(story_id.clone()).or_default() += 1;
        Some(self.failures.remove(story_id).unwrap_or(0))
    }

    pub(crate) fn settle_done(&mut self, story_id: &StoryId) {
        if let Some(count) = self.settling.get_mut(story_id) {
            *count -= 1;
            if *count == 0 {
                self.settling.remove(story_id);
            }
        }
    }

    /// Jobs pending or downloading plus settles in progress
    pub(crate) fn busy(&self, story_id: Option<&StoryId>) -> usize {
        match story_id {
            Some(id) => {
                self.queue.stats_for_story(id).active()
                    + self.settling.get(id).copied().unwrap_or(0)
            }
            None => self.queue.stats().active() + self.settling.values().sum::<usize>(),
        }
    }
}

/// Queue and worker pool state
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Job queue (protected by Mutex; dequeue and mark-downloading happen under one lock)
    pub(crate) inner: Arc<Mutex<QueueInner>>,
    /// Wakes idle workers on submission or settings change
    pub(crate) wake: Arc<Notify>,
    /// Notified whenever a story settles or a worker exits
    pub(crate) settled: Arc<Notify>,
    /// Flag to indicate whether new jobs are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Cancelled on shutdown; workers stop after their current job
    pub(crate) shutdown: CancellationToken,
}

/// Per-story async mutexes serializing read-modify-write of story snapshots
#[derive(Default)]
pub(crate) struct StoryLocks {
    locks: Mutex<HashMap<StoryId, Arc<Mutex<()>>>>,
}

impl StoryLocks {
    /// Acquire the lock of one story; unrelated stories never contend
    pub(crate) async fn lock(&self, story_id: &StoryId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(story_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget a story's lock (after deletion) unless someone holds or awaits it
    ///
    /// Every holder clones the `Arc` under the map lock, so a count of one here
    /// means the map owns the only reference.
    pub(crate) async fn forget(&self, story_id: &StoryId) -> bool {
        let mut locks = self.locks.lock().await;
        match locks.get(story_id) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                locks.remove(story_id);
                true
            }
            _ => false,
        }
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ChapterDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// External collaborators
    pub(crate) services: Services,
    /// Event fan-out
    pub(crate) events: EventBus,
    /// Queue and worker pool state
    pub(crate) queue_state: QueueState,
    /// Runtime-mutable download settings (loaded from the store, falling back to config)
    pub(crate) settings: Arc<RwLock<DownloadSettings>>,
    /// Per-story persistence locks
    pub(crate) story_locks: Arc<StoryLocks>,
}

impl ChapterDownloader {
    /// Create a new ChapterDownloader over the given collaborators
    ///
    /// This validates the configuration, loads saved download settings, and
    /// re-queues every chapter that was requested but not downloaded before the
    /// last exit (see [`Self::resume`]).
    pub async fn new(config: Config, services: Services) -> Result<Self> {
        config.validate()?;

        let settings = match services.store.load_settings().await? {
            Some(saved) => saved.clamped(),
            None => config.default_settings(),
        };
        tracing::info!(
            download_concurrency = settings.download_concurrency,
            download_delay_ms = settings.download_delay.as_millis() as u64,
            providers = services.registry.len(),
            "Chapter downloader initialized"
        );

        let queue_state = QueueState {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            wake: Arc::new(Notify::new()),
            settled: Arc::new(Notify::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        };

        let downloader = Self {
            events: EventBus::new(config.persistence.event_buffer),
            config: Arc::new(config),
            services,
            queue_state,
            settings: Arc::new(RwLock::new(settings)),
            story_locks: Arc::new(StoryLocks::default()),
        };

        // Restore any chapters that were still wanted when the last session ended
        downloader.resume().await?;

        Ok(downloader)
    }

    /// Create a downloader with the reference collaborators
    ///
    /// Stories and settings go to the SQLite database at
    /// `config.persistence.database_path`, pages are fetched over HTTP and chapter
    /// bodies are written below `config.download.chapter_dir`.
    pub async fn open(config: Config, registry: ProviderRegistry) -> Result<Self> {
        let store = SqliteStore::new(&config.persistence.database_path).await?;
        let fetcher = HttpPageFetcher::new(&config.download)?;
        let writer = FsChapterWriter::new(&config.download.chapter_dir);

        let services = Services {
            store: Arc::new(store),
            fetcher: Arc::new(fetcher),
            registry: Arc::new(registry),
            writer: Arc::new(writer),
        };
        Self::new(config, services).await
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than `persistence.event_buffer` events
    /// receives a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chapter_dl::{ChapterDownloader, Config, ProviderRegistry};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = ChapterDownloader::open(Config::default(), ProviderRegistry::new()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "download event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Stream of every event emitted from now on (lag notifications are dropped)
    pub fn event_stream(&self) -> impl tokio_stream::Stream<Item = Event> + Send + 'static {
        self.events.event_stream()
    }

    /// Register a callback for one kind of event
    pub async fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.events.on(kind, handler).await
    }

    /// Unregister a callback registered with [`Self::on`]
    pub async fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id).await
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        self.events.emit(event);
    }
}
