//! # chapter-dl
//!
//! Chapter download pipeline for serialized web fiction.
//!
//! A story's chapter index is periodically re-scraped, reconciled against the
//! stored chapter list without losing downloaded content or the reading bookmark,
//! and the missing chapter bodies are fetched by a bounded, rate-limited worker
//! pool that survives partial failure and restarts.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Pluggable** - Fetching, parsing, storage and body persistence are traits
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Restart-safe** - The queue is rebuilt from persisted stories on startup
//!
//! ## Quick Start
//!
//! ```no_run
//! use chapter_dl::{ChapterDownloader, Config, ProviderRegistry, StoryId};
//!
//! # fn my_provider() -> std::sync::Arc<dyn chapter_dl::Provider> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ProviderRegistry::new().with(my_provider())?;
//!     let downloader = ChapterDownloader::open(Config::default(), registry).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let story_id = StoryId::new("my-story");
//!     downloader.add_story(&story_id, "https://example.com/story/1").await?;
//!     let outcome = downloader.sync_chapters(&story_id).await?;
//!     println!("{} new chapters", outcome.new_chapter_ids.len());
//!     downloader.wait_until_settled(Some(&story_id)).await;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// SQLite persistence layer
pub mod db;
/// Download manager (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Event fan-out
pub mod events;
/// Chapter list reconciliation
pub mod merge;
/// Chapter download job queue
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Page fetching and source parsing
pub mod source;
/// Story persistence seam
pub mod store;
/// Core types and events
pub mod types;
/// Chapter body persistence
pub mod writer;

// Re-export commonly used types
pub use config::{Config, DownloadSettings};
pub use db::SqliteStore;
pub use downloader::{ChapterDownloader, Services};
pub use error::{Error, FetchError, ParseError, Result, StorageError};
pub use events::SubscriptionId;
pub use merge::{MergeResult, merge};
pub use source::{
    HttpPageFetcher, NoProgress, PageFetcher, ProgressSink, Provider, ProviderRegistry,
};
pub use store::{MemoryStore, StoryStore};
pub use types::{
    Chapter, ChapterId, DownloadJob, Event, EventKind, FreshChapter, JobFailure, JobId,
    JobStatus, QueueStats, Story, StoryId, StoryMetadata, StoryStatus, SyncOutcome,
    SyncProgress, SyncStage,
};
pub use writer::{ChapterWriter, FsChapterWriter};

/// Run the downloader until a termination signal arrives, then shut it down.
///
/// - **Unix:** SIGTERM or SIGINT
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`
///
/// # Example
///
/// ```no_run
/// use chapter_dl::{ChapterDownloader, Config, ProviderRegistry, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = ChapterDownloader::open(Config::default(), ProviderRegistry::new()).await?;
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: ChapterDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
