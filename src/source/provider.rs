//! Source-specific parsing.

use super::PageFetcher;
use crate::error::Result;
use crate::types::{Chapter, FreshChapter, StoryMetadata, SyncProgress};
use async_trait::async_trait;

/// Receives structured progress while a chapter index is being scraped
pub trait ProgressSink: Send + Sync {
    /// Report progress; must not block
    fn report(&self, progress: SyncProgress);
}

/// [`ProgressSink`] that discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: SyncProgress) {}
}

/// Parser for one family of story sites
///
/// Providers know a site's markup; they never touch the queue or the store.
/// Markup that does not match should be reported as [`crate::Error::Parse`] so
/// the downloader can retry it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs and error payloads
    fn name(&self) -> &str;

    /// Regex matched against story and chapter URLs
    fn url_pattern(&self) -> &str;

    /// Extract the chapter list from the story index page
    ///
    /// `index_html` is the already fetched page at `source_url`. Providers for
    /// sites with paginated chapter lists fetch the remaining pages through
    /// `fetcher` and report each page through `progress`.
    async fn chapter_list(
        &self,
        index_html: &str,
        source_url: &str,
        fetcher: &dyn PageFetcher,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<FreshChapter>>;

    /// Extract story metadata from the story index page
    fn parse_metadata(&self, index_html: &str, source_url: &str) -> Result<StoryMetadata>;

    /// Extract the body of a chapter page
    fn parse_chapter(&self, html: &str, chapter: &Chapter) -> Result<String>;
}
