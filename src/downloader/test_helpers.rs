//! Shared test helpers for creating ChapterDownloader instances in tests.

use crate::config::Config;
use crate::downloader::{ChapterDownloader, Services};
use crate::error::{FetchError, ParseError, Result};
use crate::source::{PageFetcher, ProgressSink, Provider, ProviderRegistry};
use crate::store::{MemoryStore, StoryStore};
use crate::types::{Chapter, Event, EventKind, FreshChapter, Story, StoryId, StoryMetadata};
use crate::writer::{ChapterWriter, FsChapterWriter};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::broadcast;

/// Base URL served by [`StubProvider`]
pub(crate) const BASE: &str = "https://fiction.example";

/// URL of the index page of story `story`
pub(crate) fn index_url(story: &str) -> String {
    format!("{}/s/{}", BASE, story)
}

/// URL of chapter `n` of story `story`
pub(crate) fn chapter_url(story: &str, n: usize) -> String {
    format!("{}/s/{}/c{}", BASE, story, n)
}

/// Index page listing chapters `range` in the `title|url` line format
pub(crate) fn index_page(story: &str, range: std::ops::RangeInclusive<usize>) -> String {
    let mut page = format!("# Story {}\n", story);
    for n in range {
        page.push_str(&format!("Chapter {}|{}\n", n, chapter_url(story, n)));
    }
    page
}

#[derive(Default)]
struct Page {
    body: String,
    failures_left: u32,
}

/// Scripted in-memory [`PageFetcher`]
///
/// Unknown URLs answer with HTTP 404. Tracks call counts per URL and the
/// highest number of concurrent fetches.
#[derive(Default)]
pub(crate) struct StubFetcher {
    pages: Mutex<HashMap<String, Page>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubFetcher {
    pub(crate) fn page(&self, url: &str, body: &str) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            Page {
                body: body.to_string(),
                failures_left: 0,
            },
        );
    }

    /// Make the next `times` fetches of `url` fail with HTTP 503
    pub(crate) fn fail_times(&self, url: &str, times: u32) {
        self.pages
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .failures_left = times;
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch_page(&self, url: &str) -> std::result::Result<String, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut pages = self.pages.lock().unwrap();
            match pages.get_mut(url) {
                Some(page) if page.failures_left > 0 => {
                    page.failures_left -= 1;
                    Err(FetchError::Status {
                        url: url.to_string(),
                        status: 503,
                    })
                }
                Some(page) => Ok(page.body.clone()),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Provider for `https://fiction.example/` pages
///
/// Index pages hold a `# Title` line followed by `title|url` lines. Chapter
/// pages are returned verbatim; an empty page is a parse error and a page
/// containing `PANIC` panics the parser.
pub(crate) struct StubProvider;

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn url_pattern(&self) -> &str {
        r"^https://fiction\.example/"
    }

    async fn chapter_list(
        &self,
        index_html: &str,
        _source_url: &str,
        _fetcher: &dyn PageFetcher,
        _progress: &dyn ProgressSink,
    ) -> Result<Vec<FreshChapter>> {
        Ok(index_html
            .lines()
            .filter_map(|line| line.split_once('|'))
            .map(|(title, url)| FreshChapter::new(title.trim(), url.trim()))
            .collect())
    }

    fn parse_metadata(&self, index_html: &str, _source_url: &str) -> Result<StoryMetadata> {
        let title = index_html
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .ok_or_else(|| ParseError::MissingElement {
                provider: "stub".to_string(),
                what: "title".to_string(),
            })?;
        Ok(StoryMetadata {
            title: title.trim().to_string(),
            ..Default::default()
        })
    }

    fn parse_chapter(&self, html: &str, _chapter: &Chapter) -> Result<String> {
        if html.contains("PANIC") {
            panic!("parser exploded");
        }
        if html.trim().is_empty() {
            return Err(ParseError::MissingElement {
                provider: "stub".to_string(),
                what: "chapter body".to_string(),
            }
            .into());
        }
        Ok(html.trim().to_string())
    }
}

/// [`FsChapterWriter`] that lingers after each write, so a test can act while a
/// body is on disk but not yet recorded in the story
pub(crate) struct SlowWriter {
    pub(crate) inner: FsChapterWriter,
    pub(crate) delay: Duration,
}

#[async_trait]
impl ChapterWriter for SlowWriter {
    async fn write_chapter(
        &self,
        story_id: &StoryId,
        chapter: &Chapter,
        body: &str,
    ) -> Result<String> {
        let path = self.inner.write_chapter(story_id, chapter, body).await?;
        tokio::time::sleep(self.delay).await;
        Ok(path)
    }

    async fn remove_chapter(&self, story_id: &StoryId, path: &str) -> Result<()> {
        self.inner.remove_chapter(story_id, path).await
    }

    async fn remove_story(&self, story_id: &StoryId) -> Result<()> {
        self.inner.remove_story(story_id).await
    }
}

/// Everything a downloader test needs to drive and inspect the pipeline
pub(crate) struct TestHarness {
    pub(crate) downloader: ChapterDownloader,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) fetcher: Arc<StubFetcher>,
    pub(crate) services: Services,
    pub(crate) config: Config,
    /// Keeps the chapter directory alive
    pub(crate) _temp_dir: tempfile::TempDir,
}

/// Config with fast retries and no politeness delay
pub(crate) fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_concurrency = 3;
    config.download.download_delay = Duration::ZERO;
    config.download.fetch_timeout = Duration::from_secs(2);
    config.download.chapter_dir = temp_dir.path().join("chapters");
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

/// Story `story` with chapters `1..=count`, none downloaded
pub(crate) fn story_with_chapters(story: &str, count: usize) -> Story {
    let mut s = Story::new(story, index_url(story));
    s.chapters = (1..=count)
        .map(|n| Chapter::new(format!("Chapter {}", n), chapter_url(story, n)))
        .collect();
    s.recount();
    s
}

/// Serve a body for chapters `1..=count` of `story`
pub(crate) fn serve_chapters(fetcher: &StubFetcher, story: &str, count: usize) {
    for n in 1..=count {
        fetcher.page(&chapter_url(story, n), &format!("<p>body {}</p>", n));
    }
}

/// Helper to create a test ChapterDownloader over an in-memory store.
pub(crate) async fn create_test_downloader() -> TestHarness {
    create_test_downloader_with(|_| {}, Vec::new()).await
}

/// Like [`create_test_downloader`], with config tweaks and pre-stored stories
pub(crate) async fn create_test_downloader_with(
    tweak: impl FnOnce(&mut Config),
    stories: Vec<Story>,
) -> TestHarness {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    tweak(&mut config);

    let store = Arc::new(MemoryStore::with_stories(stories));
    let fetcher = Arc::new(StubFetcher::default());
    let registry = ProviderRegistry::new().with(Arc::new(StubProvider)).unwrap();

    let services = Services {
        store: store.clone(),
        fetcher: fetcher.clone(),
        registry: Arc::new(registry),
        writer: Arc::new(FsChapterWriter::new(&config.download.chapter_dir)),
    };
    let downloader = ChapterDownloader::new(config.clone(), services.clone())
        .await
        .unwrap();

    TestHarness {
        downloader,
        store,
        fetcher,
        services,
        config,
        _temp_dir: temp_dir,
    }
}

impl TestHarness {
    pub(crate) async fn story(&self, story: &str) -> Story {
        self.store
            .load_story(&StoryId::new(story))
            .await
            .unwrap()
            .unwrap()
    }

    pub(crate) async fn save(&self, story: &Story) {
        self.store.save_story(story).await.unwrap();
    }

    /// Shut the downloader down and start a new one over the same collaborators
    pub(crate) async fn restart(self) -> TestHarness {
        self.downloader.shutdown().await.unwrap();
        let downloader = ChapterDownloader::new(self.config.clone(), self.services.clone())
            .await
            .unwrap();
        TestHarness { downloader, ..self }
    }

    /// Wait for the pipeline to go idle, failing the test after 5 seconds
    pub(crate) async fn settle(&self) {
        tokio::time::timeout(
            Duration::from_secs(5),
            self.downloader.wait_until_settled(None),
        )
        .await
        .expect("downloads did not settle in time");
    }
}

/// Drain every event currently buffered in `rx`
pub(crate) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn count_kind(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}
