//! Multiple event subscribers example
//!
//! This example demonstrates how multiple parts of your application
//! can independently observe the download pipeline:
//! - a raw broadcast receiver rendering progress
//! - a typed callback counting failures
//! - an event stream logging settled stories
//!
//! It serves a tiny story from an in-process page fetcher, so it runs offline.

use async_trait::async_trait;
use chapter_dl::{
    Chapter, ChapterDownloader, Config, Event, EventKind, FetchError, FreshChapter, FsChapterWriter,
    MemoryStore, PageFetcher, ProgressSink, Provider, ProviderRegistry, Services, Story, StoryId,
    StoryMetadata, StoryStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_stream::StreamExt;

const INDEX: &str = "offline://tale";

/// Serves pages from a fixed map; `offline://tale/3` fails once
struct OfflineFetcher {
    pages: HashMap<String, String>,
    flaky_left: AtomicUsize,
}

#[async_trait]
impl PageFetcher for OfflineFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if url.ends_with("/3")
            && self
                .flaky_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Index pages are one chapter URL per line
struct LineProvider;

#[async_trait]
impl Provider for LineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    fn url_pattern(&self) -> &str {
        r"^offline://"
    }

    async fn chapter_list(
        &self,
        index_html: &str,
        _source_url: &str,
        _fetcher: &dyn PageFetcher,
        _progress: &dyn ProgressSink,
    ) -> chapter_dl::Result<Vec<FreshChapter>> {
        Ok(index_html
            .lines()
            .enumerate()
            .map(|(i, url)| FreshChapter::new(format!("Part {}", i + 1), url))
            .collect())
    }

    fn parse_metadata(
        &self,
        _index_html: &str,
        _source_url: &str,
    ) -> chapter_dl::Result<StoryMetadata> {
        Ok(StoryMetadata {
            title: "An Offline Tale".to_string(),
            ..Default::default()
        })
    }

    fn parse_chapter(&self, html: &str, _chapter: &Chapter) -> chapter_dl::Result<String> {
        Ok(html.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("chapter_dl=warn"))
        .init();

    let mut pages = HashMap::new();
    let urls: Vec<String> = (1..=5).map(|n| format!("{}/{}", INDEX, n)).collect();
    pages.insert(INDEX.to_string(), urls.join("\n"));
    for (n, url) in urls.iter().enumerate() {
        pages.insert(url.clone(), format!("<p>Part {} of the tale.</p>", n + 1));
    }

    let chapter_dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    store.save_story(&Story::new("tale", INDEX)).await?;

    let mut config = Config::default();
    config.download.download_concurrency = 2;
    config.download.download_delay = Duration::from_millis(100);
    config.retry.initial_delay = Duration::from_millis(200);

    let services = Services {
        store,
        fetcher: Arc::new(OfflineFetcher {
            pages,
            flaky_left: AtomicUsize::new(1),
        }),
        registry: Arc::new(ProviderRegistry::new().with(Arc::new(LineProvider))?),
        writer: Arc::new(FsChapterWriter::new(chapter_dir.path())),
    };
    let downloader = ChapterDownloader::new(config, services).await?;

    // UI subscriber - renders job progress
    let mut ui_events = downloader.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = ui_events.recv().await {
            match event {
                Event::JobStarted { job } => {
                    println!("[UI] fetching {} (attempt {})", job.chapter.title, job.attempt)
                }
                Event::JobCompleted { job } => println!("[UI] done: {}", job.chapter.title),
                Event::QueueUpdated { story_id, stats } => println!(
                    "[UI] {}: {} pending, {} downloading",
                    story_id, stats.pending, stats.downloading
                ),
                Event::Shutdown => break,
                _ => {}
            }
        }
    });

    // Alerting subscriber - only terminal failures
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    let alert = downloader
        .on(EventKind::JobFailed, move |event| {
            if let Event::JobFailed { job, error } = event {
                counter.fetch_add(1, Ordering::SeqCst);
                eprintln!("[ALERT] {} failed: {} ({})", job.chapter.title, error.message, error.code);
            }
        })
        .await;

    // Library subscriber - settled stories only, as a stream
    let settled = downloader
        .event_stream()
        .filter(|e| e.kind() == EventKind::StorySettled);
    let library = tokio::spawn(async move {
        tokio::pin!(settled);
        if let Some(Event::StorySettled {
            story_id,
            downloaded,
            total,
            failed,
            status,
        }) = settled.next().await
        {
            println!(
                "[LIBRARY] {}: {}/{} downloaded, {} failed, now {:?}",
                story_id, downloaded, total, failed, status
            );
        }
    });

    let story_id = StoryId::new("tale");
    downloader.sync_chapters(&story_id).await?;
    library.await?;

    downloader.off(alert).await;
    println!("{} terminal failures", failures.load(Ordering::SeqCst));

    downloader.shutdown().await?;
    Ok(())
}
