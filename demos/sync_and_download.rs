//! Sync a story and download its chapters
//!
//! Registers a story by its index URL, re-scrapes the chapter list and waits
//! until every new chapter is on disk.
//!
//! ```bash
//! RUST_LOG=chapter_dl=debug cargo run --example sync_and_download -- https://example.com/story/1
//! ```
//!
//! The bundled provider is deliberately naive: every link whose path contains
//! `/chapter` is a chapter, and a chapter's text is the first `<article>` element.
//! Real hosts register one provider per site.

use async_trait::async_trait;
use chapter_dl::{
    Chapter, ChapterDownloader, Config, FreshChapter, PageFetcher, ParseError, ProgressSink,
    Provider, ProviderRegistry, StoryId, StoryMetadata,
};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct LinkListProvider {
    link: Regex,
    title: Regex,
    article: Regex,
}

impl LinkListProvider {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            link: Regex::new(r#"<a[^>]+href="([^"]*/chapter[^"]*)"[^>]*>([^<]*)</a>"#)?,
            title: Regex::new(r"(?s)<title>(.*?)</title>")?,
            article: Regex::new(r"(?s)<article[^>]*>(.*?)</article>")?,
        })
    }
}

#[async_trait]
impl Provider for LinkListProvider {
    fn name(&self) -> &str {
        "link-list"
    }

    fn url_pattern(&self) -> &str {
        r"^https?://"
    }

    async fn chapter_list(
        &self,
        index_html: &str,
        source_url: &str,
        _fetcher: &dyn PageFetcher,
        _progress: &dyn ProgressSink,
    ) -> chapter_dl::Result<Vec<FreshChapter>> {
        let base = url::Url::parse(source_url).map_err(|e| ParseError::InvalidContent {
            provider: self.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(self
            .link
            .captures_iter(index_html)
            .filter_map(|c| {
                let url = base.join(&c[1]).ok()?;
                Some(FreshChapter::new(c[2].trim(), url.to_string()))
            })
            .collect())
    }

    fn parse_metadata(
        &self,
        index_html: &str,
        source_url: &str,
    ) -> chapter_dl::Result<StoryMetadata> {
        let title = self
            .title
            .captures(index_html)
            .map(|c| c[1].trim().to_string())
            .ok_or_else(|| ParseError::MissingElement {
                provider: self.name().to_string(),
                what: "title".to_string(),
            })?;
        Ok(StoryMetadata {
            title,
            canonical_url: Some(source_url.to_string()),
            ..Default::default()
        })
    }

    fn parse_chapter(&self, html: &str, _chapter: &Chapter) -> chapter_dl::Result<String> {
        self.article
            .captures(html)
            .map(|c| c[1].trim().to_string())
            .ok_or_else(|| {
                ParseError::MissingElement {
                    provider: self.name().to_string(),
                    what: "article".to_string(),
                }
                .into()
            })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chapter_dl=info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .ok_or("usage: sync_and_download <story index URL>")?;

    let mut config = Config::default();
    config.download.download_concurrency = 2;
    config.download.download_delay = Duration::from_secs(2);
    config.persistence.database_path = "./demo-stories.db".into();
    config.download.chapter_dir = "./demo-chapters".into();

    let registry = ProviderRegistry::new().with(Arc::new(LinkListProvider::new()?))?;
    let downloader = ChapterDownloader::open(config, registry).await?;

    let story_id = StoryId::new("demo");
    downloader.add_story(&story_id, &url).await?;

    let outcome = downloader.sync_chapters(&story_id).await?;
    println!(
        "{} chapters listed, {} new, {} queued",
        outcome.total_chapters,
        outcome.new_chapter_ids.len(),
        outcome.jobs_created
    );

    downloader.wait_until_settled(Some(&story_id)).await;

    if let Some(story) = downloader.get_story(&story_id).await? {
        println!(
            "{:?}: {}/{} chapters downloaded",
            story.status, story.downloaded_chapters, story.total_chapters
        );
    }

    downloader.shutdown().await?;
    Ok(())
}
