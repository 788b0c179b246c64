//! HTML fixtures and a regex-based provider for a fake story site

use async_trait::async_trait;
use chapter_dl::{
    Chapter, Error, FreshChapter, PageFetcher, ParseError, ProgressSink, Provider, Result,
    StoryMetadata, SyncProgress, SyncStage,
};
use regex::Regex;

/// Story index page
///
/// `chapters` are `(title, path)` pairs; `next` links to a further index page.
pub fn index_html(title: &str, chapters: &[(&str, &str)], next: Option<&str>) -> String {
    let mut html = format!(
        "<html><body><h1 class=\"title\">{}</h1><span class=\"author\">Test Author</span><ul>",
        title
    );
    for (chapter_title, path) in chapters {
        html.push_str(&format!(
            "<li><a class=\"chapter\" href=\"{}\">{}</a></li>",
            path, chapter_title
        ));
    }
    html.push_str("</ul>");
    if let Some(next) = next {
        html.push_str(&format!("<a rel=\"next\" href=\"{}\">Next</a>", next));
    }
    html.push_str("</body></html>");
    html
}

/// Chapter page wrapping `body` in the content container
pub fn chapter_html(body: &str) -> String {
    format!(
        "<html><body><nav>menu</nav><div class=\"content\">{}</div><footer>ads</footer></body></html>",
        body
    )
}

/// Provider for pages served by a local mock server
pub struct MockSiteProvider {
    chapter: Regex,
    next: Regex,
    title: Regex,
    author: Regex,
    content: Regex,
}

impl MockSiteProvider {
    pub fn new() -> Self {
        Self {
            chapter: Regex::new(r#"<a class="chapter" href="([^"]+)">([^<]*)</a>"#).unwrap(),
            next: Regex::new(r#"<a rel="next" href="([^"]+)">"#).unwrap(),
            title: Regex::new(r#"<h1 class="title">([^<]*)</h1>"#).unwrap(),
            author: Regex::new(r#"<span class="author">([^<]*)</span>"#).unwrap(),
            content: Regex::new(r#"(?s)<div class="content">(.*?)</div>"#).unwrap(),
        }
    }

    fn absolute(base: &str, href: &str) -> String {
        url::Url::parse(base)
            .and_then(|b| b.join(href))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }

    fn chapters_on_page(&self, html: &str, base: &str) -> Vec<FreshChapter> {
        self.chapter
            .captures_iter(html)
            .map(|c| FreshChapter::new(&c[2], Self::absolute(base, &c[1])))
            .collect()
    }

    fn missing(what: &str) -> Error {
        ParseError::MissingElement {
            provider: "mock-site".to_string(),
            what: what.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl Provider for MockSiteProvider {
    fn name(&self) -> &str {
        "mock-site"
    }

    fn url_pattern(&self) -> &str {
        r"^http://127\.0\.0\.1:\d+/"
    }

    async fn chapter_list(
        &self,
        index_html: &str,
        source_url: &str,
        fetcher: &dyn PageFetcher,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<FreshChapter>> {
        let mut chapters = self.chapters_on_page(index_html, source_url);
        let mut page = index_html.to_string();
        let mut base = source_url.to_string();
        let mut pages = 1;

        while let Some(next) = self.next.captures(&page).map(|c| c[1].to_string()) {
            let url = Self::absolute(&base, &next);
            page = fetcher.fetch_page(&url).await?;
            pages += 1;
            chapters.extend(self.chapters_on_page(&page, &url));
            progress.report(SyncProgress {
                stage: SyncStage::ParsingChapters,
                current: pages,
                total: None,
            });
            base = url;
        }
        Ok(chapters)
    }

    fn parse_metadata(&self, index_html: &str, source_url: &str) -> Result<StoryMetadata> {
        let title = self
            .title
            .captures(index_html)
            .map(|c| c[1].to_string())
            .ok_or_else(|| Self::missing("title"))?;
        Ok(StoryMetadata {
            title,
            author: self.author.captures(index_html).map(|c| c[1].to_string()),
            canonical_url: Some(source_url.to_string()),
            ..Default::default()
        })
    }

    fn parse_chapter(&self, html: &str, _chapter: &Chapter) -> Result<String> {
        self.content
            .captures(html)
            .map(|c| c[1].trim().to_string())
            .ok_or_else(|| Self::missing("chapter content"))
    }
}
