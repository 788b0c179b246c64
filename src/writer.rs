//! Chapter body persistence.

use crate::error::{Error, Result, StorageError};
use crate::types::{Chapter, StoryId};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Writes fetched chapter bodies somewhere durable
#[async_trait]
pub trait ChapterWriter: Send + Sync {
    /// Persist `body` for `chapter` and return where it was written
    ///
    /// Must be durable when it returns: the downloader marks the chapter
    /// downloaded right after.
    async fn write_chapter(&self, story_id: &StoryId, chapter: &Chapter, body: &str)
    -> Result<String>;

    /// Remove one body returned by [`Self::write_chapter`]
    async fn remove_chapter(&self, _story_id: &StoryId, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Remove every body written for a story
    async fn remove_story(&self, _story_id: &StoryId) -> Result<()> {
        Ok(())
    }
}

/// [`ChapterWriter`] storing one HTML file per chapter under a root directory
///
/// Layout: `<root>/<story>/<sha256(chapter id)>.html`, where `<story>` is the
/// story id with every character outside `[A-Za-z0-9_-]` replaced by `_`.
#[derive(Clone, Debug)]
pub struct FsChapterWriter {
    root: PathBuf,
}

impl FsChapterWriter {
    /// Create a writer rooted at `root` (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding a story's chapter files
    pub fn story_dir(&self, story_id: &StoryId) -> PathBuf {
        let name: String = story_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(name)
    }

    /// Final path of a chapter's body
    pub fn chapter_path(&self, story_id: &StoryId, chapter: &Chapter) -> PathBuf {
        let digest = Sha256::digest(chapter.id.as_str().as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.story_dir(story_id).join(format!("{}.html", name))
    }
}

#[async_trait]
impl ChapterWriter for FsChapterWriter {
    async fn write_chapter(
        &self,
        story_id: &StoryId,
        chapter: &Chapter,
        body: &str,
    ) -> Result<String> {
        let path = self.chapter_path(story_id, chapter);
        write_atomic(&path, body.as_bytes()).await?;

        tracing::debug!(
            story_id = %story_id,
            chapter_id = %chapter.id,
            path = %path.display(),
            bytes = body.len(),
            "Chapter body written"
        );
        Ok(path.display().to_string())
    }

    async fn remove_chapter(&self, _story_id: &StoryId, path: &str) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(write_failed(Path::new(path), e)),
        }
    }

    async fn remove_story(&self, story_id: &StoryId) -> Result<()> {
        let dir = self.story_dir(story_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(write_failed(&dir, e)),
        }
    }
}

/// Write to a temp file next to `path`, then rename over it
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("path has no parent: {}", path.display())))?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| write_failed(parent, e))?;

    let tmp_path = path.with_extension(format!("tmp.{:016x}", rand::random::<u64>()));
    if let Err(e) = fs::write(&tmp_path, data).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(write_failed(&tmp_path, e));
    }
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(write_failed(path, e));
    }
    Ok(())
}

fn write_failed(path: &Path, e: std::io::Error) -> Error {
    Error::Storage(StorageError::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_body_under_hashed_name() {
        let dir = tempdir().unwrap();
        let writer = FsChapterWriter::new(dir.path());
        let story = StoryId::new("https://fiction.example/story/7");
        let chapter = Chapter::new("One", "https://fiction.example/story/7/c/1");

        let path = writer
            .write_chapter(&story, &chapter, "<p>hello</p>")
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<p>hello</p>");
        let path = PathBuf::from(path);
        assert!(path.starts_with(dir.path().join("https___fiction_example_story_7")));
        let stem = path.file_stem().unwrap().to_str().unwrap();
        assert_eq!(stem.len(), 64);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn rewrite_replaces_content_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let writer = FsChapterWriter::new(dir.path());
        let story = StoryId::new("s");
        let chapter = Chapter::new("One", "https://example.com/c/1");

        writer.write_chapter(&story, &chapter, "first").await.unwrap();
        let path = writer.write_chapter(&story, &chapter, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries: Vec<_> = std::fs::read_dir(writer.story_dir(&story))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn distinct_chapters_get_distinct_files() {
        let dir = tempdir().unwrap();
        let writer = FsChapterWriter::new(dir.path());
        let story = StoryId::new("s");
        let one = Chapter::new("One", "https://example.com/c/1");
        let two = Chapter::new("Two", "https://example.com/c/2");

        assert_ne!(
            writer.chapter_path(&story, &one),
            writer.chapter_path(&story, &two)
        );
    }

    #[tokio::test]
    async fn remove_chapter_deletes_only_that_body() {
        let dir = tempdir().unwrap();
        let writer = FsChapterWriter::new(dir.path());
        let story = StoryId::new("s");
        let one = Chapter::new("One", "https://example.com/c/1");
        let two = Chapter::new("Two", "https://example.com/c/2");
        let first = writer.write_chapter(&story, &one, "1").await.unwrap();
        let second = writer.write_chapter(&story, &two, "2").await.unwrap();

        writer.remove_chapter(&story, &first).await.unwrap();

        assert!(!Path::new(&first).exists());
        assert!(Path::new(&second).exists());
        writer.remove_chapter(&story, &first).await.unwrap();
    }

    #[tokio::test]
    async fn remove_story_deletes_directory_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let writer = FsChapterWriter::new(dir.path());
        let story = StoryId::new("s");
        let chapter = Chapter::new("One", "https://example.com/c/1");
        writer.write_chapter(&story, &chapter, "body").await.unwrap();

        writer.remove_story(&story).await.unwrap();
        assert!(!writer.story_dir(&story).exists());

        writer.remove_story(&story).await.unwrap();
    }
}
