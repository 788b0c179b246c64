//! Chapter list reconciliation.
//!
//! [`merge`] combines the stored chapter list of a story with a freshly scraped
//! chapter index. It is a pure function: no I/O, no clock, no randomness.
//!
//! Rules:
//! - The fresh scrape is authoritative for ordering. Chapters the source no longer
//!   lists are dropped from the result.
//! - A chapter whose id is already known is carried over unchanged, so content that
//!   is already on disk is never invalidated by a re-scrape.
//! - Unknown ids become new undownloaded chapters and are reported in
//!   `new_chapter_ids`.
//! - Duplicate ids in the fresh scrape keep their first occurrence.
//! - The bookmark survives when its chapter survives, otherwise it is cleared.
//!
//! An empty fresh list yields an empty result. Callers that cannot tell an empty
//! scrape from a failed one must guard before merging (see
//! [`crate::ChapterDownloader::sync_chapters`]).

use crate::types::{Chapter, ChapterId, FreshChapter};
use std::collections::{HashMap, HashSet};

/// Outcome of a chapter list reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    /// Reconciled chapters in source order
    pub chapters: Vec<Chapter>,
    /// Ids present in the fresh scrape but not in the old list, in source order
    pub new_chapter_ids: Vec<ChapterId>,
    /// Ids present in the old list but not in the fresh scrape, in old order
    pub removed_chapter_ids: Vec<ChapterId>,
    /// Number of reconciled chapters with `downloaded == true`
    pub downloaded_count: usize,
    /// Bookmark, if it still resolves to a reconciled chapter
    pub last_read_chapter_id: Option<ChapterId>,
}

/// Reconcile `old` with `fresh`.
pub fn merge(
    old: &[Chapter],
    fresh: &[FreshChapter],
    last_read_chapter_id: Option<&ChapterId>,
) -> MergeResult {
    let known: HashMap<&ChapterId, &Chapter> = old.iter().map(|c| (&c.id, c)).collect();

    let mut seen: HashSet<ChapterId> = HashSet::with_capacity(fresh.len());
    let mut chapters = Vec::with_capacity(fresh.len());
    let mut new_chapter_ids = Vec::new();

    for entry in fresh {
        let id = entry.chapter_id();
        if !seen.insert(id.clone()) {
            tracing::debug!(chapter_id = %id, "Skipping duplicate chapter in fresh scrape");
            continue;
        }

        match known.get(&id) {
            Some(existing) => chapters.push((*existing).clone()),
            None => {
                new_chapter_ids.push(id.clone());
                chapters.push(Chapter {
                    id,
                    title: entry.title.clone(),
                    url: entry.url.clone(),
                    downloaded: false,
                    content: None,
                    file_path: None,
                });
            }
        }
    }

    let removed_chapter_ids = old
        .iter()
        .filter(|c| !seen.contains(&c.id))
        .map(|c| c.id.clone())
        .collect();

    let downloaded_count = chapters.iter().filter(|c| c.downloaded).count();

    let last_read_chapter_id = last_read_chapter_id
        .filter(|id| seen.contains(*id))
        .cloned();

    MergeResult {
        chapters,
        new_chapter_ids,
        removed_chapter_ids,
        downloaded_count,
        last_read_chapter_id,
    }
}
