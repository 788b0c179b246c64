use super::test_helpers::*;
use crate::config::DownloadSettings;
use crate::error::Error;
use crate::store::StoryStore;
use crate::types::{ChapterId, Event, EventKind, StoryId, StoryStatus, SyncStage};
use std::time::Duration;


fn chapter_id(story: &str, n: usize) -> ChapterId {
    ChapterId::from_url(&chapter_url(story, n))
}
