//! Event-driven wait helpers for integration tests

use chapter_dl::{Event, StoryId, StoryStatus};
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome reported by [`Event::StorySettled`]
#[derive(Debug, PartialEq, Eq)]
pub struct Settled {
    pub downloaded: usize,
    pub total: usize,
    pub failed: usize,
    pub status: StoryStatus,
}

/// Wait for the next StorySettled event of `story_id`
///
/// Subscribe before triggering the downloads, or the event may be missed.
pub async fn wait_for_settled(
    events: &mut broadcast::Receiver<Event>,
    story_id: &StoryId,
    timeout: Duration,
) -> Option<Settled> {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::StorySettled {
                    story_id: id,
                    downloaded,
                    total,
                    failed,
                    status,
                }) if &id == story_id => {
                    return Some(Settled {
                        downloaded,
                        total,
                        failed,
                        status,
                    });
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
