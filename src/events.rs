//! Event fan-out for download progress observers.
//!
//! Every [`Event`] goes through a single broadcast channel. Observers can:
//! - hold a raw receiver ([`EventBus::subscribe`])
//! - consume a stream that drops lag notifications ([`EventBus::event_stream`])
//! - register a callback for one event kind ([`EventBus::on`] / [`EventBus::off`])

use crate::types::{Event, EventKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Handle returned by [`EventBus::on`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Broadcast channel plus registered callbacks (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    handlers: Arc<Mutex<HashMap<SubscriptionId, CancellationToken>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Send an event to all subscribers
    ///
    /// Events emitted while nobody listens are dropped.
    pub fn emit(&self, event: Event) {
        tracing::trace!(kind = ?event.kind(), "Emitting event");
        self.tx.send(event).ok();
    }

    /// Raw receiver of every event
    ///
    /// A receiver that falls more than the channel capacity behind gets
    /// `RecvError::Lagged` and skips the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Stream of every event emitted from now on
    pub fn event_stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged, events dropped");
                None
            }
        })
    }

    /// Call `handler` for every event of `kind` until [`Self::off`] is called
    ///
    /// Handlers run on a dedicated task and must not block.
    pub async fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        let mut rx = self.tx.subscribe();

        // Registered before the task starts so an early exit can unregister it
        self.handlers.lock().await.insert(id, token.clone());

        let cancelled = token;
        let handlers = Arc::clone(&self.handlers);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) if event.kind() == kind => handler(event),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(?kind, skipped, "Event handler lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            handlers.lock().await.remove(&id);
                            break;
                        }
                    },
                }
            }
        });

        id
    }

    /// Unregister a handler; returns false if it was not registered
    pub async fn off(&self, id: SubscriptionId) -> bool {
        match self.handlers.lock().await.remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
