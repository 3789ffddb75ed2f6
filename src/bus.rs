//! Progress message bus.
//!
//! Apply runs report per-resource progress as typed events over a bounded
//! channel: `Start` before the runtime is touched, `Success` or `Fail` at
//! node terminal. Producers block when the consumer falls behind
//! (backpressure is the bound, not dropped events). The bus closes once
//! the walk finishes and the last sender is dropped.

use crate::constants::DEFAULT_EVENT_CAPACITY;
use crate::ledger::Action;
use tokio::sync::mpsc;
use tracing::warn;

// =============================================================================
// Events
// =============================================================================

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// The node entered execution; the runtime is about to be called.
    Start,
    /// The node finished and its state was committed.
    Success { action: Action },
    /// The node failed.
    Fail { reason: String },
}

/// One progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Resource id the event is about.
    pub id: String,
    pub kind: EventKind,
}

// =============================================================================
// Bus
// =============================================================================

/// Creates a bounded progress bus.
///
/// Returns the producer handle handed to an apply run and the receiver the
/// caller drains for UI or telemetry.
pub fn bounded(capacity: usize) -> (MessageSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (MessageSender { tx }, rx)
}

/// Creates a bounded progress bus with the default capacity.
pub fn default_bounded() -> (MessageSender, mpsc::Receiver<Event>) {
    bounded(DEFAULT_EVENT_CAPACITY)
}

/// Producer side of the progress bus.
///
/// Cloned once per in-flight node; sending blocks on a full channel. A
/// dropped receiver does not fail the run: the event is discarded with a
/// warning, since progress reporting is observability, not control flow.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Event>,
}

impl MessageSender {
    /// Emits `Start` for a resource.
    pub async fn start(&self, id: &str) {
        self.send(Event {
            id: id.to_string(),
            kind: EventKind::Start,
        })
        .await;
    }

    /// Emits `Success` with the action that was performed.
    pub async fn success(&self, id: &str, action: Action) {
        self.send(Event {
            id: id.to_string(),
            kind: EventKind::Success { action },
        })
        .await;
    }

    /// Emits `Fail` with the failure reason.
    pub async fn fail(&self, id: &str, reason: &str) {
        self.send(Event {
            id: id.to_string(),
            kind: EventKind::Fail {
                reason: reason.to_string(),
            },
        })
        .await;
    }

    async fn send(&self, event: Event) {
        if self.tx.send(event).await.is_err() {
            warn!("progress event dropped: bus receiver is gone");
        }
    }
}
