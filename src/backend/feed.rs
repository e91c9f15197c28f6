//! Completion fan-out shared by the in-process backends.
//!
//! Every subscriber owns an unbounded channel registered in the feed's
//! subscriber table. Dropping the [`Subscription`] removes it again, so a
//! consumer can never hold more than the subscriptions it keeps alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};

use super::{SceneEvent, SceneOp};

type SubscriberTable = Mutex<HashMap<u64, mpsc::UnboundedSender<SceneEvent>>>;

/// Publishes completion events to every live subscription.
#[derive(Default)]
pub struct EventFeed {
    next_id: AtomicU64,
    subscribers: Arc<SubscriberTable>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        Subscription {
            id,
            events: rx,
            table: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver an event to all subscribers, pruning closed channels.
    pub fn publish(&self, event: SceneEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A live subscription to completion events.
///
/// Cancelled by [`Subscription::cancel`] or on drop.
pub struct Subscription {
    id: u64,
    events: mpsc::UnboundedReceiver<SceneEvent>,
    table: Weak<SubscriberTable>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<SceneEvent> {
        self.events.recv().await
    }

    /// Take an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<SceneEvent> {
        self.events.try_recv().ok()
    }

    /// Stop receiving events.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

/// Handle for an operation a backend accepted.
///
/// Resolves with the unit's residency once the backend finishes.
#[derive(Debug)]
pub struct CompletionToken {
    scene: String,
    op: SceneOp,
    outcome: oneshot::Receiver<bool>,
}

/// Backend side of a [`CompletionToken`].
#[derive(Debug)]
pub(crate) struct Completer(oneshot::Sender<bool>);

impl Completer {
    pub(crate) fn complete(self, resident: bool) {
        // The issuer may have dropped its token; completion still happened.
        let _ = self.0.send(resident);
    }
}

impl CompletionToken {
    pub(crate) fn pair(scene: &str, op: SceneOp) -> (Self, Completer) {
        let (tx, rx) = oneshot::channel();
        let token = Self {
            scene: scene.to_string(),
            op,
            outcome: rx,
        };
        (token, Completer(tx))
    }

    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn op(&self) -> SceneOp {
        self.op
    }

    /// Wait for the operation to finish.
    ///
    /// Returns the resulting residency, or `None` if the backend went away
    /// before completing.
    pub async fn wait(self) -> Option<bool> {
        self.outcome.await.ok()
    }
}
