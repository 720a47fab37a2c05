//! Progress fan-out bus.
//!
//! A single owner task holds the subscriber set; publishes and membership
//! changes all flow through the owner's inbox, so subscriber bookkeeping is
//! never shared across tasks. Fan-out is non-blocking: an event is dropped
//! for any subscriber whose buffer is full, so a stalled SSE client cannot
//! hold up the producer or its peers. The `/tracks` snapshot is the recovery
//! path for anything dropped here.

use crate::models::ProgressEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Capacity of the owner inbox; absorbs bursty subprocess progress.
pub const PRODUCER_CAPACITY: usize = 100;
/// Per-subscriber buffer. Events beyond this are dropped for that subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 32;

enum BusMessage {
    Event(ProgressEvent),
    Subscribe {
        id: u64,
        tx: mpsc::Sender<ProgressEvent>,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe(u64),
}

/// Handle to the progress bus. Cheap to clone; all clones feed the same
/// owner task.
#[derive(Clone)]
pub struct ProgressBus {
    inbox: mpsc::Sender<BusMessage>,
    next_id: Arc<AtomicU64>,
}

/// A live subscription. Unsubscribes itself when dropped.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
    inbox: mpsc::Sender<BusMessage>,
}

impl Subscription {
    /// Receive the next event; `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best effort; the owner also prunes closed channels on publish.
        let _ = self.inbox.try_send(BusMessage::Unsubscribe(self.id));
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        let (inbox, mut rx) = mpsc::channel::<BusMessage>(PRODUCER_CAPACITY);

        tokio::spawn(async move {
            let mut subscribers: HashMap<u64, mpsc::Sender<ProgressEvent>> = HashMap::new();
            while let Some(message) = rx.recv().await {
                match message {
                    BusMessage::Subscribe { id, tx, ack } => {
                        subscribers.insert(id, tx);
                        let _ = ack.send(());
                        debug!(subscriber = id, total = subscribers.len(), "subscriber added");
                    }
                    BusMessage::Unsubscribe(id) => {
                        subscribers.remove(&id);
                        debug!(subscriber = id, total = subscribers.len(), "subscriber removed");
                    }
                    BusMessage::Event(event) => {
                        subscribers.retain(|_, tx| !tx.is_closed());
                        for tx in subscribers.values() {
                            // Full buffer means a slow consumer; skip it.
                            let _ = tx.try_send(event.clone());
                        }
                    }
                }
            }
        });

        Self {
            inbox,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Blocks only when the owner inbox is full (100 in-flight events).
    pub async fn publish(&self, event: ProgressEvent) {
        if self.inbox.send(BusMessage::Event(event)).await.is_err() {
            warn!("progress bus is gone; event dropped");
        }
    }

    /// Register a new subscriber.
    ///
    /// Registration is acknowledged by the owner before this returns, so an
    /// event published afterwards is guaranteed to be offered to the new
    /// subscriber.
    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let (ack, ack_rx) = oneshot::channel();
        if self
            .inbox
            .send(BusMessage::Subscribe { id, tx, ack })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
        Subscription {
            id,
            rx,
            inbox: self.inbox.clone(),
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
