//! Fan-out of registry events to connected viewers.
//!
//! Every viewer owns a bounded channel. Publishing never waits: an event that does not fit in
//! a viewer's buffer drops that viewer, whose stream then ends and who reconnects for a fresh
//! snapshot. A disconnected viewer is noticed on the next publish and removed the same way.

use crate::events::LiveCallEvent;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type SubscriberId = u64;

/// A viewer's end of the broadcast.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<LiveCallEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once this viewer has been dropped from the broadcast.
    pub async fn recv(&mut self) -> Option<LiveCallEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<LiveCallEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
pub struct Broadcaster {
    capacity: usize,
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::Sender<LiveCallEvent>>,
}

impl Broadcaster {
    /// `capacity` is the per-viewer buffer and is clamped to at least one so the initial
    /// snapshot always fits.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: 0,
            subscribers: HashMap::new(),
        }
    }

    /// Registers a viewer whose first event is `initial`.
    pub fn subscribe(&mut self, initial: LiveCallEvent) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.capacity);
        // The channel is empty and has room for at least one event.
        let _ = tx.try_send(initial);

        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, tx);
        tracing::debug!(subscriber = id, viewers = self.subscribers.len(), "viewer subscribed");

        Subscription { id, receiver }
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            tracing::debug!(subscriber = id, "viewer unsubscribed");
        }
    }

    /// Delivers `event` to every viewer.
    pub fn publish(&mut self, event: &LiveCallEvent) {
        let mut dropped = Vec::new();
        for (id, tx) in &self.subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, event = event.kind(), "viewer lagging, dropping");
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            self.unsubscribe(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
