//! Feed broadcaster - job lifecycle events with a bounded replay buffer

mod event;

pub use event::{FeedEvent, FeedStatus, TimingEntry};

use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::config::FeedConfig;

/// Publish/subscribe channel for feed events
pub struct FeedBroadcaster {
    sender: broadcast::Sender<FeedEvent>,
    /// Last saveable events, oldest first
    replay: Mutex<VecDeque<FeedEvent>>,
    replay_capacity: usize,
    subscribers: Arc<AtomicUsize>,
}

/// A live feed listener
///
/// Starts with the replayed history, then yields live events. Dropping it
/// unsubscribes.
pub struct Subscription {
    replay: VecDeque<FeedEvent>,
    receiver: broadcast::Receiver<FeedEvent>,
    subscribers: Arc<AtomicUsize>,
}

impl FeedBroadcaster {
    pub fn new(config: &FeedConfig) -> Self {
        Self::with_capacity(config.replay_capacity, config.channel_capacity)
    }

    pub fn with_capacity(replay_capacity: usize, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sender,
            replay: Mutex::new(VecDeque::with_capacity(replay_capacity)),
            replay_capacity,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a listener that first sees the recent saved events
    pub fn subscribe(&self) -> Subscription {
        // Holding the replay lock keeps publish from slipping an event between
        // the snapshot and the new receiver
        let replay = self.replay.lock();
        let receiver = self.sender.subscribe();
        let snapshot = replay.clone();
        drop(replay);

        let count = self.subscribers.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(subscribers = count, replayed = snapshot.len(), "Feed subscriber connected");

        Subscription {
            replay: snapshot,
            receiver,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Deliver an event to every current subscriber
    ///
    /// Delivery is fire-and-forget: nobody listening is not an error, and a
    /// slow subscriber only loses its own backlog.
    pub fn publish(&self, event: FeedEvent, save_as_last_state: bool) {
        let mut replay = self.replay.lock();
        if save_as_last_state && self.replay_capacity > 0 {
            if replay.len() == self.replay_capacity {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }

        let delivered = self.sender.send(event).unwrap_or(0);
        drop(replay);

        debug!(delivered, saved = save_as_last_state, "Published feed event");
    }

    /// Remove a listener
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    /// Snapshot of the replay buffer
    pub fn recent(&self) -> Vec<FeedEvent> {
        self.replay.lock().iter().cloned().collect()
    }
}

impl Subscription {
    /// Next event, replayed history first; `None` once the broadcaster is gone
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Feed subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream of events
    pub fn into_stream(self) -> impl Stream<Item = FeedEvent> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .next_event()
                .await
                .map(|event| (event, subscription))
        })
        .boxed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let remaining = self.subscribers.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        debug!(subscribers = remaining, "Feed subscriber disconnected");
    }
}
