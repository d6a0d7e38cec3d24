//! Subscription registry: the set of live channels and whether each wants pushed ticks.
//!
//! Each WebSocket connection owns a writer task fed by a bounded queue; the registry
//! holds the sending half. Removing a channel drops that sender, which ends the writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

pub type ChannelId = u64;

/// A serialized frame. One tick's frame is shared by every channel it goes to.
pub type Outbound = Arc<str>;

/// Frames a single channel may have queued before it counts as failed.
pub const CHANNEL_QUEUE: usize = 32;

struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    subscribed: bool,
}

/// Result of pushing one frame to every subscribed channel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: Vec<ChannelId>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    channels: RwLock<HashMap<ChannelId, Subscriber>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened channel. It starts unsubscribed.
    pub async fn register(&self, tx: mpsc::Sender<Outbound>) -> ChannelId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.channels.write().await.insert(
            id,
            Subscriber {
                tx,
                subscribed: false,
            },
        );
        debug!(channel = id, "channel registered");
        id
    }

    /// Forget a channel (close or error). Returns false if it was already gone.
    pub async fn remove(&self, id: ChannelId) -> bool {
        let removed = self.channels.write().await.remove(&id).is_some();
        if removed {
            debug!(channel = id, "channel removed");
        }
        removed
    }

    /// Flip the subscription flag. Returns false for an unknown channel.
    pub async fn set_subscribed(&self, id: ChannelId, subscribed: bool) -> bool {
        match self.channels.write().await.get_mut(&id) {
            Some(s) => {
                s.subscribed = subscribed;
                true
            }
            None => false,
        }
    }

    pub async fn is_subscribed(&self, id: ChannelId) -> Option<bool> {
        self.channels.read().await.get(&id).map(|s| s.subscribed)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.channels
            .read()
            .await
            .values()
            .filter(|s| s.subscribed)
            .count()
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Queue a frame for one channel regardless of its subscription. A failed push drops it.
    pub async fn send_to(&self, id: ChannelId, frame: Outbound) -> bool {
        let res = match self.channels.read().await.get(&id) {
            Some(s) => s.tx.try_send(frame),
            None => return false,
        };
        match res {
            Ok(()) => true,
            Err(e) => {
                warn!(channel = id, error = %e, "push failed; dropping channel");
                self.remove(id).await;
                false
            }
        }
    }

    /// Queue the same frame for every subscribed channel. Channels whose queue is
    /// closed or full are dropped afterwards; the rest still get the frame.
    pub async fn broadcast(&self, frame: Outbound) -> Delivery {
        let mut out = Delivery::default();
        {
            let channels = self.channels.read().await;
            for (id, s) in channels.iter().filter(|(_, s)| s.subscribed) {
                match s.tx.try_send(frame.clone()) {
                    Ok(()) => out.delivered += 1,
                    Err(e) => {
                        warn!(channel = *id, error = %e, "push failed; dropping channel");
                        out.dropped.push(*id);
                    }
                }
            }
        }
        if !out.dropped.is_empty() {
            let mut channels = self.channels.write().await;
            for id in &out.dropped {
                channels.remove(id);
            }
        }
        out
    }
}
