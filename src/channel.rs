//! In-process publish points.
//!
//! Every attached subscriber owns an unbounded queue, so a slow connection only
//! grows its own backlog and `publish` never waits on anybody.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

pub type SubscriberId = u64;

/// What a newly attached subscriber sees before live values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Only values published after the attach
    BroadcastOnly,
    /// The most recent value (or `default` if nothing was published yet), then live values
    ReplayLatest { default: String },
}

impl ReplayPolicy {
    pub fn replay_latest(default: impl Into<String>) -> Self {
        Self::ReplayLatest {
            default: default.into(),
        }
    }
}

struct Inner {
    latest: Option<String>,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<String>>,
    next_id: SubscriberId,
}

/// A named fan-out point carrying opaque text values
pub struct Channel {
    key: String,
    policy: ReplayPolicy,
    // Replay snapshot and subscriber insert happen under the same lock as
    // publish, so an attach never misses or duplicates a value.
    inner: Mutex<Inner>,
}

impl Channel {
    pub fn new(key: impl Into<String>, policy: ReplayPolicy) -> Self {
        Self {
            key: key.into(),
            policy,
            inner: Mutex::new(Inner {
                latest: None,
                subscribers: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> &ReplayPolicy {
        &self.policy
    }

    /// Deliver `value` to every attached subscriber, in publish order.
    ///
    /// Returns how many subscribers received it. Subscribers whose receiving
    /// half is gone are pruned on the way; that is never an error.
    pub fn publish(&self, value: impl Into<String>) -> usize {
        let value = value.into();
        let mut inner = self.lock();

        inner
            .subscribers
            .retain(|_, tx| tx.send(value.clone()).is_ok());
        let delivered = inner.subscribers.len();

        if matches!(self.policy, ReplayPolicy::ReplayLatest { .. }) {
            inner.latest = Some(value);
        }

        delivered
    }

    /// Attach a new subscriber and return its cursor
    pub fn attach(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        if let ReplayPolicy::ReplayLatest { default } = &self.policy {
            let first = inner.latest.clone().unwrap_or_else(|| default.clone());
            // The receiver is still in hand, so this cannot fail
            let _ = tx.send(first);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);

        Subscription {
            id,
            channel: Arc::clone(self),
            rx,
            detached: false,
        }
    }

    /// Drop a subscriber from the fan-out set. Returns false if it was already gone.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Last published value (replay-latest channels only)
    pub fn latest(&self) -> Option<String> {
        self.lock().latest.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing in Inner can be left half-updated by a panic
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A live per-connection cursor over a channel's values.
///
/// Dropping the cursor detaches it.
pub struct Subscription {
    id: SubscriberId,
    channel: Arc<Channel>,
    rx: mpsc::UnboundedReceiver<String>,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Next value, or `None` once detached and drained
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next value if one is already queued
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Release the subscriber slot. Idempotent.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.channel.detach(self.id);
        self.rx.close();
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
