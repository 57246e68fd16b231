//! Channel registry
//!
//! Key-to-channel directory. Owned by the hub and shared by every connection
//! task; one instance per process.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::channel::{Channel, ReplayPolicy};

pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    /// Policy used by `get_or_create` when the caller doesn't pick one
    default_policy: ReplayPolicy,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_default_policy(ReplayPolicy::BroadcastOnly)
    }

    pub fn with_default_policy(default_policy: ReplayPolicy) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            default_policy,
        }
    }

    /// Existing channel for `key`, or a new one built with the default policy
    pub async fn get_or_create(&self, key: &str) -> Arc<Channel> {
        let policy = self.default_policy.clone();
        self.get_or_create_with(key, policy).await
    }

    /// Existing channel for `key`, or a new one built with `policy`.
    ///
    /// `policy` is ignored when the channel already exists. Concurrent callers
    /// for the same unseen key all get the same instance.
    pub async fn get_or_create_with(&self, key: &str, policy: ReplayPolicy) -> Arc<Channel> {
        if let Some(channel) = self.channels.read().await.get(key) {
            return channel.clone();
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(channel = %key, ?policy, "Channel created");
                Arc::new(Channel::new(key, policy))
            })
            .clone()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Channel>> {
        self.channels.read().await.get(key).cloned()
    }

    /// Forget the channel for `key`.
    ///
    /// Subscribers already attached keep their `Arc<Channel>` and keep working
    /// until they close; the next `get_or_create` builds a fresh channel.
    pub async fn remove(&self, key: &str) -> Option<Arc<Channel>> {
        let removed = self.channels.write().await.remove(key);
        if let Some(channel) = &removed {
            tracing::debug!(
                channel = %key,
                subscribers = channel.subscriber_count(),
                "Channel removed from registry"
            );
        }
        removed
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.channels.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
