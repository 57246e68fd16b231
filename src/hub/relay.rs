//! Relays decide what a connection's inbound text turns into before it is
//! published, and what happens when a connection joins.

use async_trait::async_trait;

use crate::channel::Channel;
use crate::connection::Connection;
use crate::store::MembershipStore;
use crate::types::{Member, Room, RoomId};

#[async_trait]
pub trait Relay: Send + Sync {
    /// Join-time side effect, run after the connection is subscribed
    async fn on_attach(&self, _conn: &Connection, _channel: &Channel) {}

    /// Value to publish for an inbound frame, or `None` to publish nothing
    async fn relay(&self, sender: &str, text: String) -> Option<String>;
}

/// Publishes frames unchanged
pub struct PlainRelay;

#[async_trait]
impl Relay for PlainRelay {
    async fn relay(&self, _sender: &str, text: String) -> Option<String> {
        Some(text)
    }
}

/// Chat relay: announces joins and tags every message with its sender
pub struct TaggedRelay;

impl TaggedRelay {
    pub fn join_message(sender: &str) -> String {
        format!("{} has joined the chat", sender)
    }

    pub fn tag(sender: &str, text: &str) -> String {
        format!("{}: {}", sender, text)
    }
}

#[async_trait]
impl Relay for TaggedRelay {
    async fn on_attach(&self, conn: &Connection, channel: &Channel) {
        channel.publish(Self::join_message(conn.sender()));
    }

    async fn relay(&self, sender: &str, text: String) -> Option<String> {
        Some(Self::tag(sender, &text))
    }
}

/// Room relay: every inbound frame is a join request.
///
/// The frame is either a JSON member (`{"id":..,"name":..}`) or a bare display
/// name for the sender. The updated member list is what gets published.
pub struct RoomRelay {
    store: MembershipStore,
    room_id: RoomId,
}

impl RoomRelay {
    pub fn new(store: MembershipStore, room_id: RoomId) -> Self {
        Self { store, room_id }
    }

    fn parse_member(sender: &str, text: &str) -> Option<Member> {
        if let Ok(member) = serde_json::from_str::<Member>(text) {
            return Some(member);
        }
        let name = text.trim();
        if name.is_empty() {
            return None;
        }
        Some(Member::new(sender, name))
    }
}

/// JSON member list published to a room's subscribers after a join
pub fn member_list_payload(room: &Room) -> Option<String> {
    match serde_json::to_string(&room.members) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(room_id = %room.id, "Failed to serialize members: {}", e);
            None
        }
    }
}

#[async_trait]
impl Relay for RoomRelay {
    async fn on_attach(&self, conn: &Connection, _channel: &Channel) {
        match self.store.list_members(&self.room_id).await {
            Ok(members) => {
                let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
                tracing::info!(
                    connection_id = %conn.id,
                    room_id = %self.room_id,
                    members = ?names,
                    "Current room members"
                );
            }
            Err(e) => tracing::warn!(connection_id = %conn.id, "Member lookup failed: {}", e),
        }
    }

    async fn relay(&self, sender: &str, text: String) -> Option<String> {
        let member = Self::parse_member(sender, &text)?;

        match self.store.join_room(&self.room_id, member).await {
            Ok(room) => member_list_payload(&room),
            Err(e) => {
                tracing::warn!(room_id = %self.room_id, "Join dropped: {}", e);
                None
            }
        }
    }
}
