//! Membership store
//!
//! In-memory room and user records. The hub consults it for room resolution
//! and the room relay; it owns its own locking and nothing outside holds a
//! guard across calls.

mod room;
mod user;

use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lookup misses reported to callers
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Member {member_id} not found in room {room_id}")]
    MemberNotFound { room_id: RoomId, member_id: MemberId },

    #[error("User not found: {0}")]
    UserNotFound(MemberId),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Default)]
pub struct MembershipStore {
    rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
    users: Arc<RwLock<HashMap<MemberId, Member>>>,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}
