use super::{MembershipStore, StoreError, StoreResult};
use crate::types::*;

impl MembershipStore {
    /// Create an empty room with a fresh id
    pub async fn create_room(&self, name: impl Into<String>) -> Room {
        let room = Room::new(name);
        self.rooms.write().await.insert(room.id, room.clone());
        tracing::info!(room_id = %room.id, name = %room.name, "Room created");
        room
    }

    /// All rooms, ordered by name then id
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.read().await.values().cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.list_rooms().await.into_iter().map(|r| r.id).collect()
    }

    pub async fn get_room(&self, room_id: &RoomId) -> StoreResult<Room> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or(StoreError::RoomNotFound(*room_id))
    }

    pub async fn room_exists(&self, room_id: &RoomId) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn rename_room(&self, room_id: &RoomId, name: impl Into<String>) -> StoreResult<Room> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or(StoreError::RoomNotFound(*room_id))?;
        room.name = name.into();
        Ok(room.clone())
    }

    pub async fn delete_room(&self, room_id: &RoomId) -> StoreResult<Room> {
        let room = self
            .rooms
            .write()
            .await
            .remove(room_id)
            .ok_or(StoreError::RoomNotFound(*room_id))?;
        tracing::info!(room_id = %room_id, "Room deleted");
        Ok(room)
    }

    /// Append `member` to the room.
    ///
    /// A member whose id is already present keeps its position and only has
    /// its name refreshed.
    pub async fn join_room(&self, room_id: &RoomId, member: Member) -> StoreResult<Room> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or(StoreError::RoomNotFound(*room_id))?;

        match room.members.iter_mut().find(|m| **m == member) {
            Some(existing) => existing.name = member.name,
            None => room.members.push(member),
        }

        Ok(room.clone())
    }

    pub async fn list_members(&self, room_id: &RoomId) -> StoreResult<Vec<Member>> {
        Ok(self.get_room(room_id).await?.members)
    }

    pub async fn get_member(&self, room_id: &RoomId, member_id: &str) -> StoreResult<Member> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(room_id).ok_or(StoreError::RoomNotFound(*room_id))?;
        room.member(member_id)
            .cloned()
            .ok_or_else(|| StoreError::MemberNotFound {
                room_id: *room_id,
                member_id: member_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_create_room() {
        let store = MembershipStore::new();
        let room = store.create_room("lobby").await;

        assert!(room.members.is_empty());
        assert_eq!(store.get_room(&room.id).await.unwrap(), room);
        assert_eq!(store.room_ids().await, vec![room.id]);
    }

    #[tokio::test]
    async fn test_join_room_appends_in_order() {
        let store = MembershipStore::new();
        let room = store.create_room("lobby").await;

        store
            .join_room(&room.id, Member::new("u1", "Al"))
            .await
            .unwrap();
        let updated = store
            .join_room(&room.id, Member::new("u2", "Bo"))
            .await
            .unwrap();

        let ids: Vec<&str> = updated.members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_rejoin_does_not_duplicate() {
        let store = MembershipStore::new();
        let room = store.create_room("lobby").await;

        store
            .join_room(&room.id, Member::new("u1", "Al"))
            .await
            .unwrap();
        let updated = store
            .join_room(&room.id, Member::new("u1", "Alice"))
            .await
            .unwrap();

        assert_eq!(updated.members.len(), 1);
        assert_eq!(updated.members[0].name, "Alice");
    }

    #[tokio::test]
    async fn test_lookup_misses_are_not_found() {
        let store = MembershipStore::new();
        let missing = Uuid::new_v4();

        assert_eq!(
            store.get_room(&missing).await,
            Err(StoreError::RoomNotFound(missing))
        );
        assert_eq!(
            store
                .join_room(&missing, Member::new("u1", "Al"))
                .await
                .unwrap_err(),
            StoreError::RoomNotFound(missing)
        );

        let room = store.create_room("lobby").await;
        let err = store.get_member(&room.id, "ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::MemberNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_member() {
        let store = MembershipStore::new();
        let room = store.create_room("lobby").await;
        store
            .join_room(&room.id, Member::new("u1", "Al"))
            .await
            .unwrap();

        let member = store.get_member(&room.id, "u1").await.unwrap();
        assert_eq!(member.name, "Al");
        assert_eq!(store.list_members(&room.id).await.unwrap(), vec![member]);
    }

    #[tokio::test]
    async fn test_rename_and_delete_room() {
        let store = MembershipStore::new();
        let room = store.create_room("lobby").await;

        let renamed = store.rename_room(&room.id, "hall").await.unwrap();
        assert_eq!(renamed.name, "hall");

        store.delete_room(&room.id).await.unwrap();
        assert!(!store.room_exists(&room.id).await);
        assert!(store.delete_room(&room.id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_rooms_sorted_by_name() {
        let store = MembershipStore::new();
        store.create_room("b").await;
        store.create_room("a").await;

        let names: Vec<String> = store.list_rooms().await.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
