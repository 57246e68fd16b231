use super::{MembershipStore, StoreError, StoreResult};
use crate::types::*;

impl MembershipStore {
    /// Insert or overwrite a user record
    pub async fn create_user(&self, user: Member) -> Member {
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        user
    }

    pub async fn list_users(&self) -> Vec<Member> {
        let mut users: Vec<Member> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub async fn get_user(&self, user_id: &str) -> StoreResult<Member> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }

    /// Replace the record stored under `user_id`; the id itself never changes
    pub async fn update_user(&self, user_id: &str, user: Member) -> StoreResult<Member> {
        let mut users = self.users.write().await;
        let existing = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;
        existing.name = user.name;
        Ok(existing.clone())
    }

    pub async fn delete_user(&self, user_id: &str) -> StoreResult<Member> {
        self.users
            .write()
            .await
            .remove(user_id)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }
}
