//! HTTP API endpoints for room and user records.
//!
//! Thin CRUD over the membership store. Two calls go through the hub: joining
//! a room publishes the member list to its subscribers, and deleting a room
//! drops its channel from the registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::store::StoreError;
use crate::types::{Member, Room, RoomId};

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomRequest {
    #[serde(default)]
    pub name: String,
}

/// Body of `GET /room`
#[derive(Debug, Clone, Serialize)]
pub struct RoomList {
    pub rooms: Vec<Room>,
}

/// GET /room
pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomList> {
    Json(RoomList {
        rooms: state.store.list_rooms().await,
    })
}

/// POST /room
///
/// Body is optional; a missing name creates an unnamed room.
pub async fn create_room(
    State(state): State<AppState>,
    body: Option<Json<RoomRequest>>,
) -> (StatusCode, Json<Room>) {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let room = state.store.create_room(request.name).await;
    (StatusCode::CREATED, Json(room))
}

/// GET /room/{room_id}
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Room>, StoreError> {
    state.store.get_room(&room_id).await.map(Json)
}

/// PUT /room/{room_id}
pub async fn update_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(request): Json<RoomRequest>,
) -> Result<Json<Room>, StoreError> {
    state
        .store
        .rename_room(&room_id, request.name)
        .await
        .map(Json)
}

/// DELETE /room/{room_id}
///
/// Connections already attached to the room keep running until they close.
pub async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Room>, StoreError> {
    let room = state.store.delete_room(&room_id).await?;
    state.hub.forget_room(&room_id).await;
    Ok(Json(room))
}

/// POST /room/{room_id}/members
pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(member): Json<Member>,
) -> Result<Json<Room>, StoreError> {
    tracing::info!(room_id = %room_id, member_id = %member.id, "Join via API");
    state.hub.join_room(&room_id, member).await.map(Json)
}

/// GET /room/{room_id}/members/{member_id}
pub async fn get_member(
    State(state): State<AppState>,
    Path((room_id, member_id)): Path<(RoomId, String)>,
) -> Result<Json<Member>, StoreError> {
    state.store.get_member(&room_id, &member_id).await.map(Json)
}

/// GET /user
pub async fn list_users(State(state): State<AppState>) -> Json<Vec<Member>> {
    Json(state.store.list_users().await)
}

/// POST /user
pub async fn create_user(
    State(state): State<AppState>,
    Json(user): Json<Member>,
) -> (StatusCode, Json<Member>) {
    (StatusCode::CREATED, Json(state.store.create_user(user).await))
}

/// GET /user/{user_id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Member>, StoreError> {
    state.store.get_user(&user_id).await.map(Json)
}

/// PUT /user/{user_id}
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(user): Json<Member>,
) -> Result<Json<Member>, StoreError> {
    state.store.update_user(&user_id, user).await.map(Json)
}

/// DELETE /user/{user_id}
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Member>, StoreError> {
    state.store.delete_user(&user_id).await.map(Json)
}
