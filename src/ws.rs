//! WebSocket accept boundary
//!
//! Resolves the target channel before looking at the upgrade headers, so bad
//! keys are rejected with a plain HTTP error either way, and adapts the axum socket into the hub's frame
//! stream and text sink.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::channel::Channel;
use crate::connection::{CloseStatus, Connection, Frame};
use crate::hub::{ChannelKey, HubError};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Display name used to tag this connection's messages
    pub name: Option<String>,
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::UnknownChannel(_) | HubError::InvalidRoomId { .. } => StatusCode::BAD_REQUEST,
            HubError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

type Upgrade = Result<WebSocketUpgrade, WebSocketUpgradeRejection>;

/// GET /ws/{channel}
pub async fn channel_ws_handler(
    ws: Upgrade,
    Path(channel): Path<String>,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match ChannelKey::parse(&channel) {
        Ok(key) => upgrade(ws, key, params, state).await,
        Err(e) => reject(e),
    }
}

/// GET /ws/room/{room_id}
pub async fn room_ws_handler(
    ws: Upgrade,
    Path(room_id): Path<String>,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match ChannelKey::room(&room_id) {
        Ok(key) => upgrade(ws, key, params, state).await,
        Err(e) => reject(e),
    }
}

/// GET /ws/room?roomId=...
pub async fn room_query_ws_handler(
    ws: Upgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let room_id = params.room_id.clone().unwrap_or_default();
    match ChannelKey::room(&room_id) {
        Ok(key) => upgrade(ws, key, params, state).await,
        Err(e) => reject(e),
    }
}

fn reject(e: HubError) -> Response {
    tracing::warn!("Rejected WebSocket attach: {}", e);
    e.into_response()
}

async fn upgrade(ws: Upgrade, key: ChannelKey, params: WsQuery, state: AppState) -> Response {
    let channel = match state.hub.resolve(&key).await {
        Ok(channel) => channel,
        Err(e) => return reject(e),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::debug!(channel = %key, "Not a WebSocket upgrade: {}", rejection);
            return rejection.into_response();
        }
    };

    tracing::info!(
        "WebSocket connection request: channel={}, name={:?}",
        key,
        params.name
    );

    ws.on_upgrade(move |socket| handle_socket(socket, key, channel, params, state))
}

async fn handle_socket(
    socket: WebSocket,
    key: ChannelKey,
    channel: Arc<Channel>,
    params: WsQuery,
    state: AppState,
) {
    let (sender, receiver) = socket.split();

    let inbound = receiver.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
            Ok(Message::Close(frame)) => Some(Ok(Frame::Close(
                frame.map(|f| CloseStatus::new(f.code, f.reason.as_str())),
            ))),
            Ok(Message::Binary(_)) => {
                tracing::debug!("Ignoring binary frame");
                None
            }
            // Ping/pong are answered by the protocol layer
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    });

    let outbound = sender.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));

    let relay = state.hub.relay_for(&key);
    let conn = Connection::new().with_display_name(params.name);

    let conn = state
        .hub
        .serve(
            conn,
            channel,
            relay.as_ref(),
            Box::pin(inbound),
            Box::pin(outbound),
        )
        .await;

    tracing::info!(
        "WebSocket connection closed: id={}, channel={}, open since {}",
        conn.id,
        key,
        conn.opened_at.to_rfc3339()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_hub_error_status_codes() {
        let unknown = HubError::UnknownChannel("lobby".to_string()).into_response();
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

        let malformed = ChannelKey::room("nope").unwrap_err().into_response();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let missing = HubError::RoomNotFound(Uuid::new_v4()).into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_query_uses_room_id_camel_case() {
        let query: WsQuery = serde_json::from_str(r#"{"name":"Al","roomId":"x"}"#).unwrap();
        assert_eq!(query.name.as_deref(), Some("Al"));
        assert_eq!(query.room_id.as_deref(), Some("x"));
    }
}
