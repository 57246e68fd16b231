//! Broadcast hub
//!
//! Binds one connection to one channel for the connection's lifetime. Per
//! connection the hub runs three duties concurrently:
//! - outbound: channel cursor -> transport
//! - inbound: transport -> relay -> channel
//! - close watch: waits for the close signal and logs the disconnect
//!
//! The first duty to see the transport go away fires the connection's close
//! signal, which stops the other two. Teardown runs once all three are done.

pub mod relay;

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::channel::{Channel, ReplayPolicy, Subscription};
use crate::config::HubConfig;
use crate::connection::{CloseSignal, CloseStatus, Connection, ConnectionState, Frame};
use crate::registry::ChannelRegistry;
use crate::store::{MembershipStore, StoreResult};
use crate::types::{Member, Room, RoomId};

pub use relay::{PlainRelay, Relay, RoomRelay, TaggedRelay};

const ROOM_PREFIX: &str = "room:";

/// Attach-time resolution failures. Reported to the accept boundary so the
/// attach can be rejected.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid room id {id:?}: {source}")]
    InvalidRoomId {
        id: String,
        #[source]
        source: uuid::Error,
    },

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),
}

/// Typed channel key; `Display` gives the registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Global,
    Chat,
    Status,
    Room(RoomId),
}

impl ChannelKey {
    pub fn parse(key: &str) -> Result<Self, HubError> {
        match key {
            "global" => Ok(Self::Global),
            "chat" => Ok(Self::Chat),
            "status" => Ok(Self::Status),
            other => match other.strip_prefix(ROOM_PREFIX) {
                Some(id) => Self::room(id),
                None => Uuid::parse_str(other)
                    .map(Self::Room)
                    .map_err(|_| HubError::UnknownChannel(other.to_string())),
            },
        }
    }

    /// Room key from a bare id string
    pub fn room(id: &str) -> Result<Self, HubError> {
        Uuid::parse_str(id.trim())
            .map(Self::Room)
            .map_err(|source| HubError::InvalidRoomId {
                id: id.to_string(),
                source,
            })
    }

    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::Room(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Chat => f.write_str("chat"),
            Self::Status => f.write_str("status"),
            Self::Room(id) => write!(f, "{}{}", ROOM_PREFIX, id),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub struct Hub {
    registry: Arc<ChannelRegistry>,
    store: MembershipStore,
    global_greeting: String,
    status_default: String,
    /// Upper bound on closing the outbound sink during teardown
    close_timeout: Duration,
    active: AtomicUsize,
}

impl Hub {
    /// Build the hub and create the fixed channels up front
    pub async fn new(config: &HubConfig, store: MembershipStore) -> Self {
        let hub = Self {
            registry: Arc::new(ChannelRegistry::new()),
            store,
            global_greeting: config.global_greeting.clone(),
            status_default: config.status_default.clone(),
            close_timeout: config.close_timeout,
            active: AtomicUsize::new(0),
        };

        for key in [ChannelKey::Global, ChannelKey::Chat, ChannelKey::Status] {
            hub.registry
                .get_or_create_with(&key.to_string(), hub.policy_for(&key))
                .await;
        }

        hub
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &MembershipStore {
        &self.store
    }

    /// Connections currently between attach and teardown
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn policy_for(&self, key: &ChannelKey) -> ReplayPolicy {
        match key {
            ChannelKey::Global => ReplayPolicy::replay_latest(self.global_greeting.clone()),
            ChannelKey::Status => ReplayPolicy::replay_latest(self.status_default.clone()),
            ChannelKey::Chat | ChannelKey::Room(_) => ReplayPolicy::BroadcastOnly,
        }
    }

    pub fn relay_for(&self, key: &ChannelKey) -> Box<dyn Relay> {
        match key {
            ChannelKey::Global | ChannelKey::Status => Box::new(PlainRelay),
            ChannelKey::Chat => Box::new(TaggedRelay),
            ChannelKey::Room(id) => Box::new(RoomRelay::new(self.store.clone(), *id)),
        }
    }

    /// Channel for `key`, created on first use. Room keys must name an existing room.
    pub async fn resolve(&self, key: &ChannelKey) -> Result<Arc<Channel>, HubError> {
        let registry_key = key.to_string();
        let channel = self
            .registry
            .get_or_create_with(&registry_key, self.policy_for(key))
            .await;

        // Checked after the insert: a room deleted in between leaves no entry behind
        if let ChannelKey::Room(id) = key {
            if !self.store.room_exists(id).await {
                self.registry.remove(&registry_key).await;
                return Err(HubError::RoomNotFound(*id));
            }
        }

        Ok(channel)
    }

    /// Publish straight into a channel, outside of any connection
    pub async fn publish(&self, key: &ChannelKey, value: impl Into<String>) -> Result<usize, HubError> {
        let channel = self.resolve(key).await?;
        Ok(channel.publish(value))
    }

    /// Add `member` to a room and publish the new member list to the room's
    /// subscribers, if it has any.
    pub async fn join_room(&self, room_id: &RoomId, member: Member) -> StoreResult<Room> {
        let room = self.store.join_room(room_id, member).await?;

        if let Some(payload) = relay::member_list_payload(&room) {
            let key = ChannelKey::Room(*room_id).to_string();
            if let Some(channel) = self.registry.get(&key).await {
                channel.publish(payload);
            }
        }

        Ok(room)
    }

    /// Drop a room's channel from the registry. Attached connections keep running.
    pub async fn forget_room(&self, room_id: &RoomId) {
        self.registry
            .remove(&ChannelKey::Room(*room_id).to_string())
            .await;
    }

    /// Resolve `key` and serve `conn` on it until the connection closes.
    ///
    /// Returns the connection in its `Closed` state.
    pub async fn attach<In, Out, E>(
        &self,
        key: &ChannelKey,
        conn: Connection,
        inbound: In,
        outbound: Out,
    ) -> Result<Connection, HubError>
    where
        In: Stream<Item = Result<Frame, E>> + Unpin + Send,
        E: fmt::Display,
        Out: Sink<String> + Unpin + Send,
        Out::Error: fmt::Display,
    {
        let channel = self.resolve(key).await?;
        let relay = self.relay_for(key);
        Ok(self
            .serve(conn, channel, relay.as_ref(), inbound, outbound)
            .await)
    }

    /// Serve `conn` on an already resolved channel
    pub async fn serve<In, Out, E>(
        &self,
        mut conn: Connection,
        channel: Arc<Channel>,
        relay: &dyn Relay,
        inbound: In,
        outbound: Out,
    ) -> Connection
    where
        In: Stream<Item = Result<Frame, E>> + Unpin + Send,
        E: fmt::Display,
        Out: Sink<String> + Unpin + Send,
        Out::Error: fmt::Display,
    {
        // ATTACHING: subscribe before any join-time publish so the joiner sees it too
        conn.sender_id = Some(
            conn.display_name
                .clone()
                .unwrap_or_else(|| conn.id.clone()),
        );
        let mut subscription = channel.attach();
        let _active = ActiveGuard::new(&self.active);

        tracing::info!(
            connection_id = %conn.id,
            channel = %channel.key(),
            sender = %conn.sender(),
            "Client connected"
        );
        relay.on_attach(&conn, &channel).await;
        conn.advance(ConnectionState::Active);

        let close = conn.close_signal().clone();
        let sender = conn.sender().to_string();

        tokio::join!(
            outbound_duty(&conn.id, &mut subscription, outbound, &close, self.close_timeout),
            inbound_duty(&conn.id, &sender, &channel, relay, inbound, &close),
            close_watch(&conn.id, &close),
        );

        conn.advance(ConnectionState::Closing);
        subscription.detach();
        conn.sender_id = None;
        conn.advance(ConnectionState::Closed);

        tracing::debug!(
            connection_id = %conn.id,
            channel = %channel.key(),
            remaining = channel.subscriber_count(),
            "Connection torn down"
        );

        conn
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Forward channel values to the transport until it closes
async fn outbound_duty<Out>(
    connection_id: &str,
    subscription: &mut Subscription,
    mut outbound: Out,
    close: &CloseSignal,
    close_timeout: Duration,
) where
    Out: Sink<String> + Unpin,
    Out::Error: fmt::Display,
{
    loop {
        let value = tokio::select! {
            biased;
            _ = close.wait() => break,
            value = subscription.recv() => value,
        };

        let Some(value) = value else {
            close.close(CloseStatus::going_away());
            break;
        };

        let sent = tokio::select! {
            biased;
            _ = close.wait() => break,
            sent = outbound.send(value) => sent,
        };

        if let Err(e) = sent {
            tracing::warn!(connection_id = %connection_id, "Failed to send frame: {}", e);
            close.close(CloseStatus::abnormal(e.to_string()));
            break;
        }
    }

    // Best effort; the peer may already be gone or have stopped reading
    if tokio::time::timeout(close_timeout, outbound.close())
        .await
        .is_err()
    {
        tracing::debug!(connection_id = %connection_id, "Gave up closing outbound sink");
    }
}

/// Relay inbound text frames into the channel until end of input
async fn inbound_duty<In, E>(
    connection_id: &str,
    sender: &str,
    channel: &Channel,
    relay: &dyn Relay,
    mut inbound: In,
    close: &CloseSignal,
) where
    In: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = close.wait() => break,
            frame = inbound.next() => frame,
        };

        match frame {
            Some(Ok(Frame::Text(text))) => {
                tracing::debug!(connection_id = %connection_id, "Client sent a message: {}", text);
                if let Some(value) = relay.relay(sender, text).await {
                    let delivered = channel.publish(value);
                    tracing::debug!(
                        connection_id = %connection_id,
                        channel = %channel.key(),
                        delivered,
                        "Published"
                    );
                }
            }
            Some(Ok(Frame::Close(status))) => {
                close.close(status.unwrap_or_else(CloseStatus::normal));
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(connection_id = %connection_id, "Transport error: {}", e);
                close.close(CloseStatus::abnormal(e.to_string()));
                break;
            }
            None => {
                close.close(CloseStatus::going_away());
                break;
            }
        }
    }
}

async fn close_watch(connection_id: &str, close: &CloseSignal) {
    let status = close.wait().await;
    tracing::info!(connection_id = %connection_id, %status, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Member;
    use futures::channel::mpsc;
    use std::convert::Infallible;
    use std::time::Duration;

    type Inbound = mpsc::UnboundedSender<Result<Frame, Infallible>>;
    type Outbound = mpsc::UnboundedReceiver<String>;

    async fn test_hub() -> Arc<Hub> {
        Arc::new(Hub::new(&HubConfig::default(), MembershipStore::new()).await)
    }

    fn spawn_client(
        hub: &Arc<Hub>,
        key: ChannelKey,
        conn: Connection,
    ) -> (
        Inbound,
        Outbound,
        tokio::task::JoinHandle<Result<Connection, HubError>>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded();
        let (out_tx, out_rx) = mpsc::unbounded();
        let hub = hub.clone();
        let handle = tokio::spawn(async move { hub.attach(&key, conn, in_rx, out_tx).await });
        (in_tx, out_rx, handle)
    }

    async fn next(rx: &mut Outbound) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound closed")
    }

    #[test]
    fn test_parse_channel_keys() {
        assert_eq!(ChannelKey::parse("global").unwrap(), ChannelKey::Global);
        assert_eq!(ChannelKey::parse("chat").unwrap(), ChannelKey::Chat);
        assert_eq!(ChannelKey::parse("status").unwrap(), ChannelKey::Status);

        let id = Uuid::new_v4();
        let key = ChannelKey::parse(&format!("room:{}", id)).unwrap();
        assert_eq!(key, ChannelKey::Room(id));
        assert_eq!(key.to_string(), format!("room:{}", id));
        assert_eq!(ChannelKey::parse(&id.to_string()).unwrap(), key);
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!(matches!(
            ChannelKey::parse("lobby"),
            Err(HubError::UnknownChannel(_))
        ));
        assert!(matches!(
            ChannelKey::parse("room:not-a-uuid"),
            Err(HubError::InvalidRoomId { .. })
        ));
    }

    #[tokio::test]
    async fn test_fixed_channels_exist_at_startup() {
        let hub = test_hub().await;
        assert_eq!(hub.registry().keys().await, vec!["chat", "global", "status"]);
    }

    #[tokio::test]
    async fn test_resolve_unknown_room_is_rejected() {
        let hub = test_hub().await;
        let id = Uuid::new_v4();
        let result = hub.resolve(&ChannelKey::Room(id)).await;
        assert!(matches!(result, Err(HubError::RoomNotFound(missing)) if missing == id));
        assert_eq!(hub.registry().len().await, 3);
    }

    #[tokio::test]
    async fn test_resolve_after_room_deleted_leaves_no_channel() {
        let hub = test_hub().await;
        let room = hub.store().create_room("lobby").await;
        let key = ChannelKey::Room(room.id);
        hub.resolve(&key).await.unwrap();

        // Store delete without forget_room, as when it lands mid-resolve
        hub.store().delete_room(&room.id).await.unwrap();

        let result = hub.resolve(&key).await;
        assert!(matches!(result, Err(HubError::RoomNotFound(missing)) if missing == room.id));
        assert!(hub.registry().get(&key.to_string()).await.is_none());
        assert_eq!(hub.registry().len().await, 3);
    }

    #[tokio::test]
    async fn test_global_greets_then_echoes() {
        let hub = test_hub().await;
        let (tx, mut rx, handle) = spawn_client(&hub, ChannelKey::Global, Connection::new());

        assert_eq!(next(&mut rx).await, "Welcome!");

        tx.unbounded_send(Ok(Frame::Text("hello".to_string())))
            .unwrap();
        assert_eq!(next(&mut rx).await, "hello");

        drop(tx);
        let conn = handle.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.sender_id.is_none());
    }

    #[tokio::test]
    async fn test_close_frame_ends_connection() {
        let hub = test_hub().await;
        let (tx, mut rx, handle) = spawn_client(&hub, ChannelKey::Chat, Connection::with_id("A"));

        assert_eq!(next(&mut rx).await, "A has joined the chat");
        tx.unbounded_send(Ok(Frame::Close(Some(CloseStatus::new(4001, "done")))))
            .unwrap();

        let conn = handle.await.unwrap().unwrap();
        assert_eq!(
            conn.close_handle().status(),
            Some(CloseStatus::new(4001, "done"))
        );
        // Outbound sink gets closed during teardown
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_external_close_stops_waiting_duties() {
        let hub = test_hub().await;
        let conn = Connection::new();
        let close = conn.close_handle();
        let (_tx, _rx, handle) = spawn_client(&hub, ChannelKey::Chat, conn);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.active_connections(), 1);
        close.close(CloseStatus::going_away());

        let conn = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(hub.active_connections(), 0);

        let chat = hub.resolve(&ChannelKey::Chat).await.unwrap();
        assert_eq!(chat.subscriber_count(), 0);
        assert_eq!(chat.publish("after"), 0);
    }

    #[tokio::test]
    async fn test_outbound_failure_closes_connection() {
        let hub = test_hub().await;
        let (tx, rx, handle) = spawn_client(&hub, ChannelKey::Global, Connection::new());

        // Peer stops reading: the next send fails. The hub may already be
        // gone by the time this frame arrives.
        drop(rx);
        let _ = tx.unbounded_send(Ok(Frame::Text("ping".to_string())));

        let conn = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let status = conn.close_handle().status().unwrap();
        assert_eq!(status.code, CloseStatus::ABNORMAL);
    }

    #[tokio::test]
    async fn test_attach_unknown_room_fails_before_serving() {
        let hub = test_hub().await;
        let (_tx, _rx, handle) = spawn_client(
            &hub,
            ChannelKey::Room(Uuid::new_v4()),
            Connection::new(),
        );
        assert!(matches!(
            handle.await.unwrap(),
            Err(HubError::RoomNotFound(_))
        ));
        assert_eq!(hub.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_room_join_publishes_member_list() {
        let hub = test_hub().await;
        let room = hub.store().create_room("lobby").await;
        let key = ChannelKey::Room(room.id);

        let (_watch_tx, mut watch_rx, _watch) =
            spawn_client(&hub, key, Connection::with_id("watcher"));
        let (join_tx, _join_rx, _joiner) = spawn_client(&hub, key, Connection::with_id("u1"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        join_tx
            .unbounded_send(Ok(Frame::Text("Al".to_string())))
            .unwrap();

        let members: Vec<Member> = serde_json::from_str(&next(&mut watch_rx).await).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "u1");
        assert_eq!(members[0].name, "Al");
    }

    #[tokio::test]
    async fn test_forget_room_keeps_attached_connections() {
        let hub = test_hub().await;
        let room = hub.store().create_room("lobby").await;
        let key = ChannelKey::Room(room.id);
        let (tx, mut rx, _handle) = spawn_client(&hub, key, Connection::with_id("u1"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.forget_room(&room.id).await;
        assert!(hub.registry().get(&key.to_string()).await.is_none());

        tx.unbounded_send(Ok(Frame::Text("Al".to_string())))
            .unwrap();
        let members: Vec<Member> = serde_json::from_str(&next(&mut rx).await).unwrap();
        assert_eq!(members[0].id, "u1");
    }

    #[tokio::test]
    async fn test_join_room_publishes_to_attached_clients() {
        let hub = test_hub().await;
        let room = hub.store().create_room("lobby").await;
        let (_tx, mut rx, _handle) =
            spawn_client(&hub, ChannelKey::Room(room.id), Connection::with_id("watcher"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let joined = hub
            .join_room(&room.id, Member::new("u1", "Al"))
            .await
            .unwrap();
        assert_eq!(joined.members.len(), 1);

        let members: Vec<Member> = serde_json::from_str(&next(&mut rx).await).unwrap();
        assert_eq!(members, vec![Member::new("u1", "Al")]);
    }

    #[tokio::test]
    async fn test_join_room_without_channel_only_updates_store() {
        let hub = test_hub().await;
        let room = hub.store().create_room("lobby").await;

        hub.join_room(&room.id, Member::new("u1", "Al"))
            .await
            .unwrap();
        assert_eq!(hub.store().list_members(&room.id).await.unwrap().len(), 1);
        assert!(hub
            .registry()
            .get(&ChannelKey::Room(room.id).to_string())
            .await
            .is_none());

        assert!(hub
            .join_room(&Uuid::new_v4(), Member::new("u1", "Al"))
            .await
            .is_err());
    }

    /// Sink that accepts frames but never finishes closing
    struct StuckSink;

    impl Sink<String> for StuckSink {
        type Error = Infallible;

        fn poll_ready(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn start_send(self: std::pin::Pin<&mut Self>, _item: String) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_teardown_gives_up_on_stuck_close() {
        let config = HubConfig {
            close_timeout: Duration::from_millis(50),
            ..HubConfig::default()
        };
        let hub = Arc::new(Hub::new(&config, MembershipStore::new()).await);
        let conn = Connection::new();
        let close = conn.close_handle();
        let (_in_tx, in_rx) = mpsc::unbounded::<Result<Frame, Infallible>>();

        let task = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.attach(&ChannelKey::Chat, conn, in_rx, StuckSink).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        close.close(CloseStatus::going_away());

        let conn = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("teardown hung on the outbound close")
            .unwrap()
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(hub.active_connections(), 0);
    }
}
