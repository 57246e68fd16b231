//! Per-connection state and the transport-independent frame types

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::watch;

use crate::types::ConnectionId;

/// Inbound frame handed to the hub by a transport adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(Option<CloseStatus>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
}

impl CloseStatus {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const ABNORMAL: u16 = 1006;

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }

    pub fn going_away() -> Self {
        Self::new(Self::GOING_AWAY, "")
    }

    /// Close caused by a transport read/write failure
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(Self::ABNORMAL, reason)
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Attaching,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Attaching, Active) | (Attaching, Closing) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// One client's session as seen by the hub
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub opened_at: DateTime<Utc>,
    /// Name given by the client at accept time, if any
    pub display_name: Option<String>,
    /// Tag put in front of relayed messages; only set while attached
    pub sender_id: Option<String>,
    state: ConnectionState,
    close: CloseSignal,
}

impl Connection {
    pub fn new() -> Self {
        Self::with_id(ulid::Ulid::new().to_string())
    }

    pub fn with_id(id: impl Into<ConnectionId>) -> Self {
        Self {
            id: id.into(),
            opened_at: Utc::now(),
            display_name: None,
            sender_id: None,
            state: ConnectionState::Attaching,
            close: CloseSignal::new(),
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Handle that can close this connection from outside the hub
    pub fn close_handle(&self) -> CloseSignal {
        self.close.clone()
    }

    pub(crate) fn close_signal(&self) -> &CloseSignal {
        &self.close
    }

    /// Name relayed messages are tagged with
    pub fn sender(&self) -> &str {
        self.sender_id.as_deref().unwrap_or(&self.id)
    }

    pub(crate) fn advance(&mut self, next: ConnectionState) {
        if !self.state.can_advance_to(next) {
            tracing::warn!(
                connection_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Ignoring invalid connection state transition"
            );
            return;
        }
        tracing::debug!(connection_id = %self.id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot close notification shared by a connection's duties.
///
/// The first `close` wins and records the status; later calls are no-ops.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: watch::Sender<Option<CloseStatus>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Fire the signal. Returns true for the call that actually closed it.
    pub fn close(&self, status: CloseStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(status);
            true
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn status(&self) -> Option<CloseStatus> {
        self.tx.borrow().clone()
    }

    /// Resolve once the signal has fired
    pub async fn wait(&self) -> CloseStatus {
        let mut rx = self.tx.subscribe();
        let status = match rx.wait_for(|s| s.is_some()).await {
            Ok(status) => status.clone().unwrap_or_else(CloseStatus::normal),
            // Unreachable while `self` holds the sender
            Err(_) => CloseStatus::going_away(),
        };
        status
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_close_wins() {
        let signal = CloseSignal::new();
        assert!(!signal.is_closed());

        assert!(signal.close(CloseStatus::normal()));
        assert!(!signal.close(CloseStatus::abnormal("late")));
        assert_eq!(signal.status(), Some(CloseStatus::normal()));
    }

    #[tokio::test]
    async fn test_wait_resolves_for_every_observer() {
        let signal = CloseSignal::new();
        let a = signal.clone();
        let b = signal.clone();

        let waiter_a = tokio::spawn(async move { a.wait().await });
        let waiter_b = tokio::spawn(async move { b.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.close(CloseStatus::going_away());

        assert_eq!(waiter_a.await.unwrap(), CloseStatus::going_away());
        assert_eq!(waiter_b.await.unwrap(), CloseStatus::going_away());
    }

    #[tokio::test]
    async fn test_wait_after_close_returns_immediately() {
        let signal = CloseSignal::new();
        signal.close(CloseStatus::new(4000, "bye"));
        assert_eq!(signal.wait().await.reason, "bye");
    }

    #[test]
    fn test_state_transitions() {
        let mut conn = Connection::with_id("c1");
        assert_eq!(conn.state(), ConnectionState::Attaching);

        conn.advance(ConnectionState::Closed);
        assert_eq!(conn.state(), ConnectionState::Attaching);

        conn.advance(ConnectionState::Active);
        conn.advance(ConnectionState::Closing);
        conn.advance(ConnectionState::Closed);
        assert_eq!(conn.state(), ConnectionState::Closed);

        conn.advance(ConnectionState::Active);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_sender_falls_back_to_id() {
        let mut conn = Connection::with_id("c1").with_display_name(Some("  ".to_string()));
        assert!(conn.display_name.is_none());
        assert_eq!(conn.sender(), "c1");

        conn.sender_id = Some("Al".to_string());
        assert_eq!(conn.sender(), "Al");
    }

    #[test]
    fn test_close_status_display() {
        assert_eq!(CloseStatus::normal().to_string(), "1000");
        assert_eq!(CloseStatus::abnormal("reset").to_string(), "1006 (reset)");
    }
}
