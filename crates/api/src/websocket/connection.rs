//! WebSocket connection management
//!
//! Represents an authenticated WebSocket connection and the single room it may be joined to.

use std::sync::atomic::{AtomicBool, Ordering};
use supportchat_shared::{Identity, Role};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;

/// Lifecycle of an authenticated connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Authenticated, no room joined
    Idle,
    /// Subscribed to exactly one thread room
    Joined(Uuid),
    /// Terminal
    Disconnected,
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated user ID
    pub user_id: Uuid,

    /// Authenticated role
    pub role: Role,

    /// Client IP, when known
    pub ip_address: Option<String>,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Thread room this connection is joined to
    room: RwLock<Option<Uuid>>,

    closed: AtomicBool,
}

impl Connection {
    /// Create a new connection
    pub fn new(identity: Identity, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: identity.user_id,
            role: identity.role,
            ip_address: None,
            sender,
            room: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            role: self.role,
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Record the joined room; returns the room that was left, if any
    pub async fn set_room(&self, thread_id: Uuid) -> Option<Uuid> {
        let mut room = self.room.write().await;
        let previous = room.replace(thread_id);
        tracing::debug!(
            session_id = %self.session_id,
            thread_id = %thread_id,
            "Joined thread room"
        );
        previous.filter(|p| *p != thread_id)
    }

    /// Clear the joined room; returns it
    pub async fn clear_room(&self) -> Option<Uuid> {
        self.room.write().await.take()
    }

    /// Clear the room only if it is `thread_id`
    pub async fn clear_room_if(&self, thread_id: Uuid) -> bool {
        let mut room = self.room.write().await;
        if *room == Some(thread_id) {
            *room = None;
            true
        } else {
            false
        }
    }

    pub async fn current_room(&self) -> Option<Uuid> {
        *self.room.read().await
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub async fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) {
            return ConnectionState::Disconnected;
        }
        match self.current_room().await {
            Some(thread_id) => ConnectionState::Joined(thread_id),
            None => ConnectionState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel();
        Connection::new(Identity::admin(Uuid::new_v4()), tx)
    }

    #[tokio::test]
    async fn test_room_switching() {
        let conn = connection();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(conn.state().await, ConnectionState::Idle);

        assert_eq!(conn.set_room(first).await, None);
        assert_eq!(conn.state().await, ConnectionState::Joined(first));

        // Switching returns the room that was left
        assert_eq!(conn.set_room(second).await, Some(first));
        assert_eq!(conn.state().await, ConnectionState::Joined(second));

        // Re-joining the same room is not a switch
        assert_eq!(conn.set_room(second).await, None);

        assert_eq!(conn.clear_room().await, Some(second));
        assert_eq!(conn.state().await, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_clear_room_if_matches_only_current() {
        let conn = connection();
        let joined = Uuid::new_v4();
        conn.set_room(joined).await;

        assert!(!conn.clear_room_if(Uuid::new_v4()).await);
        assert!(conn.clear_room_if(joined).await);
        assert_eq!(conn.current_room().await, None);
    }

    #[tokio::test]
    async fn test_closed_connection_is_terminal() {
        let conn = connection();
        conn.set_room(Uuid::new_v4()).await;
        conn.mark_closed();
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
    }
}
