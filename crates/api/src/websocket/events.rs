//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization.

use serde::{Deserialize, Serialize};
use supportchat_shared::{ChatError, Message, Role, Thread};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::presence::UserPresence;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake credential, when not supplied on the upgrade request
    Authenticate { token: String },

    /// Find or create the caller's own thread and join its room (customers)
    OpenThread,

    /// Join a thread room, leaving the current one
    Join { thread_id: Uuid },

    /// Leave the current room
    Leave,

    /// Send a text message
    Send { thread_id: Uuid, text: String },

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected {
        session_id: Uuid,
        user_id: Uuid,
        role: Role,
    },

    /// Batch presence data (sent on initial connection)
    PresenceBatch { users: Vec<UserPresence> },

    /// Reply to `open_thread`
    ThreadOpened { thread: Thread },

    /// Room joined
    Joined { thread_id: Uuid },

    /// Room left
    Left { thread_id: Uuid },

    /// New message persisted in a thread
    Message { thread_id: Uuid, message: Message },

    /// Thread preview / unread counters changed
    ThreadUpdated {
        thread_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_text: Option<String>,
        #[serde(
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none"
        )]
        last_at: Option<OffsetDateTime>,
        unread_for_admin: i32,
        unread_for_customer: i32,
    },

    /// Thread purged; drop local state
    ThreadDeleted { thread_id: Uuid },

    /// User presence status changed
    PresenceUpdate {
        user_id: Uuid,
        online: bool,
        #[serde(
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none"
        )]
        last_seen_at: Option<OffsetDateTime>,
    },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn message(message: &Message) -> Self {
        ServerEvent::Message {
            thread_id: message.thread_id,
            message: message.clone(),
        }
    }

    pub fn thread_updated(thread: &Thread) -> Self {
        ServerEvent::ThreadUpdated {
            thread_id: thread.id,
            last_text: thread.last_message_text.clone(),
            last_at: thread.last_message_at,
            unread_for_admin: thread.unread_for_admin,
            unread_for_customer: thread.unread_for_customer,
        }
    }

    pub fn error(err: &ChatError) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::PresenceBatch { .. } => "presence_batch",
            ServerEvent::ThreadOpened { .. } => "thread_opened",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::Left { .. } => "left",
            ServerEvent::Message { .. } => "message",
            ServerEvent::ThreadUpdated { .. } => "thread_updated",
            ServerEvent::ThreadDeleted { .. } => "thread_deleted",
            ServerEvent::PresenceUpdate { .. } => "presence_update",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}
