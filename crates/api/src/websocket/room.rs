//! Thread room management for pub/sub
//!
//! Manages thread "rooms" for broadcasting events to all joined connections.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

/// Manages thread "rooms" for broadcasting events
pub struct RoomManager {
    /// Map of thread_id -> list of connections
    rooms: Arc<RwLock<HashMap<Uuid, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a thread room (no-op if already a member)
    pub async fn join(&self, thread_id: Uuid, conn: Arc<Connection>) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(thread_id).or_default();
        if !members.iter().any(|c| c.session_id == conn.session_id) {
            members.push(Arc::clone(&conn));
        }

        tracing::debug!(
            thread_id = %thread_id,
            session_id = %conn.session_id,
            room_size = members.len(),
            "Connection joined thread room"
        );
    }

    /// Remove a connection from a thread room
    pub async fn leave(&self, thread_id: &Uuid, session_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(conns) = rooms.get_mut(thread_id) {
            conns.retain(|c| c.session_id != *session_id);

            // Clean up empty rooms
            if conns.is_empty() {
                rooms.remove(thread_id);
                tracing::debug!(thread_id = %thread_id, "Removed empty thread room");
            } else {
                tracing::debug!(
                    thread_id = %thread_id,
                    session_id = %session_id,
                    room_size = conns.len(),
                    "Connection left thread room"
                );
            }
        }
    }

    /// Current members of a room
    pub async fn members(&self, thread_id: &Uuid) -> Vec<Arc<Connection>> {
        let rooms = self.rooms.read().await;
        rooms.get(thread_id).cloned().unwrap_or_default()
    }

    /// Drop a room entirely, returning its former members
    pub async fn remove_room(&self, thread_id: &Uuid) -> Vec<Arc<Connection>> {
        let mut rooms = self.rooms.write().await;
        rooms.remove(thread_id).unwrap_or_default()
    }

    /// Broadcast an event to all connections in a thread room
    ///
    /// Silently ignores send errors (closed connections will be cleaned up).
    /// Returns the number of connections the event was handed to.
    pub async fn broadcast(&self, thread_id: &Uuid, event: ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(thread_id) else {
            tracing::debug!(
                thread_id = %thread_id,
                event_type = event.kind(),
                "No room found for thread - no subscribers"
            );
            return 0;
        };

        let mut success_count = 0;
        let mut failed_count = 0;
        for conn in conns {
            match conn.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            thread_id = %thread_id,
            event_type = event.kind(),
            recipients = success_count,
            failed = failed_count,
            "Broadcast event to thread room"
        );
        success_count
    }

    /// Remove a connection from all rooms
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        let mut removed_from = 0;

        for conns in rooms.values_mut() {
            let before_len = conns.len();
            conns.retain(|c| c.session_id != *session_id);
            if conns.len() < before_len {
                removed_from += 1;
            }
        }

        // Clean up empty rooms
        rooms.retain(|_, conns| !conns.is_empty());

        if removed_from > 0 {
            tracing::debug!(
                session_id = %session_id,
                room_count = removed_from,
                "Removed connection from rooms"
            );
        }
    }

    /// Get room size (number of connections) for a thread
    pub async fn get_room_size(&self, thread_id: &Uuid) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(thread_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
