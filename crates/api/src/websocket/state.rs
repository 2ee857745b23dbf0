//! Global WebSocket state management
//!
//! Maintains the set of live connections and the thread rooms they are joined to.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;
use super::room::RoomManager;

/// Global WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Room manager for thread subscriptions
    pub rooms: Arc<RoomManager>,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
        }
    }

    /// Add a connection
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id,
            role = %conn.role,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection from the registry and every room
    pub async fn remove_connection(&self, session_id: &Uuid) -> Option<Arc<Connection>> {
        let removed = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(session_id);
            if let Some(conn) = &removed {
                tracing::info!(
                    session_id = %session_id,
                    user_id = %conn.user_id,
                    remaining_connections = connections.len(),
                    "WebSocket connection removed"
                );
            }
            removed
        };

        if removed.is_some() {
            self.rooms.remove_connection(session_id).await;
        }
        removed
    }

    /// Every live admin connection, joined to a room or not
    pub async fn admin_connections(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.role.is_admin())
            .cloned()
            .collect()
    }

    /// Send an event to every live connection
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            let _ = conn.send(event.clone());
        }
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get statistics about the WebSocket state
    pub async fn get_stats(&self) -> WebSocketStats {
        let connection_count = self.connection_count().await;
        let room_count = self.rooms.get_room_count().await;

        WebSocketStats {
            active_connections: connection_count,
            active_rooms: room_count,
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about WebSocket connections, reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct WebSocketStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of active thread rooms
    pub active_rooms: usize,
}
