//! Realtime chat hub
//!
//! Owns live connections and thread rooms, and is the only place messages are written.
//! Every write to a thread happens under that thread's lock, and the resulting events are
//! broadcast before the lock is released, so room members observe messages in commit
//! order and nothing is broadcast for a write that did not commit.

use std::collections::HashSet;
use std::sync::Arc;
use supportchat_shared::{ChatError, ChatResult, Identity, Message, NewMessage, Role, Thread};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;
use super::state::WebSocketState;
use crate::coordinator::{unread_delta_for, ReadCoordinator};
use crate::locks::KeyedLocks;
use crate::presence::PresenceTracker;
use crate::registry::ThreadRegistry;
use crate::store::ChatStore;

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    /// Upper bound on text message length, in characters
    pub max_message_chars: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_message_chars: 2000,
        }
    }
}

pub struct ChatHub {
    store: Arc<dyn ChatStore>,
    registry: ThreadRegistry,
    coordinator: ReadCoordinator,
    presence: PresenceTracker,
    sockets: WebSocketState,
    thread_locks: Arc<KeyedLocks<Uuid>>,
    settings: HubSettings,
}

impl ChatHub {
    pub fn new(store: Arc<dyn ChatStore>, settings: HubSettings) -> Self {
        Self {
            registry: ThreadRegistry::new(Arc::clone(&store)),
            coordinator: ReadCoordinator::new(Arc::clone(&store)),
            store,
            presence: PresenceTracker::new(),
            sockets: WebSocketState::new(),
            thread_locks: KeyedLocks::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &ReadCoordinator {
        &self.coordinator
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn sockets(&self) -> &WebSocketState {
        &self.sockets
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register an authenticated connection.
    ///
    /// Sends `connected` and the presence batch to the new connection, and announces the
    /// user to everyone else if this is their first live device.
    pub async fn connect(
        &self,
        identity: Identity,
        ip_address: Option<String>,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Arc<Connection> {
        let conn = Connection::new(identity, sender).with_ip(ip_address.clone());
        let conn = self.sockets.add_connection(conn).await;

        let _ = conn.send(ServerEvent::Connected {
            session_id: conn.session_id,
            user_id: conn.user_id,
            role: conn.role,
        });

        let came_online = self.presence.connect(identity.user_id, ip_address);
        let _ = conn.send(ServerEvent::PresenceBatch {
            users: self.presence.snapshot(),
        });

        if came_online {
            self.sockets
                .broadcast_all(ServerEvent::PresenceUpdate {
                    user_id: identity.user_id,
                    online: true,
                    last_seen_at: None,
                })
                .await;
        }

        conn
    }

    /// Tear down a connection. Safe to call more than once.
    pub async fn disconnect(&self, session_id: Uuid) {
        let Some(conn) = self.sockets.remove_connection(&session_id).await else {
            return;
        };
        conn.clear_room().await;
        conn.mark_closed();

        if let Some(last_seen_at) = self.presence.disconnect(conn.user_id) {
            tracing::debug!(user_id = %conn.user_id, "User went offline");
            self.sockets
                .broadcast_all(ServerEvent::PresenceUpdate {
                    user_id: conn.user_id,
                    online: false,
                    last_seen_at: Some(last_seen_at),
                })
                .await;
        }
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    /// Customer entry point: find or create the caller's thread and join its room
    pub async fn open_thread(&self, conn: &Arc<Connection>) -> ChatResult<Thread> {
        if conn.role != Role::Customer {
            return Err(ChatError::Authorization);
        }

        let thread = self.registry.open_or_create_thread(conn.user_id).await?;
        self.join(conn, thread.id).await
    }

    /// Join a thread room, leaving any previously joined room
    pub async fn join(&self, conn: &Arc<Connection>, thread_id: Uuid) -> ChatResult<Thread> {
        // Serialised with delete so a join can never land in a purged room
        let _guard = self.thread_locks.lock(thread_id).await;

        let thread = self.authorized_thread(&conn.identity(), thread_id).await?;
        // Customers only ever sit in their live thread; admins may browse stale ones
        if conn.role == Role::Customer {
            self.ensure_canonical(&thread).await?;
        }

        if let Some(previous) = conn.set_room(thread_id).await {
            self.sockets.rooms.leave(&previous, &conn.session_id).await;
        }
        self.sockets.rooms.join(thread_id, Arc::clone(conn)).await;

        Ok(thread)
    }

    /// Leave the current room; returns it
    pub async fn leave(&self, conn: &Arc<Connection>) -> Option<Uuid> {
        let thread_id = conn.clear_room().await?;
        self.sockets.rooms.leave(&thread_id, &conn.session_id).await;
        Some(thread_id)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Text message from a connection
    pub async fn send(
        &self,
        conn: &Arc<Connection>,
        thread_id: Uuid,
        text: &str,
    ) -> ChatResult<Message> {
        let text = self.validate_text(text)?;
        self.deliver(conn.identity(), NewMessage::text(thread_id, conn.identity(), text))
            .await
    }

    /// The single write path for messages.
    ///
    /// Persists the message together with the thread summary and the other side's unread
    /// increment, then broadcasts `message` to the room and `thread_updated` to the room
    /// plus every admin. A failed write broadcasts nothing.
    pub async fn deliver(&self, sender: Identity, new: NewMessage) -> ChatResult<Message> {
        if new.text.as_deref().map_or(true, str::is_empty) && new.image_url.is_none() {
            return Err(ChatError::validation("Message must have text or an image"));
        }
        if new.sender_id != sender.user_id {
            return Err(ChatError::Authorization);
        }

        let thread_id = new.thread_id;
        let _guard = self.thread_locks.lock(thread_id).await;

        self.postable_thread(&sender, thread_id).await?;

        let delta = unread_delta_for(new.sender_type);
        let (message, thread) = match self.store.append_message(new, delta).await {
            Ok(written) => written,
            Err(e) => {
                tracing::error!(
                    thread_id = %thread_id,
                    sender_id = %sender.user_id,
                    error = %e,
                    "Failed to persist chat message"
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            thread_id = %thread_id,
            message_id = %message.id,
            sender_type = %message.sender_type.as_str(),
            has_image = message.image_url.is_some(),
            "Chat message delivered"
        );

        self.sockets
            .rooms
            .broadcast(&thread_id, ServerEvent::message(&message))
            .await;
        self.broadcast_thread_update(&thread).await;

        Ok(message)
    }

    /// History of a thread, oldest first
    pub async fn list_messages(
        &self,
        requester: &Identity,
        thread_id: Uuid,
    ) -> ChatResult<Vec<Message>> {
        self.authorized_thread(requester, thread_id).await?;
        Ok(self.store.list_messages(thread_id).await?)
    }

    // =========================================================================
    // Thread lifecycle
    // =========================================================================

    /// Reset the caller's side of a thread's unread counters
    pub async fn mark_read(&self, reader: &Identity, thread_id: Uuid) -> ChatResult<Thread> {
        let _guard = self.thread_locks.lock(thread_id).await;

        self.authorized_thread(reader, thread_id).await?;
        let thread = self.coordinator.mark_read(thread_id, reader.role).await?;
        self.broadcast_thread_update(&thread).await;

        Ok(thread)
    }

    /// Purge a thread (admin only) and evict its room
    pub async fn delete_thread(&self, requester: &Identity, thread_id: Uuid) -> ChatResult<()> {
        if !requester.role.is_admin() {
            return Err(ChatError::Authorization);
        }

        let _guard = self.thread_locks.lock(thread_id).await;

        self.registry.delete_thread(thread_id).await?;

        let event = ServerEvent::ThreadDeleted { thread_id };
        let mut notified = HashSet::new();
        for conn in self.sockets.rooms.remove_room(&thread_id).await {
            conn.clear_room_if(thread_id).await;
            if notified.insert(conn.session_id) {
                let _ = conn.send(event.clone());
            }
        }
        for conn in self.sockets.admin_connections().await {
            if notified.insert(conn.session_id) {
                let _ = conn.send(event.clone());
            }
        }

        tracing::info!(
            thread_id = %thread_id,
            deleted_by = %requester.user_id,
            notified = notified.len(),
            "Thread deleted"
        );
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn authorized_thread(&self, identity: &Identity, thread_id: Uuid) -> ChatResult<Thread> {
        let thread = self.registry.get_thread(thread_id).await?;
        if !identity.can_access(&thread) {
            tracing::warn!(
                thread_id = %thread_id,
                user_id = %identity.user_id,
                "Thread access denied"
            );
            return Err(ChatError::Authorization);
        }
        Ok(thread)
    }

    /// Access check plus the canonical-thread rule: historical duplicates stay readable but
    /// take no new messages, from either side.
    async fn postable_thread(&self, identity: &Identity, thread_id: Uuid) -> ChatResult<Thread> {
        let thread = self.authorized_thread(identity, thread_id).await?;
        self.ensure_canonical(&thread).await?;
        Ok(thread)
    }

    async fn ensure_canonical(&self, thread: &Thread) -> ChatResult<()> {
        match self.registry.canonical_thread(thread.customer_id).await? {
            Some(canonical) if canonical.id != thread.id => {
                tracing::warn!(
                    thread_id = %thread.id,
                    canonical_id = %canonical.id,
                    customer_id = %thread.customer_id,
                    "Rejected write to superseded thread"
                );
                Err(ChatError::validation(format!(
                    "Thread {} is superseded by {}",
                    thread.id, canonical.id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Check that `identity` may post to `thread_id` without writing anything
    pub async fn authorize(&self, identity: &Identity, thread_id: Uuid) -> ChatResult<Thread> {
        self.postable_thread(identity, thread_id).await
    }

    fn validate_text<'a>(&self, text: &'a str) -> ChatResult<&'a str> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::validation("Message text cannot be empty"));
        }
        if text.chars().count() > self.settings.max_message_chars {
            return Err(ChatError::validation(format!(
                "Message text exceeds {} characters",
                self.settings.max_message_chars
            )));
        }
        Ok(text)
    }

    /// `thread_updated` to the room plus all admins, at most once per connection
    async fn broadcast_thread_update(&self, thread: &Thread) {
        let event = ServerEvent::thread_updated(thread);

        let mut recipients = self.sockets.rooms.members(&thread.id).await;
        recipients.extend(self.sockets.admin_connections().await);

        let mut seen = HashSet::new();
        for conn in recipients {
            if seen.insert(conn.session_id) {
                let _ = conn.send(event.clone());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryChatStore;

    fn hub() -> (ChatHub, MemoryChatStore) {
        let store = MemoryChatStore::new();
        (ChatHub::new(Arc::new(store.clone()), HubSettings::default()), store)
    }

    async fn connect(
        hub: &ChatHub,
        identity: Identity,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.connect(identity, None, tx).await;
        // connected + presence_batch
        while rx.try_recv().is_ok() {}
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_connect_sends_ack_then_presence_batch() {
        let (hub, _) = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = Identity::customer(Uuid::new_v4());

        hub.connect(identity, None, tx).await;

        let events = drain(&mut rx);
        assert!(matches!(events[0], ServerEvent::Connected { user_id, .. } if user_id == identity.user_id));
        assert!(matches!(events[1], ServerEvent::PresenceBatch { .. }));
    }

    #[tokio::test]
    async fn test_text_validation() {
        let (hub, store) = hub();
        let (conn, _rx) = connect(&hub, Identity::customer(Uuid::new_v4())).await;
        let thread = hub.open_thread(&conn).await.unwrap();

        let empty = hub.send(&conn, thread.id, "   ").await;
        assert!(matches!(empty, Err(ChatError::Validation(_))));

        let too_long = "x".repeat(2001);
        let result = hub.send(&conn, thread.id, &too_long).await;
        assert!(matches!(result, Err(ChatError::Validation(_))));

        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_admin_cannot_open_thread() {
        let (hub, _) = hub();
        let (conn, _rx) = connect(&hub, Identity::admin(Uuid::new_v4())).await;
        assert_eq!(hub.open_thread(&conn).await, Err(ChatError::Authorization));
    }

    #[tokio::test]
    async fn test_join_switches_rooms() {
        let (hub, store) = hub();
        let (admin, _rx) = connect(&hub, Identity::admin(Uuid::new_v4())).await;
        let first = store.create_thread(Uuid::new_v4()).await.unwrap();
        let second = store.create_thread(Uuid::new_v4()).await.unwrap();

        hub.join(&admin, first.id).await.unwrap();
        hub.join(&admin, second.id).await.unwrap();

        assert_eq!(hub.sockets().rooms.get_room_size(&first.id).await, 0);
        assert_eq!(hub.sockets().rooms.get_room_size(&second.id).await, 1);
        assert_eq!(admin.current_room().await, Some(second.id));

        assert_eq!(hub.leave(&admin).await, Some(second.id));
        assert_eq!(hub.leave(&admin).await, None);
    }

    #[tokio::test]
    async fn test_deliver_rejects_spoofed_sender() {
        let (hub, store) = hub();
        let customer = Identity::customer(Uuid::new_v4());
        let thread = store.create_thread(customer.user_id).await.unwrap();

        let spoofed = NewMessage::text(thread.id, Identity::admin(Uuid::new_v4()), "hi");
        let result = hub.deliver(customer, spoofed).await;

        assert_eq!(result, Err(ChatError::Authorization));
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_announces_offline() {
        let (hub, _) = hub();
        let watcher_identity = Identity::admin(Uuid::new_v4());
        let (_watcher, mut watcher_rx) = connect(&hub, watcher_identity).await;
        let user = Identity::customer(Uuid::new_v4());
        let (conn, _rx) = connect(&hub, user).await;
        drain(&mut watcher_rx);

        hub.disconnect(conn.session_id).await;
        hub.disconnect(conn.session_id).await;

        let events = drain(&mut watcher_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ServerEvent::PresenceUpdate { online: false, user_id, .. } if user_id == user.user_id
        ));
        assert!(!hub.presence().is_online(&user.user_id));
    }
}
