//! Message store adapter
//!
//! Durable CRUD over threads and messages. No business rules live here: callers
//! (registry, hub, coordinator) decide *when* to write, the store only guarantees that
//! each call is atomic.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use supportchat_shared::{
    ChatError, Message, NewMessage, Page, Role, SummaryUpdate, Thread, ThreadFilter, UnreadDelta,
};
use uuid::Uuid;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ChatError::NotFound,
            StoreError::Backend(msg) => ChatError::Storage(msg),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) => {
                // PostgreSQL foreign key violation: the owning thread is gone
                if db_err.code().as_deref() == Some("23503") {
                    return StoreError::NotFound;
                }
                StoreError::Backend(db_err.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator used by the chat core
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert a fresh thread with zero counters (no uniqueness check)
    async fn create_thread(&self, customer_id: Uuid) -> StoreResult<Thread>;

    async fn get_thread(&self, thread_id: Uuid) -> StoreResult<Thread>;

    /// Threads ordered by activity (last message, else creation) descending
    async fn list_threads(&self, filter: ThreadFilter, page: Page) -> StoreResult<Vec<Thread>>;

    /// Insert a message without touching the thread summary
    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message>;

    /// Messages of a thread in creation order
    async fn list_messages(&self, thread_id: Uuid) -> StoreResult<Vec<Message>>;

    async fn upsert_thread_summary(
        &self,
        thread_id: Uuid,
        update: SummaryUpdate,
    ) -> StoreResult<Thread>;

    /// Insert a message and apply its summary update as one atomic write
    async fn append_message(
        &self,
        new: NewMessage,
        unread: UnreadDelta,
    ) -> StoreResult<(Message, Thread)>;

    /// Reset one side's unread counter to zero
    async fn reset_unread(&self, thread_id: Uuid, side: Role) -> StoreResult<Thread>;

    /// Sum of `unread_for_admin` over canonical threads
    async fn sum_unread_for_admin(&self) -> StoreResult<i64>;

    /// Remove a thread and all of its messages atomically
    async fn delete_thread_cascade(&self, thread_id: Uuid) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Summary update describing a freshly written message
pub fn summary_for(message: &Message, unread: UnreadDelta) -> SummaryUpdate {
    SummaryUpdate {
        last_text: message.preview(),
        last_at: message.created_at,
        unread,
    }
}
