//! In-memory store backend
//!
//! Used when no `DATABASE_URL` is configured and by the test-suite. A single lock guards
//! threads and messages together, so every trait call is atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use supportchat_shared::{
    Message, NewMessage, Page, Role, SummaryUpdate, Thread, ThreadFilter, UnreadDelta,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{summary_for, ChatStore, StoreError, StoreResult};

#[derive(Default)]
struct MemoryState {
    threads: HashMap<Uuid, Thread>,
    /// Per-thread messages in append order
    messages: HashMap<Uuid, Vec<Message>>,
}

impl MemoryState {
    fn thread_mut(&mut self, thread_id: &Uuid) -> StoreResult<&mut Thread> {
        self.threads.get_mut(thread_id).ok_or(StoreError::NotFound)
    }

    fn push_message(&mut self, new: NewMessage) -> StoreResult<Message> {
        if !self.threads.contains_key(&new.thread_id) {
            return Err(StoreError::NotFound);
        }
        let log = self.messages.entry(new.thread_id).or_default();

        // Keep timestamps non-decreasing within a thread
        let mut created_at = OffsetDateTime::now_utc();
        if let Some(last) = log.last() {
            created_at = created_at.max(last.created_at);
        }

        let message = new.into_message(created_at);
        log.push(message.clone());
        Ok(message)
    }

    fn canonical_threads(&self) -> Vec<&Thread> {
        let mut latest: HashMap<Uuid, &Thread> = HashMap::new();
        for thread in self.threads.values() {
            latest
                .entry(thread.customer_id)
                .and_modify(|current| {
                    if rank(thread) > rank(current) {
                        *current = thread;
                    }
                })
                .or_insert(thread);
        }
        latest.into_values().collect()
    }
}

/// Ordering key: most recent activity first, ties broken by id for stable pages
fn rank(thread: &Thread) -> (OffsetDateTime, Uuid) {
    (thread.activity_at(), thread.id)
}

/// In-memory [`ChatStore`]
#[derive(Clone, Default)]
pub struct MemoryChatStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a thread as-is, e.g. when importing historical data
    pub async fn seed_thread(&self, thread: Thread) {
        let mut state = self.state.write().await;
        state.messages.entry(thread.id).or_default();
        state.threads.insert(thread.id, thread);
    }

    pub async fn thread_count(&self) -> usize {
        self.state.read().await.threads.len()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_thread(&self, customer_id: Uuid) -> StoreResult<Thread> {
        let thread = Thread::new(customer_id);
        let mut state = self.state.write().await;
        state.messages.insert(thread.id, Vec::new());
        state.threads.insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, thread_id: Uuid) -> StoreResult<Thread> {
        let state = self.state.read().await;
        state.threads.get(&thread_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_threads(&self, filter: ThreadFilter, page: Page) -> StoreResult<Vec<Thread>> {
        let state = self.state.read().await;

        let candidates: Vec<&Thread> = if filter.canonical_only {
            state.canonical_threads()
        } else {
            state.threads.values().collect()
        };

        let mut threads: Vec<Thread> = candidates
            .into_iter()
            .filter(|t| filter.customer_id.map_or(true, |c| t.customer_id == c))
            .cloned()
            .collect();
        threads.sort_by(|a, b| rank(b).cmp(&rank(a)));

        Ok(threads
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .collect())
    }

    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
        self.state.write().await.push_message(new)
    }

    async fn list_messages(&self, thread_id: Uuid) -> StoreResult<Vec<Message>> {
        let state = self.state.read().await;
        if !state.threads.contains_key(&thread_id) {
            return Err(StoreError::NotFound);
        }
        Ok(state.messages.get(&thread_id).cloned().unwrap_or_default())
    }

    async fn upsert_thread_summary(
        &self,
        thread_id: Uuid,
        update: SummaryUpdate,
    ) -> StoreResult<Thread> {
        let mut state = self.state.write().await;
        let thread = state.thread_mut(&thread_id)?;
        thread.apply_summary(&update);
        Ok(thread.clone())
    }

    async fn append_message(
        &self,
        new: NewMessage,
        unread: UnreadDelta,
    ) -> StoreResult<(Message, Thread)> {
        let mut state = self.state.write().await;
        let message = state.push_message(new)?;
        let thread = state.thread_mut(&message.thread_id)?;
        thread.apply_summary(&summary_for(&message, unread));
        Ok((message, thread.clone()))
    }

    async fn reset_unread(&self, thread_id: Uuid, side: Role) -> StoreResult<Thread> {
        let mut state = self.state.write().await;
        let thread = state.thread_mut(&thread_id)?;
        match side {
            Role::Admin => thread.unread_for_admin = 0,
            Role::Customer => thread.unread_for_customer = 0,
        }
        Ok(thread.clone())
    }

    async fn sum_unread_for_admin(&self) -> StoreResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .canonical_threads()
            .iter()
            .map(|t| i64::from(t.unread_for_admin))
            .sum())
    }

    async fn delete_thread_cascade(&self, thread_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.threads.remove(&thread_id).is_none() {
            return Err(StoreError::NotFound);
        }
        state.messages.remove(&thread_id);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use supportchat_shared::{Identity, SenderType};
    use time::Duration;

    fn customer_delta() -> UnreadDelta {
        UnreadDelta {
            for_admin: 1,
            for_customer: 0,
        }
    }

    #[tokio::test]
    async fn test_append_updates_summary_atomically() {
        let store = MemoryChatStore::new();
        let customer = Uuid::new_v4();
        let thread = store.create_thread(customer).await.unwrap();

        let (message, updated) = store
            .append_message(
                NewMessage::text(thread.id, Identity::customer(customer), "hello"),
                customer_delta(),
            )
            .await
            .unwrap();

        assert_eq!(message.sender_type, SenderType::Customer);
        assert_eq!(updated.last_message_text.as_deref(), Some("hello"));
        assert_eq!(updated.last_message_at, Some(message.created_at));
        assert_eq!(updated.unread_for_admin, 1);
        assert_eq!(updated.unread_for_customer, 0);
    }

    #[tokio::test]
    async fn test_append_to_missing_thread_writes_nothing() {
        let store = MemoryChatStore::new();
        let result = store
            .append_message(
                NewMessage::text(Uuid::new_v4(), Identity::customer(Uuid::new_v4()), "hi"),
                customer_delta(),
            )
            .await;

        assert_eq!(result, Err(StoreError::NotFound));
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_messages_listed_in_creation_order() {
        let store = MemoryChatStore::new();
        let customer = Identity::customer(Uuid::new_v4());
        let thread = store.create_thread(customer.user_id).await.unwrap();

        for text in ["one", "two", "three"] {
            store
                .insert_message(NewMessage::text(thread.id, customer, text))
                .await
                .unwrap();
        }

        let texts: Vec<String> = store
            .list_messages(thread.id)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_canonical_listing_keeps_most_recent_thread_per_customer() {
        let store = MemoryChatStore::new();
        let customer = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        let mut stale = Thread::new(customer);
        stale.last_message_at = Some(now - Duration::days(2));
        let mut fresh = Thread::new(customer);
        fresh.last_message_at = Some(now - Duration::hours(1));
        let other = Thread::new(Uuid::new_v4());

        store.seed_thread(stale.clone()).await;
        store.seed_thread(fresh.clone()).await;
        store.seed_thread(other.clone()).await;

        let all = store
            .list_threads(ThreadFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let canonical = store
            .list_threads(ThreadFilter::canonical(), Page::default())
            .await
            .unwrap();
        let ids: Vec<Uuid> = canonical.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![other.id, fresh.id]);
    }

    #[tokio::test]
    async fn test_sum_unread_ignores_stale_duplicates() {
        let store = MemoryChatStore::new();
        let customer = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        let mut stale = Thread::new(customer);
        stale.last_message_at = Some(now - Duration::days(1));
        stale.unread_for_admin = 5;
        let mut fresh = Thread::new(customer);
        fresh.last_message_at = Some(now);
        fresh.unread_for_admin = 2;

        store.seed_thread(stale).await;
        store.seed_thread(fresh).await;

        assert_eq!(store.sum_unread_for_admin().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascade_removes_messages() {
        let store = MemoryChatStore::new();
        let customer = Identity::customer(Uuid::new_v4());
        let thread = store.create_thread(customer.user_id).await.unwrap();
        store
            .insert_message(NewMessage::text(thread.id, customer, "bye"))
            .await
            .unwrap();

        store.delete_thread_cascade(thread.id).await.unwrap();

        assert_eq!(store.get_thread(thread.id).await, Err(StoreError::NotFound));
        assert_eq!(store.list_messages(thread.id).await, Err(StoreError::NotFound));
        assert_eq!(store.message_count().await, 0);
        assert_eq!(
            store.delete_thread_cascade(thread.id).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = MemoryChatStore::new();
        for _ in 0..5 {
            store.create_thread(Uuid::new_v4()).await.unwrap();
        }

        let first = store
            .list_threads(ThreadFilter::canonical(), Page::new(1, 2))
            .await
            .unwrap();
        let third = store
            .list_threads(ThreadFilter::canonical(), Page::new(3, 2))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(third.len(), 1);
    }
}
