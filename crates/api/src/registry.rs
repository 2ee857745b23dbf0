//! Thread registry
//!
//! Owns the customer → canonical thread mapping. Lookups go straight to the store; creation
//! is serialised per customer so concurrent opens from several devices can never create two
//! threads.

use serde::Serialize;
use std::sync::Arc;
use supportchat_shared::{ChatError, ChatResult, Page, Thread, ThreadFilter};
use uuid::Uuid;

use crate::locks::KeyedLocks;
use crate::store::ChatStore;

/// One page of the admin inbox
#[derive(Debug, Clone, Serialize)]
pub struct ThreadPage {
    pub threads: Vec<Thread>,
    pub page: u32,
    pub page_size: u32,
    pub total_unread_for_admin: i64,
}

#[derive(Clone)]
pub struct ThreadRegistry {
    store: Arc<dyn ChatStore>,
    creation_locks: Arc<KeyedLocks<Uuid>>,
}

impl ThreadRegistry {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            creation_locks: KeyedLocks::new(),
        }
    }

    /// Return the customer's canonical thread, creating it on first use
    pub async fn open_or_create_thread(&self, customer_id: Uuid) -> ChatResult<Thread> {
        let _guard = self.creation_locks.lock(customer_id).await;

        if let Some(existing) = self.canonical_thread(customer_id).await? {
            return Ok(existing);
        }

        let thread = self.store.create_thread(customer_id).await?;
        tracing::info!(
            thread_id = %thread.id,
            customer_id = %customer_id,
            "Created chat thread"
        );
        Ok(thread)
    }

    /// Most recently active thread of a customer, if any
    pub async fn canonical_thread(&self, customer_id: Uuid) -> ChatResult<Option<Thread>> {
        let mut threads = self
            .store
            .list_threads(ThreadFilter::for_customer(customer_id), Page::new(1, 1))
            .await?;
        Ok(threads.pop())
    }

    pub async fn get_thread(&self, thread_id: Uuid) -> ChatResult<Thread> {
        Ok(self.store.get_thread(thread_id).await?)
    }

    /// Admin inbox: one entry per customer, most recent activity first
    pub async fn list_threads_for_admin(&self, page: Page) -> ChatResult<ThreadPage> {
        let threads = self.store.list_threads(ThreadFilter::canonical(), page).await?;
        let total_unread_for_admin = self.store.sum_unread_for_admin().await?;

        Ok(ThreadPage {
            threads,
            page: page.number,
            page_size: page.size,
            total_unread_for_admin,
        })
    }

    /// Purge a thread and its messages. Room notification is the hub's job.
    pub async fn delete_thread(&self, thread_id: Uuid) -> ChatResult<Thread> {
        let thread = self.store.get_thread(thread_id).await?;
        self.store
            .delete_thread_cascade(thread_id)
            .await
            .map_err(ChatError::from)?;

        tracing::info!(
            thread_id = %thread_id,
            customer_id = %thread.customer_id,
            "Deleted chat thread"
        );
        Ok(thread)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryChatStore;
    use time::{Duration, OffsetDateTime};

    fn registry() -> (ThreadRegistry, MemoryChatStore) {
        let store = MemoryChatStore::new();
        (ThreadRegistry::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let (registry, store) = registry();
        let customer = Uuid::new_v4();

        let first = registry.open_or_create_thread(customer).await.unwrap();
        let second = registry.open_or_create_thread(customer).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.unread_for_admin, 0);
        assert_eq!(first.last_message_text, None);
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_opens_create_one_thread() {
        let (registry, store) = registry();
        let customer = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.open_or_create_thread(customer).await.unwrap().id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_open_picks_most_recent_historical_duplicate() {
        let (registry, store) = registry();
        let customer = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        let mut old = Thread::new(customer);
        old.created_at = now - Duration::days(10);
        old.last_message_at = Some(now - Duration::days(9));
        let mut recent = Thread::new(customer);
        recent.created_at = now - Duration::days(10);
        recent.last_message_at = Some(now - Duration::minutes(5));
        store.seed_thread(old).await;
        store.seed_thread(recent.clone()).await;

        let opened = registry.open_or_create_thread(customer).await.unwrap();
        assert_eq!(opened.id, recent.id);
        assert_eq!(store.thread_count().await, 2);
    }

    #[tokio::test]
    async fn test_delete_missing_thread_is_not_found() {
        let (registry, _) = registry();
        let result = registry.delete_thread(Uuid::new_v4()).await;
        assert_eq!(result, Err(ChatError::NotFound));
    }
}
