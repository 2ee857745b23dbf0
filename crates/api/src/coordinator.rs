//! Delivery/read coordinator
//!
//! Aggregate unread bookkeeping: one counter per side per thread, incremented with every
//! message written by the other side and reset wholesale by `mark_read`. There are no
//! per-message receipts.

use std::sync::Arc;
use supportchat_shared::{ChatResult, Role, SenderType, Thread, UnreadDelta};
use uuid::Uuid;

use crate::store::ChatStore;

/// Counter change caused by one message from `sender`
pub fn unread_delta_for(sender: SenderType) -> UnreadDelta {
    match sender {
        SenderType::Customer => UnreadDelta {
            for_admin: 1,
            for_customer: 0,
        },
        SenderType::Admin => UnreadDelta {
            for_admin: 0,
            for_customer: 1,
        },
    }
}

#[derive(Clone)]
pub struct ReadCoordinator {
    store: Arc<dyn ChatStore>,
}

impl ReadCoordinator {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Reset `side`'s counter on a thread (last write wins)
    pub async fn mark_read(&self, thread_id: Uuid, side: Role) -> ChatResult<Thread> {
        let thread = self.store.reset_unread(thread_id, side).await?;
        tracing::debug!(thread_id = %thread_id, side = %side, "Marked thread read");
        Ok(thread)
    }

    /// Admin badge: unread customer messages across all canonical threads
    pub async fn total_unread_for_admin(&self) -> ChatResult<i64> {
        Ok(self.store.sum_unread_for_admin().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryChatStore;
    use supportchat_shared::{ChatError, Identity, NewMessage};

    #[test]
    fn test_delta_targets_the_other_side() {
        assert_eq!(unread_delta_for(SenderType::Customer).for_admin, 1);
        assert_eq!(unread_delta_for(SenderType::Customer).for_customer, 0);
        assert_eq!(unread_delta_for(SenderType::Admin).for_customer, 1);
        assert_eq!(unread_delta_for(SenderType::Admin).for_admin, 0);
    }

    #[tokio::test]
    async fn test_mark_read_resets_only_one_side() {
        let store = MemoryChatStore::new();
        let coordinator = ReadCoordinator::new(Arc::new(store.clone()));
        let customer = Identity::customer(Uuid::new_v4());
        let admin = Identity::admin(Uuid::new_v4());
        let thread = store.create_thread(customer.user_id).await.unwrap();

        for _ in 0..3 {
            store
                .append_message(
                    NewMessage::text(thread.id, customer, "ping"),
                    unread_delta_for(SenderType::Customer),
                )
                .await
                .unwrap();
        }
        store
            .append_message(
                NewMessage::text(thread.id, admin, "pong"),
                unread_delta_for(SenderType::Admin),
            )
            .await
            .unwrap();
        assert_eq!(coordinator.total_unread_for_admin().await.unwrap(), 3);

        let thread = coordinator.mark_read(thread.id, Role::Admin).await.unwrap();
        assert_eq!(thread.unread_for_admin, 0);
        assert_eq!(thread.unread_for_customer, 1);
        assert_eq!(coordinator.total_unread_for_admin().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_thread() {
        let coordinator = ReadCoordinator::new(Arc::new(MemoryChatStore::new()));
        let result = coordinator.mark_read(Uuid::new_v4(), Role::Admin).await;
        assert_eq!(result, Err(ChatError::NotFound));
    }
}
