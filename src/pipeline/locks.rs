//! Per-conversation run serialization.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::ConversationId;

/// One async mutex per conversation, created on demand.
///
/// Entries nobody holds or waits on are pruned on the next acquire.
#[derive(Default)]
pub struct ConversationLocks {
    locks: RwLock<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `conversation_id`. Released on drop.
    pub async fn acquire(&self, conversation_id: ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.write().await;
            locks.retain(|id, lock| *id == conversation_id || Arc::strong_count(lock) > 1);
            locks
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn tracked(&self) -> usize {
        self.locks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_conversation_is_exclusive() {
        let locks = Arc::new(ConversationLocks::new());
        let guard = locks.acquire(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_conversations_do_not_block() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire(1).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = ConversationLocks::new();
        drop(locks.acquire(1).await);
        drop(locks.acquire(2).await);
        let _c = locks.acquire(3).await;
        assert_eq!(locks.tracked().await, 1);
    }
}
