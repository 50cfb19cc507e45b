//! Queue of writes waiting for connectivity, stored in `offlineActions`.

use crate::records::{OfflineAction, OfflineActionIndex, OfflineStatus};
use crate::store::LocalStore;
use chrono::Utc;
use medstore_core::StoreResult;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone)]
pub struct OfflineQueue {
    store: LocalStore,
}

impl OfflineQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Queue an action. The returned action carries its generated id.
    pub async fn enqueue(&self, action: &str, payload: JsonValue) -> StoreResult<OfflineAction> {
        let queued = self
            .store
            .add(&OfflineAction {
                id: None,
                action: action.to_string(),
                payload,
                status: OfflineStatus::Pending,
                timestamp: Utc::now().timestamp_millis(),
                attempts: 0,
                last_error: None,
            })
            .await?;
        tracing::debug!(id = ?queued.id, action, "Offline action queued");
        Ok(queued)
    }

    /// Pending actions, oldest first.
    pub async fn pending(&self) -> StoreResult<Vec<OfflineAction>> {
        self.with_status(OfflineStatus::Pending).await
    }

    pub async fn failed(&self) -> StoreResult<Vec<OfflineAction>> {
        self.with_status(OfflineStatus::Failed).await
    }

    pub async fn mark_synced(&self, id: i64) -> StoreResult<Option<OfflineAction>> {
        self.transition(id, |action| {
            action.status = OfflineStatus::Synced;
            action.last_error = None;
        })
        .await
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<Option<OfflineAction>> {
        self.transition(id, |action| {
            action.status = OfflineStatus::Failed;
            action.attempts += 1;
            action.last_error = Some(error.to_string());
        })
        .await
    }

    /// Remove synced actions. Returns how many were removed.
    pub async fn prune_synced(&self) -> StoreResult<u64> {
        let mut removed = 0;
        for action in self.with_status(OfflineStatus::Synced).await? {
            if let Some(id) = action.id {
                if self.store.remove::<OfflineAction>(id).await? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Pruned synced offline actions");
        }
        Ok(removed)
    }

    async fn with_status(&self, status: OfflineStatus) -> StoreResult<Vec<OfflineAction>> {
        let mut actions: Vec<OfflineAction> = self
            .store
            .get_by_index(OfflineActionIndex::Status, status)
            .await?;
        actions.sort_by_key(|a| (a.timestamp, a.id));
        Ok(actions)
    }

    async fn transition(
        &self,
        id: i64,
        apply: impl FnOnce(&mut OfflineAction),
    ) -> StoreResult<Option<OfflineAction>> {
        let Some(mut action) = self.store.get::<OfflineAction>(id).await? else {
            return Ok(None);
        };
        apply(&mut action);
        let action = self.store.update(&action).await?;
        tracing::debug!(id, status = action.status.as_str(), "Offline action updated");
        Ok(Some(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_assigns_ids() {
        let queue = OfflineQueue::new(LocalStore::in_memory());

        let first = queue.enqueue("createPatient", json!({"id": "p1"})).await.unwrap();
        let second = queue.enqueue("updatePatient", json!({"id": "p1"})).await.unwrap();

        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
        assert_eq!(first.status, OfflineStatus::Pending);
        assert_eq!(first.attempts, 0);

        let pending = queue.pending().await.unwrap();
        assert_eq!(
            pending.iter().map(|a| a.action.as_str()).collect::<Vec<_>>(),
            vec!["createPatient", "updatePatient"]
        );
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let queue = OfflineQueue::new(LocalStore::in_memory());
        let a = queue.enqueue("a", JsonValue::Null).await.unwrap();
        let b = queue.enqueue("b", JsonValue::Null).await.unwrap();
        let (a, b) = (a.id.unwrap(), b.id.unwrap());

        let failed = queue.mark_failed(a, "timeout").await.unwrap().unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("timeout"));
        let failed = queue.mark_failed(a, "timeout").await.unwrap().unwrap();
        assert_eq!(failed.attempts, 2);

        queue.mark_synced(b).await.unwrap().unwrap();
        assert!(queue.pending().await.unwrap().is_empty());
        assert_eq!(queue.failed().await.unwrap().len(), 1);

        assert!(queue.mark_synced(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_synced() {
        let store = LocalStore::in_memory();
        let queue = OfflineQueue::new(store.clone());
        for name in ["a", "b", "c"] {
            let action = queue.enqueue(name, JsonValue::Null).await.unwrap();
            if name != "b" {
                queue.mark_synced(action.id.unwrap()).await.unwrap();
            }
        }

        assert_eq!(queue.prune_synced().await.unwrap(), 2);
        assert_eq!(store.count::<OfflineAction>().await.unwrap(), 1);
        assert_eq!(queue.prune_synced().await.unwrap(), 0);
    }
}
