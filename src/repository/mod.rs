use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, OnceCell, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::item::{ItemStatus, QueueItem};
use crate::store::{QueueStore, StoreResult};

/// Change notifications raised by the repository after each durable write.
#[derive(Debug, Clone)]
pub enum RepositoryEvent {
    ItemAdded(QueueItem),
    ItemUpdated(QueueItem),
    ItemRemoved(Uuid),
}

/// In-memory mirror of the store, kept consistent by write-through.
///
/// Frequent readers (UI, schedulers) hit the cache, never the durable store.
/// Every mutation writes to the store first, then the cache, then raises a
/// notification, so observers only ever see durably-recorded state. The
/// cache hydrates from the store exactly once, on first use.
pub struct Repository {
    store: Arc<dyn QueueStore>,
    cache: RwLock<HashMap<Uuid, QueueItem>>,
    hydrated: OnceCell<()>,
    events: broadcast::Sender<RepositoryEvent>,
}

impl Repository {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            hydrated: OnceCell::new(),
            events,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.events.subscribe()
    }

    /// Fill the cache from the store on first use. Concurrent first callers
    /// hydrate once; later calls are free.
    async fn ensure_hydrated(&self) -> StoreResult<()> {
        self.hydrated
            .get_or_try_init(|| async {
                let items = self.store.get_all().await?;
                debug!("Hydrating repository cache with {} items", items.len());
                let mut cache = self.cache.write().await;
                *cache = items.into_iter().map(|item| (item.id, item)).collect();
                Ok(())
            })
            .await
            .map(|_| ())
    }

    pub async fn add(&self, item: QueueItem) -> StoreResult<()> {
        self.ensure_hydrated().await?;
        self.store.add(&item).await?;
        self.cache.write().await.insert(item.id, item.clone());
        let _ = self.events.send(RepositoryEvent::ItemAdded(item));
        Ok(())
    }

    /// Add a batch of items. Each still raises its own notification.
    pub async fn add_many(&self, items: Vec<QueueItem>) -> StoreResult<()> {
        for item in items {
            self.add(item).await?;
        }
        Ok(())
    }

    pub async fn update(&self, item: QueueItem) -> StoreResult<()> {
        self.ensure_hydrated().await?;
        self.store.update(&item).await?;
        self.cache.write().await.insert(item.id, item.clone());
        let _ = self.events.send(RepositoryEvent::ItemUpdated(item));
        Ok(())
    }

    pub async fn remove(&self, id: Uuid) -> StoreResult<()> {
        self.ensure_hydrated().await?;
        self.store.remove(id).await?;
        if self.cache.write().await.remove(&id).is_some() {
            let _ = self.events.send(RepositoryEvent::ItemRemoved(id));
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Option<QueueItem>> {
        self.ensure_hydrated().await?;
        Ok(self.cache.read().await.get(&id).cloned())
    }

    pub async fn get_all(&self) -> StoreResult<Vec<QueueItem>> {
        self.ensure_hydrated().await?;
        let mut items: Vec<QueueItem> = self.cache.read().await.values().cloned().collect();
        items.sort_by_key(|item| item.enqueued_at);
        Ok(items)
    }

    pub async fn get_pending(&self) -> StoreResult<Vec<QueueItem>> {
        self.ensure_hydrated().await?;
        Ok(self
            .cache
            .read()
            .await
            .values()
            .filter(|item| item.status == ItemStatus::Pending)
            .cloned()
            .collect())
    }

    pub async fn pending_count(&self) -> StoreResult<usize> {
        self.ensure_hydrated().await?;
        Ok(self
            .cache
            .read()
            .await
            .values()
            .filter(|item| item.status == ItemStatus::Pending)
            .count())
    }

    /// Delegate the atomic claim to the store, then sync the cache.
    pub async fn try_reserve(&self, id: Uuid) -> StoreResult<bool> {
        self.ensure_hydrated().await?;
        if !self.store.try_reserve(id).await? {
            return Ok(false);
        }

        let mut cache = self.cache.write().await;
        if let Some(item) = cache.get_mut(&id) {
            item.status = ItemStatus::Processing;
            item.started_at = Some(Utc::now());
            item.progress = 0;
            let updated = item.clone();
            drop(cache);
            let _ = self.events.send(RepositoryEvent::ItemUpdated(updated));
        }
        Ok(true)
    }

    /// Delegate the atomic terminal write to the store, then sync the cache.
    /// Returns the finalized item.
    pub async fn complete(
        &self,
        id: Uuid,
        final_status: ItemStatus,
        error_message: Option<String>,
        output_size: Option<u64>,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<QueueItem>> {
        self.ensure_hydrated().await?;
        self.store
            .complete(
                id,
                final_status,
                error_message.clone(),
                output_size,
                completed_at,
            )
            .await?;

        let mut cache = self.cache.write().await;
        let Some(item) = cache.get_mut(&id) else {
            return Ok(None);
        };
        if !item.is_terminal() {
            item.status = final_status;
            item.completed_at = Some(completed_at.unwrap_or_else(Utc::now));
            item.error_message = error_message;
            item.output_size = output_size;
            if final_status == ItemStatus::Completed {
                item.progress = 100;
            }
        }
        let updated = item.clone();
        drop(cache);
        let _ = self
            .events
            .send(RepositoryEvent::ItemUpdated(updated.clone()));
        Ok(Some(updated))
    }

    /// Remove every item in a terminal state. Returns the number removed.
    pub async fn clear_completed(&self) -> StoreResult<usize> {
        self.ensure_hydrated().await?;
        let finished: Vec<Uuid> = self
            .cache
            .read()
            .await
            .values()
            .filter(|item| item.is_terminal())
            .map(|item| item.id)
            .collect();

        let count = finished.len();
        for id in finished {
            self.remove(id).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn repository(temp_dir: &TempDir) -> Repository {
        let store = JsonFileStore::open(temp_dir.path().join("queue.json"))
            .await
            .unwrap();
        Repository::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_hydrates_from_store_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");

        let item = QueueItem::new(PathBuf::from("video.mkv"), 0, 0);
        {
            let store = JsonFileStore::open(path.clone()).await.unwrap();
            store.add(&item).await.unwrap();
        }

        let store = Arc::new(JsonFileStore::open(path).await.unwrap());
        let repo = Arc::new(Repository::new(store));

        // Concurrent first reads must both see the hydrated item.
        let a = tokio::spawn({
            let repo = repo.clone();
            async move { repo.get_all().await.unwrap().len() }
        });
        let b = tokio::spawn({
            let repo = repo.clone();
            async move { repo.get_all().await.unwrap().len() }
        });
        assert_eq!(a.await.unwrap(), 1);
        assert_eq!(b.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_writes_through_and_notifies() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir).await;
        let mut events = repo.subscribe();

        let item = QueueItem::new(PathBuf::from("video.mkv"), 0, 0);
        repo.add(item.clone()).await.unwrap();

        match events.recv().await.unwrap() {
            RepositoryEvent::ItemAdded(added) => assert_eq!(added.id, item.id),
            other => panic!("expected ItemAdded, got {other:?}"),
        }
        assert_eq!(repo.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_many_notifies_per_item() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir).await;
        let mut events = repo.subscribe();

        let items = vec![
            QueueItem::new(PathBuf::from("a.mkv"), 0, 0),
            QueueItem::new(PathBuf::from("b.mkv"), 0, 0),
            QueueItem::new(PathBuf::from("c.mkv"), 0, 0),
        ];
        repo.add_many(items).await.unwrap();

        for _ in 0..3 {
            assert!(matches!(
                events.recv().await.unwrap(),
                RepositoryEvent::ItemAdded(_)
            ));
        }
        assert_eq!(repo.pending_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_remove_notifies_only_when_present() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir).await;

        let item = QueueItem::new(PathBuf::from("video.mkv"), 0, 0);
        repo.add(item.clone()).await.unwrap();

        let mut events = repo.subscribe();
        repo.remove(item.id).await.unwrap();
        repo.remove(Uuid::new_v4()).await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            RepositoryEvent::ItemRemoved(id) if id == item.id
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_completed_removes_terminal_items() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir).await;

        let pending = QueueItem::new(PathBuf::from("a.mkv"), 0, 0);
        let done = QueueItem::new(PathBuf::from("b.mkv"), 0, 0);
        let failed = QueueItem::new(PathBuf::from("c.mkv"), 0, 0);
        repo.add(pending.clone()).await.unwrap();
        repo.add(done.clone()).await.unwrap();
        repo.add(failed.clone()).await.unwrap();

        repo.complete(done.id, ItemStatus::Completed, None, Some(10), None)
            .await
            .unwrap();
        repo.complete(failed.id, ItemStatus::Failed, Some("boom".into()), None, None)
            .await
            .unwrap();

        assert_eq!(repo.clear_completed().await.unwrap(), 2);
        let remaining = repo.get_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_complete_returns_finalized_item() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir).await;

        let item = QueueItem::new(PathBuf::from("video.mkv"), 0, 0);
        repo.add(item.clone()).await.unwrap();
        assert!(repo.try_reserve(item.id).await.unwrap());

        let finalized = repo
            .complete(item.id, ItemStatus::Completed, None, Some(2048), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finalized.status, ItemStatus::Completed);
        assert_eq!(finalized.output_size, Some(2048));
    }
}
