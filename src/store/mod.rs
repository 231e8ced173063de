use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs as async_fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::item::{ItemStatus, QueueItem};

/// Errors raised by durable store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable source of truth for queue items.
///
/// `try_reserve` is the linchpin of the at-most-one-worker guarantee: it must
/// claim an item with a single atomic check-and-set. Contention is an
/// expected outcome reported through the boolean return, never an error, and
/// operations on unknown identifiers are no-ops.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn add(&self, item: &QueueItem) -> StoreResult<()>;
    async fn update(&self, item: &QueueItem) -> StoreResult<()>;
    async fn remove(&self, id: Uuid) -> StoreResult<()>;
    async fn get_all(&self) -> StoreResult<Vec<QueueItem>>;
    async fn get_pending(&self) -> StoreResult<Vec<QueueItem>>;

    /// Atomically claim a pending item. Returns false if the item is already
    /// claimed, already terminal, or unknown.
    async fn try_reserve(&self, id: Uuid) -> StoreResult<bool>;

    /// Atomically write an item's terminal state. Safe to call once per
    /// reservation; a second call on an already-terminal item is ignored.
    async fn complete(
        &self,
        id: Uuid,
        final_status: ItemStatus,
        error_message: Option<String>,
        output_size: Option<u64>,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
}

/// JSON-file backed store: one document holding every item, keyed by id.
///
/// A single async mutex guards both the in-memory map and the disk write, so
/// reserve and complete are atomic across concurrent callers. Writes go to a
/// temp file first and are renamed into place.
pub struct JsonFileStore {
    path: PathBuf,
    items: Mutex<HashMap<Uuid, QueueItem>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading any existing queue document.
    pub async fn open(path: PathBuf) -> StoreResult<Self> {
        let mut items: HashMap<Uuid, QueueItem> = match async_fs::read_to_string(&path).await {
            Ok(content) => {
                let list: Vec<QueueItem> = serde_json::from_str(&content)?;
                debug!("Loaded {} items from {:?}", list.len(), path);
                list.into_iter().map(|item| (item.id, item)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        // An item persisted as Processing belongs to a run that never
        // finished. Apply the shutdown policy: mark it Cancelled, explicit
        // re-enqueue required.
        for item in items.values_mut() {
            if item.status == ItemStatus::Processing {
                warn!("Item {} was interrupted mid-run, marking cancelled", item.id);
                item.status = ItemStatus::Cancelled;
                item.completed_at = Some(Utc::now());
            }
        }

        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    /// Write the full document atomically via temp file + rename.
    async fn persist(&self, items: &HashMap<Uuid, QueueItem>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            async_fs::create_dir_all(parent).await?;
        }

        let mut list: Vec<&QueueItem> = items.values().collect();
        list.sort_by_key(|item| item.enqueued_at);
        let content = serde_json::to_string_pretty(&list)?;

        let tmp_path = self.path.with_extension("json.tmp");
        async_fs::write(&tmp_path, content).await?;
        async_fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for JsonFileStore {
    async fn add(&self, item: &QueueItem) -> StoreResult<()> {
        let mut items = self.items.lock().await;
        items.insert(item.id, item.clone());
        self.persist(&items).await
    }

    async fn update(&self, item: &QueueItem) -> StoreResult<()> {
        let mut items = self.items.lock().await;
        if !items.contains_key(&item.id) {
            debug!("Ignoring update for unknown item {}", item.id);
            return Ok(());
        }
        items.insert(item.id, item.clone());
        self.persist(&items).await
    }

    async fn remove(&self, id: Uuid) -> StoreResult<()> {
        let mut items = self.items.lock().await;
        if items.remove(&id).is_some() {
            self.persist(&items).await?;
        }
        Ok(())
    }

    async fn get_all(&self) -> StoreResult<Vec<QueueItem>> {
        let items = self.items.lock().await;
        Ok(items.values().cloned().collect())
    }

    async fn get_pending(&self) -> StoreResult<Vec<QueueItem>> {
        let items = self.items.lock().await;
        Ok(items
            .values()
            .filter(|item| item.status == ItemStatus::Pending)
            .cloned()
            .collect())
    }

    async fn try_reserve(&self, id: Uuid) -> StoreResult<bool> {
        // The whole check-and-set happens under one lock acquisition.
        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(&id) else {
            debug!("Reserve refused: unknown item {}", id);
            return Ok(false);
        };

        if item.status != ItemStatus::Pending {
            debug!("Reserve refused: item {} is {}", id, item.status);
            return Ok(false);
        }

        item.status = ItemStatus::Processing;
        item.started_at = Some(Utc::now());
        item.progress = 0;
        self.persist(&items).await?;
        debug!("Reserved item {}", id);
        Ok(true)
    }

    async fn complete(
        &self,
        id: Uuid,
        final_status: ItemStatus,
        error_message: Option<String>,
        output_size: Option<u64>,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        debug_assert!(final_status.is_terminal());

        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(&id) else {
            debug!("Ignoring complete for unknown item {}", id);
            return Ok(());
        };

        if item.is_terminal() {
            warn!("Ignoring complete for already-terminal item {}", id);
            return Ok(());
        }

        item.status = final_status;
        item.completed_at = Some(completed_at.unwrap_or_else(Utc::now));
        item.error_message = error_message;
        item.output_size = output_size;
        if final_status == ItemStatus::Completed {
            item.progress = 100;
        }
        self.persist(&items).await
    }
}
