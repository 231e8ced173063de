use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::convert::Converter;
use crate::events::QueueEvent;
use crate::item::QueueItem;
use crate::processor::{ProcessOutcome, ProcessorConfig, ProcessorState, QueueProcessor};
use crate::repository::{Repository, RepositoryEvent};
use crate::scheduler::{PriorityScheduler, SchedulingStrategy};
use crate::store::QueueStore;

/// The queue core's boundary-facing surface: producers enqueue items and
/// drive the processor lifecycle, observers subscribe to events and take
/// snapshots for rendering.
///
/// Enqueues apply backpressure through a bounded wake buffer: once it is
/// full, producers suspend until the loop drains signals.
pub struct ConversionQueue {
    repository: Arc<Repository>,
    processor: Arc<QueueProcessor>,
    wake_tx: mpsc::Sender<()>,
}

impl ConversionQueue {
    pub fn new(store: Arc<dyn QueueStore>, converter: Arc<dyn Converter>) -> Self {
        Self::with_config(
            store,
            converter,
            Arc::new(PriorityScheduler),
            ProcessorConfig::default(),
            2048,
        )
    }

    pub fn with_config(
        store: Arc<dyn QueueStore>,
        converter: Arc<dyn Converter>,
        scheduler: Arc<dyn SchedulingStrategy>,
        processor_config: ProcessorConfig,
        wake_buffer_capacity: usize,
    ) -> Self {
        let repository = Arc::new(Repository::new(store));
        let (wake_tx, wake_rx) = mpsc::channel(wake_buffer_capacity.max(1));
        let processor = Arc::new(QueueProcessor::new(
            repository.clone(),
            converter,
            scheduler,
            wake_rx,
            processor_config,
        ));

        Self {
            repository,
            processor,
            wake_tx,
        }
    }

    /// Add one item to the queue.
    pub async fn enqueue(&self, item: QueueItem) -> Result<Uuid> {
        let id = item.id;
        self.repository.add(item).await?;
        // Closed receiver is fine: a later start reads the pending set first.
        let _ = self.wake_tx.send(()).await;
        Ok(id)
    }

    /// Add a batch of items; each raises its own change notification.
    pub async fn enqueue_many(&self, items: Vec<QueueItem>) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(self.enqueue(item).await?);
        }
        Ok(ids)
    }

    pub fn start(&self) {
        self.processor.start();
    }

    pub async fn stop(&self) {
        self.processor.stop().await;
    }

    pub fn pause(&self) {
        self.processor.pause();
    }

    pub fn resume(&self) {
        self.processor.resume();
    }

    pub fn state(&self) -> ProcessorState {
        self.processor.state()
    }

    /// Manually run one item through the per-item algorithm, outside the
    /// loop. A refused reservation returns `Skipped`.
    pub async fn process_item(&self, id: Uuid) -> Result<ProcessOutcome> {
        let item = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("unknown item: {id}"))?;
        Ok(self
            .processor
            .process_item(item, &CancellationToken::new())
            .await?)
    }

    pub async fn remove_item(&self, id: Uuid) -> Result<()> {
        self.repository.remove(id).await?;
        Ok(())
    }

    /// Remove every item in a terminal state. Returns the number removed.
    pub async fn clear_completed(&self) -> Result<usize> {
        Ok(self.repository.clear_completed().await?)
    }

    /// Point-in-time copy of the full item list, for initial rendering.
    pub async fn snapshot(&self) -> Result<Vec<QueueItem>> {
        Ok(self.repository.get_all().await?)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.repository.pending_count().await?)
    }

    /// Subscribe to processor lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.processor.subscribe()
    }

    /// Subscribe to repository change notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.repository.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ConversionOutcome, ProgressFn};
    use crate::store::JsonFileStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct NoopConverter;

    #[async_trait]
    impl Converter for NoopConverter {
        async fn convert(
            &self,
            _item: &QueueItem,
            _progress: ProgressFn,
            _cancel: CancellationToken,
        ) -> anyhow::Result<ConversionOutcome> {
            Ok(ConversionOutcome::success(1))
        }
    }

    async fn queue(temp_dir: &TempDir) -> ConversionQueue {
        let store = JsonFileStore::open(temp_dir.path().join("queue.json"))
            .await
            .unwrap();
        ConversionQueue::new(Arc::new(store), Arc::new(NoopConverter))
    }

    #[tokio::test]
    async fn test_enqueue_and_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue(&temp_dir).await;

        let id = queue
            .enqueue(QueueItem::new(PathBuf::from("video.mkv"), 10, 1))
            .await
            .unwrap();

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_many_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue(&temp_dir).await;

        let items = vec![
            QueueItem::new(PathBuf::from("a.mkv"), 0, 0),
            QueueItem::new(PathBuf::from("b.mkv"), 0, 0),
        ];
        let ids = queue.enqueue_many(items).await.unwrap();
        assert_eq!(ids.len(), 2);

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot[0].source_path, PathBuf::from("a.mkv"));
        assert_eq!(snapshot[1].source_path, PathBuf::from("b.mkv"));
    }

    #[tokio::test]
    async fn test_remove_item() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue(&temp_dir).await;

        let id = queue
            .enqueue(QueueItem::new(PathBuf::from("video.mkv"), 0, 0))
            .await
            .unwrap();
        queue.remove_item(id).await.unwrap();
        assert!(queue.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_process_item_unknown_id() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue(&temp_dir).await;
        assert!(queue.process_item(Uuid::new_v4()).await.is_err());
    }
}
