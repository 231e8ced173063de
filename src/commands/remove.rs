use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::repository::Repository;
use crate::store::JsonFileStore;

/// Command to delete a single item from the queue.
pub struct RemoveCommand {
    id: Uuid,
    data_file: PathBuf,
}

impl RemoveCommand {
    pub fn new(id: Uuid, data_file: PathBuf) -> Self {
        Self { id, data_file }
    }

    pub async fn execute(&self) -> Result<()> {
        let store = JsonFileStore::open(self.data_file.clone()).await?;
        let repository = Repository::new(Arc::new(store));

        if repository.get(self.id).await?.is_none() {
            return Err(anyhow!("No item with id {}", self.id));
        }

        repository.remove(self.id).await?;
        info!("🗑️ Removed item {}", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::QueueItem;
    use crate::store::QueueStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remove_existing_item() {
        let temp_dir = TempDir::new().unwrap();
        let data_file = temp_dir.path().join("queue.json");

        let item = QueueItem::new(PathBuf::from("video.mkv"), 0, 0);
        {
            let store = JsonFileStore::open(data_file.clone()).await.unwrap();
            let repository = Repository::new(Arc::new(store));
            repository.add(item.clone()).await.unwrap();
        }

        RemoveCommand::new(item.id, data_file.clone())
            .execute()
            .await
            .unwrap();

        let store = JsonFileStore::open(data_file).await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_item_fails() {
        let temp_dir = TempDir::new().unwrap();
        let cmd = RemoveCommand::new(Uuid::new_v4(), temp_dir.path().join("queue.json"));
        assert!(cmd.execute().await.is_err());
    }
}
