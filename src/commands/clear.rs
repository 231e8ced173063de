use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::repository::Repository;
use crate::store::JsonFileStore;

/// Command to remove all finished items from the queue.
pub struct ClearCommand {
    data_file: PathBuf,
}

impl ClearCommand {
    pub fn new(data_file: PathBuf) -> Self {
        Self { data_file }
    }

    pub async fn execute(&self) -> Result<()> {
        let store = JsonFileStore::open(self.data_file.clone()).await?;
        let repository = Repository::new(Arc::new(store));

        let removed = repository.clear_completed().await?;
        info!("🧹 Cleared {} finished items.", removed);
        Ok(())
    }
}
