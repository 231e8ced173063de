use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::item::QueueItem;
use crate::repository::Repository;
use crate::store::JsonFileStore;

/// Command to print the current queue contents.
pub struct StatusCommand {
    data_file: PathBuf,
}

impl StatusCommand {
    pub fn new(data_file: PathBuf) -> Self {
        Self { data_file }
    }

    pub async fn execute(&self) -> Result<()> {
        let store = JsonFileStore::open(self.data_file.clone()).await?;
        let repository = Repository::new(Arc::new(store));
        let items = repository.get_all().await?;

        if items.is_empty() {
            println!("Queue is empty.");
            return Ok(());
        }

        println!(
            "{:<36}  {:<10}  {:>4}  {:>8}  SOURCE",
            "ID", "STATUS", "PRIO", "PROGRESS"
        );
        for item in &items {
            println!("{}", format_row(item));
        }

        let pending = items
            .iter()
            .filter(|item| !item.is_terminal())
            .count();
        println!("\n{} items total, {} outstanding.", items.len(), pending);
        Ok(())
    }
}

fn format_row(item: &QueueItem) -> String {
    let detail = match (&item.error_message, item.output_size) {
        (Some(error), _) => format!("  ({error})"),
        (None, Some(size)) => format!("  ({size} bytes)"),
        _ => String::new(),
    };
    format!(
        "{:<36}  {:<10}  {:>4}  {:>7}%  {:?}{}",
        item.id, item.status, item.priority, item.progress, item.source_path, detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemStatus;

    #[test]
    fn test_format_row_shows_error_for_failed_item() {
        let mut item = QueueItem::new(PathBuf::from("video.mkv"), 0, 2);
        item.status = ItemStatus::Failed;
        item.error_message = Some("no video stream".to_string());

        let row = format_row(&item);
        assert!(row.contains("failed"));
        assert!(row.contains("no video stream"));
    }

    #[test]
    fn test_format_row_shows_output_size_for_completed_item() {
        let mut item = QueueItem::new(PathBuf::from("video.mkv"), 0, 0);
        item.status = ItemStatus::Completed;
        item.progress = 100;
        item.output_size = Some(4096);

        let row = format_row(&item);
        assert!(row.contains("completed"));
        assert!(row.contains("4096 bytes"));
    }

    #[tokio::test]
    async fn test_status_on_missing_store_reports_empty() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cmd = StatusCommand::new(temp_dir.path().join("queue.json"));
        cmd.execute().await.unwrap();
    }
}
