use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::item::QueueItem;
use crate::repository::Repository;
use crate::store::JsonFileStore;

/// Source formats the converter accepts.
const MEDIA_EXTENSIONS: &[&str] = &["webm", "mkv", "avi", "mov"];

/// Command to enqueue media files for conversion.
pub struct AddCommand {
    paths: Vec<PathBuf>,
    priority: i32,
    output_dir: Option<PathBuf>,
    data_file: PathBuf,
}

impl AddCommand {
    pub fn new(
        paths: Vec<PathBuf>,
        priority: i32,
        output_dir: Option<PathBuf>,
        data_file: PathBuf,
    ) -> Self {
        Self {
            paths,
            priority,
            output_dir,
            data_file,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        let mut files = Vec::new();
        for path in &self.paths {
            if !path.exists() {
                return Err(anyhow!("Path does not exist: {:?}", path));
            }
            if path.is_dir() {
                files.extend(collect_media_files(path));
            } else if is_media_file(path) {
                files.push(path.clone());
            } else {
                warn!("⚠️ Skipping unsupported file: {:?}", path);
            }
        }

        if files.is_empty() {
            info!("No media files found to enqueue.");
            return Ok(());
        }

        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let file_size = tokio::fs::metadata(&file).await?.len();
            let mut item = QueueItem::new(file, file_size, self.priority);
            if let Some(output_dir) = &self.output_dir {
                item = item.with_output_dir(output_dir.clone());
            }
            items.push(item);
        }

        let store = JsonFileStore::open(self.data_file.clone()).await?;
        let repository = Repository::new(Arc::new(store));
        let count = items.len();
        for item in &items {
            info!("➕ Queueing: {:?} (priority {})", item.source_path, item.priority);
        }
        repository.add_many(items).await?;

        info!("✅ Added {} new items to the queue.", count);
        Ok(())
    }
}

/// Recursively find supported media files under a directory.
fn collect_media_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_media_file(path))
        .collect()
}

fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemStatus;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file(Path::new("video.mkv")));
        assert!(is_media_file(Path::new("video.WEBM")));
        assert!(!is_media_file(Path::new("video.mp4")));
        assert!(!is_media_file(Path::new("notes.txt")));
        assert!(!is_media_file(Path::new("noext")));
    }

    #[test]
    fn test_collect_media_files_recurses() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("season1");
        fs::create_dir(&nested).unwrap();
        fs::write(temp_dir.path().join("a.mkv"), "").unwrap();
        fs::write(nested.join("b.webm"), "").unwrap();
        fs::write(nested.join("readme.txt"), "").unwrap();

        let files = collect_media_files(temp_dir.path());
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_add_directory_enqueues_pending_items() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.mkv"), "data").unwrap();
        fs::write(temp_dir.path().join("b.webm"), "more data").unwrap();

        let data_file = temp_dir.path().join("queue.json");
        let cmd = AddCommand::new(
            vec![temp_dir.path().to_path_buf()],
            3,
            None,
            data_file.clone(),
        );
        cmd.execute().await.unwrap();

        let store = JsonFileStore::open(data_file).await.unwrap();
        let repository = Repository::new(Arc::new(store));
        let items = repository.get_all().await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .all(|item| item.status == ItemStatus::Pending && item.priority == 3));
    }

    #[tokio::test]
    async fn test_add_nonexistent_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        let cmd = AddCommand::new(
            vec![PathBuf::from("/nonexistent/video.mkv")],
            0,
            None,
            temp_dir.path().join("queue.json"),
        );
        assert!(cmd.execute().await.is_err());
    }
}
