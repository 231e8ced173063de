use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A media file waiting to be converted.
///
/// Items are created by the add flow with status [`ItemStatus::Pending`],
/// claimed and mutated exclusively by the processor while in flight, and
/// persisted by the store. Cloned copies serve as point-in-time snapshots
/// for schedulers and observers, which never alias live processor state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub source_path: PathBuf,
    /// Directory the converted file is written to. Defaults to the source's
    /// parent directory when absent.
    pub output_dir: Option<PathBuf>,
    /// Size of the source file in bytes.
    pub file_size: u64,
    pub status: ItemStatus,
    /// Conversion progress, 0-100. Only meaningful while Processing.
    pub progress: u8,
    /// Higher runs sooner; ties break oldest-first.
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when the item is Failed.
    pub error_message: Option<String>,
    /// Size of the converted output in bytes; set only on successful completion.
    pub output_size: Option<u64>,
}

/// Lifecycle status of a queue item.
///
/// Transitions are monotonic: Pending -> Processing -> {Completed | Failed},
/// Pending -> Cancelled, Processing -> Cancelled (shutdown). Terminal states
/// are never left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    /// Whether the status is one the item can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl QueueItem {
    /// Create a new pending item for a media file.
    pub fn new(source_path: PathBuf, file_size: u64, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_path,
            output_dir: None,
            file_size,
            status: ItemStatus::Pending,
            progress: 0,
            priority,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            output_size: None,
        }
    }

    /// Set an explicit output directory for the converted file.
    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = Some(output_dir);
        self
    }

    /// Path the converted file is written to (source name with .mp4 extension).
    pub fn output_path(&self) -> PathBuf {
        let file_name = self.source_path.with_extension("mp4");
        match (&self.output_dir, file_name.file_name()) {
            (Some(dir), Some(name)) => dir.join(name),
            _ => file_name,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_new_item_is_pending() {
        let item = QueueItem::new(PathBuf::from("video.mkv"), 1024, 5);
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.progress, 0);
        assert_eq!(item.priority, 5);
        assert!(item.started_at.is_none());
        assert!(item.error_message.is_none());
        assert!(item.output_size.is_none());
    }

    #[test]
    fn test_output_path_defaults_beside_source() {
        let item = QueueItem::new(PathBuf::from("/media/show/video.mkv"), 0, 0);
        assert_eq!(item.output_path(), PathBuf::from("/media/show/video.mp4"));
    }

    #[test]
    fn test_output_path_honors_output_dir() {
        let item = QueueItem::new(PathBuf::from("/media/video.webm"), 0, 0)
            .with_output_dir(PathBuf::from("/converted"));
        assert_eq!(item.output_path(), PathBuf::from("/converted/video.mp4"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::Processing.is_terminal());
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(ItemStatus::Cancelled.is_terminal());
    }
}
