use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::convert::FfmpegConverter;
use crate::events::{EventBridge, InlineContext, QueueEvent, QueueObserver};
use crate::processor::ProcessorConfig;
use crate::queue::ConversionQueue;
use crate::scheduler::PriorityScheduler;
use crate::store::JsonFileStore;

/// Command to process the queue until interrupted.
pub struct RunCommand {
    config: Config,
}

impl RunCommand {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn execute(&self) -> Result<()> {
        let store = JsonFileStore::open(self.config.data_file.clone()).await?;
        let converter = FfmpegConverter::new(self.config.clone());
        let processor_config = ProcessorConfig {
            shutdown_grace: Duration::from_secs(self.config.shutdown_grace_secs),
            item_timeout: self.config.item_timeout_secs.map(Duration::from_secs),
        };

        let queue = ConversionQueue::with_config(
            Arc::new(store),
            Arc::new(converter),
            Arc::new(PriorityScheduler),
            processor_config,
            self.config.wake_buffer_capacity,
        );

        info!(
            "✅ Worker ready, {} items pending.",
            queue.pending_count().await?
        );

        let bridge = EventBridge::spawn(
            queue.subscribe(),
            Arc::new(InlineContext),
            Arc::new(ProgressRenderer::new()),
        );

        queue.start();
        signal::ctrl_c().await?;
        info!("🛑 Shutdown signal received. Exiting gracefully.");

        queue.stop().await;
        bridge.shutdown();
        Ok(())
    }
}

/// Renders one progress bar per in-flight item.
struct ProgressRenderer {
    multi: MultiProgress,
    bars: Mutex<HashMap<Uuid, ProgressBar>>,
}

impl ProgressRenderer {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:30!} [{bar:40}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }

    fn label(item: &crate::item::QueueItem) -> String {
        item.source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.source_path.display().to_string())
    }
}

impl QueueObserver for ProgressRenderer {
    fn on_event(&self, event: QueueEvent) {
        match event {
            QueueEvent::ItemStarted(item) => {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(Self::bar_style());
                bar.set_message(Self::label(&item));
                self.bars.lock().unwrap().insert(item.id, bar);
            }
            QueueEvent::ProgressChanged { item, percent } => {
                if let Some(bar) = self.bars.lock().unwrap().get(&item.id) {
                    bar.set_position(u64::from(percent));
                }
            }
            QueueEvent::ItemCompleted(item) => {
                if let Some(bar) = self.bars.lock().unwrap().remove(&item.id) {
                    bar.finish_with_message(format!("✅ {}", Self::label(&item)));
                }
            }
            QueueEvent::ItemFailed(item) => {
                if let Some(bar) = self.bars.lock().unwrap().remove(&item.id) {
                    let reason = item.error_message.as_deref().unwrap_or("unknown error");
                    bar.abandon_with_message(format!("❌ {}: {}", Self::label(&item), reason));
                }
            }
            QueueEvent::QueueCompleted => {
                info!("🏁 Queue completed. Waiting for new items...");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::QueueItem;
    use std::path::PathBuf;

    #[test]
    fn test_label_prefers_file_name() {
        let item = QueueItem::new(PathBuf::from("/media/show/episode.mkv"), 0, 0);
        assert_eq!(ProgressRenderer::label(&item), "episode.mkv");
    }

    #[test]
    fn test_renderer_tracks_bar_lifecycle() {
        let renderer = ProgressRenderer::new();
        let item = QueueItem::new(PathBuf::from("video.mkv"), 0, 0);

        renderer.on_event(QueueEvent::ItemStarted(item.clone()));
        assert_eq!(renderer.bars.lock().unwrap().len(), 1);

        renderer.on_event(QueueEvent::ProgressChanged {
            item: item.clone(),
            percent: 40,
        });
        renderer.on_event(QueueEvent::ItemCompleted(item));
        assert!(renderer.bars.lock().unwrap().is_empty());
    }
}
