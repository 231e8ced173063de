use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::item::QueueItem;

/// Lifecycle notifications emitted by the processor.
///
/// For a given item events arrive in the order: Started, zero or more
/// non-decreasing ProgressChanged, then exactly one of Completed/Failed
/// (or none if the item was cancelled before finishing).
#[derive(Debug, Clone)]
pub enum QueueEvent {
    ItemStarted(QueueItem),
    ProgressChanged { item: QueueItem, percent: u8 },
    ItemCompleted(QueueItem),
    ItemFailed(QueueItem),
    /// The pending set drained to empty after processing work.
    QueueCompleted,
}

/// Capability to run a closure on whatever execution context the observer
/// requires (a UI thread, a dedicated runtime, ...). The core never assumes
/// a threading model; it only hands tasks to this.
pub trait ObserverContext: Send + Sync + 'static {
    fn run(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Context that runs observer tasks inline on the bridge's own task.
pub struct InlineContext;

impl ObserverContext for InlineContext {
    fn run(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}

/// Consumer of queue events, invoked on the observer's context.
pub trait QueueObserver: Send + Sync + 'static {
    fn on_event(&self, event: QueueEvent);
}

impl<F> QueueObserver for F
where
    F: Fn(QueueEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: QueueEvent) {
        self(event)
    }
}

/// Pumps events from the processor's broadcast stream to an observer without
/// ever blocking the processing loop.
pub struct EventBridge {
    handle: JoinHandle<()>,
}

impl EventBridge {
    /// Spawn the bridge task forwarding `events` to `observer` via `context`.
    pub fn spawn(
        mut events: broadcast::Receiver<QueueEvent>,
        context: Arc<dyn ObserverContext>,
        observer: Arc<dyn QueueObserver>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let observer = observer.clone();
                        context.run(Box::new(move || observer.on_event(event)));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Observer lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { handle }
    }

    /// Stop forwarding events.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}
