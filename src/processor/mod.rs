use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::convert::{ConversionOutcome, Converter, ProgressFn};
use crate::events::QueueEvent;
use crate::gate::SuspensionGate;
use crate::item::{ItemStatus, QueueItem};
use crate::repository::Repository;
use crate::scheduler::SchedulingStrategy;

/// Processor tuning knobs.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// How long `stop` waits for the loop to wind down before aborting it.
    pub shutdown_grace: Duration,
    /// Optional per-item conversion timeout; a timed-out item is Failed.
    pub item_timeout: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(10),
            item_timeout: None,
        }
    }
}

/// State of the processor itself, distinct from per-item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Running,
    Paused,
}

/// Error surfaced out of `process_item`; only cancellation propagates,
/// conversion failures are recorded on the item and handled in place.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("processing cancelled")]
    Cancelled,
}

/// What a `process_item` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The conversion ran to a terminal status.
    Processed,
    /// The reservation was refused; another worker owns the item or it is no
    /// longer eligible. Not an error.
    Skipped,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Orchestrates the processing loop: schedules, reserves, converts, and
/// finalizes items one at a time, emitting lifecycle events along the way.
///
/// The loop suspends on the gate while paused and parks on the wake buffer
/// while the pending set is empty; there is no polling delay anywhere. A
/// fresh cancellation token scopes each run and is observed at every
/// suspension point.
pub struct QueueProcessor {
    repository: Arc<Repository>,
    converter: Arc<dyn Converter>,
    scheduler: Arc<dyn SchedulingStrategy>,
    gate: SuspensionGate,
    config: ProcessorConfig,
    events: broadcast::Sender<QueueEvent>,
    state: Mutex<ProcessorState>,
    run: Mutex<Option<RunHandle>>,
    wake: AsyncMutex<mpsc::Receiver<()>>,
}

impl QueueProcessor {
    pub fn new(
        repository: Arc<Repository>,
        converter: Arc<dyn Converter>,
        scheduler: Arc<dyn SchedulingStrategy>,
        wake: mpsc::Receiver<()>,
        config: ProcessorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            repository,
            converter,
            scheduler,
            gate: SuspensionGate::new(),
            config,
            events,
            state: Mutex::new(ProcessorState::Stopped),
            run: Mutex::new(None),
            wake: AsyncMutex::new(wake),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap()
    }

    /// Begin the processing loop. Idempotent: a second call while the
    /// processor is Running or Paused is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if *state != ProcessorState::Stopped {
            debug!("Processor already started, ignoring");
            return;
        }
        *state = ProcessorState::Running;
        drop(state);

        self.gate.open();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let processor = self.clone();
            let cancel = cancel.clone();
            async move { processor.run_loop(cancel).await }
        });

        *self.run.lock().unwrap() = Some(RunHandle { cancel, task });
        info!("▶️ Processor started");
    }

    /// Signal cancellation and await loop termination within the configured
    /// grace period. An item in flight at this moment ends up Cancelled.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.state.lock().unwrap();
            if *state == ProcessorState::Stopped {
                return;
            }
            *state = ProcessorState::Stopped;
            self.run.lock().unwrap().take()
        };

        let Some(RunHandle { cancel, mut task }) = handle else {
            return;
        };
        cancel.cancel();
        self.gate.open();

        match tokio::time::timeout(self.config.shutdown_grace, &mut task).await {
            Ok(_) => info!("🛑 Processor stopped"),
            Err(_) => {
                warn!("Processing loop did not stop within grace period, aborting");
                task.abort();
            }
        }
    }

    /// Close the gate so no further item is claimed. The item currently in
    /// flight, if any, is not interrupted.
    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != ProcessorState::Running {
            return;
        }
        *state = ProcessorState::Paused;
        self.gate.close();
        info!("⏸️ Processor paused");
    }

    /// Reopen the gate, unblocking the loop.
    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != ProcessorState::Paused {
            return;
        }
        *state = ProcessorState::Running;
        self.gate.open();
        info!("⏯️ Processor resumed");
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut wake = self.wake.lock().await;
        let mut did_work = false;

        loop {
            if self.gate.wait(&cancel).await.is_err() {
                break;
            }
            if cancel.is_cancelled() {
                break;
            }

            let pending = match self.repository.get_pending().await {
                Ok(pending) => pending,
                Err(e) => {
                    error!("Failed to read pending items: {}", e);
                    if Self::park(&mut wake, &cancel).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.scheduler.select_next(&pending) {
                Some(item) => {
                    let id = item.id;
                    match self.process_item(item, &cancel).await {
                        Ok(ProcessOutcome::Processed) => did_work = true,
                        Ok(ProcessOutcome::Skipped) => {}
                        Err(ProcessError::Cancelled) => {
                            self.finalize_cancelled(id).await;
                            break;
                        }
                    }
                }
                None => {
                    if did_work {
                        did_work = false;
                        info!("🏁 Queue drained, all items processed");
                        let _ = self.events.send(QueueEvent::QueueCompleted);
                    }
                    if Self::park(&mut wake, &cancel).await.is_err() {
                        break;
                    }
                }
            }
        }

        *self.state.lock().unwrap() = ProcessorState::Stopped;
        debug!("Processing loop exited");
    }

    /// Suspend until new work is signalled or the run is cancelled. Err means
    /// the loop should exit: cancellation, or the wake buffer closed with
    /// nothing left to feed it.
    async fn park(wake: &mut mpsc::Receiver<()>, cancel: &CancellationToken) -> Result<(), ()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(()),
            signal = wake.recv() => match signal {
                Some(()) => Ok(()),
                None => Err(()),
            },
        }
    }

    /// Run one item through the full per-item algorithm: reserve, convert
    /// with live progress, finalize. Callable directly for manual invocation;
    /// a refused reservation returns `Skipped` immediately.
    pub async fn process_item(
        &self,
        mut item: QueueItem,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, ProcessError> {
        match self.repository.try_reserve(item.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Item {} not reserved, skipping", item.id);
                return Ok(ProcessOutcome::Skipped);
            }
            Err(e) => {
                error!("Reserve failed for item {}: {}", item.id, e);
                return Ok(ProcessOutcome::Skipped);
            }
        }

        item.status = ItemStatus::Processing;
        item.started_at = Some(Utc::now());
        item.progress = 0;
        if let Err(e) = self.repository.update(item.clone()).await {
            error!("Failed to persist start of item {}: {}", item.id, e);
        }
        info!("➡️ Started item: {:?}", item.source_path);
        let _ = self.events.send(QueueEvent::ItemStarted(item.clone()));

        let (forwarder, progress_fn) = self.spawn_progress_forwarder(item.clone());

        // The conversion runs on a child token so a per-item timeout can
        // kill it without cancelling the whole run.
        let item_cancel = cancel.child_token();
        let conversion = self
            .converter
            .convert(&item, progress_fn, item_cancel.clone());
        let result = match self.config.item_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, conversion).await {
                Ok(result) => result,
                Err(_) => {
                    item_cancel.cancel();
                    Ok(ConversionOutcome::failure(format!(
                        "conversion timed out after {:?}",
                        timeout
                    )))
                }
            },
            None => conversion.await,
        };

        // All queued progress updates land before the terminal event.
        let _ = forwarder.await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(ProcessError::Cancelled);
                }
                ConversionOutcome::failure(e.to_string())
            }
        };

        if outcome.success {
            match self
                .repository
                .complete(item.id, ItemStatus::Completed, None, outcome.output_size, None)
                .await
            {
                Ok(Some(finalized)) => {
                    info!("✅ Completed item: {:?}", finalized.source_path);
                    let _ = self.events.send(QueueEvent::ItemCompleted(finalized));
                }
                Ok(None) => {}
                Err(e) => error!("Failed to finalize item {}: {}", item.id, e),
            }
        } else {
            let message = outcome
                .error_message
                .unwrap_or_else(|| "conversion failed".to_string());
            match self
                .repository
                .complete(item.id, ItemStatus::Failed, Some(message.clone()), None, None)
                .await
            {
                Ok(Some(finalized)) => {
                    error!("❌ Item failed: {:?}: {}", finalized.source_path, message);
                    let _ = self.events.send(QueueEvent::ItemFailed(finalized));
                }
                Ok(None) => {}
                Err(e) => error!("Failed to finalize item {}: {}", item.id, e),
            }
        }

        Ok(ProcessOutcome::Processed)
    }

    /// Build the progress adapter: a callback feeding an unbounded channel
    /// drained by a forwarder task that persists each value and raises
    /// ProgressChanged. The conversion never blocks on persistence.
    fn spawn_progress_forwarder(&self, mut item: QueueItem) -> (JoinHandle<()>, ProgressFn) {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let repository = self.repository.clone();
        let events = self.events.clone();

        let forwarder = tokio::spawn(async move {
            let mut last = 0u8;
            while let Some(percent) = rx.recv().await {
                let percent = percent.min(100);
                // Progress is non-decreasing while Processing.
                if percent <= last {
                    continue;
                }
                last = percent;
                item.progress = percent;
                if let Err(e) = repository.update(item.clone()).await {
                    error!("Failed to persist progress for item {}: {}", item.id, e);
                }
                let _ = events.send(QueueEvent::ProgressChanged {
                    item: item.clone(),
                    percent,
                });
            }
        });

        let progress_fn: ProgressFn = Arc::new(move |percent| {
            let _ = tx.send(percent);
        });
        (forwarder, progress_fn)
    }

    /// Policy for an item interrupted by `stop`: mark it Cancelled, explicit
    /// re-enqueue required.
    async fn finalize_cancelled(&self, id: uuid::Uuid) {
        match self
            .repository
            .complete(id, ItemStatus::Cancelled, None, None, None)
            .await
        {
            Ok(_) => info!("🚫 Item {} cancelled by shutdown", id),
            Err(e) => error!("Failed to mark item {} cancelled: {}", id, e),
        }
    }
}
