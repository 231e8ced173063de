use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Error returned when a gate wait does not complete normally.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    #[error("wait cancelled while gate was closed")]
    Cancelled,
    #[error("gate revoked")]
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Open,
    Closed,
    Revoked,
}

/// Cooperative open/closed signal for pausing the processing loop.
///
/// `wait` on an open gate returns immediately; on a closed gate it suspends
/// without polling until `open` is called or the wait's cancellation token
/// fires. `revoke` permanently fails all pending and future waiters so
/// shutdown never leaves a waiter hanging.
pub struct SuspensionGate {
    state: watch::Sender<GateState>,
}

impl SuspensionGate {
    /// Create a gate in the open state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Open);
        Self { state }
    }

    /// Close the gate; subsequent waiters suspend.
    pub fn close(&self) {
        self.state.send_if_modified(|state| {
            if *state == GateState::Closed || *state == GateState::Revoked {
                return false;
            }
            *state = GateState::Closed;
            true
        });
    }

    /// Open the gate, releasing the current cohort of waiters.
    pub fn open(&self) {
        self.state.send_if_modified(|state| {
            if *state != GateState::Closed {
                return false;
            }
            *state = GateState::Open;
            true
        });
    }

    /// Permanently fail all pending and future waiters.
    pub fn revoke(&self) {
        self.state.send_replace(GateState::Revoked);
    }

    pub fn is_closed(&self) -> bool {
        *self.state.borrow() == GateState::Closed
    }

    /// Suspend until the gate is open, the gate is revoked, or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), GateError> {
        let mut rx = self.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                GateState::Open => return Ok(()),
                GateState::Revoked => return Err(GateError::Revoked),
                GateState::Closed => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(GateError::Revoked);
                    }
                }
            }
        }
    }
}

impl Default for SuspensionGate {
    fn default() -> Self {
        Self::new()
    }
}
