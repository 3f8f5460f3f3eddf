use log::info;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

/// Lifecycle flag owned by one monitor. Moves forward only:
/// `Running -> Stopping -> Stopped`.
#[derive(Debug)]
pub struct RunState {
    tx: watch::Sender<Lifecycle>,
}

impl RunState {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = watch::channel(Lifecycle::Running);
        Arc::new(Self { tx })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Returns true if this call moved the state out of `Running`.
    pub fn request_stop(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == Lifecycle::Running {
                *state = Lifecycle::Stopping;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_stopped(&self) {
        self.tx.send_replace(Lifecycle::Stopped);
    }

    /// Resolves once a stop has been requested.
    pub async fn stop_requested(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the wait can't fail.
        let _ = rx.wait_for(|state| *state != Lifecycle::Running).await;
    }
}

/// Cloneable handle that asks a running monitor to shut down.
#[derive(Debug, Clone)]
pub struct StopHandle {
    state: Arc<RunState>,
}

impl StopHandle {
    pub(crate) fn new(state: Arc<RunState>) -> Self {
        Self { state }
    }

    pub fn stop(&self) {
        if self.state.request_stop() {
            info!("Stop requested");
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle()
    }
}
