use log::debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StabilityError;
use crate::state::RunState;

pub const DEFAULT_STABILITY_INTERVAL: Duration = Duration::from_millis(500);

/// Reports the current byte length of a file.
pub trait SizeProbe: Send + Sync {
    fn size(&self, path: &Path) -> std::io::Result<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataProbe;

impl SizeProbe for MetadataProbe {
    fn size(&self, path: &Path) -> std::io::Result<u64> {
        Ok(path.metadata()?.len())
    }
}

/// Waits for a freshly created file to stop growing.
///
/// A file is considered fully written once two consecutive samples taken one
/// interval apart report the same length. A writer that pauses for a whole
/// interval and then resumes will be reported as stable.
pub struct StabilityDetector {
    interval: Duration,
    probe: Box<dyn SizeProbe>,
    state: Arc<RunState>,
}

impl StabilityDetector {
    pub fn new(interval: Duration, state: Arc<RunState>) -> Self {
        Self::with_probe(interval, state, MetadataProbe)
    }

    pub fn with_probe(
        interval: Duration,
        state: Arc<RunState>,
        probe: impl SizeProbe + 'static,
    ) -> Self {
        Self {
            interval,
            probe: Box::new(probe),
            state,
        }
    }

    /// Returns the settled size of `path`.
    pub async fn await_stable(&self, path: &Path) -> Result<u64, StabilityError> {
        let mut previous: Option<u64> = None;

        loop {
            if !self.state.is_running() {
                return Err(StabilityError::Cancelled);
            }

            let size = self.probe.size(path).map_err(|source| StabilityError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

            if previous == Some(size) {
                debug!("File {} settled at {} bytes", path.display(), size);
                return Ok(size);
            }
            previous = Some(size);

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.state.stop_requested() => return Err(StabilityError::Cancelled),
            }
        }
    }
}
