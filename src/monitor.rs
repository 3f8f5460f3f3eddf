use futures::FutureExt;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::StabilityError;
use crate::file_processor::{FileProcessor, UploadOutcome};
use crate::filter::is_eligible;
use crate::stability::StabilityDetector;
use crate::state::{RunState, StopHandle};
use crate::watcher::{FileEvent, WatchPoll, WatchSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Polling,
    Dispatching,
    Draining,
    Stopped,
}

/// Per-run tallies returned when the monitor stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Acknowledged by the broker.
    pub published: usize,
    /// Rejected or never acknowledged.
    pub failed: usize,
    /// Excluded by name.
    pub skipped: usize,
    /// Vanished or unreadable before they could be sent.
    pub abandoned: usize,
}

/// Drives the poll, settle, publish cycle for one watched folder.
pub struct Monitor {
    watch: Box<dyn WatchSource>,
    broker: Arc<dyn Broker>,
    processor: FileProcessor,
    detector: StabilityDetector,
    state: Arc<RunState>,
    watch_folder: PathBuf,
    poll_timeout: Duration,
    shutdown_timeout: Duration,
    scan_existing: bool,
    pending: JoinSet<UploadOutcome>,
    phase: Phase,
    report: RunReport,
}

impl Monitor {
    pub fn new(config: &Config, watch: Box<dyn WatchSource>, broker: Arc<dyn Broker>) -> Self {
        let state = RunState::new();
        Self {
            watch,
            processor: FileProcessor::new(
                broker.clone(),
                config.topic.clone(),
                config.rename_on_success,
            ),
            broker,
            detector: StabilityDetector::new(config.stability_interval, state.clone()),
            state,
            watch_folder: config.watch_folder.clone(),
            poll_timeout: config.poll_timeout,
            shutdown_timeout: config.shutdown_timeout,
            scan_existing: config.scan_existing,
            pending: JoinSet::new(),
            phase: Phase::Idle,
            report: RunReport::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.state.clone())
    }

    fn transition(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("Monitor {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Runs until stopped or until the watch source closes, then releases
    /// the watcher and the broker.
    pub async fn run(mut self) -> RunReport {
        info!("Uploader monitor is running. Press Ctrl+C to stop.");

        if self.scan_existing {
            self.transition(Phase::Dispatching);
            let leftovers = existing_files(&self.watch_folder);
            if !leftovers.is_empty() {
                info!(
                    "Found {} existing files in {}",
                    leftovers.len(),
                    self.watch_folder.display()
                );
            }
            self.dispatch(leftovers).await;
        }

        let state = self.state.clone();
        while state.is_running() {
            self.transition(Phase::Polling);

            let polled = tokio::select! {
                polled = self.watch.poll(self.poll_timeout) => polled,
                _ = state.stop_requested() => break,
            };

            match polled {
                WatchPoll::Events(batch) => {
                    self.transition(Phase::Dispatching);
                    self.dispatch(batch).await;
                }
                WatchPoll::Idle => {}
                WatchPoll::Closed => {
                    warn!("File watcher closed, stopping");
                    state.request_stop();
                }
            }

            self.reap_finished();
        }

        self.drain().await
    }

    async fn dispatch(&mut self, batch: Vec<FileEvent>) {
        for event in batch {
            if !self.state.is_running() {
                break;
            }

            if !is_eligible(&event.name) {
                debug!("Skipping {}", event.name);
                self.report.skipped += 1;
                continue;
            }

            info!("New file detected: {}", event.name);

            match self.detector.await_stable(&event.path).await {
                Ok(_) => {}
                Err(StabilityError::Cancelled) => {
                    info!("Stopped before {} settled", event.name);
                    break;
                }
                Err(e) => {
                    warn!("Abandoning {}: {}", event.name, e);
                    self.report.abandoned += 1;
                    continue;
                }
            }

            match self.processor.process(&event).await {
                Ok(pending) => {
                    self.pending.spawn(pending);
                }
                Err(e) => {
                    warn!("Abandoning {}: {}", event.name, e);
                    self.report.abandoned += 1;
                }
            }
        }
    }

    fn reap_finished(&mut self) {
        while let Some(Some(joined)) = self.pending.join_next().now_or_never() {
            self.record(joined);
        }
    }

    fn record(&mut self, joined: Result<UploadOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(UploadOutcome::Success(_)) => self.report.published += 1,
            Ok(UploadOutcome::Failure(_)) => self.report.failed += 1,
            Err(e) => {
                error!("Upload task failed: {}", e);
                self.report.failed += 1;
            }
        }
    }

    async fn drain(mut self) -> RunReport {
        self.transition(Phase::Draining);
        self.state.request_stop();
        info!("Stopping monitor. Cleaning up...");

        if let Err(e) = self.watch.close() {
            error!("{}", e);
        }

        // Flush before waiting on acknowledgements so that every pending
        // record gets a delivery report.
        let broker = self.broker.clone();
        let timeout = self.shutdown_timeout;
        let closed = tokio::task::spawn_blocking(move || broker.close(timeout)).await;
        match closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{}", e),
            Err(e) => error!("Broker shutdown task failed: {}", e),
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.pending.join_next()).await {
                Ok(Some(joined)) => self.record(joined),
                Ok(None) => break,
                Err(_) => {
                    let unresolved = self.pending.len();
                    warn!("Giving up on {} unacknowledged uploads", unresolved);
                    self.pending.abort_all();
                    self.report.failed += unresolved;
                    break;
                }
            }
        }

        self.transition(Phase::Stopped);
        self.state.mark_stopped();
        info!(
            "Resources closed. Published {}, failed {}, skipped {}, abandoned {}",
            self.report.published, self.report.failed, self.report.skipped, self.report.abandoned
        );
        self.report
    }
}

/// Regular files already sitting in the folder, in name order.
fn existing_files(folder: &Path) -> Vec<FileEvent> {
    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to read directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| FileEvent::new(folder, entry.file_name().to_string_lossy()))
        .collect()
}
