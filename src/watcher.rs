use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, info};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::WatchError;

/// A file that appeared in the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Name relative to the watched folder; used as the record key.
    pub name: String,
    pub path: PathBuf,
}

impl FileEvent {
    pub fn new(folder: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = folder.join(&name);
        Self { name, path }
    }

    fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            name,
            path: path.to_path_buf(),
        })
    }
}

#[derive(Debug)]
pub enum WatchPoll {
    Events(Vec<FileEvent>),
    /// Nothing arrived before the timeout.
    Idle,
    /// The source will never produce events again.
    Closed,
}

/// Stream of file creation events for one folder.
pub trait WatchSource: Send {
    /// Waits at most `timeout` for the next batch of creation events.
    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, WatchPoll>;

    fn close(&mut self) -> Result<(), WatchError>;
}

pub struct NotifyWatchSource {
    folder: PathBuf,
    watcher: Option<RecommendedWatcher>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl NotifyWatchSource {
    pub fn new(folder: &Path) -> Result<Self, WatchError> {
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        debug!("Dropping file event after watcher shutdown");
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|source| WatchError::Setup {
            path: folder.to_path_buf(),
            source,
        })?;

        watcher
            .watch(folder, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Setup {
                path: folder.to_path_buf(),
                source,
            })?;

        info!("Monitoring folder: {}", folder.display());

        Ok(Self {
            folder: folder.to_path_buf(),
            watcher: Some(watcher),
            events,
        })
    }
}

/// Files that were created in, or moved into, the folder.
fn created_files(event: Event) -> Vec<FileEvent> {
    let paths = match event.kind {
        // A move also produces `Name(Both)` with `[from, to]`; the `To`
        // half already carries the new name.
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths,
        _ => return Vec::new(),
    };

    paths.iter().filter_map(|p| FileEvent::from_path(p)).collect()
}

/// Appends events whose path is not already in the batch.
fn add_unique(batch: &mut Vec<FileEvent>, events: Vec<FileEvent>) {
    for event in events {
        if !batch.iter().any(|seen| seen.path == event.path) {
            batch.push(event);
        }
    }
}

impl WatchSource for NotifyWatchSource {
    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, WatchPoll> {
        async move {
            let first = match tokio::time::timeout(timeout, self.events.recv()).await {
                Err(_) => return WatchPoll::Idle,
                Ok(None) => return WatchPoll::Closed,
                Ok(Some(event)) => event,
            };

            let mut batch = Vec::new();
            add_unique(&mut batch, created_files(first));
            while let Ok(event) = self.events.try_recv() {
                add_unique(&mut batch, created_files(event));
            }

            if batch.is_empty() {
                WatchPoll::Idle
            } else {
                WatchPoll::Events(batch)
            }
        }
        .boxed()
    }

    fn close(&mut self) -> Result<(), WatchError> {
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };
        self.events.close();
        while self.events.try_recv().is_ok() {}

        watcher
            .unwatch(&self.folder)
            .map_err(|e| WatchError::Close(e.to_string()))
    }
}
