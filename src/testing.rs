//! In-memory stand-ins for the broker and the folder watcher.

use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::broker::{Acknowledgement, Broker, Delivery};
use crate::error::{BrokerError, PublishError, WatchError};
use crate::watcher::{FileEvent, WatchPoll, WatchSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: String,
    pub value: String,
}

/// Acknowledges every record immediately unless its key was marked failing.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<PublishedRecord>>,
    failing_keys: Mutex<HashSet<String>>,
    closes: AtomicUsize,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn published(&self) -> Vec<PublishedRecord> {
        self.published.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Broker for RecordingBroker {
    fn publish(&self, topic: &str, key: &str, payload: String) -> Acknowledgement {
        let mut published = self.published.lock().unwrap();
        published.push(PublishedRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            value: payload,
        });

        let result = if self.failing_keys.lock().unwrap().contains(key) {
            Err(PublishError::Rejected {
                key: key.to_string(),
                reason: "Message timed out".to_string(),
            })
        } else {
            Ok(Delivery {
                topic: topic.to_string(),
                partition: 0,
                offset: published.len() as i64 - 1,
            })
        };
        future::ready(result).boxed()
    }

    fn close(&self, _timeout: Duration) -> Result<(), BrokerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Watch source fed by hand through an unbounded channel. Dropping the
/// sender closes the source.
pub struct ChannelWatchSource {
    rx: mpsc::UnboundedReceiver<Vec<FileEvent>>,
    closes: Arc<AtomicUsize>,
}

pub fn channel_watch_source() -> (
    mpsc::UnboundedSender<Vec<FileEvent>>,
    ChannelWatchSource,
    Arc<AtomicUsize>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    let source = ChannelWatchSource {
        rx,
        closes: closes.clone(),
    };
    (tx, source, closes)
}

impl WatchSource for ChannelWatchSource {
    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, WatchPoll> {
        async move {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Err(_) => WatchPoll::Idle,
                Ok(None) => WatchPoll::Closed,
                Ok(Some(batch)) => WatchPoll::Events(batch),
            }
        }
        .boxed()
    }

    fn close(&mut self) -> Result<(), WatchError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.rx.close();
        Ok(())
    }
}
