use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::{BoxFuture, FutureExt};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::broker::{Broker, Delivery};
use crate::error::{PipelineError, PublishError};
use crate::filter::UPLOADED_SUFFIX;
use crate::watcher::FileEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success(Delivery),
    Failure(PublishError),
}

/// Waits for the broker's acknowledgement, then marks the file if asked to.
pub type PendingUpload = BoxFuture<'static, UploadOutcome>;

pub struct FileProcessor {
    broker: Arc<dyn Broker>,
    topic: String,
    rename_on_success: bool,
}

impl FileProcessor {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>, rename_on_success: bool) -> Self {
        Self {
            broker,
            topic: topic.into(),
            rename_on_success,
        }
    }

    /// Reads, encodes and submits one file.
    ///
    /// Returns as soon as the record is handed to the broker. The returned
    /// future must be driven for the rename to happen.
    pub async fn process(&self, event: &FileEvent) -> Result<PendingUpload, PipelineError> {
        let content = fs::read(&event.path).await.map_err(|source| PipelineError::Read {
            path: event.path.clone(),
            source,
        })?;

        let encoded = STANDARD.encode(&content);
        let ack = self.broker.publish(&self.topic, &event.name, encoded);

        let name = event.name.clone();
        let path = event.path.clone();
        let rename = self.rename_on_success;

        Ok(async move {
            match ack.await {
                Ok(delivery) => {
                    info!(
                        "Sent {} to Kafka topic {} (partition {}, offset {})",
                        name, delivery.topic, delivery.partition, delivery.offset
                    );
                    if rename {
                        match mark_uploaded(&path).await {
                            Ok(marked) => info!("Renamed {} to {}", name, marked.display()),
                            Err(e) => {
                                warn!("Sent {} but failed to mark it as uploaded: {}", name, e)
                            }
                        }
                    }
                    UploadOutcome::Success(delivery)
                }
                Err(e) => {
                    error!("Failed to send {}: {}", name, e);
                    UploadOutcome::Failure(e)
                }
            }
        }
        .boxed())
    }
}

pub fn uploaded_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(UPLOADED_SUFFIX);
    path.with_file_name(name)
}

/// Renames `path` to `<path>.uploaded`, replacing any file already there.
pub async fn mark_uploaded(path: &Path) -> std::io::Result<PathBuf> {
    let target = uploaded_path(path);
    fs::rename(path, &target).await?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBroker;

    fn write(dir: &Path, name: &str, content: &[u8]) -> FileEvent {
        std::fs::write(dir.join(name), content).unwrap();
        FileEvent::new(dir, name)
    }

    #[test]
    fn test_uploaded_path_appends_suffix() {
        assert_eq!(uploaded_path(Path::new("/in/a.txt")), PathBuf::from("/in/a.txt.uploaded"));
        assert_eq!(uploaded_path(Path::new("/in/noext")), PathBuf::from("/in/noext.uploaded"));
    }

    #[tokio::test]
    async fn test_publishes_base64_with_file_name_key() {
        let dir = tempfile::tempdir().unwrap();
        let event = write(dir.path(), "a.txt", b"hello");
        let broker = RecordingBroker::new();
        let processor = FileProcessor::new(broker.clone(), "scans", false);

        let pending = processor.process(&event).await.unwrap();
        assert!(matches!(pending.await, UploadOutcome::Success(_)));

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "scans");
        assert_eq!(published[0].key, "a.txt");
        assert_eq!(published[0].value, "aGVsbG8=");
        assert!(dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_binary_content_uses_standard_alphabet() {
        let dir = tempfile::tempdir().unwrap();
        let event = write(dir.path(), "img.bin", &[0xfb, 0xff, 0x00]);
        let broker = RecordingBroker::new();
        let processor = FileProcessor::new(broker.clone(), "scans", false);

        processor.process(&event).await.unwrap().await;
        assert_eq!(broker.published()[0].value, "+/8A");
    }

    #[tokio::test]
    async fn test_rename_after_successful_ack() {
        let dir = tempfile::tempdir().unwrap();
        let event = write(dir.path(), "a.txt", b"hello");
        std::fs::write(dir.path().join("a.txt.uploaded"), b"stale").unwrap();
        let processor = FileProcessor::new(RecordingBroker::new(), "scans", true);

        let pending = processor.process(&event).await.unwrap();
        assert!(dir.path().join("a.txt").exists(), "renamed before the acknowledgement");

        assert!(matches!(pending.await, UploadOutcome::Success(_)));
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(std::fs::read(dir.path().join("a.txt.uploaded")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_failed_ack_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let event = write(dir.path(), "c.bin", b"payload");
        let broker = RecordingBroker::new();
        broker.fail_key("c.bin");
        let processor = FileProcessor::new(broker.clone(), "scans", true);

        let outcome = processor.process(&event).await.unwrap().await;
        assert!(matches!(outcome, UploadOutcome::Failure(PublishError::Rejected { .. })));
        assert!(dir.path().join("c.bin").exists());
        assert!(!dir.path().join("c.bin.uploaded").exists());
    }

    #[tokio::test]
    async fn test_vanished_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let broker = RecordingBroker::new();
        let processor = FileProcessor::new(broker.clone(), "scans", true);

        let result = processor.process(&FileEvent::new(dir.path(), "gone.txt")).await;
        assert!(matches!(result, Err(PipelineError::Read { .. })));
        assert!(broker.published().is_empty());
    }
}
