pub mod broker;
pub mod config;
pub mod error;
pub mod file_processor;
pub mod filter;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod monitor;
pub mod stability;
pub mod state;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_defaults() {
        let config = config::Config::new("localhost:9092", "scans", "/data/in");
        assert_eq!(config.stability_interval, stability::DEFAULT_STABILITY_INTERVAL);
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
        assert!(!config.rename_on_success);
    }

    #[test]
    fn test_config_validation_empty_topic() {
        let config = config::Config::new("localhost:9092", " ", "/data/in");
        assert!(config.validate().is_err());
    }

    /// Drops a file into a real folder and runs the full notify-backed loop
    /// against the in-memory broker.
    #[tokio::test]
    async fn test_end_to_end_with_real_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config::Config::new("localhost:9092", "scans", dir.path());
        config.rename_on_success = true;
        config.stability_interval = Duration::from_millis(20);
        config.poll_timeout = Duration::from_millis(50);

        let source = watcher::NotifyWatchSource::new(dir.path()).unwrap();
        let broker = testing::RecordingBroker::new();
        let monitor = monitor::Monitor::new(&config, Box::new(source), broker.clone());
        let stop = monitor.stop_handle();
        let running = tokio::spawn(monitor.run());

        std::fs::write(dir.path().join("b.ignore"), b"never").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let uploaded = dir.path().join("a.txt.uploaded");
        for _ in 0..100 {
            if uploaded.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        stop.stop();
        let report = running.await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "a.txt");
        assert_eq!(published[0].value, "aGVsbG8=");
        assert_eq!(report.published, 1);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(std::fs::read(&uploaded).unwrap(), b"hello");
        assert!(dir.path().join("b.ignore").exists());
        assert_eq!(broker.close_count(), 1);
    }

    #[tokio::test]
    async fn test_file_moved_into_folder_is_published_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tmp.part"), b"scan").unwrap();

        let mut config = config::Config::new("localhost:9092", "scans", dir.path());
        config.stability_interval = Duration::from_millis(20);
        config.poll_timeout = Duration::from_millis(50);

        let source = watcher::NotifyWatchSource::new(dir.path()).unwrap();
        let broker = testing::RecordingBroker::new();
        let monitor = monitor::Monitor::new(&config, Box::new(source), broker.clone());
        let stop = monitor.stop_handle();
        let running = tokio::spawn(monitor.run());

        std::fs::rename(dir.path().join("tmp.part"), dir.path().join("b.bin")).unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        stop.stop();
        let report = running.await.unwrap();

        let keys: Vec<_> = broker.published().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["b.bin"]);
        assert_eq!(broker.published()[0].value, "c2Nhbg==");
        assert_eq!(report.published, 1);
    }
}
