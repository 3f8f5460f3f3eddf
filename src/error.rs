use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported config file extension: {0} (expected .properties or .toml)")]
    UnsupportedFormat(PathBuf),
    #[error("Failed to parse config file: {0}")]
    Parse(String),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to watch folder {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("Failed to release watcher: {0}")]
    Close(String),
}

/// A record the broker refused or never acknowledged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Failed to enqueue record for {key}: {reason}")]
    Enqueue { key: String, reason: String },
    #[error("Broker rejected record for {key}: {reason}")]
    Rejected { key: String, reason: String },
    #[error("Acknowledgement for {key} was dropped before delivery")]
    AckDropped { key: String },
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to create broker client: {0}")]
    Connect(String),
    #[error("Failed to flush pending records: {0}")]
    Flush(String),
}

#[derive(Debug, Error)]
pub enum StabilityError {
    #[error("File {path} became unreadable while waiting for it to settle: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Stopped while waiting for file to settle")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
