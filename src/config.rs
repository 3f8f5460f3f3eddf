use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const USAGE: &str = "Arguments : [1] - Path to config.properties";

const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
const TOPIC_NAME: &str = "topic.name";
const WATCH_FOLDER: &str = "watch.folder";
const MODIFY_SENT_FILE_NAMES: &str = "modifySentFileNames";
const STABILITY_INTERVAL_MS: &str = "stability.interval.ms";
const POLL_TIMEOUT_MS: &str = "poll.timeout.ms";
const SHUTDOWN_TIMEOUT_MS: &str = "shutdown.timeout.ms";
const SCAN_EXISTING: &str = "scan.existing";
const ENQUEUE_TIMEOUT_MS: &str = "enqueue.timeout.ms";

/// Keys consumed by the uploader itself; everything else goes to the producer.
const UPLOADER_KEYS: &[&str] = &[
    TOPIC_NAME,
    WATCH_FOLDER,
    MODIFY_SENT_FILE_NAMES,
    STABILITY_INTERVAL_MS,
    POLL_TIMEOUT_MS,
    SHUTDOWN_TIMEOUT_MS,
    SCAN_EXISTING,
    ENQUEUE_TIMEOUT_MS,
];

#[derive(Parser, Debug)]
#[command(name = "kafka-uploader")]
#[command(about = "Publishes files dropped into a folder to a Kafka topic")]
pub struct Args {
    #[arg(help = "Path to config.properties")]
    pub config: PathBuf,
}

impl Args {
    /// Parses the command line, returning `None` for anything other than a
    /// single config file path with a supported extension.
    pub fn from_cli() -> Option<Self> {
        Self::try_parse().ok().filter(|args| ConfigFormat::of(&args.config).is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Properties,
    Toml,
}

impl ConfigFormat {
    fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.trim().to_ascii_lowercase();
        match ext.as_str() {
            "properties" => Some(Self::Properties),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bootstrap_servers: String,
    pub topic: String,
    pub watch_folder: PathBuf,
    pub rename_on_success: bool,
    pub stability_interval: Duration,
    pub poll_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub scan_existing: bool,
    /// How long a publish keeps retrying while the local producer queue is full.
    pub enqueue_timeout: Duration,
    /// Passed verbatim to the Kafka producer.
    pub producer_settings: BTreeMap<String, String>,
}

impl Config {
    pub fn new(bootstrap_servers: &str, topic: &str, watch_folder: impl Into<PathBuf>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            topic: topic.to_string(),
            watch_folder: watch_folder.into(),
            rename_on_success: false,
            stability_interval: Duration::from_millis(500),
            poll_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
            scan_existing: false,
            enqueue_timeout: Duration::from_secs(60),
            producer_settings: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::of(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = match format {
            ConfigFormat::Properties => parse_properties(&content)?,
            ConfigFormat::Toml => parse_toml(&content)?,
        };

        let config = Self::from_settings(settings)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_settings(mut settings: BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let bootstrap_servers = required(&settings, BOOTSTRAP_SERVERS)?;
        let topic = required(&settings, TOPIC_NAME)?;
        let watch_folder = required(&settings, WATCH_FOLDER)?;

        let mut config = Self::new(&bootstrap_servers, &topic, watch_folder);

        if let Some(value) = settings.get(MODIFY_SENT_FILE_NAMES) {
            config.rename_on_success = parse_bool(MODIFY_SENT_FILE_NAMES, value)?;
        }
        if let Some(value) = settings.get(SCAN_EXISTING) {
            config.scan_existing = parse_bool(SCAN_EXISTING, value)?;
        }
        if let Some(value) = settings.get(STABILITY_INTERVAL_MS) {
            config.stability_interval = parse_millis(STABILITY_INTERVAL_MS, value)?;
        }
        if let Some(value) = settings.get(POLL_TIMEOUT_MS) {
            config.poll_timeout = parse_millis(POLL_TIMEOUT_MS, value)?;
        }
        if let Some(value) = settings.get(SHUTDOWN_TIMEOUT_MS) {
            config.shutdown_timeout = parse_millis(SHUTDOWN_TIMEOUT_MS, value)?;
        }
        if let Some(value) = settings.get(ENQUEUE_TIMEOUT_MS) {
            config.enqueue_timeout = parse_millis(ENQUEUE_TIMEOUT_MS, value)?;
        }

        settings
            .retain(|key, _| key != BOOTSTRAP_SERVERS && !UPLOADER_KEYS.contains(&key.as_str()));
        config.producer_settings = settings;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Missing(TOPIC_NAME));
        }

        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Missing(BOOTSTRAP_SERVERS));
        }

        if self.watch_folder.as_os_str().is_empty() {
            return Err(ConfigError::Missing(WATCH_FOLDER));
        }

        for (key, value) in [
            (STABILITY_INTERVAL_MS, self.stability_interval),
            (POLL_TIMEOUT_MS, self.poll_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn required(
    settings: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    settings
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Reads a Java `.properties` file: `=`, `:` or whitespace separators,
/// backslash escapes and line continuations, `#`/`!` comments.
fn parse_properties(content: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let settings = java_properties::read(content.as_bytes())
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(settings.into_iter().collect())
}

fn parse_toml(content: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let table: toml::Table =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut settings = BTreeMap::new();
    flatten_toml("", &table, &mut settings);
    Ok(settings)
}

fn flatten_toml(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            toml::Value::Table(nested) => flatten_toml(&full_key, nested, out),
            toml::Value::String(s) => {
                out.insert(full_key, s.clone());
            }
            other => {
                out.insert(full_key, other.to_string());
            }
        }
    }
}
