use anyhow::{Context, Result};
use env_logger::Env;
use kafka_uploader::config::{Args, Config, USAGE};
use kafka_uploader::kafka::KafkaBroker;
use kafka_uploader::monitor::Monitor;
use kafka_uploader::watcher::NotifyWatchSource;
use log::info;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let Some(args) = Args::from_cli() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load(&args.config)
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;

    info!(
        "Starting uploader: folder={}, topic={}, rename={}",
        config.watch_folder.display(),
        config.topic,
        config.rename_on_success
    );

    let broker = KafkaBroker::connect(&config)?;
    let watcher = NotifyWatchSource::new(&config.watch_folder)?;

    let monitor = Monitor::new(&config, Box::new(watcher), Arc::new(broker));

    let stop = monitor.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            stop.stop();
        }
    });

    let report = monitor.run().await;
    info!("Exiting: {:?}", report);

    Ok(())
}
