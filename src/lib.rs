use std::thread;
use std::time::Duration;

use slog::error;
use slog::info;
use slog::Logger;

mod config;
mod context;
mod error;
mod logging;
mod metrics;
mod observer;

pub mod models;
pub mod process;

pub use crate::config::Config;
pub use crate::config::KafkaVersion;
pub use crate::context::ObserverContext;
pub use crate::error::Error;
pub use crate::error::ErrorKind;
pub use crate::error::Result;
pub use crate::observer::ObserverHandle;

const DEFAULT_CONFIG_FILE: &str = "kafka-observer.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configure and start the cluster observer.
pub fn run() -> Result<bool> {
    // Command line parsing.
    let cli_args = process::clap(
        "Kafka Cluster Observer",
        VERSION,
        env!("CARGO_PKG_DESCRIPTION"),
        DEFAULT_CONFIG_FILE,
    )
    .get_matches();

    // Load configuration.
    let config_location = cli_args.value_of("config").unwrap();
    let config = Config::from_file(config_location)?;
    let config = config.transform();

    // Configure the logger and the observer context.
    let (logger, _scope_guard) = process::logger(&config);
    let context = ObserverContext::new(config, logger.clone());
    process::register_process_metrics(&context);
    metrics::register_metrics(&context);
    info!(
        logger, "Starting kafka cluster observer";
        "cluster" => %context.config.cluster.name,
        "kafka_version" => %context.config.cluster.version,
        "zookeeper" => %context.config.cluster.zookeeper.uri,
        "version" => VERSION,
    );

    // Spawn the observer and report cluster state periodically.
    let interval = Duration::from_secs(context.config.status_interval);
    let (observer, thread) = observer::spawn(context)?;
    loop {
        thread::sleep(interval);
        if let Err(error) = report_status(&logger, &observer) {
            error!(logger, "Cluster observer is gone, shutting down"; "error" => %error);
            break;
        }
    }
    thread.request_shutdown();
    thread.join().map_err(error::to_error)?;
    Ok(false)
}

/// Log a summary of the observed cluster state.
fn report_status(logger: &Logger, observer: &ObserverHandle) -> Result<()> {
    let brokers = observer.brokers()?;
    let topics = observer.topics()?;
    let consumers = observer.consumers()?;
    info!(
        logger, "Cluster state";
        "brokers" => brokers.len(),
        "topics" => topics.topics.len(),
        "pending_deletion" => topics.pending_deletion.len(),
        "consumers" => consumers.len(),
    );
    Ok(())
}
