use std::env;
use std::process::exit;

use clap::App;
use clap::Arg;
use failure::Fail;
use prometheus::process_collector::ProcessCollector;
use slog::debug;
use slog::Logger;
use slog_scope::GlobalLoggerGuard;

use crate::config::Config;
use crate::context::ObserverContext;
use crate::error::Result;
use crate::logging;

/// Configure a command line parser.
///
/// The parser is configured with the arguments shared by all entry points.
pub fn clap<'a, 'b, S1, S2, S3>(
    name: S1,
    version: S2,
    description: S3,
    default_config_location: &'a str,
) -> App<'a, 'b>
where
    S1: Into<String>,
    S2: Into<&'b str>,
    S3: Into<&'b str>,
{
    App::new(name).version(version).about(description).arg(
        Arg::with_name("config")
            .short("c")
            .long("config")
            .value_name("FILE")
            .default_value(default_config_location)
            .help("Specifies the configuration file to use")
            .takes_value(true),
    )
}

/// Format an error and the chain of causes that led to it.
pub fn format_fail(fail: &dyn Fail) -> String {
    let mut message = fail.to_string();
    for cause in fail.iter_causes() {
        message.push_str(&format!("\n    caused by: {}", cause));
    }
    message
}

/// Configure and instantiate the logger.
pub fn logger(config: &Config) -> (Logger, GlobalLoggerGuard) {
    let logger = logging::configure(config.logging.clone());
    let scope_guard = slog_scope::set_global_logger(logger.clone());
    slog_stdlog::init().expect("Failed to initialise log -> slog integration");
    (logger, scope_guard)
}

/// Easy entrypoint function to setup the environment and handle errors.
pub fn main<F>(run: F)
where
    F: FnOnce() -> Result<bool>,
{
    // Enable backtraces if the user did not set them.
    let have_rust = env::var("RUST_BACKTRACE").is_ok();
    let have_failure = env::var("RUST_FAILURE_BACKTRACE").is_ok();
    if !have_rust && !have_failure {
        env::set_var("RUST_FAILURE_BACKTRACE", "1");
    }

    let result = run();
    match result {
        Err(error) => {
            let message = format_fail(&error);
            eprintln!("{}", message);
            exit(1);
        }
        Ok(clean) if !clean => exit(1),
        _ => (),
    };
}

/// Register default process metrics.
pub fn register_process_metrics(context: &ObserverContext) {
    let logger = &context.logger;
    let process = ProcessCollector::for_self();
    let registry = &context.metrics;
    if let Err(error) = registry.register(Box::new(process)) {
        debug!(logger, "Failed to register process metrics"; "error" => ?error);
    }
}
