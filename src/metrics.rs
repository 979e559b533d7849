use lazy_static::lazy_static;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::Opts;
use slog::debug;

use crate::context::ObserverContext;

lazy_static! {
    pub static ref MIRROR_EVENTS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "kafka_observer_mirror_events",
            "Number of change events observed by the zookeeper mirrors"
        ),
        &["mirror", "event"]
    )
    .expect("Failed to create MIRROR_EVENTS_COUNT counter");
    pub static ref OBSERVER_RESTARTS: Counter = Counter::new(
        "kafka_observer_restarts",
        "Number of times the cluster observer was restarted after a failure"
    )
    .expect("Failed to create OBSERVER_RESTARTS counter");
    pub static ref OP_ERRORS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "kafka_observer_operation_errors",
            "Number of Kafka/Zookeeper operations failed"
        ),
        &["service", "operation"]
    )
    .expect("Failed to create OP_ERRORS_COUNT counter");
    pub static ref OPS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "kafka_observer_operations",
            "Number of Kafka/Zookeeper operations issued"
        ),
        &["service", "operation"]
    )
    .expect("Failed to create OPS_COUNT counter");
    pub static ref OPS_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "kafka_observer_operations_duration",
            "Duration (in seconds) of Kafka/Zookeeper operations"
        ),
        &["service", "operation"]
    )
    .expect("Failed to create OPS_DURATION histogram");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(context: &ObserverContext) {
    let logger = &context.logger;
    let registry = &context.metrics;
    if let Err(error) = registry.register(Box::new(MIRROR_EVENTS_COUNT.clone())) {
        debug!(logger, "Failed to register MIRROR_EVENTS_COUNT"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(OBSERVER_RESTARTS.clone())) {
        debug!(logger, "Failed to register OBSERVER_RESTARTS"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(OP_ERRORS_COUNT.clone())) {
        debug!(logger, "Failed to register OP_ERRORS_COUNT"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(OPS_COUNT.clone())) {
        debug!(logger, "Failed to register OPS_COUNT"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(OPS_DURATION.clone())) {
        debug!(logger, "Failed to register OPS_DURATION"; "error" => ?error);
    }
}
