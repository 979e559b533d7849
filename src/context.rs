use std::fmt;

use prometheus::Registry;
use slog::Logger;

use crate::config::Config;

/// Observer services injection.
///
/// A container to allow observer components to access configured
/// sub-systems like logging and metrics.
// Cannot derive Debug because `Logger` does not implement it.
// Any new field must be added to the implementation of Debug.
#[derive(Clone)]
pub struct ObserverContext {
    pub config: Config,
    pub logger: Logger,

    /// Access the process metrics [`Registry`].
    ///
    /// Components MUST register their metrics at creation time and as part
    /// of the same [`Registry`].
    ///
    /// [`Registry`]: https://docs.rs/prometheus/0.13.0/prometheus/struct.Registry.html
    pub metrics: Registry,
}

impl fmt::Debug for ObserverContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ObserverContext{{config:{:?},logger:Logger,metrics:Registry}}",
            self.config,
        )
    }
}

impl ObserverContext {
    pub fn new(config: Config, logger: Logger) -> ObserverContext {
        let metrics = Registry::new();
        ObserverContext {
            config,
            logger,
            metrics,
        }
    }
}
