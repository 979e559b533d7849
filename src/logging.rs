use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use slog::o;
use slog::Drain;
use slog::Level;
use slog::Logger;
use slog::OwnedKVList;
use slog::Record;

/// Logging configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The drain to send logs to.
    #[serde(default)]
    pub backend: LoggingBackend,

    /// The minimum logging level to emit.
    #[serde(default)]
    pub level: LoggingLevel,

    /// Advanced level overrides by module prefix.
    #[serde(default)]
    pub modules: BTreeMap<String, LoggingLevel>,

    /// Enable verbose debug logs when level is debug.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            backend: LoggingBackend::default(),
            level: LoggingLevel::default(),
            modules: BTreeMap::new(),
            verbose: false,
        }
    }
}

/// Supported logging drains.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum LoggingBackend {
    /// JSON logs to standard output.
    #[serde(rename = "json")]
    Json,

    /// Terminal-friendly logs to standard output.
    #[serde(rename = "term")]
    Term,
}

impl Default for LoggingBackend {
    fn default() -> LoggingBackend {
        LoggingBackend::Json
    }
}

/// Logging level variants mirrored from slog.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum LoggingLevel {
    #[serde(rename = "critical")]
    Critical,

    #[serde(rename = "error")]
    Error,

    #[serde(rename = "warning")]
    Warning,

    #[serde(rename = "info")]
    Info,

    #[serde(rename = "debug")]
    Debug,
}

impl Default for LoggingLevel {
    fn default() -> LoggingLevel {
        LoggingLevel::Info
    }
}

impl From<LoggingLevel> for Level {
    fn from(level: LoggingLevel) -> Level {
        match level {
            LoggingLevel::Critical => Level::Critical,
            LoggingLevel::Error => Level::Error,
            LoggingLevel::Warning => Level::Warning,
            LoggingLevel::Info => Level::Info,
            LoggingLevel::Debug => Level::Debug,
        }
    }
}

/// Level filter with support for overrides by module prefix.
struct ModuleLevelFilter<D: Drain> {
    drain: D,
    level: Level,
    modules: BTreeMap<String, Level>,
}

impl<D: Drain> Drain for ModuleLevelFilter<D> {
    type Ok = Option<D::Ok>;
    type Err = D::Err;

    fn log(
        &self,
        record: &Record,
        values: &OwnedKVList,
    ) -> ::std::result::Result<Self::Ok, Self::Err> {
        // Longest matching prefix wins; the map iterates in sorted order so
        // later matches are more specific.
        let mut level = self.level;
        for (module, module_level) in &self.modules {
            if record.module().starts_with(module.as_str()) {
                level = *module_level;
            }
        }
        if record.level().is_at_least(level) {
            self.drain.log(record, values).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Build a `Logger` for the given configuration.
pub fn configure(config: LoggingConfig) -> Logger {
    let drain = match config.backend {
        LoggingBackend::Json => {
            let drain = slog_json::Json::new(io::stdout())
                .add_default_keys()
                .build();
            let drain = Mutex::new(drain).fuse();
            slog_async::Async::new(drain).build()
        }
        LoggingBackend::Term => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain).build()
        }
    };
    let drain = ModuleLevelFilter {
        drain: drain.fuse(),
        level: config.level.into(),
        modules: config
            .modules
            .into_iter()
            .map(|(module, level)| (module, level.into()))
            .collect(),
    };
    Logger::root(drain.ignore_res(), o!())
}

#[cfg(test)]
mod tests {
    use slog::Level;

    use super::LoggingConfig;
    use super::LoggingLevel;

    #[test]
    fn default_level_is_info() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, LoggingLevel::Info);
    }

    #[test]
    fn level_conversion() {
        let level: Level = LoggingLevel::Warning.into();
        assert_eq!(level, Level::Warning);
    }

    #[test]
    fn level_from_yaml() {
        let level: LoggingLevel = serde_yaml::from_str("debug").unwrap();
        assert_eq!(level, LoggingLevel::Debug);
    }
}
