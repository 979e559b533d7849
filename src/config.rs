use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use failure::ResultExt;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ErrorKind;
use crate::error::Result;
use crate::logging::LoggingConfig;
use crate::logging::LoggingLevel;

/// Observer configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Monitored cluster options.
    #[serde(default)]
    pub cluster: Cluster,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Seconds between cluster status reports from the foreground process.
    #[serde(default = "Config::default_status_interval")]
    pub status_interval: u64,
}

impl Config {
    fn default_status_interval() -> u64 {
        60
    }

    /// Loads the configuration from the given [`std::fs::File`].
    ///
    /// [`std::fs::File`]: https://doc.rust-lang.org/std/fs/struct.File.html
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path_for_error = path.as_ref().to_str().unwrap_or("<utf8 error>").to_string();
        let config = File::open(path).with_context(|_| ErrorKind::Io(path_for_error))?;
        Config::from_reader(config)
    }

    /// Loads the configuration from the given [`std::io::Read`].
    ///
    /// [`std::io::Read`]: https://doc.rust-lang.org/std/io/trait.Read.html
    pub fn from_reader<R: Read>(reader: R) -> Result<Config> {
        let conf = serde_yaml::from_reader(reader).with_context(|_| ErrorKind::ConfigLoad)?;
        Ok(conf)
    }

    /// Apply transformations to the configuration to derive some parameters.
    ///
    /// Transformations:
    ///
    ///   * Apply verbose debug level logic.
    pub fn transform(mut self) -> Self {
        if self.logging.level == LoggingLevel::Debug && !self.logging.verbose {
            self.logging.level = LoggingLevel::Info;
            self.logging
                .modules
                .entry("kafka_observer".into())
                .or_insert(LoggingLevel::Debug);
        }
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            cluster: Cluster::default(),
            logging: LoggingConfig::default(),
            status_interval: Config::default_status_interval(),
        }
    }
}

/// Monitored cluster options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Cluster {
    /// Consumer observation options.
    #[serde(default)]
    pub consumers: ConsumersOptions,

    /// Name of the cluster, used for logs and thread names.
    #[serde(default = "Cluster::default_name")]
    pub name: String,

    /// Offset fetching options.
    #[serde(default)]
    pub offsets: OffsetsOptions,

    /// Version of the monitored Kafka cluster.
    #[serde(default)]
    pub version: KafkaVersion,

    /// Zookeeper ensemble for the Kafka cluster.
    #[serde(default)]
    pub zookeeper: ZookeeperTarget,
}

impl Cluster {
    fn default_name() -> String {
        "default".into()
    }
}

impl Default for Cluster {
    fn default() -> Cluster {
        Cluster {
            consumers: ConsumersOptions::default(),
            name: Cluster::default_name(),
            offsets: OffsetsOptions::default(),
            version: KafkaVersion::default(),
            zookeeper: ZookeeperTarget::default(),
        }
    }
}

/// Supported versions of the monitored Kafka cluster.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum KafkaVersion {
    #[serde(rename = "0.8.1.1")]
    V0_8_1_1,

    #[serde(rename = "0.8.2.0")]
    V0_8_2_0,

    #[serde(rename = "0.8.2.1")]
    V0_8_2_1,

    #[serde(rename = "0.8.2.2")]
    V0_8_2_2,
}

impl KafkaVersion {
    /// Topic deletion was introduced with Kafka 0.8.2.
    pub fn delete_supported(&self) -> bool {
        match self {
            KafkaVersion::V0_8_1_1 => false,
            _ => true,
        }
    }
}

impl Default for KafkaVersion {
    fn default() -> KafkaVersion {
        KafkaVersion::V0_8_2_0
    }
}

impl fmt::Display for KafkaVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let version = match self {
            KafkaVersion::V0_8_1_1 => "0.8.1.1",
            KafkaVersion::V0_8_2_0 => "0.8.2.0",
            KafkaVersion::V0_8_2_1 => "0.8.2.1",
            KafkaVersion::V0_8_2_2 => "0.8.2.2",
        };
        write!(f, "{}", version)
    }
}

/// Consumer observation options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ConsumersOptions {
    /// Minimum number of children a consumer group znode must have to count
    /// as active (an active group holds its ids, offsets and owners nodes).
    #[serde(default = "ConsumersOptions::default_active_threshold")]
    pub active_threshold: usize,

    /// Exclude inactive consumer groups from consumer listings.
    #[serde(default)]
    pub filter_inactive: bool,
}

impl ConsumersOptions {
    fn default_active_threshold() -> usize {
        2
    }
}

impl Default for ConsumersOptions {
    fn default() -> ConsumersOptions {
        ConsumersOptions {
            active_threshold: ConsumersOptions::default_active_threshold(),
            filter_inactive: false,
        }
    }
}

/// Offset fetching options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct OffsetsOptions {
    /// Network timeout for offset requests to brokers, in seconds.
    #[serde(default = "OffsetsOptions::default_timeout")]
    pub timeout: u64,
}

impl OffsetsOptions {
    fn default_timeout() -> u64 {
        10
    }
}

impl Default for OffsetsOptions {
    fn default() -> OffsetsOptions {
        OffsetsOptions {
            timeout: OffsetsOptions::default_timeout(),
        }
    }
}

/// Kafka's cluster Zookeeper ensemble location.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ZookeeperTarget {
    /// Zookeeper session timeout, in seconds.
    #[serde(default = "ZookeeperTarget::default_timeout")]
    pub timeout: u64,

    /// Addresses "host:port" of the zookeeper ensemble.
    #[serde(default = "ZookeeperTarget::default_uri")]
    pub uri: String,
}

impl ZookeeperTarget {
    fn default_timeout() -> u64 {
        10
    }

    fn default_uri() -> String {
        "localhost:2181".into()
    }
}

impl Default for ZookeeperTarget {
    fn default() -> ZookeeperTarget {
        ZookeeperTarget {
            timeout: ZookeeperTarget::default_timeout(),
            uri: ZookeeperTarget::default_uri(),
        }
    }
}
