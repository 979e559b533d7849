use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use failure::ResultExt;
use kafka::client::FetchOffset;
use kafka::client::KafkaClient;
use slog::debug;
use slog::error;
use slog::Logger;

use crate::error::to_error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::metrics::OPS_COUNT;
use crate::metrics::OPS_DURATION;
use crate::metrics::OP_ERRORS_COUNT;
use crate::models::BrokerIdentity;

/// Client id attached to offset requests.
pub const OFFSET_CLIENT_ID: &str = "partitionOffsetGetter";

/// Source of latest (log end) partition offsets.
///
/// The kafka wire call sits behind this trait so tests can script offsets
/// without a broker.
pub trait OffsetSource: Send {
    /// Latest offset of every partition of the topic known to the broker.
    fn latest_offsets(&self, broker: &BrokerIdentity, topic: &str) -> Result<HashMap<i32, i64>>;
}

/// Offsets fetched over the kafka protocol, one connection per leader.
pub struct KafkaOffsetSource {
    timeout: Duration,
}

impl KafkaOffsetSource {
    pub fn new(timeout: Duration) -> KafkaOffsetSource {
        KafkaOffsetSource { timeout }
    }
}

impl OffsetSource for KafkaOffsetSource {
    fn latest_offsets(&self, broker: &BrokerIdentity, topic: &str) -> Result<HashMap<i32, i64>> {
        OPS_COUNT.with_label_values(&["kafka", "offsets"]).inc();
        let _timer = OPS_DURATION
            .with_label_values(&["kafka", "offsets"])
            .start_timer();
        let mut client = KafkaClient::new(vec![format!("{}:{}", broker.host, broker.port)]);
        client.set_client_id(OFFSET_CLIENT_ID.to_string());
        client.set_connection_idle_timeout(self.timeout);
        client
            .load_metadata(&[topic])
            .map_err(|error| {
                OP_ERRORS_COUNT.with_label_values(&["kafka", "offsets"]).inc();
                to_error(error)
            })
            .with_context(|_| ErrorKind::StoreOpFailed("load_metadata"))?;
        let offsets = client
            .fetch_topic_offsets(topic, FetchOffset::Latest)
            .map_err(|error| {
                OP_ERRORS_COUNT.with_label_values(&["kafka", "offsets"]).inc();
                to_error(error)
            })
            .with_context(|_| ErrorKind::StoreOpFailed("fetch_offsets"))?;
        Ok(offsets
            .into_iter()
            .map(|offset| (offset.partition, offset.offset))
            .collect())
    }
}

/// Fetches the latest offset of each partition from its leader broker.
pub struct OffsetFetcher {
    logger: Logger,
    source: Box<dyn OffsetSource>,
}

impl OffsetFetcher {
    pub fn new(logger: Logger, source: Box<dyn OffsetSource>) -> OffsetFetcher {
        OffsetFetcher { logger, source }
    }

    /// Latest offset by partition id, in ascending partition order.
    ///
    /// Partitions with no resolvable leader and partitions whose leader
    /// cannot be queried yield `None`; failures never propagate.
    pub fn latest(
        &self,
        topic: &str,
        leaders: &BTreeMap<i32, Option<i32>>,
        brokers: &[BrokerIdentity],
    ) -> BTreeMap<i32, Option<i64>> {
        let index: HashMap<i32, &BrokerIdentity> =
            brokers.iter().map(|broker| (broker.id, broker)).collect();
        let mut offsets: BTreeMap<i32, Option<i64>> =
            leaders.keys().map(|partition| (*partition, None)).collect();
        let mut by_leader: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for (&partition, leader) in leaders {
            let leader = match leader {
                Some(leader) => *leader,
                None => {
                    debug!(
                        self.logger, "Partition has no resolvable leader";
                        "topic" => topic,
                        "partition" => partition,
                    );
                    continue;
                }
            };
            if index.contains_key(&leader) {
                by_leader.entry(leader).or_insert_with(Vec::new).push(partition);
            } else {
                debug!(
                    self.logger, "Partition leader is not a registered broker";
                    "topic" => topic,
                    "partition" => partition,
                    "broker" => leader,
                );
            }
        }
        for (leader, partitions) in by_leader {
            let broker = match index.get(&leader) {
                Some(broker) => *broker,
                None => continue,
            };
            match self.source.latest_offsets(broker, topic) {
                Ok(latest) => {
                    for partition in partitions {
                        match latest.get(&partition) {
                            Some(&offset) => {
                                offsets.insert(partition, Some(offset));
                            }
                            None => debug!(
                                self.logger, "Broker returned no offset for partition";
                                "topic" => topic,
                                "partition" => partition,
                                "broker" => leader,
                            ),
                        }
                    }
                }
                Err(error) => error!(
                    self.logger, "Failed to fetch latest offsets from broker";
                    "topic" => topic,
                    "broker" => leader,
                    "error" => %error,
                ),
            }
        }
        offsets
    }
}
