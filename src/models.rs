use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

/// Identity of a kafka broker as registered in ZooKeeper.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct BrokerIdentity {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

impl BrokerIdentity {
    pub fn new<S: Into<String>>(id: i32, host: S, port: i32) -> BrokerIdentity {
        BrokerIdentity {
            id,
            host: host.into(),
            port,
        }
    }
}

/// JSON payload stored at `/brokers/ids/<id>`.
///
/// Registrations carry more fields (jmx port, timestamp, ...) that the
/// observer does not need and ignores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerRegistration {
    pub host: String,
    pub port: i32,
}

/// Fields of the partition state JSON needed by the observer.
///
/// The full payload is carried verbatim in topic descriptions; only the
/// leader is decoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionState {
    pub leader: i32,
}

/// Topics currently present in the cluster.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopicList {
    pub topics: Vec<String>,

    /// Topics with a pending delete request, empty when the cluster version
    /// does not support topic deletion.
    pub pending_deletion: BTreeSet<String>,
}

/// Raw per-topic configuration blob.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub version: i32,
    pub config: String,
}

/// Denormalised view of a topic.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopicDescription {
    pub topic: String,

    /// Version of the topic partition-assignment znode.
    pub state_version: i32,

    /// Raw partition-assignment payload, returned verbatim.
    pub state: String,

    /// Raw partition state JSON by partition id.
    pub partition_states: BTreeMap<i32, String>,

    /// Latest (log end) offset by partition id, `None` when the leader
    /// could not be resolved or queried.
    pub partition_offsets: BTreeMap<i32, Option<i64>>,

    /// Per-topic configuration blob, if one is set.
    pub config: Option<TopicConfig>,

    pub delete_supported: bool,
}

/// Topic descriptions together with the topics freshness clock value.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopicDescriptionList {
    pub descriptions: Vec<TopicDescription>,
    pub last_update_millis: i64,
}

/// State of one consumer group over one topic.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConsumedTopicState {
    pub consumer_group: String,
    pub topic: String,

    /// Number of partitions the group is expected to cover.
    pub partition_count: usize,

    /// Latest topic offsets, from the topic description.
    pub topic_offsets: BTreeMap<i32, Option<i64>>,

    /// Consumer instance owning each partition.
    pub partition_owners: BTreeMap<i32, String>,

    /// Offsets committed by the group, by partition id.
    pub committed_offsets: BTreeMap<i32, i64>,
}

/// Denormalised view of a consumer group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConsumerDescription {
    pub consumer_group: String,
    pub topics: BTreeMap<String, ConsumedTopicState>,
}

/// Consumer descriptions together with the consumers freshness clock value.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConsumerDescriptionList {
    pub descriptions: Vec<ConsumerDescription>,
    pub last_update_millis: i64,
}

/// A (topic, partition) pair.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new<S: Into<String>>(topic: S, partition: i32) -> TopicPartition {
        TopicPartition {
            topic: topic.into(),
            partition,
        }
    }
}

/// Observed state of an in-flight preferred replica leader election.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PreferredReplicaElection {
    /// Observation time of the first event of this election, in milliseconds.
    pub start: i64,

    pub topic_partitions: BTreeSet<TopicPartition>,

    /// Observation time of the completion event, absent while in flight.
    pub end: Option<i64>,
}

/// Observed state of an in-flight partition reassignment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReassignPartitions {
    /// Observation time of the first event of this reassignment.
    pub start: i64,

    /// Target replica lists by (topic, partition).
    pub partitions: BTreeMap<TopicPartition, Vec<i32>>,

    /// Observation time of the completion event, absent while in flight.
    pub end: Option<i64>,
}

/// JSON payload written to the preferred replica election admin znode.
#[derive(Clone, Debug, Deserialize)]
pub struct ElectionPayload {
    pub version: i32,
    pub partitions: Vec<TopicPartition>,
}

/// JSON payload written to the partition reassignment admin znode.
#[derive(Clone, Debug, Deserialize)]
pub struct ReassignmentPayload {
    pub version: i32,
    pub partitions: Vec<ReassignedPartition>,
}

/// One entry of a partition reassignment payload.
#[derive(Clone, Debug, Deserialize)]
pub struct ReassignedPartition {
    pub topic: String,
    pub partition: i32,
    pub replicas: Vec<i32>,
}
