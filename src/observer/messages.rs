use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;

use crate::error::ErrorKind;
use crate::error::Result;
use crate::models::BrokerIdentity;
use crate::models::ConsumedTopicState;
use crate::models::ConsumerDescription;
use crate::models::ConsumerDescriptionList;
use crate::models::PreferredReplicaElection;
use crate::models::ReassignPartitions;
use crate::models::TopicConfig;
use crate::models::TopicDescription;
use crate::models::TopicDescriptionList;
use crate::models::TopicList;

use super::mirror::MirrorId;
use super::mirror::WakeKind;

/// Messages processed by the observer thread.
pub enum ObserverMessage {
    /// A query from a client of the observer.
    Request(ObserverRequest),

    /// The zookeeper session was closed and cannot recover.
    SessionLoss,

    /// A mirrored path changed and needs to be synchronised.
    Wake(MirrorId, String, WakeKind),
}

/// The closed set of queries the observer answers.
///
/// Every request carries the sender for its reply so callers can wait for
/// the answer without sharing state with the observer.
pub enum ObserverRequest {
    AllConsumerDescriptions {
        since_millis: i64,
        reply: Sender<Option<ConsumerDescriptionList>>,
    },
    AllTopicDescriptions {
        since_millis: i64,
        reply: Sender<Option<TopicDescriptionList>>,
    },
    Brokers {
        reply: Sender<Vec<BrokerIdentity>>,
    },
    ConsumedTopicState {
        group: String,
        topic: String,
        reply: Sender<Option<ConsumedTopicState>>,
    },
    ConsumerDescription {
        group: String,
        reply: Sender<Option<ConsumerDescription>>,
    },
    ConsumerDescriptions {
        groups: Vec<String>,
        reply: Sender<ConsumerDescriptionList>,
    },
    Consumers {
        reply: Sender<Vec<String>>,
    },
    PreferredLeaderElection {
        reply: Sender<Option<PreferredReplicaElection>>,
    },
    ReassignPartitions {
        reply: Sender<Option<ReassignPartitions>>,
    },
    TopicConfig {
        topic: String,
        reply: Sender<Option<TopicConfig>>,
    },
    TopicDescription {
        topic: String,
        reply: Sender<Option<TopicDescription>>,
    },
    TopicDescriptions {
        topics: Vec<String>,
        reply: Sender<TopicDescriptionList>,
    },
    Topics {
        reply: Sender<TopicList>,
    },
    TopicsLastUpdateMillis {
        reply: Sender<i64>,
    },
}

/// Client side of the observer: sends typed queries, waits for replies.
#[derive(Clone)]
pub struct ObserverHandle {
    messages: Sender<ObserverMessage>,
}

impl ObserverHandle {
    pub(crate) fn new(messages: Sender<ObserverMessage>) -> ObserverHandle {
        ObserverHandle { messages }
    }

    fn request<T>(&self, request: ObserverRequest, reply: Receiver<T>) -> Result<T> {
        self.messages
            .send(ObserverMessage::Request(request))
            .map_err(|_| ErrorKind::ObserverGone)?;
        reply.recv().map_err(|_| ErrorKind::ObserverGone.into())
    }

    /// Topics in the cluster, with pending deletions.
    pub fn topics(&self) -> Result<TopicList> {
        let (send, receive) = bounded(1);
        self.request(ObserverRequest::Topics { reply: send }, receive)
    }

    /// Denormalised description of one topic, if it exists.
    pub fn topic_description(&self, topic: &str) -> Result<Option<TopicDescription>> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::TopicDescription {
            topic: topic.to_string(),
            reply: send,
        };
        self.request(request, receive)
    }

    /// Descriptions of the listed topics that exist.
    pub fn topic_descriptions(&self, topics: Vec<String>) -> Result<TopicDescriptionList> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::TopicDescriptions {
            topics,
            reply: send,
        };
        self.request(request, receive)
    }

    /// All topic descriptions, or `None` if nothing changed since the
    /// given timestamp.
    pub fn all_topic_descriptions(
        &self,
        since_millis: i64,
    ) -> Result<Option<TopicDescriptionList>> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::AllTopicDescriptions {
            since_millis,
            reply: send,
        };
        self.request(request, receive)
    }

    /// Raw configuration of one topic, if one is set.
    pub fn topic_config(&self, topic: &str) -> Result<Option<TopicConfig>> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::TopicConfig {
            topic: topic.to_string(),
            reply: send,
        };
        self.request(request, receive)
    }

    /// Consumer groups in the cluster.
    pub fn consumers(&self) -> Result<Vec<String>> {
        let (send, receive) = bounded(1);
        self.request(ObserverRequest::Consumers { reply: send }, receive)
    }

    /// Denormalised description of one consumer group, if it exists.
    pub fn consumer_description(&self, group: &str) -> Result<Option<ConsumerDescription>> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::ConsumerDescription {
            group: group.to_string(),
            reply: send,
        };
        self.request(request, receive)
    }

    /// Descriptions of the listed consumer groups that exist.
    pub fn consumer_descriptions(&self, groups: Vec<String>) -> Result<ConsumerDescriptionList> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::ConsumerDescriptions {
            groups,
            reply: send,
        };
        self.request(request, receive)
    }

    /// All consumer descriptions, or `None` if nothing changed since the
    /// given timestamp.
    pub fn all_consumer_descriptions(
        &self,
        since_millis: i64,
    ) -> Result<Option<ConsumerDescriptionList>> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::AllConsumerDescriptions {
            since_millis,
            reply: send,
        };
        self.request(request, receive)
    }

    /// State of one consumer group over one topic.
    pub fn consumed_topic_state(
        &self,
        group: &str,
        topic: &str,
    ) -> Result<Option<ConsumedTopicState>> {
        let (send, receive) = bounded(1);
        let request = ObserverRequest::ConsumedTopicState {
            group: group.to_string(),
            topic: topic.to_string(),
            reply: send,
        };
        self.request(request, receive)
    }

    /// Registered brokers, sorted by id.
    pub fn brokers(&self) -> Result<Vec<BrokerIdentity>> {
        let (send, receive) = bounded(1);
        self.request(ObserverRequest::Brokers { reply: send }, receive)
    }

    /// The most recently observed preferred replica leader election.
    pub fn preferred_leader_election(&self) -> Result<Option<PreferredReplicaElection>> {
        let (send, receive) = bounded(1);
        self.request(
            ObserverRequest::PreferredLeaderElection { reply: send },
            receive,
        )
    }

    /// The most recently observed partition reassignment.
    pub fn reassign_partitions(&self) -> Result<Option<ReassignPartitions>> {
        let (send, receive) = bounded(1);
        self.request(ObserverRequest::ReassignPartitions { reply: send }, receive)
    }

    /// Current value of the topics freshness clock.
    pub fn topics_last_update_millis(&self) -> Result<i64> {
        let (send, receive) = bounded(1);
        self.request(
            ObserverRequest::TopicsLastUpdateMillis { reply: send },
            receive,
        )
    }
}
