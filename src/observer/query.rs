use std::cmp;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use slog::error;
use slog::Logger;

use crate::config::Cluster;
use crate::models::BrokerIdentity;
use crate::models::BrokerRegistration;
use crate::models::ConsumedTopicState;
use crate::models::ConsumerDescription;
use crate::models::PartitionState;
use crate::models::TopicConfig;
use crate::models::TopicDescription;
use crate::models::TopicList;

use super::mirror::MirrorStore;
use super::offsets::OffsetFetcher;
use super::BROKER_IDS_PATH;
use super::CONSUMERS_PATH;
use super::DELETE_TOPICS_PATH;
use super::TOPICS_PATH;
use super::TOPIC_CONFIGS_PATH;

/// Read-only view over the mirror snapshots the query engine composes.
pub struct ClusterView<'a> {
    pub brokers: &'a MirrorStore,
    pub configs: &'a MirrorStore,
    pub consumers: &'a MirrorStore,
    pub deletions: Option<&'a MirrorStore>,
    pub topics: &'a MirrorStore,
}

/// Builds denormalised observations out of mirror snapshots and offsets.
///
/// Missing and malformed records are logged and dropped so responses are
/// always well-typed, partial state included.
pub struct QueryEngine<'a> {
    cluster: &'a Cluster,
    fetcher: &'a OffsetFetcher,
    logger: &'a Logger,
    view: ClusterView<'a>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        logger: &'a Logger,
        cluster: &'a Cluster,
        view: ClusterView<'a>,
        fetcher: &'a OffsetFetcher,
    ) -> QueryEngine<'a> {
        QueryEngine {
            cluster,
            fetcher,
            logger,
            view,
        }
    }

    /// Topics present in the cluster plus pending deletions.
    pub fn topics(&self) -> TopicList {
        let topics = self.view.topics.child_names(TOPICS_PATH);
        let pending_deletion: BTreeSet<String> = match self.view.deletions {
            Some(deletions) => deletions
                .child_names(DELETE_TOPICS_PATH)
                .into_iter()
                .collect(),
            None => BTreeSet::new(),
        };
        TopicList {
            topics,
            pending_deletion,
        }
    }

    /// Denormalised description of one topic, `None` if it does not exist.
    pub fn topic_description(&self, topic: &str) -> Option<TopicDescription> {
        let path = format!("{}/{}", TOPICS_PATH, topic);
        let record = self.view.topics.data_at(&path)?;
        let partitions_path = format!("{}/partitions", path);
        let mut partition_states = BTreeMap::new();
        let mut leaders: BTreeMap<i32, Option<i32>> = BTreeMap::new();
        for name in self.view.topics.child_names(&partitions_path) {
            let partition: i32 = match name.parse() {
                Ok(partition) => partition,
                Err(_) => {
                    error!(
                        self.logger, "Ignoring partition znode with non-numeric name";
                        "topic" => topic,
                        "partition" => %name,
                    );
                    continue;
                }
            };
            let state_path = format!("{}/{}/state", partitions_path, name);
            // Partitions with no state znode are skipped entirely.
            let state = match self.view.topics.data_at(&state_path) {
                Some(state) => state,
                None => continue,
            };
            let leader = match serde_json::from_slice::<PartitionState>(&state.data) {
                Ok(parsed) => Some(parsed.leader),
                Err(error) => {
                    error!(
                        self.logger, "Failed to decode partition state";
                        "topic" => topic,
                        "partition" => partition,
                        "error" => %error,
                    );
                    None
                }
            };
            partition_states.insert(partition, String::from_utf8_lossy(&state.data).into_owned());
            leaders.insert(partition, leader);
        }
        let partition_offsets = self.fetcher.latest(topic, &leaders, &self.brokers());
        Some(TopicDescription {
            topic: topic.to_string(),
            state_version: record.version,
            state: String::from_utf8_lossy(&record.data).into_owned(),
            partition_states,
            partition_offsets,
            config: self.topic_config(topic),
            delete_supported: self.cluster.version.delete_supported(),
        })
    }

    /// Descriptions of the listed topics that exist.
    pub fn topic_descriptions(&self, topics: &[String]) -> Vec<TopicDescription> {
        topics
            .iter()
            .filter_map(|topic| self.topic_description(topic))
            .collect()
    }

    /// Raw configuration of one topic, if one is set.
    pub fn topic_config(&self, topic: &str) -> Option<TopicConfig> {
        let path = format!("{}/{}", TOPIC_CONFIGS_PATH, topic);
        self.view.configs.data_at(&path).map(|record| TopicConfig {
            version: record.version,
            config: String::from_utf8_lossy(&record.data).into_owned(),
        })
    }

    /// Consumer groups, with inactive groups filtered out if configured.
    pub fn consumers(&self) -> Vec<String> {
        let mut groups = Vec::new();
        for group in self.view.consumers.child_names(CONSUMERS_PATH) {
            if self.cluster.consumers.filter_inactive {
                let path = format!("{}/{}", CONSUMERS_PATH, group);
                let children = self.view.consumers.child_count(&path);
                if children <= self.cluster.consumers.active_threshold {
                    continue;
                }
            }
            groups.push(group);
        }
        groups
    }

    /// Denormalised description of one consumer group.
    pub fn consumer_description(&self, group: &str) -> Option<ConsumerDescription> {
        let path = format!("{}/{}", CONSUMERS_PATH, group);
        self.view.consumers.data_at(&path)?;
        let offsets_path = format!("{}/offsets", path);
        let mut topics = BTreeMap::new();
        for topic in self.view.consumers.child_names(&offsets_path) {
            if let Some(state) = self.consumed_topic_state(group, &topic) {
                topics.insert(topic, state);
            }
        }
        Some(ConsumerDescription {
            consumer_group: group.to_string(),
            topics,
        })
    }

    /// State of one consumer group over one topic.
    ///
    /// Produced only when the group tracks offsets or owners for the topic.
    pub fn consumed_topic_state(&self, group: &str, topic: &str) -> Option<ConsumedTopicState> {
        let offsets_path = format!("{}/{}/offsets/{}", CONSUMERS_PATH, group, topic);
        let owners_path = format!("{}/{}/owners/{}", CONSUMERS_PATH, group, topic);
        let has_offsets = self.view.consumers.data_at(&offsets_path).is_some();
        let has_owners = self.view.consumers.data_at(&owners_path).is_some();
        if !has_offsets && !has_owners {
            return None;
        }
        let mut committed_offsets = BTreeMap::new();
        for (name, record) in self.view.consumers.children_of(&offsets_path) {
            let partition: Option<i32> = name.parse().ok();
            let offset: Option<i64> = ::std::str::from_utf8(&record.data)
                .ok()
                .and_then(|raw| raw.trim().parse().ok());
            match (partition, offset) {
                (Some(partition), Some(offset)) => {
                    committed_offsets.insert(partition, offset);
                }
                _ => error!(
                    self.logger, "Failed to decode committed offset";
                    "group" => group,
                    "topic" => topic,
                    "partition" => %name,
                ),
            }
        }
        let mut partition_owners = BTreeMap::new();
        for (name, record) in self.view.consumers.children_of(&owners_path) {
            match name.parse::<i32>() {
                Ok(partition) => {
                    let owner = String::from_utf8_lossy(&record.data).into_owned();
                    partition_owners.insert(partition, owner);
                }
                Err(_) => error!(
                    self.logger, "Failed to decode partition owner";
                    "group" => group,
                    "topic" => topic,
                    "partition" => %name,
                ),
            }
        }
        let description = self.topic_description(topic);
        let topic_offsets = description
            .as_ref()
            .map(|description| description.partition_offsets.clone())
            .unwrap_or_default();
        let state_partitions = description
            .as_ref()
            .map(|description| description.partition_states.len())
            .unwrap_or(0);
        let partition_count = cmp::max(state_partitions, committed_offsets.len());
        Some(ConsumedTopicState {
            consumer_group: group.to_string(),
            topic: topic.to_string(),
            partition_count,
            topic_offsets,
            partition_owners,
            committed_offsets,
        })
    }

    /// Registered brokers, sorted by id ascending.
    ///
    /// Registrations that fail to parse are dropped.
    pub fn brokers(&self) -> Vec<BrokerIdentity> {
        let mut brokers: BTreeMap<i32, BrokerIdentity> = BTreeMap::new();
        for (name, record) in self.view.brokers.children_of(BROKER_IDS_PATH) {
            let id: i32 = match name.parse() {
                Ok(id) => id,
                Err(_) => {
                    error!(
                        self.logger, "Ignoring broker znode with non-numeric name";
                        "broker" => %name,
                    );
                    continue;
                }
            };
            match serde_json::from_slice::<BrokerRegistration>(&record.data) {
                Ok(registration) => {
                    let identity = BrokerIdentity::new(id, registration.host, registration.port);
                    brokers.insert(id, identity);
                }
                Err(error) => error!(
                    self.logger, "Failed to decode broker registration";
                    "broker" => id,
                    "error" => %error,
                ),
            }
        }
        brokers.into_iter().map(|(_, broker)| broker).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::HashMap;

    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::mirror::MirrorStore;
    use super::super::mirror::NodeRecord;
    use super::super::offsets::OffsetFetcher;
    use super::super::offsets::OffsetSource;
    use super::ClusterView;
    use super::QueryEngine;
    use crate::config::Cluster;
    use crate::config::KafkaVersion;
    use crate::error::Result;
    use crate::models::BrokerIdentity;

    /// Scripted offsets by (broker id, topic).
    struct MockSource {
        offsets: HashMap<(i32, String), HashMap<i32, i64>>,
    }

    impl OffsetSource for MockSource {
        fn latest_offsets(
            &self,
            broker: &BrokerIdentity,
            topic: &str,
        ) -> Result<HashMap<i32, i64>> {
            Ok(self
                .offsets
                .get(&(broker.id, topic.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    struct Fixture {
        brokers: MirrorStore,
        cluster: Cluster,
        configs: MirrorStore,
        consumers: MirrorStore,
        deletions: Option<MirrorStore>,
        fetcher: OffsetFetcher,
        logger: Logger,
        topics: MirrorStore,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture::with_offsets(HashMap::new())
        }

        fn with_offsets(offsets: HashMap<(i32, String), HashMap<i32, i64>>) -> Fixture {
            let logger = Logger::root(Discard, o!());
            let fetcher = OffsetFetcher::new(logger.clone(), Box::new(MockSource { offsets }));
            Fixture {
                brokers: MirrorStore::new(),
                cluster: Cluster::default(),
                configs: MirrorStore::new(),
                consumers: MirrorStore::new(),
                deletions: None,
                fetcher,
                logger,
                topics: MirrorStore::new(),
            }
        }

        fn engine(&self) -> QueryEngine {
            let view = ClusterView {
                brokers: &self.brokers,
                configs: &self.configs,
                consumers: &self.consumers,
                deletions: self.deletions.as_ref(),
                topics: &self.topics,
            };
            QueryEngine::new(&self.logger, &self.cluster, view, &self.fetcher)
        }
    }

    fn node(data: &str) -> NodeRecord {
        NodeRecord {
            version: 1,
            mtime: 1000,
            data: data.as_bytes().to_vec(),
        }
    }

    fn seed_broker(fixture: &mut Fixture, id: i32, host: &str) {
        fixture.brokers.apply(
            &format!("/brokers/ids/{}", id),
            node(&format!(r#"{{"host":"{}","port":9092}}"#, host)),
        );
    }

    fn seed_topic(fixture: &mut Fixture, topic: &str, partition_states: &[(i32, &str)]) {
        fixture.topics.apply("/brokers/topics", node(""));
        fixture.topics.apply(
            &format!("/brokers/topics/{}", topic),
            node(r#"{"version":1,"partitions":{"0":[1],"1":[1]}}"#),
        );
        fixture
            .topics
            .apply(&format!("/brokers/topics/{}/partitions", topic), node(""));
        for (partition, state) in partition_states {
            fixture.topics.apply(
                &format!("/brokers/topics/{}/partitions/{}", topic, partition),
                node(""),
            );
            fixture.topics.apply(
                &format!("/brokers/topics/{}/partitions/{}/state", topic, partition),
                node(state),
            );
        }
    }

    mod topics {
        use super::*;

        #[test]
        fn lists_topics_and_pending_deletions() {
            let mut fixture = Fixture::new();
            seed_topic(&mut fixture, "t1", &[]);
            seed_topic(&mut fixture, "t2", &[]);
            let mut deletions = MirrorStore::new();
            deletions.apply("/admin/delete_topics", node(""));
            deletions.apply("/admin/delete_topics/t2", node(""));
            fixture.deletions = Some(deletions);
            let list = fixture.engine().topics();
            assert_eq!(list.topics, vec!["t1".to_string(), "t2".to_string()]);
            assert!(list.pending_deletion.contains("t2"));
        }

        #[test]
        fn no_delete_mirror_means_no_pending_deletions() {
            let mut fixture = Fixture::new();
            seed_topic(&mut fixture, "t1", &[]);
            let list = fixture.engine().topics();
            assert!(list.pending_deletion.is_empty());
        }
    }

    mod topic_description {
        use super::*;

        #[test]
        fn offsets_from_the_partition_leaders() {
            let mut offsets = HashMap::new();
            offsets.insert((1, "t".to_string()), {
                let mut topic = HashMap::new();
                topic.insert(0, 100);
                topic.insert(1, 250);
                topic
            });
            let mut fixture = Fixture::with_offsets(offsets);
            seed_broker(&mut fixture, 1, "b1");
            seed_topic(
                &mut fixture,
                "t",
                &[
                    (0, r#"{"leader":1,"isr":[1]}"#),
                    (1, r#"{"leader":1,"isr":[1]}"#),
                ],
            );
            let description = fixture.engine().topic_description("t").unwrap();
            let expected: BTreeMap<i32, Option<i64>> =
                vec![(0, Some(100)), (1, Some(250))].into_iter().collect();
            assert_eq!(description.partition_offsets, expected);
            assert_eq!(description.partition_states.len(), 2);
            assert_eq!(description.state_version, 1);
        }

        #[test]
        fn unresolvable_leader_does_not_fail_the_description() {
            let mut fixture = Fixture::new();
            seed_broker(&mut fixture, 1, "b1");
            seed_topic(&mut fixture, "t", &[(0, r#"{"leader":7,"isr":[7]}"#)]);
            let description = fixture.engine().topic_description("t").unwrap();
            assert_eq!(description.partition_offsets.get(&0), Some(&None));
        }

        #[test]
        fn malformed_partition_state_yields_none_offset() {
            let mut fixture = Fixture::new();
            seed_broker(&mut fixture, 1, "b1");
            seed_topic(
                &mut fixture,
                "t",
                &[(0, r#"{"leader":1,"isr":[1]}"#), (1, "not json")],
            );
            let description = fixture.engine().topic_description("t").unwrap();
            assert_eq!(description.partition_states.len(), 2);
            assert_eq!(description.partition_offsets.get(&1), Some(&None));
        }

        #[test]
        fn partitions_without_state_are_skipped() {
            let mut fixture = Fixture::new();
            seed_topic(&mut fixture, "t", &[(0, r#"{"leader":1,"isr":[1]}"#)]);
            fixture
                .topics
                .apply("/brokers/topics/t/partitions/1", node(""));
            let description = fixture.engine().topic_description("t").unwrap();
            assert_eq!(description.partition_states.len(), 1);
            assert!(!description.partition_offsets.contains_key(&1));
        }

        #[test]
        fn missing_topic_yields_none() {
            let fixture = Fixture::new();
            assert!(fixture.engine().topic_description("missing").is_none());
        }

        #[test]
        fn config_is_attached_when_present() {
            let mut fixture = Fixture::new();
            seed_topic(&mut fixture, "t", &[]);
            fixture.configs.apply("/config/topics", node(""));
            fixture
                .configs
                .apply("/config/topics/t", node(r#"{"version":1,"config":{}}"#));
            let description = fixture.engine().topic_description("t").unwrap();
            let config = description.config.unwrap();
            assert_eq!(config.version, 1);
            assert_eq!(config.config, r#"{"version":1,"config":{}}"#);
        }

        #[test]
        fn delete_support_follows_cluster_version() {
            let mut fixture = Fixture::new();
            fixture.cluster.version = KafkaVersion::V0_8_1_1;
            seed_topic(&mut fixture, "t", &[]);
            let description = fixture.engine().topic_description("t").unwrap();
            assert!(!description.delete_supported);
        }
    }

    mod consumers {
        use super::*;

        fn seed_group(fixture: &mut Fixture, group: &str, children: &[&str]) {
            fixture.consumers.apply("/consumers", node(""));
            fixture
                .consumers
                .apply(&format!("/consumers/{}", group), node(""));
            for child in children {
                fixture
                    .consumers
                    .apply(&format!("/consumers/{}/{}", group, child), node(""));
            }
        }

        #[test]
        fn inactive_groups_are_filtered() {
            let mut fixture = Fixture::new();
            fixture.cluster.consumers.filter_inactive = true;
            seed_group(&mut fixture, "active", &["ids", "offsets", "owners"]);
            seed_group(&mut fixture, "inactive", &["ids"]);
            let consumers = fixture.engine().consumers();
            assert_eq!(consumers, vec!["active".to_string()]);
        }

        #[test]
        fn all_groups_without_filtering() {
            let mut fixture = Fixture::new();
            seed_group(&mut fixture, "active", &["ids", "offsets", "owners"]);
            seed_group(&mut fixture, "inactive", &["ids"]);
            let consumers = fixture.engine().consumers();
            assert_eq!(consumers.len(), 2);
        }

        #[test]
        fn committed_offsets_and_owners() {
            let mut fixture = Fixture::new();
            seed_group(&mut fixture, "g", &["ids", "offsets", "owners"]);
            fixture.consumers.apply("/consumers/g/offsets/t", node(""));
            fixture
                .consumers
                .apply("/consumers/g/offsets/t/0", node("42"));
            fixture
                .consumers
                .apply("/consumers/g/offsets/t/1", node("17"));
            fixture.consumers.apply("/consumers/g/owners/t", node(""));
            fixture
                .consumers
                .apply("/consumers/g/owners/t/0", node("g_consumer_0-0"));
            let state = fixture.engine().consumed_topic_state("g", "t").unwrap();
            let committed: BTreeMap<i32, i64> = vec![(0, 42), (1, 17)].into_iter().collect();
            assert_eq!(state.committed_offsets, committed);
            assert_eq!(
                state.partition_owners.get(&0),
                Some(&"g_consumer_0-0".to_string())
            );
            assert_eq!(state.partition_count, 2);
        }

        #[test]
        fn unknown_topic_state_is_none() {
            let mut fixture = Fixture::new();
            seed_group(&mut fixture, "g", &["ids", "offsets", "owners"]);
            assert!(fixture.engine().consumed_topic_state("g", "t").is_none());
        }

        #[test]
        fn malformed_committed_offsets_are_dropped() {
            let mut fixture = Fixture::new();
            seed_group(&mut fixture, "g", &["offsets"]);
            fixture.consumers.apply("/consumers/g/offsets/t", node(""));
            fixture
                .consumers
                .apply("/consumers/g/offsets/t/0", node("42"));
            fixture
                .consumers
                .apply("/consumers/g/offsets/t/1", node("not a number"));
            let state = fixture.engine().consumed_topic_state("g", "t").unwrap();
            assert_eq!(state.committed_offsets.len(), 1);
            assert_eq!(state.committed_offsets.get(&0), Some(&42));
        }

        #[test]
        fn description_covers_consumed_topics() {
            let mut fixture = Fixture::new();
            seed_group(&mut fixture, "g", &["ids", "offsets", "owners"]);
            fixture.consumers.apply("/consumers/g/offsets/t", node(""));
            fixture
                .consumers
                .apply("/consumers/g/offsets/t/0", node("42"));
            let description = fixture.engine().consumer_description("g").unwrap();
            assert_eq!(description.consumer_group, "g");
            assert!(description.topics.contains_key("t"));
        }

        #[test]
        fn missing_group_yields_none() {
            let fixture = Fixture::new();
            assert!(fixture.engine().consumer_description("missing").is_none());
        }
    }

    mod brokers {
        use super::*;

        #[test]
        fn sorted_by_id() {
            let mut fixture = Fixture::new();
            fixture.brokers.apply("/brokers/ids", node(""));
            seed_broker(&mut fixture, 10, "b10");
            seed_broker(&mut fixture, 2, "b2");
            let brokers = fixture.engine().brokers();
            let ids: Vec<i32> = brokers.iter().map(|broker| broker.id).collect();
            assert_eq!(ids, vec![2, 10]);
        }

        #[test]
        fn malformed_registrations_are_dropped() {
            let mut fixture = Fixture::new();
            seed_broker(&mut fixture, 1, "b1");
            fixture
                .brokers
                .apply("/brokers/ids/2", node("not a registration"));
            let brokers = fixture.engine().brokers();
            assert_eq!(brokers.len(), 1);
            assert_eq!(brokers[0], BrokerIdentity::new(1, "b1", 9092));
        }
    }
}
