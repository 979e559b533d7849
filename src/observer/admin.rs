use std::collections::BTreeMap;
use std::collections::BTreeSet;

use slog::error;
use slog::Logger;

use crate::models::ElectionPayload;
use crate::models::PreferredReplicaElection;
use crate::models::ReassignPartitions;
use crate::models::ReassignmentPayload;
use crate::models::TopicPartition;

use super::mirror::MirrorEvent;
use super::mirror::MirrorEventKind;
use super::mirror::MirrorStore;

/// Admin znode driving preferred replica leader elections.
pub const ELECTION_NODE: &str = "preferred_replica_election";

/// Admin znode driving partition reassignments.
pub const REASSIGN_NODE: &str = "reassign_partitions";

/// Lifecycle commands produced by admin mirror events.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdminCommand {
    EndElection { at: i64 },
    EndReassignment { at: i64 },
    UpdateElection { at: i64, payload: Vec<u8> },
    UpdateReassignment { at: i64, payload: Vec<u8> },
}

/// Interpret an admin mirror event as an operation lifecycle command.
///
/// Children of the admin path other than the two operation znodes are
/// ignored (topic deletion requests are mirrored separately).
pub fn route(event: &MirrorEvent, store: &MirrorStore) -> Option<AdminCommand> {
    let name = event.path.rsplit('/').next()?;
    let payload = || {
        store
            .data_at(&event.path)
            .map(|record| record.data.clone())
            .unwrap_or_default()
    };
    match name {
        ELECTION_NODE => match event.kind {
            MirrorEventKind::Added | MirrorEventKind::Updated => Some(AdminCommand::UpdateElection {
                at: event.at,
                payload: payload(),
            }),
            MirrorEventKind::Removed => Some(AdminCommand::EndElection { at: event.at }),
        },
        REASSIGN_NODE => match event.kind {
            MirrorEventKind::Added | MirrorEventKind::Updated => {
                Some(AdminCommand::UpdateReassignment {
                    at: event.at,
                    payload: payload(),
                })
            }
            MirrorEventKind::Removed => Some(AdminCommand::EndReassignment { at: event.at }),
        },
        _ => None,
    }
}

/// Lifecycle of the preferred replica leader election in flight, if any.
pub struct ElectionTracker {
    current: Option<PreferredReplicaElection>,
    logger: Logger,
}

impl ElectionTracker {
    pub fn new(logger: Logger) -> ElectionTracker {
        ElectionTracker {
            current: None,
            logger,
        }
    }

    /// Snapshot of the most recently observed election.
    pub fn current(&self) -> Option<PreferredReplicaElection> {
        self.current.clone()
    }

    /// Process an election znode write observed at time `at`.
    ///
    /// The controller rewrites the znode as it makes progress: while an
    /// election is in flight new partitions are merged into it rather than
    /// starting a new one.
    pub fn update(&mut self, at: i64, payload: &[u8]) {
        let payload: ElectionPayload = match serde_json::from_slice(payload) {
            Ok(payload) => payload,
            Err(error) => {
                error!(
                    self.logger, "Failed to decode preferred replica election payload";
                    "error" => %error,
                );
                return;
            }
        };
        let partitions: BTreeSet<TopicPartition> = payload.partitions.into_iter().collect();
        match self.current.as_mut() {
            Some(election) if election.end.is_none() => {
                election.topic_partitions.extend(partitions);
            }
            _ => {
                self.current = Some(PreferredReplicaElection {
                    start: at,
                    topic_partitions: partitions,
                    end: None,
                });
            }
        }
    }

    /// Process the removal of the election znode observed at time `at`.
    pub fn end(&mut self, at: i64) {
        if let Some(election) = self.current.as_mut() {
            election.end = Some(at);
        }
    }
}

/// Lifecycle of the partition reassignment in flight, if any.
pub struct ReassignmentTracker {
    current: Option<ReassignPartitions>,
    logger: Logger,
}

impl ReassignmentTracker {
    pub fn new(logger: Logger) -> ReassignmentTracker {
        ReassignmentTracker {
            current: None,
            logger,
        }
    }

    /// Snapshot of the most recently observed reassignment.
    pub fn current(&self) -> Option<ReassignPartitions> {
        self.current.clone()
    }

    /// Process a reassignment znode write observed at time `at`.
    pub fn update(&mut self, at: i64, payload: &[u8]) {
        let payload: ReassignmentPayload = match serde_json::from_slice(payload) {
            Ok(payload) => payload,
            Err(error) => {
                error!(
                    self.logger, "Failed to decode partition reassignment payload";
                    "error" => %error,
                );
                return;
            }
        };
        let partitions: BTreeMap<TopicPartition, Vec<i32>> = payload
            .partitions
            .into_iter()
            .map(|entry| {
                (
                    TopicPartition::new(entry.topic, entry.partition),
                    entry.replicas,
                )
            })
            .collect();
        match self.current.as_mut() {
            Some(reassignment) if reassignment.end.is_none() => {
                // Map union, newest write wins on collisions.
                reassignment.partitions.extend(partitions);
            }
            _ => {
                self.current = Some(ReassignPartitions {
                    start: at,
                    partitions,
                    end: None,
                });
            }
        }
    }

    /// Process the removal of the reassignment znode observed at time `at`.
    pub fn end(&mut self, at: i64) {
        if let Some(reassignment) = self.current.as_mut() {
            reassignment.end = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::mirror::MirrorEvent;
    use super::super::mirror::MirrorEventKind;
    use super::super::mirror::MirrorStore;
    use super::super::mirror::NodeRecord;
    use super::route;
    use super::AdminCommand;
    use super::ElectionTracker;
    use super::ReassignmentTracker;
    use crate::models::TopicPartition;

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn election_payload(partitions: &[(&str, i32)]) -> Vec<u8> {
        let entries: Vec<String> = partitions
            .iter()
            .map(|(topic, partition)| {
                format!(r#"{{"topic":"{}","partition":{}}}"#, topic, partition)
            })
            .collect();
        format!(r#"{{"version":1,"partitions":[{}]}}"#, entries.join(",")).into_bytes()
    }

    fn reassign_payload(partitions: &[(&str, i32, &[i32])]) -> Vec<u8> {
        let entries: Vec<String> = partitions
            .iter()
            .map(|(topic, partition, replicas)| {
                let replicas: Vec<String> = replicas.iter().map(|r| r.to_string()).collect();
                format!(
                    r#"{{"topic":"{}","partition":{},"replicas":[{}]}}"#,
                    topic,
                    partition,
                    replicas.join(",")
                )
            })
            .collect();
        format!(r#"{{"version":1,"partitions":[{}]}}"#, entries.join(",")).into_bytes()
    }

    mod router {
        use super::*;

        #[test]
        fn election_add_routes_to_update() {
            let mut store = MirrorStore::new();
            store.apply(
                "/admin/preferred_replica_election",
                NodeRecord {
                    version: 0,
                    mtime: 1000,
                    data: b"{}".to_vec(),
                },
            );
            let event = MirrorEvent {
                kind: MirrorEventKind::Added,
                path: "/admin/preferred_replica_election".into(),
                at: 1000,
            };
            let command = route(&event, &store);
            assert_eq!(
                command,
                Some(AdminCommand::UpdateElection {
                    at: 1000,
                    payload: b"{}".to_vec(),
                })
            );
        }

        #[test]
        fn reassignment_removal_routes_to_end() {
            let store = MirrorStore::new();
            let event = MirrorEvent {
                kind: MirrorEventKind::Removed,
                path: "/admin/reassign_partitions".into(),
                at: 2000,
            };
            let command = route(&event, &store);
            assert_eq!(command, Some(AdminCommand::EndReassignment { at: 2000 }));
        }

        #[test]
        fn other_admin_children_are_ignored() {
            let store = MirrorStore::new();
            for path in &["/admin", "/admin/delete_topics"] {
                let event = MirrorEvent {
                    kind: MirrorEventKind::Added,
                    path: (*path).into(),
                    at: 1000,
                };
                assert_eq!(route(&event, &store), None);
            }
        }
    }

    mod election {
        use super::*;

        #[test]
        fn full_lifecycle() {
            let mut tracker = ElectionTracker::new(logger());

            tracker.update(1000, &election_payload(&[("t", 0), ("t", 1)]));
            let election = tracker.current().unwrap();
            assert_eq!(election.start, 1000);
            assert_eq!(election.end, None);
            assert_eq!(election.topic_partitions.len(), 2);

            // Intermediate controller write merges into the same election.
            tracker.update(1500, &election_payload(&[("t", 2)]));
            let election = tracker.current().unwrap();
            assert_eq!(election.start, 1000);
            assert_eq!(election.end, None);
            let expected: Vec<TopicPartition> = vec![
                TopicPartition::new("t", 0),
                TopicPartition::new("t", 1),
                TopicPartition::new("t", 2),
            ];
            let observed: Vec<TopicPartition> =
                election.topic_partitions.iter().cloned().collect();
            assert_eq!(observed, expected);

            tracker.end(2000);
            let election = tracker.current().unwrap();
            assert_eq!(election.start, 1000);
            assert_eq!(election.end, Some(2000));
            assert_eq!(election.topic_partitions.len(), 3);

            // A write after completion starts a new election.
            tracker.update(2500, &election_payload(&[("u", 0)]));
            let election = tracker.current().unwrap();
            assert_eq!(election.start, 2500);
            assert_eq!(election.end, None);
            let observed: Vec<TopicPartition> =
                election.topic_partitions.iter().cloned().collect();
            assert_eq!(observed, vec![TopicPartition::new("u", 0)]);
        }

        #[test]
        fn end_is_idempotent() {
            let mut tracker = ElectionTracker::new(logger());
            tracker.update(1000, &election_payload(&[("t", 0)]));
            tracker.end(2000);
            tracker.end(2000);
            let election = tracker.current().unwrap();
            assert_eq!(election.start, 1000);
            assert_eq!(election.end, Some(2000));
        }

        #[test]
        fn end_without_election_is_ignored() {
            let mut tracker = ElectionTracker::new(logger());
            tracker.end(2000);
            assert_eq!(tracker.current(), None);
        }

        #[test]
        fn malformed_payload_is_dropped() {
            let mut tracker = ElectionTracker::new(logger());
            tracker.update(1000, &election_payload(&[("t", 0)]));
            tracker.update(1500, b"not json");
            let election = tracker.current().unwrap();
            assert_eq!(election.start, 1000);
            assert_eq!(election.topic_partitions.len(), 1);
        }
    }

    mod reassignment {
        use super::*;

        #[test]
        fn merge_prefers_newest_write() {
            let mut tracker = ReassignmentTracker::new(logger());
            tracker.update(1000, &reassign_payload(&[("t", 0, &[1, 2]), ("t", 1, &[2, 3])]));
            tracker.update(1500, &reassign_payload(&[("t", 0, &[4, 5])]));
            let reassignment = tracker.current().unwrap();
            assert_eq!(reassignment.start, 1000);
            assert_eq!(
                reassignment.partitions.get(&TopicPartition::new("t", 0)),
                Some(&vec![4, 5])
            );
            assert_eq!(
                reassignment.partitions.get(&TopicPartition::new("t", 1)),
                Some(&vec![2, 3])
            );
        }

        #[test]
        fn write_after_end_starts_a_new_reassignment() {
            let mut tracker = ReassignmentTracker::new(logger());
            tracker.update(1000, &reassign_payload(&[("t", 0, &[1])]));
            tracker.end(2000);
            tracker.update(3000, &reassign_payload(&[("u", 0, &[2])]));
            let reassignment = tracker.current().unwrap();
            assert_eq!(reassignment.start, 3000);
            assert_eq!(reassignment.end, None);
            assert_eq!(reassignment.partitions.len(), 1);
        }
    }
}
