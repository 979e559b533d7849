use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::Utc;
use crossbeam_channel::Sender;
use slog::debug;
use slog::Logger;
use zookeeper::WatchedEvent;
use zookeeper::WatchedEventType;
use zookeeper::ZkError;
use zookeeper::ZooKeeper;

use crate::error::to_error;
use crate::error::Result;
use crate::metrics::OPS_COUNT;
use crate::metrics::OP_ERRORS_COUNT;

use super::messages::ObserverMessage;

/// Identifier of the zookeeper path a mirror shadows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MirrorId {
    Admin,
    Brokers,
    Consumers,
    DeleteTopics,
    TopicConfigs,
    Topics,
}

impl MirrorId {
    pub fn name(&self) -> &'static str {
        match self {
            MirrorId::Admin => "admin",
            MirrorId::Brokers => "brokers",
            MirrorId::Consumers => "consumers",
            MirrorId::DeleteTopics => "delete-topics",
            MirrorId::TopicConfigs => "topic-configs",
            MirrorId::Topics => "topics",
        }
    }
}

/// Depth of the shadow a mirror keeps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MirrorMode {
    /// Children of the root and their data only.
    Children,

    /// The complete subtree below the root.
    Subtree,
}

/// Reason a mirror path needs to be synchronised.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WakeKind {
    Children,
    Data,
    Deleted,
    Full,
}

/// An observable mutation of the mirrored subtree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorEvent {
    pub kind: MirrorEventKind,
    pub path: String,

    /// Znode mtime for additions and updates, observation time for removals.
    pub at: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MirrorEventKind {
    Added,
    Removed,
    Updated,
}

impl MirrorEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            MirrorEventKind::Added => "added",
            MirrorEventKind::Removed => "removed",
            MirrorEventKind::Updated => "updated",
        }
    }
}

/// Data and metadata of one mirrored znode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    pub version: i32,
    pub mtime: i64,
    pub data: Vec<u8>,
}

/// In-memory shadow of a mirrored zookeeper path.
///
/// The store is pure data: all zookeeper plumbing lives in `PathMirror` so
/// queries and tests can operate on stores directly.
#[derive(Clone, Debug, Default)]
pub struct MirrorStore {
    nodes: BTreeMap<String, NodeRecord>,
}

impl MirrorStore {
    pub fn new() -> MirrorStore {
        MirrorStore::default()
    }

    /// Returns the record of the node at the given path, if mirrored.
    pub fn data_at(&self, path: &str) -> Option<&NodeRecord> {
        self.nodes.get(path)
    }

    /// Names of the direct children of the given path, in lexical order.
    pub fn child_names(&self, path: &str) -> Vec<String> {
        self.children_of(path)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Number of direct children of the given path.
    pub fn child_count(&self, path: &str) -> usize {
        self.children_of(path).len()
    }

    /// Direct children of the given path with their records, in lexical order.
    pub fn children_of(&self, path: &str) -> Vec<(String, &NodeRecord)> {
        let prefix = format!("{}/", path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, record)| {
                let name = &key[prefix.len()..];
                if name.contains('/') {
                    None
                } else {
                    Some((name.to_string(), record))
                }
            })
            .collect()
    }

    /// Number of nodes currently mirrored.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Store a node record, reporting how the shadow changed.
    pub(crate) fn apply(&mut self, path: &str, record: NodeRecord) -> Option<MirrorEventKind> {
        let kind = match self.nodes.get(path) {
            Some(existing) if existing.version == record.version && existing.data == record.data => {
                return None;
            }
            Some(_) => MirrorEventKind::Updated,
            None => MirrorEventKind::Added,
        };
        self.nodes.insert(path.to_string(), record);
        Some(kind)
    }

    /// Drop a node and all its descendants, returning the removed paths.
    pub(crate) fn remove_subtree(&mut self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);
        let removed: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &removed {
            self.nodes.remove(key);
        }
        removed
    }
}

/// Keeps a local shadow of one zookeeper path in sync through watches.
///
/// Watches are armed by the observer thread during synchronisation; the
/// watcher callbacks only enqueue a wake message so the shadow has a single
/// writer.
pub struct PathMirror {
    id: MirrorId,
    mode: MirrorMode,
    root: String,
    store: MirrorStore,
    logger: Logger,
    wakes: Sender<ObserverMessage>,
}

impl PathMirror {
    pub fn new(
        id: MirrorId,
        mode: MirrorMode,
        root: &str,
        logger: Logger,
        wakes: Sender<ObserverMessage>,
    ) -> PathMirror {
        PathMirror {
            id,
            mode,
            root: root.to_string(),
            store: MirrorStore::new(),
            logger,
            wakes,
        }
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    /// Synchronise the shadow of the given path with zookeeper.
    ///
    /// Re-arms the watches consumed by the event that triggered the wake and
    /// returns the observable mutations of the shadow.
    pub fn sync(
        &mut self,
        zoo: &ZooKeeper,
        path: &str,
        kind: WakeKind,
    ) -> Result<Vec<MirrorEvent>> {
        let mut events = Vec::new();
        match kind {
            WakeKind::Children => self.sync_children(zoo, path, &mut events)?,
            WakeKind::Data if self.store.data_at(path).is_some() => {
                self.sync_data(zoo, path, &mut events)?
            }
            WakeKind::Data | WakeKind::Full => self.sync_node(zoo, path, &mut events)?,
            WakeKind::Deleted => self.remove_node(zoo, path, &mut events)?,
        }
        Ok(events)
    }

    /// Build the watcher that wakes the observer when this path changes.
    fn watcher(&self, path: &str) -> impl Fn(WatchedEvent) + Send + 'static {
        let id = self.id;
        let path = path.to_string();
        let wakes = self.wakes.clone();
        move |event: WatchedEvent| {
            let kind = match event.event_type {
                WatchedEventType::NodeChildrenChanged => WakeKind::Children,
                WatchedEventType::NodeDataChanged => WakeKind::Data,
                WatchedEventType::NodeDeleted => WakeKind::Deleted,
                _ => WakeKind::Full,
            };
            let _ = wakes.send(ObserverMessage::Wake(id, path.clone(), kind));
        }
    }

    /// Does the mirror shadow the children of this path?
    fn tracks_children(&self, path: &str) -> bool {
        match self.mode {
            MirrorMode::Subtree => true,
            MirrorMode::Children => path == self.root,
        }
    }

    fn sync_node(
        &mut self,
        zoo: &ZooKeeper,
        path: &str,
        events: &mut Vec<MirrorEvent>,
    ) -> Result<()> {
        self.sync_data(zoo, path, events)?;
        if self.store.data_at(path).is_some() {
            self.sync_children(zoo, path, events)?;
        }
        Ok(())
    }

    fn sync_data(
        &mut self,
        zoo: &ZooKeeper,
        path: &str,
        events: &mut Vec<MirrorEvent>,
    ) -> Result<()> {
        OPS_COUNT.with_label_values(&["zookeeper", "get_data"]).inc();
        match zoo.get_data_w(path, self.watcher(path)) {
            Ok((data, stat)) => {
                let record = NodeRecord {
                    version: stat.version,
                    mtime: stat.mtime,
                    data,
                };
                if let Some(kind) = self.store.apply(path, record) {
                    events.push(MirrorEvent {
                        kind,
                        path: path.to_string(),
                        at: stat.mtime,
                    });
                }
                Ok(())
            }
            Err(ZkError::NoNode) => self.remove_node(zoo, path, events),
            Err(error) => {
                OP_ERRORS_COUNT
                    .with_label_values(&["zookeeper", "get_data"])
                    .inc();
                Err(to_error(error))
            }
        }
    }

    fn sync_children(
        &mut self,
        zoo: &ZooKeeper,
        path: &str,
        events: &mut Vec<MirrorEvent>,
    ) -> Result<()> {
        if !self.tracks_children(path) {
            return Ok(());
        }
        OPS_COUNT
            .with_label_values(&["zookeeper", "get_children"])
            .inc();
        let children = match zoo.get_children_w(path, self.watcher(path)) {
            Ok(children) => children,
            Err(ZkError::NoNode) => return self.remove_node(zoo, path, events),
            Err(error) => {
                OP_ERRORS_COUNT
                    .with_label_values(&["zookeeper", "get_children"])
                    .inc();
                return Err(to_error(error));
            }
        };
        let known: BTreeSet<String> = self.store.child_names(path).into_iter().collect();
        let mut present: BTreeSet<String> = BTreeSet::new();
        for child in children {
            let child_path = format!("{}/{}", path, child);
            let new = !known.contains(&child);
            present.insert(child);
            // Known children have their own watches armed already.
            if new {
                self.sync_node(zoo, &child_path, events)?;
            }
        }
        for gone in known.difference(&present) {
            let child_path = format!("{}/{}", path, gone);
            self.remove_node(zoo, &child_path, events)?;
        }
        Ok(())
    }

    fn remove_node(
        &mut self,
        zoo: &ZooKeeper,
        path: &str,
        events: &mut Vec<MirrorEvent>,
    ) -> Result<()> {
        // Watch for the mirror root coming back; removed children are
        // covered by the parent child watch instead.
        if path == self.root {
            OPS_COUNT.with_label_values(&["zookeeper", "exists"]).inc();
            match zoo.exists_w(path, self.watcher(path)) {
                Ok(None) => (),
                Ok(Some(_)) => {
                    // Recreated between the failed read and the exists call.
                    let _ = self.wakes.send(ObserverMessage::Wake(
                        self.id,
                        path.to_string(),
                        WakeKind::Full,
                    ));
                }
                Err(error) => {
                    OP_ERRORS_COUNT
                        .with_label_values(&["zookeeper", "exists"])
                        .inc();
                    return Err(to_error(error));
                }
            }
        }
        let now = Utc::now().timestamp_millis();
        let removed = self.store.remove_subtree(path);
        if !removed.is_empty() {
            debug!(
                self.logger, "Dropped removed nodes from mirror";
                "mirror" => self.id.name(),
                "path" => path,
                "nodes" => removed.len(),
            );
        }
        for path in removed {
            events.push(MirrorEvent {
                kind: MirrorEventKind::Removed,
                path,
                at: now,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MirrorEventKind;
    use super::MirrorStore;
    use super::NodeRecord;

    fn record(version: i32, data: &str) -> NodeRecord {
        NodeRecord {
            version,
            mtime: 1000,
            data: data.as_bytes().to_vec(),
        }
    }

    #[test]
    fn apply_reports_additions_and_updates() {
        let mut store = MirrorStore::new();
        let added = store.apply("/brokers/topics/t", record(0, "{}"));
        assert_eq!(added, Some(MirrorEventKind::Added));
        let unchanged = store.apply("/brokers/topics/t", record(0, "{}"));
        assert_eq!(unchanged, None);
        let updated = store.apply("/brokers/topics/t", record(1, "{\"a\":1}"));
        assert_eq!(updated, Some(MirrorEventKind::Updated));
    }

    #[test]
    fn children_are_direct_only() {
        let mut store = MirrorStore::new();
        store.apply("/brokers/topics", record(0, ""));
        store.apply("/brokers/topics/t1", record(0, "{}"));
        store.apply("/brokers/topics/t1/partitions", record(0, ""));
        store.apply("/brokers/topics/t1/partitions/0/state", record(0, "{}"));
        store.apply("/brokers/topics/t2", record(0, "{}"));
        assert_eq!(
            store.child_names("/brokers/topics"),
            vec!["t1".to_string(), "t2".to_string()]
        );
        assert_eq!(store.child_count("/brokers/topics/t1"), 1);
    }

    #[test]
    fn sibling_prefixes_are_not_children() {
        let mut store = MirrorStore::new();
        store.apply("/consumers/group", record(0, ""));
        store.apply("/consumers/group/ids", record(0, ""));
        store.apply("/consumers/group-archive", record(0, ""));
        assert_eq!(store.child_names("/consumers/group"), vec!["ids".to_string()]);
    }

    #[test]
    fn remove_subtree_drops_descendants() {
        let mut store = MirrorStore::new();
        store.apply("/consumers/g", record(0, ""));
        store.apply("/consumers/g/offsets", record(0, ""));
        store.apply("/consumers/g/offsets/t", record(0, ""));
        store.apply("/consumers/other", record(0, ""));
        let removed = store.remove_subtree("/consumers/g");
        assert_eq!(removed.len(), 3);
        assert!(store.data_at("/consumers/g").is_none());
        assert!(store.data_at("/consumers/g/offsets/t").is_none());
        assert!(store.data_at("/consumers/other").is_some());
    }
}
