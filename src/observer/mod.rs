use std::cmp;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use failure::ResultExt;
use humthreads::Builder;
use humthreads::Thread;
use humthreads::ThreadScope;
use slog::error;
use slog::info;
use slog::Logger;
use zookeeper::ZooKeeper;

use crate::config::Cluster;
use crate::context::ObserverContext;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::metrics::MIRROR_EVENTS_COUNT;
use crate::metrics::OBSERVER_RESTARTS;
use crate::models::ConsumerDescriptionList;
use crate::models::TopicDescriptionList;

mod admin;
mod freshness;
mod messages;
mod mirror;
mod offsets;
mod query;
mod zk;

pub use self::messages::ObserverHandle;

use self::admin::AdminCommand;
use self::admin::ElectionTracker;
use self::admin::ReassignmentTracker;
use self::freshness::FreshnessClock;
use self::messages::ObserverMessage;
use self::messages::ObserverRequest;
use self::mirror::MirrorEvent;
use self::mirror::MirrorId;
use self::mirror::MirrorMode;
use self::mirror::PathMirror;
use self::mirror::WakeKind;
use self::offsets::KafkaOffsetSource;
use self::offsets::OffsetFetcher;
use self::query::ClusterView;
use self::query::QueryEngine;
use self::zk::ZookeeperSession;

pub(crate) const ADMIN_PATH: &str = "/admin";
pub(crate) const BROKER_IDS_PATH: &str = "/brokers/ids";
pub(crate) const CONSUMERS_PATH: &str = "/consumers";
pub(crate) const DELETE_TOPICS_PATH: &str = "/admin/delete_topics";
pub(crate) const TOPICS_PATH: &str = "/brokers/topics";
pub(crate) const TOPIC_CONFIGS_PATH: &str = "/config/topics";

/// How long the observer waits for a message before checking for shutdown.
const QUEUE_POLL: Duration = Duration::from_millis(200);

/// Cap for the supervisor restart backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Start the cluster observer in a background thread.
///
/// The returned handle sends queries to the observer; the thread is
/// supervised and restarted (with a full resync) if it fails.
pub fn spawn(context: ObserverContext) -> Result<(ObserverHandle, Thread<()>)> {
    let (wakes, messages) = crossbeam_channel::unbounded();
    let handle = ObserverHandle::new(wakes.clone());
    let cluster = context.config.cluster.name.clone();
    let thread = Builder::new("k:o:observer")
        .full_name(format!("kafka-observer:cluster:{}", cluster))
        .spawn(move |scope| supervise(context, &scope, wakes, messages))
        .with_context(|_| ErrorKind::ThreadSpawn("cluster observer"))?;
    Ok((handle, thread))
}

/// Run observer incarnations until shutdown, restarting on failure.
fn supervise(
    context: ObserverContext,
    scope: &ThreadScope,
    wakes: Sender<ObserverMessage>,
    messages: Receiver<ObserverMessage>,
) {
    let logger = context.logger.clone();
    let mut backoff = Duration::from_secs(1);
    while !scope.should_shutdown() {
        scope.activity("observing cluster state");
        let result = KafkaObserver::new(&context, wakes.clone(), messages.clone())
            .and_then(|observer| observer.run(scope));
        match result {
            Ok(()) => return,
            Err(error) => {
                OBSERVER_RESTARTS.inc();
                error!(
                    logger, "Kafka cluster observer failed, restarting";
                    "cluster" => %context.config.cluster.name,
                    "error" => %error,
                );
                sleep_with_shutdown(scope, backoff);
                backoff = cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }
}

/// Sleep for the given duration, returning early on shutdown requests.
fn sleep_with_shutdown(scope: &ThreadScope, duration: Duration) {
    let step = Duration::from_millis(250);
    let mut remaining = duration;
    while !scope.should_shutdown() && remaining > Duration::from_millis(0) {
        let nap = cmp::min(step, remaining);
        thread::sleep(nap);
        remaining -= nap;
    }
}

/// Did the freshness clock move past the caller's last observed value?
fn updates_since(clock: i64, since_millis: i64) -> bool {
    clock > since_millis
}

/// One incarnation of the cluster observer.
///
/// Owns the zookeeper session, the path mirrors, the operation trackers
/// and the freshness clocks; all of them are mutated only by `run`, which
/// drains the observer mailbox one message at a time.
struct KafkaObserver {
    admin: PathMirror,
    brokers: PathMirror,
    cluster: Cluster,
    configs: PathMirror,
    consumers: PathMirror,
    consumers_clock: FreshnessClock,
    deletions: Option<PathMirror>,
    election: ElectionTracker,
    fetcher: OffsetFetcher,
    logger: Logger,
    messages: Receiver<ObserverMessage>,
    reassignment: ReassignmentTracker,
    session: ZookeeperSession,
    topics: PathMirror,
    topics_clock: FreshnessClock,
}

impl KafkaObserver {
    fn new(
        context: &ObserverContext,
        wakes: Sender<ObserverMessage>,
        messages: Receiver<ObserverMessage>,
    ) -> Result<KafkaObserver> {
        let cluster = context.config.cluster.clone();
        let logger = context.logger.clone();
        let timeout = Duration::from_secs(cluster.zookeeper.timeout);
        let session = ZookeeperSession::connect(
            &cluster.zookeeper.uri,
            timeout,
            logger.clone(),
            wakes.clone(),
        )?;
        let mirror = |id, mode, root: &str| {
            PathMirror::new(id, mode, root, logger.clone(), wakes.clone())
        };
        let deletions = if cluster.version.delete_supported() {
            Some(mirror(
                MirrorId::DeleteTopics,
                MirrorMode::Children,
                DELETE_TOPICS_PATH,
            ))
        } else {
            None
        };
        let fetcher = OffsetFetcher::new(
            logger.clone(),
            Box::new(KafkaOffsetSource::new(Duration::from_secs(
                cluster.offsets.timeout,
            ))),
        );
        Ok(KafkaObserver {
            admin: mirror(MirrorId::Admin, MirrorMode::Children, ADMIN_PATH),
            brokers: mirror(MirrorId::Brokers, MirrorMode::Children, BROKER_IDS_PATH),
            configs: mirror(
                MirrorId::TopicConfigs,
                MirrorMode::Children,
                TOPIC_CONFIGS_PATH,
            ),
            consumers: mirror(MirrorId::Consumers, MirrorMode::Subtree, CONSUMERS_PATH),
            consumers_clock: FreshnessClock::new(),
            deletions,
            election: ElectionTracker::new(logger.clone()),
            fetcher,
            messages,
            reassignment: ReassignmentTracker::new(logger.clone()),
            session,
            topics: mirror(MirrorId::Topics, MirrorMode::Subtree, TOPICS_PATH),
            topics_clock: FreshnessClock::new(),
            cluster,
            logger,
        })
    }

    /// Process mirror wakes and requests until shutdown or session loss.
    fn run(mut self, scope: &ThreadScope) -> Result<()> {
        // Earlier incarnations leave stale wakes and session loss notices
        // behind; requests are kept and served after the initial sync.
        let mut pending = Vec::new();
        while let Ok(message) = self.messages.try_recv() {
            if let ObserverMessage::Request(request) = message {
                pending.push(request);
            }
        }
        self.sync_all()?;
        info!(
            self.logger, "Cluster observer synchronised";
            "cluster" => %self.cluster.name,
            "brokers" => self.brokers.store().len(),
            "topics" => self.topics.store().len(),
            "consumers" => self.consumers.store().len(),
        );
        for request in pending {
            self.handle_request(request);
        }
        loop {
            if scope.should_shutdown() {
                return Ok(());
            }
            if !self.session.active() {
                return Err(ErrorKind::Connection(
                    "zookeeper",
                    self.cluster.zookeeper.uri.clone(),
                )
                .into());
            }
            match self.messages.recv_timeout(QUEUE_POLL) {
                Ok(ObserverMessage::Wake(id, path, kind)) => self.sync_path(id, &path, kind)?,
                Ok(ObserverMessage::Request(request)) => self.handle_request(request),
                Ok(ObserverMessage::SessionLoss) => {
                    return Err(ErrorKind::Connection(
                        "zookeeper",
                        self.cluster.zookeeper.uri.clone(),
                    )
                    .into());
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Populate every mirror from zookeeper.
    fn sync_all(&mut self) -> Result<()> {
        let zoo = self.session.client();
        let events = self.topics.sync(&zoo, TOPICS_PATH, WakeKind::Full)?;
        self.process_events(MirrorId::Topics, &events);
        let events = self.consumers.sync(&zoo, CONSUMERS_PATH, WakeKind::Full)?;
        self.process_events(MirrorId::Consumers, &events);
        let events = self.brokers.sync(&zoo, BROKER_IDS_PATH, WakeKind::Full)?;
        self.process_events(MirrorId::Brokers, &events);
        let events = self.configs.sync(&zoo, TOPIC_CONFIGS_PATH, WakeKind::Full)?;
        self.process_events(MirrorId::TopicConfigs, &events);
        let events = self.admin.sync(&zoo, ADMIN_PATH, WakeKind::Full)?;
        self.process_events(MirrorId::Admin, &events);
        if let Some(deletions) = self.deletions.as_mut() {
            let events = deletions.sync(&zoo, DELETE_TOPICS_PATH, WakeKind::Full)?;
            self.process_events(MirrorId::DeleteTopics, &events);
        }
        Ok(())
    }

    /// Synchronise one mirrored path after a watch fired for it.
    fn sync_path(&mut self, id: MirrorId, path: &str, kind: WakeKind) -> Result<()> {
        let zoo: Arc<ZooKeeper> = self.session.client();
        let mirror = match id {
            MirrorId::Admin => &mut self.admin,
            MirrorId::Brokers => &mut self.brokers,
            MirrorId::Consumers => &mut self.consumers,
            MirrorId::DeleteTopics => match self.deletions.as_mut() {
                Some(deletions) => deletions,
                None => return Ok(()),
            },
            MirrorId::TopicConfigs => &mut self.configs,
            MirrorId::Topics => &mut self.topics,
        };
        let events = mirror.sync(&zoo, path, kind)?;
        self.process_events(id, &events);
        Ok(())
    }

    /// Track freshness and operation lifecycles for observed mutations.
    fn process_events(&mut self, id: MirrorId, events: &[MirrorEvent]) {
        for event in events {
            MIRROR_EVENTS_COUNT
                .with_label_values(&[id.name(), event.kind.name()])
                .inc();
            match id {
                MirrorId::Topics => self.topics_clock.touch(),
                MirrorId::Consumers => self.consumers_clock.touch(),
                MirrorId::Admin => {
                    if let Some(command) = admin::route(event, self.admin.store()) {
                        self.apply_admin(command);
                    }
                }
                _ => (),
            }
        }
    }

    fn apply_admin(&mut self, command: AdminCommand) {
        match command {
            AdminCommand::UpdateElection { at, payload } => self.election.update(at, &payload),
            AdminCommand::EndElection { at } => self.election.end(at),
            AdminCommand::UpdateReassignment { at, payload } => {
                self.reassignment.update(at, &payload)
            }
            AdminCommand::EndReassignment { at } => self.reassignment.end(at),
        }
    }

    /// Answer one query; replies to dead callers are silently dropped.
    fn handle_request(&self, request: ObserverRequest) {
        let view = ClusterView {
            brokers: self.brokers.store(),
            configs: self.configs.store(),
            consumers: self.consumers.store(),
            deletions: self.deletions.as_ref().map(PathMirror::store),
            topics: self.topics.store(),
        };
        let engine = QueryEngine::new(&self.logger, &self.cluster, view, &self.fetcher);
        match request {
            ObserverRequest::AllConsumerDescriptions {
                since_millis,
                reply,
            } => {
                let response = if updates_since(self.consumers_clock.get(), since_millis) {
                    let groups = engine.consumers();
                    let descriptions = groups
                        .iter()
                        .filter_map(|group| engine.consumer_description(group))
                        .collect();
                    Some(ConsumerDescriptionList {
                        descriptions,
                        last_update_millis: self.consumers_clock.get(),
                    })
                } else {
                    None
                };
                let _ = reply.send(response);
            }
            ObserverRequest::AllTopicDescriptions {
                since_millis,
                reply,
            } => {
                let response = if updates_since(self.topics_clock.get(), since_millis) {
                    let topics = engine.topics().topics;
                    Some(TopicDescriptionList {
                        descriptions: engine.topic_descriptions(&topics),
                        last_update_millis: self.topics_clock.get(),
                    })
                } else {
                    None
                };
                let _ = reply.send(response);
            }
            ObserverRequest::Brokers { reply } => {
                let _ = reply.send(engine.brokers());
            }
            ObserverRequest::ConsumedTopicState {
                group,
                topic,
                reply,
            } => {
                let _ = reply.send(engine.consumed_topic_state(&group, &topic));
            }
            ObserverRequest::ConsumerDescription { group, reply } => {
                let _ = reply.send(engine.consumer_description(&group));
            }
            ObserverRequest::ConsumerDescriptions { groups, reply } => {
                let descriptions = groups
                    .iter()
                    .filter_map(|group| engine.consumer_description(group))
                    .collect();
                let _ = reply.send(ConsumerDescriptionList {
                    descriptions,
                    last_update_millis: self.consumers_clock.get(),
                });
            }
            ObserverRequest::Consumers { reply } => {
                let _ = reply.send(engine.consumers());
            }
            ObserverRequest::PreferredLeaderElection { reply } => {
                let _ = reply.send(self.election.current());
            }
            ObserverRequest::ReassignPartitions { reply } => {
                let _ = reply.send(self.reassignment.current());
            }
            ObserverRequest::TopicConfig { topic, reply } => {
                let _ = reply.send(engine.topic_config(&topic));
            }
            ObserverRequest::TopicDescription { topic, reply } => {
                let _ = reply.send(engine.topic_description(&topic));
            }
            ObserverRequest::TopicDescriptions { topics, reply } => {
                let _ = reply.send(TopicDescriptionList {
                    descriptions: engine.topic_descriptions(&topics),
                    last_update_millis: self.topics_clock.get(),
                });
            }
            ObserverRequest::Topics { reply } => {
                let _ = reply.send(engine.topics());
            }
            ObserverRequest::TopicsLastUpdateMillis { reply } => {
                let _ = reply.send(self.topics_clock.get());
            }
        }
    }
}
