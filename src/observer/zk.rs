use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use failure::ResultExt;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;
use zookeeper::ZkState;
use zookeeper::ZooKeeper;

use crate::error::to_error;
use crate::error::ErrorKind;
use crate::error::Result;

use super::messages::ObserverMessage;

/// Container for a zookeeper session.
///
/// The client recovers transient disconnections on its own; once the
/// session is closed for good the `active` flag drops and the observer is
/// woken so its supervisor can rebuild the session and resync.
pub struct ZookeeperSession {
    active: Arc<AtomicBool>,
    client: Arc<ZooKeeper>,
}

impl ZookeeperSession {
    /// Create a new zookeeper session.
    pub fn connect(
        connection: &str,
        timeout: Duration,
        logger: Logger,
        wakes: Sender<ObserverMessage>,
    ) -> Result<ZookeeperSession> {
        let client = ZooKeeper::connect(connection, timeout, |_| {})
            .map_err(to_error)
            .with_context(|_| ErrorKind::Connection("zookeeper", connection.to_string()))?;
        let active = Arc::new(AtomicBool::new(true));
        let notify_close = Arc::clone(&active);
        client.add_listener(move |state| {
            let reset = match state {
                ZkState::AuthFailed => {
                    error!(logger, "Zookeeper authentication error");
                    false
                }
                ZkState::Closed => {
                    warn!(logger, "Zookeeper session closed");
                    true
                }
                ZkState::Connected => {
                    info!(logger, "Zookeeper connection successful");
                    false
                }
                ZkState::ConnectedReadOnly => {
                    warn!(logger, "Zookeeper connection is read-only");
                    false
                }
                ZkState::Connecting => {
                    debug!(logger, "Zookeeper session connecting");
                    false
                }
                event => {
                    debug!(logger, "Ignoring zookeeper state event"; "event" => ?event);
                    false
                }
            };
            if reset {
                notify_close.store(false, Ordering::Relaxed);
                let _ = wakes.send(ObserverMessage::SessionLoss);
                debug!(logger, "Zookeeper session marked as not active");
            }
        });
        let client = Arc::new(client);
        Ok(ZookeeperSession { active, client })
    }

    /// Checks if the session is active.
    ///
    /// A session is active if the connection to ZooKeeper is intact.
    ///
    /// There may be some time while the connection is broken but the
    /// session is marked as active while the client tries to re-establish
    /// the connection. If this cannot be done, the session is marked as
    /// not active.
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Get a reference to the ZooKeeper client for this session.
    pub fn client(&self) -> Arc<ZooKeeper> {
        Arc::clone(&self.client)
    }
}
