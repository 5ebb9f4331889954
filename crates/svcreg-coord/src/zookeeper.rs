//! ZooKeeper backend built on `zookeeper-client`.

use crate::session::{Connection, Coordinator, CreateMode, EventStream, Session, SessionEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use svcreg_core::{AclPolicy, CoordError, CoordResult, RegistryConfig};
use tracing::{debug, info};
use zookeeper_client as zk;

/// Dials a ZooKeeper ensemble
#[derive(Debug, Clone)]
pub struct ZkCoordinator {
    servers: String,
    connect_timeout: Duration,
    session_timeout: Duration,
}

impl ZkCoordinator {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            servers: config.servers.clone(),
            connect_timeout: config.connect_timeout(),
            session_timeout: config.session_timeout(),
        }
    }
}

#[async_trait]
impl Coordinator for ZkCoordinator {
    async fn connect(&self) -> CoordResult<Connection> {
        let mut connector = zk::Client::connector();
        connector.session_timeout(self.session_timeout);
        connector.connection_timeout(self.connect_timeout);

        let client = connector
            .connect(&self.servers)
            .await
            .map_err(|e| CoordError::connect_failed(&self.servers, e.to_string()))?;

        info!(servers = %self.servers, "ZooKeeper session established");

        let (tx, events) = EventStream::channel();
        let mut watcher = client.state_watcher();
        let _ = tx.send(map_state(watcher.state()));

        tokio::spawn(async move {
            loop {
                let event = map_state(watcher.changed().await);
                debug!(%event, "ZooKeeper session event");
                if tx.send(event).is_err() || event.is_terminal() {
                    break;
                }
            }
        });

        Ok(Connection {
            session: Arc::new(ZkSession {
                client: Mutex::new(Some(client)),
            }),
            events,
        })
    }

    fn servers(&self) -> &str {
        &self.servers
    }
}

/// A live ZooKeeper session
pub struct ZkSession {
    client: Mutex<Option<zk::Client>>,
}

impl ZkSession {
    fn client(&self) -> CoordResult<zk::Client> {
        self.client.lock().clone().ok_or(CoordError::Closed)
    }
}

#[async_trait]
impl Session for ZkSession {
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: AclPolicy,
    ) -> CoordResult<String> {
        let client = self.client()?;
        let options = zk_mode(mode).with_acls(zk_acls(acl));

        let (_stat, sequence) = client
            .create(path, data, &options)
            .await
            .map_err(|e| map_error(e, path))?;

        Ok(if mode.is_sequential() {
            format!("{}{}", path, sequence)
        } else {
            path.to_string()
        })
    }

    async fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        self.client()?
            .list_children(path)
            .await
            .map_err(|e| map_error(e, path))
    }

    async fn read(&self, path: &str) -> CoordResult<Vec<u8>> {
        let (data, _stat) = self
            .client()?
            .get_data(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(data)
    }

    async fn exists(&self, path: &str) -> CoordResult<bool> {
        let stat = self
            .client()?
            .check_stat(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(stat.is_some())
    }

    async fn close(&self) -> CoordResult<()> {
        // Dropping the last handle closes the session server-side.
        if self.client.lock().take().is_some() {
            debug!("ZooKeeper session closed");
        }
        Ok(())
    }
}

fn zk_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        CreateMode::PersistentSequential => zk::CreateMode::PersistentSequential,
        CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
    }
}

fn zk_acls(acl: AclPolicy) -> zk::Acls<'static> {
    match acl {
        AclPolicy::Open => zk::Acls::anyone_all(),
        AclPolicy::CreatorAll => zk::Acls::creator_all(),
    }
}

fn map_state(state: zk::SessionState) -> SessionEvent {
    match state {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => {
            SessionEvent::Connected
        }
        zk::SessionState::Disconnected => SessionEvent::Disconnected,
        zk::SessionState::Expired => SessionEvent::Expired,
        zk::SessionState::AuthFailed => SessionEvent::AuthFailed,
        zk::SessionState::Closed => SessionEvent::Closed,
        #[allow(unreachable_patterns)]
        _ => SessionEvent::Closed,
    }
}

fn map_error(err: zk::Error, path: &str) -> CoordError {
    match err {
        zk::Error::NoNode => CoordError::no_node(path),
        zk::Error::NodeExists => CoordError::node_exists(path),
        zk::Error::NoChildrenForEphemerals => CoordError::NoChildrenForEphemerals {
            path: path.to_string(),
        },
        zk::Error::ConnectionLoss => CoordError::ConnectionLoss,
        zk::Error::SessionExpired => CoordError::SessionExpired,
        zk::Error::ClientClosed => CoordError::Closed,
        other => CoordError::Other(other.to_string()),
    }
}
