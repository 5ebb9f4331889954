//! Registry client: announces and discovers addresses for (service, protocol)
//! pairs and keeps its announcements alive across session loss.

use crate::metrics::{MetricsSnapshot, RegistryMetrics};
use crate::path::{build_path, ensure_path, path_parts, validate_segment};
use crate::store::{Entry, EntryStore};
use crate::watcher::{self, WatcherState, WatcherStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use svcreg_coord::{Connection, Coordinator, CreateMode, EventStream, Session, SessionEvent};
use svcreg_core::{
    AclPolicy, CoordError, CoordResult, RegistryConfig, RegistryError, Result, WatcherError,
};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback receiving failures from the background session watcher
pub type WatcherErrorHook = Arc<dyn Fn(&WatcherError) + Send + Sync>;

/// The public registry contract
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Announce that `address` serves (`service`, `protocol`)
    ///
    /// Every call adds one more live announcement, even with identical
    /// arguments.
    async fn register(&self, service: &str, protocol: &str, address: &str) -> Result<()>;

    /// Addresses currently announced for (`service`, `protocol`)
    ///
    /// Returns an empty list if nothing was ever registered for the pair.
    async fn get(&self, service: &str, protocol: &str) -> Result<Vec<String>>;

    /// Stop the client; its announcements disappear with its session
    async fn close(&self) -> Result<()>;
}

/// State shared between the client and its session watcher
pub(crate) struct Shared {
    pub(crate) coordinator: Arc<dyn Coordinator>,
    pub(crate) config: RegistryConfig,
    /// Current session; `None` after a failed reconnect or after close
    pub(crate) session: RwLock<Option<Arc<dyn Session>>>,
    pub(crate) entries: EntryStore,
    pub(crate) closed: CancellationToken,
    pub(crate) status: watch::Sender<WatcherStatus>,
    pub(crate) metrics: RegistryMetrics,
    pub(crate) on_watcher_error: Option<WatcherErrorHook>,
}

impl Shared {
    pub(crate) fn report(&self, error: WatcherError) {
        if let Some(hook) = &self.on_watcher_error {
            hook(&error);
        }
    }

    pub(crate) fn set_state(&self, state: WatcherState) {
        self.status.send_modify(|status| status.state = state);
    }
}

/// Dials the coordination service and waits for the session to be established.
///
/// A session whose first event is anything but `Connected` is closed and
/// reported as a connect failure.
pub(crate) async fn dial(
    coordinator: &dyn Coordinator,
    timeout: Duration,
) -> CoordResult<(Arc<dyn Session>, EventStream)> {
    let Connection {
        session,
        mut events,
    } = tokio::time::timeout(timeout, coordinator.connect())
        .await
        .map_err(|_| CoordError::timeout("dial"))??;

    let first = tokio::time::timeout(timeout, events.next()).await;
    let failure = match first {
        Ok(Some(SessionEvent::Connected)) => return Ok((session, events)),
        Ok(Some(event)) => CoordError::connect_failed(
            coordinator.servers(),
            format!("first session event was {}", event),
        ),
        Ok(None) => CoordError::connect_failed(
            coordinator.servers(),
            "event stream ended before the session was established",
        ),
        Err(_) => CoordError::timeout("first session event"),
    };

    let _ = session.close().await;
    Err(failure)
}

/// Creates the ephemeral sequential node announcing `entry`.
///
/// Returns the created node path.
pub(crate) async fn publish(
    session: Option<&Arc<dyn Session>>,
    entry: &Entry,
    acl: AclPolicy,
) -> Result<String> {
    let parts = path_parts(&entry.service, &entry.protocol);
    let path = build_path(&parts);

    let session = session.ok_or_else(|| RegistryError::Path {
        path: path.clone(),
        source: CoordError::ConnectionLoss,
    })?;

    ensure_path(session.as_ref(), &parts, acl)
        .await
        .map_err(|source| RegistryError::Path {
            path: path.clone(),
            source,
        })?;

    let prefix = format!("{}/", path);
    let node = session
        .create(
            &prefix,
            entry.address.as_bytes(),
            CreateMode::EphemeralSequential,
            acl,
        )
        .await
        .map_err(|source| RegistryError::Publish {
            path: prefix.clone(),
            source,
        })?;

    debug!(node = %node, address = %entry.address, "Ephemeral node created");
    Ok(node)
}

/// Builder for [`RegistryClient`]
pub struct RegistryBuilder {
    coordinator: Arc<dyn Coordinator>,
    config: RegistryConfig,
    on_watcher_error: Option<WatcherErrorHook>,
}

impl RegistryBuilder {
    /// Replace the default configuration
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Receive reconnect and replay failures from the session watcher
    pub fn on_watcher_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WatcherError) + Send + Sync + 'static,
    {
        self.on_watcher_error = Some(Arc::new(hook));
        self
    }

    /// Connect and start the session watcher.
    ///
    /// Blocks until the first session event arrives and fails with
    /// [`RegistryError::Connection`] unless it reports an established session.
    pub async fn open(self) -> Result<RegistryClient> {
        self.config.validate()?;

        let servers = self.coordinator.servers().to_string();
        let (session, events) = dial(self.coordinator.as_ref(), self.config.connect_timeout())
            .await
            .map_err(|source| RegistryError::Connection {
                servers: servers.clone(),
                source,
            })?;

        let (status, _) = watch::channel(WatcherStatus {
            state: WatcherState::WaitingForEvent,
            generation: 1,
        });

        let shared = Arc::new(Shared {
            coordinator: self.coordinator,
            config: self.config,
            session: RwLock::new(Some(session)),
            entries: EntryStore::new(),
            closed: CancellationToken::new(),
            status,
            metrics: RegistryMetrics::new(),
            on_watcher_error: self.on_watcher_error,
        });

        let watcher = tokio::spawn(watcher::run(shared.clone(), events));

        info!(servers = %servers, "Registry client connected");

        Ok(RegistryClient {
            shared,
            watcher: parking_lot::Mutex::new(Some(watcher)),
        })
    }
}

/// Service registry client backed by a coordination service.
///
/// Announcements are ephemeral nodes tied to the client's session. A
/// background watcher re-establishes the session when it is lost and
/// republishes every announcement made so far.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use svcreg_coord::MemoryEnsemble;
/// use svcreg_registry::RegistryClient;
///
/// # #[tokio::main]
/// # async fn main() -> svcreg_core::Result<()> {
/// let ensemble = MemoryEnsemble::new();
/// let registry = RegistryClient::builder(Arc::new(ensemble)).open().await?;
///
/// registry.register("files", "http", "10.0.0.1:8080").await?;
/// assert_eq!(registry.get("files", "http").await?, vec!["10.0.0.1:8080"]);
///
/// registry.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct RegistryClient {
    shared: Arc<Shared>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RegistryClient {
    /// Start building a client on top of `coordinator`
    pub fn builder(coordinator: Arc<dyn Coordinator>) -> RegistryBuilder {
        RegistryBuilder {
            coordinator,
            config: RegistryConfig::default(),
            on_watcher_error: None,
        }
    }

    /// Connect to the ZooKeeper ensemble named by `config.servers`
    #[cfg(feature = "zookeeper")]
    pub async fn open(config: RegistryConfig) -> Result<Self> {
        let coordinator = Arc::new(svcreg_coord::ZkCoordinator::new(&config));
        Self::builder(coordinator).config(config).open().await
    }

    /// Publish a new announcement and record it for replay.
    ///
    /// The entry is recorded only if the node was created.
    pub async fn register(&self, service: &str, protocol: &str, address: &str) -> Result<()> {
        self.ensure_open()?;
        validate_segment("service", service)?;
        validate_segment("protocol", protocol)?;

        let entry = Arc::new(Entry::new(service, protocol, address));

        // The session read lock is held until the entry is recorded, so a
        // reconnect either sees the entry in its replay snapshot or happens
        // before the node is created on the new session.
        let session = self.shared.session.read().await;
        let node = match publish(session.as_ref(), &entry, self.shared.config.acl).await {
            Ok(node) => node,
            Err(e) => {
                self.shared.metrics.record_registration_failure();
                warn!(service, protocol, address, error = %e, "Registration failed");
                return Err(e);
            }
        };
        let count = self.shared.entries.push(entry);
        drop(session);

        self.shared.metrics.record_registration(count);
        info!(service, protocol, address, node = %node, "Service registered");
        Ok(())
    }

    /// Addresses currently announced for a pair, in the coordination
    /// service's child order.
    ///
    /// A child that disappears between listing and reading (its owner's
    /// session ended meanwhile) is left out of the result rather than
    /// failing the lookup.
    pub async fn get(&self, service: &str, protocol: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        validate_segment("service", service)?;
        validate_segment("protocol", protocol)?;

        match self.lookup(service, protocol).await {
            Ok(addresses) => {
                self.shared.metrics.record_lookup();
                Ok(addresses)
            }
            Err(e) => {
                self.shared.metrics.record_lookup_failure();
                Err(e)
            }
        }
    }

    async fn lookup(&self, service: &str, protocol: &str) -> Result<Vec<String>> {
        let path = build_path(&path_parts(service, protocol));
        let guard = self.shared.session.read().await;
        let session = guard.as_ref().ok_or_else(|| RegistryError::Lookup {
            path: path.clone(),
            source: CoordError::ConnectionLoss,
        })?;

        let children = match session.children(&path).await {
            Ok(children) => children,
            // Nobody has registered this pair yet
            Err(e) if e.is_no_node() => return Ok(Vec::new()),
            Err(source) => return Err(RegistryError::Lookup { path, source }),
        };

        let mut addresses = Vec::with_capacity(children.len());
        for child in children {
            let node = format!("{}/{}", path, child);
            match session.read(&node).await {
                Ok(data) => addresses.push(String::from_utf8_lossy(&data).into_owned()),
                Err(e) if e.is_no_node() => {
                    debug!(node = %node, "Node vanished during lookup");
                }
                Err(source) => return Err(RegistryError::Lookup { path: node, source }),
            }
        }

        Ok(addresses)
    }

    /// Close the session and stop the watcher.
    ///
    /// Ephemeral announcements are removed by the coordination service when
    /// the session ends. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.is_cancelled() {
            return Ok(());
        }
        self.shared.closed.cancel();

        let result = match self.shared.session.write().await.take() {
            Some(session) => session.close().await.map_err(RegistryError::Close),
            None => Ok(()),
        };

        let watcher = self.watcher.lock().take();
        if let Some(handle) = watcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session watcher ended abnormally");
            }
        }

        info!(entries = self.shared.entries.len(), "Registry client closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Every announcement recorded so far, in registration order
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.shared.entries.snapshot()
    }

    pub fn entry_count(&self) -> usize {
        self.shared.entries.len()
    }

    /// Subscribe to the session watcher's state
    pub fn watcher_status(&self) -> watch::Receiver<WatcherStatus> {
        self.shared.status.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.is_cancelled() {
            return Err(RegistryError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for RegistryClient {
    async fn register(&self, service: &str, protocol: &str, address: &str) -> Result<()> {
        RegistryClient::register(self, service, protocol, address).await
    }

    async fn get(&self, service: &str, protocol: &str) -> Result<Vec<String>> {
        RegistryClient::get(self, service, protocol).await
    }

    async fn close(&self) -> Result<()> {
        RegistryClient::close(self).await
    }
}

impl Drop for RegistryClient {
    fn drop(&mut self) {
        if !self.shared.closed.is_cancelled() {
            warn!("Registry client dropped without close");
            self.shared.closed.cancel();
        }
    }
}
