//! In-process coordination service.
//!
//! [`MemoryEnsemble`] keeps a single node tree shared by every session it hands
//! out, with the same ephemeral and sequential rules as a real ensemble. It also
//! exposes fault-injection hooks (expiring or disconnecting sessions, refusing
//! new sessions) so session-loss handling can be exercised without a server.

use crate::session::{Connection, Coordinator, CreateMode, EventSender, EventStream, Session, SessionEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use svcreg_core::{AclPolicy, CoordError, CoordResult};
use tracing::debug;

const ROOT: &str = "/";

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<u64>,
    /// Counter for sequential child names
    child_seq: u32,
}

impl Node {
    fn new(data: Vec<u8>, ephemeral_owner: Option<u64>) -> Self {
        Self {
            data,
            ephemeral_owner,
            child_seq: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Life {
    Active,
    /// Dialed while unreachable; never established
    Detached,
    Expired,
    Closed,
}

struct SessionSlot {
    life: Life,
    events: EventSender,
}

struct State {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<u64, SessionSlot>,
    next_session: u64,
}

impl State {
    fn check_session(&self, id: u64) -> CoordResult<()> {
        match self.sessions.get(&id).map(|slot| slot.life) {
            Some(Life::Active) => Ok(()),
            Some(Life::Detached) => Err(CoordError::ConnectionLoss),
            Some(Life::Expired) => Err(CoordError::SessionExpired),
            Some(Life::Closed) | None => Err(CoordError::Closed),
        }
    }

    fn drop_ephemerals(&mut self, id: u64) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|_, node| node.ephemeral_owner != Some(id));
        before - self.nodes.len()
    }

    /// Ends a session, notifying its owner with `event`.
    fn end_session(&mut self, id: u64, life: Life, event: SessionEvent) -> bool {
        let Some(slot) = self.sessions.get_mut(&id) else {
            return false;
        };
        if matches!(slot.life, Life::Expired | Life::Closed) {
            return false;
        }

        slot.life = life;
        let _ = slot.events.send(event);
        let removed = self.drop_ephemerals(id);
        debug!(session = id, removed, %event, "Memory session ended");
        true
    }
}

/// An in-memory coordination service.
///
/// Cloning yields another handle to the same ensemble.
#[derive(Clone)]
pub struct MemoryEnsemble {
    state: Arc<Mutex<State>>,
    reachable: Arc<AtomicBool>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    /// Creates an ensemble holding only the root node
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), Node::new(Vec::new(), None));

        Self {
            state: Arc::new(Mutex::new(State {
                nodes,
                sessions: HashMap::new(),
                next_session: 1,
            })),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// While unreachable, new sessions report `Disconnected` as their first
    /// event and reject every operation.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Expires a session: its ephemeral nodes are removed and its owner sees
    /// an `Expired` event. Returns false if the session was already gone.
    pub fn expire_session(&self, id: u64) -> bool {
        self.state.lock().end_session(id, Life::Expired, SessionEvent::Expired)
    }

    /// Expires every live session, returning how many were expired
    pub fn expire_all(&self) -> usize {
        let mut state = self.state.lock();
        let ids: Vec<u64> = state.sessions.keys().copied().collect();
        ids.into_iter()
            .filter(|id| state.end_session(*id, Life::Expired, SessionEvent::Expired))
            .count()
    }

    /// Sends a `Disconnected` event to a live session without ending it
    pub fn disconnect_session(&self, id: u64) -> bool {
        let state = self.state.lock();
        match state.sessions.get(&id) {
            Some(slot) if slot.life == Life::Active => {
                slot.events.send(SessionEvent::Disconnected).is_ok()
            }
            _ => false,
        }
    }

    /// Ids of the sessions that are currently established, ascending
    pub fn session_ids(&self) -> Vec<u64> {
        let state = self.state.lock();
        let mut ids: Vec<u64> = state
            .sessions
            .iter()
            .filter(|(_, slot)| slot.life == Life::Active)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Total number of nodes, including the root
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }
}

#[async_trait]
impl Coordinator for MemoryEnsemble {
    async fn connect(&self) -> CoordResult<Connection> {
        let (tx, events) = EventStream::channel();
        let reachable = self.reachable.load(Ordering::SeqCst);

        let id = {
            let mut state = self.state.lock();
            let id = state.next_session;
            state.next_session += 1;

            let (life, first) = if reachable {
                (Life::Active, SessionEvent::Connected)
            } else {
                (Life::Detached, SessionEvent::Disconnected)
            };
            let _ = tx.send(first);
            state.sessions.insert(id, SessionSlot { life, events: tx });
            id
        };

        debug!(session = id, reachable, "Memory session dialed");

        Ok(Connection {
            session: Arc::new(MemorySession {
                id,
                state: self.state.clone(),
            }),
            events,
        })
    }

    fn servers(&self) -> &str {
        "memory"
    }
}

/// A session on a [`MemoryEnsemble`]
pub struct MemorySession {
    id: u64,
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    /// Session id, as accepted by the ensemble's fault-injection hooks
    pub fn id(&self) -> u64 {
        self.id
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(idx) => &path[..idx],
    }
}

fn validate_path(path: &str) -> CoordResult<()> {
    if path == ROOT {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(CoordError::Other(format!("invalid path: {}", path)));
    }
    Ok(())
}

#[async_trait]
impl Session for MemorySession {
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        _acl: AclPolicy,
    ) -> CoordResult<String> {
        let mut state = self.state.lock();
        state.check_session(self.id)?;

        // A sequential name may end in '/', so the parent is resolved from the
        // requested path before the suffix is attached.
        let parent = if mode.is_sequential() && path.ends_with('/') {
            path.trim_end_matches('/')
        } else {
            parent_of(path)
        };
        let parent = if parent.is_empty() { ROOT } else { parent };

        let parent_node = state
            .nodes
            .get_mut(parent)
            .ok_or_else(|| CoordError::no_node(parent))?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(CoordError::NoChildrenForEphemerals {
                path: parent.to_string(),
            });
        }

        let created = if mode.is_sequential() {
            format!("{}{:010}", path, parent_node.child_seq)
        } else {
            path.to_string()
        };
        validate_path(&created)?;
        if created == ROOT || state.nodes.contains_key(&created) {
            return Err(CoordError::node_exists(created));
        }

        if let Some(parent_node) = state.nodes.get_mut(parent) {
            parent_node.child_seq += 1;
        }
        let owner = mode.is_ephemeral().then_some(self.id);
        state
            .nodes
            .insert(created.clone(), Node::new(data.to_vec(), owner));

        Ok(created)
    }

    async fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        let state = self.state.lock();
        state.check_session(self.id)?;

        if !state.nodes.contains_key(path) {
            return Err(CoordError::no_node(path));
        }

        let prefix = if path == ROOT {
            ROOT.to_string()
        } else {
            format!("{}/", path)
        };

        Ok(state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let name = &key[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
            })
            .collect())
    }

    async fn read(&self, path: &str) -> CoordResult<Vec<u8>> {
        let state = self.state.lock();
        state.check_session(self.id)?;

        state
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordError::no_node(path))
    }

    async fn exists(&self, path: &str) -> CoordResult<bool> {
        let state = self.state.lock();
        state.check_session(self.id)?;
        Ok(state.nodes.contains_key(path))
    }

    async fn close(&self) -> CoordResult<()> {
        self.state
            .lock()
            .end_session(self.id, Life::Closed, SessionEvent::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(ensemble: &MemoryEnsemble) -> (Arc<dyn Session>, EventStream) {
        let Connection { session, mut events } = ensemble.connect().await.unwrap();
        assert_eq!(events.next().await, Some(SessionEvent::Connected));
        (session, events)
    }

    async fn mkdirs(session: &Arc<dyn Session>, path: &str) {
        let mut current = String::new();
        for part in path.trim_start_matches('/').split('/') {
            current.push('/');
            current.push_str(part);
            match session
                .create(&current, b"", CreateMode::Persistent, AclPolicy::Open)
                .await
            {
                Ok(_) | Err(CoordError::NodeExists { .. }) => {}
                Err(e) => panic!("mkdirs failed: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_sequential_children_are_numbered_per_parent() {
        let ensemble = MemoryEnsemble::new();
        let (session, _events) = open(&ensemble).await;
        mkdirs(&session, "/services/files/http").await;

        let first = session
            .create(
                "/services/files/http/",
                b"10.0.0.1:8080",
                CreateMode::EphemeralSequential,
                AclPolicy::Open,
            )
            .await
            .unwrap();
        let second = session
            .create(
                "/services/files/http/",
                b"10.0.0.1:8081",
                CreateMode::EphemeralSequential,
                AclPolicy::Open,
            )
            .await
            .unwrap();

        assert_eq!(first, "/services/files/http/0000000000");
        assert_eq!(second, "/services/files/http/0000000001");
        assert_eq!(
            session.children("/services/files/http").await.unwrap(),
            vec!["0000000000", "0000000001"]
        );
        assert_eq!(session.read(&second).await.unwrap(), b"10.0.0.1:8081");
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let ensemble = MemoryEnsemble::new();
        let (session, _events) = open(&ensemble).await;

        let err = session
            .create("/services/files", b"", CreateMode::Persistent, AclPolicy::Open)
            .await
            .unwrap_err();
        assert_eq!(err, CoordError::no_node("/services"));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_node_exists() {
        let ensemble = MemoryEnsemble::new();
        let (session, _events) = open(&ensemble).await;
        mkdirs(&session, "/services").await;

        let err = session
            .create("/services", b"", CreateMode::Persistent, AclPolicy::Open)
            .await
            .unwrap_err();
        assert!(err.is_node_exists());
    }

    #[tokio::test]
    async fn test_children_lists_direct_children_only() {
        let ensemble = MemoryEnsemble::new();
        let (session, _events) = open(&ensemble).await;
        mkdirs(&session, "/services/a/x").await;
        mkdirs(&session, "/services/b").await;

        assert_eq!(session.children("/services").await.unwrap(), vec!["a", "b"]);
        assert_eq!(session.children("/").await.unwrap(), vec!["services"]);
        assert!(session.children("/missing").await.unwrap_err().is_no_node());
    }

    #[tokio::test]
    async fn test_ephemeral_nodes_cannot_have_children() {
        let ensemble = MemoryEnsemble::new();
        let (session, _events) = open(&ensemble).await;
        session
            .create("/lock", b"", CreateMode::Ephemeral, AclPolicy::Open)
            .await
            .unwrap();

        let err = session
            .create("/lock/child", b"", CreateMode::Persistent, AclPolicy::Open)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::NoChildrenForEphemerals { .. }));
    }

    #[tokio::test]
    async fn test_close_removes_only_own_ephemerals() {
        let ensemble = MemoryEnsemble::new();
        let (owner, _owner_events) = open(&ensemble).await;
        let (reader, _reader_events) = open(&ensemble).await;
        mkdirs(&owner, "/services/files/http").await;

        owner
            .create(
                "/services/files/http/",
                b"a",
                CreateMode::EphemeralSequential,
                AclPolicy::Open,
            )
            .await
            .unwrap();
        reader
            .create(
                "/services/files/http/",
                b"b",
                CreateMode::EphemeralSequential,
                AclPolicy::Open,
            )
            .await
            .unwrap();

        owner.close().await.unwrap();
        owner.close().await.unwrap();

        let children = reader.children("/services/files/http").await.unwrap();
        assert_eq!(children, vec!["0000000001"]);
        assert!(reader.exists("/services/files/http").await.unwrap());
        assert_eq!(
            owner.children("/services").await.unwrap_err(),
            CoordError::Closed
        );
    }

    #[tokio::test]
    async fn test_expire_session_notifies_owner() {
        let ensemble = MemoryEnsemble::new();
        let (session, mut events) = open(&ensemble).await;
        session
            .create("/node", b"", CreateMode::Ephemeral, AclPolicy::Open)
            .await
            .unwrap();

        let ids = ensemble.session_ids();
        assert_eq!(ids.len(), 1);
        assert!(ensemble.expire_session(ids[0]));
        assert!(!ensemble.expire_session(ids[0]));

        assert_eq!(events.next().await, Some(SessionEvent::Expired));
        assert_eq!(
            session.exists("/node").await.unwrap_err(),
            CoordError::SessionExpired
        );
        assert_eq!(ensemble.node_count(), 1);
        assert!(ensemble.session_ids().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_ensemble_reports_disconnected() {
        let ensemble = MemoryEnsemble::new();
        ensemble.set_reachable(false);

        let Connection { session, mut events } = ensemble.connect().await.unwrap();
        assert_eq!(events.next().await, Some(SessionEvent::Disconnected));
        assert_eq!(
            session.children("/").await.unwrap_err(),
            CoordError::ConnectionLoss
        );
    }

    #[tokio::test]
    async fn test_disconnect_keeps_session_alive() {
        let ensemble = MemoryEnsemble::new();
        let (session, mut events) = open(&ensemble).await;
        let id = ensemble.session_ids()[0];

        assert!(ensemble.disconnect_session(id));
        assert_eq!(events.next().await, Some(SessionEvent::Disconnected));
        assert!(session.exists("/").await.unwrap());
    }
}
