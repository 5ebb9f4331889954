use async_trait::async_trait;
use std::sync::Arc;
use svcreg_core::{AclPolicy, CoordResult};
use tokio::sync::mpsc;

/// Connectivity events reported for a coordination session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is established and usable
    Connected,
    /// The connection dropped; the session may still be alive server-side
    Disconnected,
    /// The server expired the session and dropped its ephemeral nodes
    Expired,
    /// Authentication was rejected
    AuthFailed,
    /// The session was closed by its owner
    Closed,
}

impl SessionEvent {
    /// Returns true for events after which no further events will arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Expired | SessionEvent::AuthFailed | SessionEvent::Closed
        )
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Connected => write!(f, "Connected"),
            SessionEvent::Disconnected => write!(f, "Disconnected"),
            SessionEvent::Expired => write!(f, "Expired"),
            SessionEvent::AuthFailed => write!(f, "AuthFailed"),
            SessionEvent::Closed => write!(f, "Closed"),
        }
    }
}

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Removed when the creating session ends
    Ephemeral,
    /// Persistent, with a sequence suffix appended to the name
    PersistentSequential,
    /// Ephemeral, with a sequence suffix appended to the name
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Stream of [`SessionEvent`]s for one session.
///
/// Exactly one consumer owns the stream. It ends (`next` returns `None`) once
/// the backend drops its sending half.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Sending half used by backends to publish session events
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

impl EventStream {
    /// Creates a connected sender/stream pair
    pub fn channel() -> (EventSender, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, EventStream { rx })
    }

    /// Waits for the next event
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

/// A freshly dialed session together with its event stream
pub struct Connection {
    pub session: Arc<dyn Session>,
    pub events: EventStream,
}

/// Dials the coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Dial the service and return the new session with its event stream.
    ///
    /// The first event on the stream tells whether the session was
    /// established; dialing itself does not wait for it.
    async fn connect(&self) -> CoordResult<Connection>;

    /// Server list this coordinator dials, for error context
    fn servers(&self) -> &str;
}

/// Operations on one live coordination session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Create a node and return its final path
    ///
    /// For sequential modes the returned path carries the generated suffix.
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: AclPolicy,
    ) -> CoordResult<String>;

    /// List the names of a node's children
    async fn children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Read a node's data
    async fn read(&self, path: &str) -> CoordResult<Vec<u8>>;

    /// Check whether a node exists
    async fn exists(&self, path: &str) -> CoordResult<bool>;

    /// Close the session; its ephemeral nodes go away with it
    ///
    /// Closing an already closed session succeeds.
    async fn close(&self) -> CoordResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(SessionEvent::Expired.is_terminal());
        assert!(SessionEvent::Closed.is_terminal());
        assert!(!SessionEvent::Connected.is_terminal());
        assert!(!SessionEvent::Disconnected.is_terminal());
    }

    #[test]
    fn test_create_mode_flags() {
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
    }

    #[tokio::test]
    async fn test_event_stream_ends_when_sender_dropped() {
        let (tx, mut events) = EventStream::channel();
        tx.send(SessionEvent::Connected).unwrap();
        drop(tx);

        assert_eq!(events.next().await, Some(SessionEvent::Connected));
        assert_eq!(events.next().await, None);
    }
}
