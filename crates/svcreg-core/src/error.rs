//! Error types for the service registry.
//!
//! Errors are layered: [`CoordError`] describes what went wrong talking to the
//! coordination service, [`RegistryError`] says which registry operation failed
//! and carries the coordination error as its source, and [`WatcherError`]
//! covers the background session watcher, whose failures are reported but
//! never returned to foreground callers.

use thiserror::Error;

/// Result type alias using RegistryError as the error type.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Result type alias for coordination-service calls.
pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// Errors surfaced to callers of the registry client.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Initial dial or wait-for-connect failed
    #[error("Registry connection to {servers} failed: {source}")]
    Connection {
        servers: String,
        #[source]
        source: CoordError,
    },

    /// Ensuring the namespace for a registration failed
    #[error("Registry register ensure path {path} failed: {source}")]
    Path {
        path: String,
        #[source]
        source: CoordError,
    },

    /// Creating the ephemeral node for a registration failed
    #[error("Registry register create under {path} failed: {source}")]
    Publish {
        path: String,
        #[source]
        source: CoordError,
    },

    /// Reading children or values during a lookup failed
    #[error("Registry get {path} failed: {source}")]
    Lookup {
        path: String,
        #[source]
        source: CoordError,
    },

    /// Service or protocol name cannot be used as a path segment
    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    /// Closing the session failed
    #[error("Registry close failed: {0}")]
    Close(#[source] CoordError),

    /// The client has been closed
    #[error("Registry client is closed")]
    Closed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RegistryError {
    /// Returns the coordination error behind this failure, if any.
    pub fn coord_error(&self) -> Option<&CoordError> {
        match self {
            Self::Connection { source, .. }
            | Self::Path { source, .. }
            | Self::Publish { source, .. }
            | Self::Lookup { source, .. }
            | Self::Close(source) => Some(source),
            _ => None,
        }
    }
}

/// Errors returned by a coordination-service session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// The node (or its parent) does not exist
    #[error("no node: {path}")]
    NoNode { path: String },

    /// The node already exists
    #[error("node exists: {path}")]
    NodeExists { path: String },

    /// Ephemeral nodes cannot have children
    #[error("ephemeral node {path} cannot have children")]
    NoChildrenForEphemerals { path: String },

    /// The connection to the service was lost
    #[error("connection loss")]
    ConnectionLoss,

    /// The session expired on the server side
    #[error("session expired")]
    SessionExpired,

    /// The session handle has been closed
    #[error("session closed")]
    Closed,

    /// Dialing the service failed
    #[error("connect to {servers} failed: {reason}")]
    ConnectFailed { servers: String, reason: String },

    /// An operation did not complete in time
    #[error("timed out waiting for {what}")]
    Timeout { what: String },

    /// Any other backend failure
    #[error("{0}")]
    Other(String),
}

impl CoordError {
    /// Creates a no-node error.
    pub fn no_node(path: impl Into<String>) -> Self {
        Self::NoNode { path: path.into() }
    }

    /// Creates a node-exists error.
    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::NodeExists { path: path.into() }
    }

    /// Creates a connect failure.
    pub fn connect_failed(servers: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            servers: servers.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    pub fn is_no_node(&self) -> bool {
        matches!(self, Self::NoNode { .. })
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, Self::NodeExists { .. })
    }

    /// Returns true if the error means the session itself is unusable.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLoss | Self::SessionExpired | Self::Closed
        )
    }
}

/// Failures inside the session watcher.
///
/// These never reach foreground callers; they are logged and handed to the
/// optional error hook installed on the client.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// A recorded entry could not be republished after reconnecting
    #[error("entry {service}/{protocol} -> {address} could not be reregistered: {source}")]
    Replay {
        service: String,
        protocol: String,
        address: String,
        #[source]
        source: RegistryError,
    },

    /// A reconnect attempt failed
    #[error("reconnect attempt {attempt} failed: {source}")]
    Reconnect {
        attempt: u32,
        #[source]
        source: CoordError,
    },
}

/// Configuration-related errors.
///
/// These errors occur when loading, parsing, or validating configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_registry_error_keeps_source() {
        let err = RegistryError::Publish {
            path: "/services/files/http/".to_string(),
            source: CoordError::SessionExpired,
        };

        assert_eq!(
            err.to_string(),
            "Registry register create under /services/files/http/ failed: session expired"
        );
        assert_eq!(err.coord_error(), Some(&CoordError::SessionExpired));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_coord_error_helpers() {
        assert!(CoordError::no_node("/services").is_no_node());
        assert!(CoordError::node_exists("/services").is_node_exists());
        assert!(CoordError::ConnectionLoss.is_session_lost());
        assert!(!CoordError::no_node("/x").is_session_lost());
    }

    #[test]
    fn test_closed_has_no_coord_error() {
        assert!(RegistryError::Closed.coord_error().is_none());
    }

    #[test]
    fn test_watcher_error_display() {
        let err = WatcherError::Reconnect {
            attempt: 3,
            source: CoordError::connect_failed("zk1:2181", "refused"),
        };
        assert_eq!(
            err.to_string(),
            "reconnect attempt 3 failed: connect to zk1:2181 failed: refused"
        );
    }
}
