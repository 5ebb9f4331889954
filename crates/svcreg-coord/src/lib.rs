//! # svcreg-coord
//!
//! The seam between the registry and the coordination service it announces
//! into: a hierarchical, version-stamped key store with ephemeral and
//! sequential nodes and per-session connectivity events.
//!
//! - [`Coordinator`] dials the service and yields a [`Session`] plus its
//!   [`EventStream`].
//! - [`MemoryEnsemble`] is an in-process implementation with the same node
//!   semantics and hooks for injecting session loss.
//! - `ZkCoordinator` (feature `zookeeper`) talks to a real ZooKeeper ensemble.
//!
//! ## Example
//!
//! ```rust
//! use svcreg_coord::{Coordinator, CreateMode, MemoryEnsemble, SessionEvent};
//! use svcreg_core::AclPolicy;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ensemble = MemoryEnsemble::new();
//! let mut conn = ensemble.connect().await?;
//! assert_eq!(conn.events.next().await, Some(SessionEvent::Connected));
//!
//! conn.session
//!     .create("/services", b"", CreateMode::Persistent, AclPolicy::Open)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod session;

#[cfg(feature = "zookeeper")]
pub mod zookeeper;

pub use memory::{MemoryEnsemble, MemorySession};
pub use session::{
    Connection, Coordinator, CreateMode, EventSender, EventStream, Session, SessionEvent,
};

#[cfg(feature = "zookeeper")]
pub use zookeeper::{ZkCoordinator, ZkSession};
