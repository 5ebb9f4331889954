//! Service Registry Client
//!
//! Announces and discovers network addresses for (service, protocol) pairs
//! on a coordination service:
//! - Every registration is an ephemeral sequential node under
//!   `/services/<service>/<protocol>/`
//! - Lookups list the children of that node and return their payloads
//! - A background watcher re-establishes lost sessions and republishes every
//!   registration the client has made
//!
//! # Example
//!
//! ```no_run
//! use svcreg_core::RegistryConfig;
//! use svcreg_registry::RegistryClient;
//!
//! # #[cfg(feature = "zookeeper")]
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = RegistryClient::open(RegistryConfig::new("localhost:2181")).await?;
//!
//!     registry.register("files", "http", "10.0.0.1:8080").await?;
//!     let addresses = registry.get("files", "http").await?;
//!
//!     registry.close().await?;
//!     Ok(())
//! }
//! # #[cfg(not(feature = "zookeeper"))]
//! # fn main() {}
//! ```

pub mod backoff;
pub mod client;
pub mod metrics;
pub mod path;
pub mod store;
pub mod watcher;

pub use backoff::calculate_backoff;
pub use client::{RegistryBuilder, RegistryClient, ServiceRegistry, WatcherErrorHook};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use path::{build_path, ensure_path, path_parts, validate_segment, SERVICES_ROOT};
pub use store::{Entry, EntryStore};
pub use watcher::{WatcherState, WatcherStatus};
