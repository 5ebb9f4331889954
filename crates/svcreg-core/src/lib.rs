//! # svcreg-core
//!
//! Configuration and error types shared by the service registry crates.
//!
//! - **Errors**: `thiserror` enums for coordination failures, registry
//!   operation failures, and background watcher failures.
//! - **Configuration**: registry, logging, and metrics settings loaded from
//!   YAML files or merged with environment variables, with validation.
//!
//! ## Example
//!
//! ```
//! use svcreg_core::config::RegistryConfig;
//!
//! let config = RegistryConfig::new("zk1:2181,zk2:2181");
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod error;

pub use config::{
    AclPolicy, AppConfig, LogFormat, LoggingConfig, MetricsConfig, ReconnectConfig,
    RegistryConfig,
};
pub use error::{ConfigError, CoordError, CoordResult, RegistryError, Result, WatcherError};
