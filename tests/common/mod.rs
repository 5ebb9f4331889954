//! Common test utilities and helpers for integration tests

use std::sync::Arc;
use std::time::Duration;
use svcreg_coord::MemoryEnsemble;
use svcreg_core::{ReconnectConfig, RegistryConfig};
use svcreg_registry::{RegistryClient, WatcherStatus};
use tokio::sync::watch;

/// Registry settings with millisecond backoff so recovery tests finish quickly
pub fn fast_config() -> RegistryConfig {
    RegistryConfig {
        reconnect: ReconnectConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_multiplier: 2.0,
        },
        ..RegistryConfig::new("memory")
    }
}

/// Open a client on the given ensemble
pub async fn open_client(ensemble: &MemoryEnsemble) -> RegistryClient {
    RegistryClient::builder(Arc::new(ensemble.clone()))
        .config(fast_config())
        .open()
        .await
        .expect("Failed to open registry client")
}

/// Wait (bounded) until the watcher status satisfies `condition`
pub async fn wait_for_status<F>(status: &mut watch::Receiver<WatcherStatus>, condition: F)
where
    F: FnMut(&WatcherStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(condition))
        .await
        .expect("Timed out waiting for session watcher")
        .expect("Session watcher status channel closed");
}
