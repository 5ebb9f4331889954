//! Background session watcher.
//!
//! One task per client waits for the current session to break, reconnects
//! under the session write lock, and republishes every recorded entry on the
//! new session. Failed reconnects are retried with bounded exponential
//! backoff until the client is closed.

use crate::backoff::calculate_backoff;
use crate::client::{dial, publish, Shared};
use crate::store::Entry;
use std::sync::Arc;
use svcreg_coord::{EventStream, SessionEvent};
use svcreg_core::{CoordError, CoordResult, WatcherError};
use tracing::{debug, error, info, warn};

/// Where the watcher is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Blocked on the current session's event stream
    WaitingForEvent,
    /// Replacing the session
    Reconnecting,
    /// Republishing recorded entries on the new session
    Replaying,
    /// Sleeping after a failed reconnect
    Backoff,
    /// Stopped for good
    Closed,
}

/// Watcher state plus the number of sessions established so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStatus {
    pub state: WatcherState,
    pub generation: u64,
}

pub(crate) async fn run(shared: Arc<Shared>, events: EventStream) {
    let mut events = Some(events);
    let mut attempt: u32 = 0;

    loop {
        match events.as_mut() {
            Some(stream) => {
                shared.set_state(WatcherState::WaitingForEvent);
                tokio::select! {
                    _ = shared.closed.cancelled() => break,
                    event = wait_for_loss(stream) => {
                        match event {
                            Some(event) => warn!(%event, "Coordination session lost"),
                            None => warn!("Coordination session event stream ended"),
                        }
                    }
                }
            }
            None => {
                let delay = calculate_backoff(attempt.saturating_sub(1), &shared.config.reconnect);
                shared.set_state(WatcherState::Backoff);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                tokio::select! {
                    _ = shared.closed.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if shared.closed.is_cancelled() {
            break;
        }

        shared.set_state(WatcherState::Reconnecting);
        match shared.reconnect().await {
            Ok((stream, entries)) => {
                events = Some(stream);
                attempt = 0;
                shared.metrics.record_reconnect();
                shared.status.send_modify(|status| status.generation += 1);
                info!(entries = entries.len(), "Coordination session re-established");

                shared.set_state(WatcherState::Replaying);
                shared.replay(entries).await;
            }
            Err(_) if shared.closed.is_cancelled() => break,
            Err(source) => {
                events = None;
                attempt = attempt.saturating_add(1);
                shared.metrics.record_reconnect_failure();
                warn!(attempt, error = %source, "Reconnect failed");
                shared.report(WatcherError::Reconnect { attempt, source });
            }
        }
    }

    shared.set_state(WatcherState::Closed);
    debug!("Session watcher stopped");
}

/// Waits until the session reports anything other than `Connected`.
///
/// Returns `None` if the stream ended.
async fn wait_for_loss(events: &mut EventStream) -> Option<SessionEvent> {
    loop {
        match events.next().await {
            Some(SessionEvent::Connected) => debug!("Session reported connected again"),
            other => return other,
        }
    }
}

impl Shared {
    /// Swaps in a fresh session under the write lock.
    ///
    /// The replay snapshot is taken before the lock is released: entries
    /// recorded earlier were published on the old session, entries recorded
    /// later are published on the new one.
    async fn reconnect(&self) -> CoordResult<(EventStream, Vec<Arc<Entry>>)> {
        let mut slot = self.session.write().await;

        if self.closed.is_cancelled() {
            return Err(CoordError::Closed);
        }

        if let Some(stale) = slot.take() {
            if let Err(e) = stale.close().await {
                debug!(error = %e, "Closing stale session failed");
            }
        }

        let (session, events) = dial(self.coordinator.as_ref(), self.config.connect_timeout()).await?;
        *slot = Some(session);

        Ok((events, self.entries.snapshot()))
    }

    /// Republishes `entries`; a failure is reported and replay moves on.
    async fn replay(&self, entries: Vec<Arc<Entry>>) {
        let total = entries.len();
        let mut failed = 0usize;

        for entry in entries {
            if self.closed.is_cancelled() {
                debug!("Client closed during replay");
                return;
            }

            let session = self.session.read().await;
            let result = publish(session.as_ref(), &entry, self.config.acl).await;
            drop(session);

            if let Err(source) = result {
                failed += 1;
                self.metrics.record_replay_failure();
                error!(entry = %entry, error = %source, "Entry could not be reregistered");
                self.report(WatcherError::Replay {
                    service: entry.service.clone(),
                    protocol: entry.protocol.clone(),
                    address: entry.address.clone(),
                    source,
                });
            }
        }

        info!(total, failed, "Replayed registrations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RegistryClient;
    use std::time::Duration;
    use svcreg_coord::MemoryEnsemble;
    use svcreg_core::{ReconnectConfig, RegistryConfig};

    fn fast_config() -> RegistryConfig {
        RegistryConfig {
            reconnect: ReconnectConfig {
                initial_backoff_ms: 10,
                max_backoff_ms: 40,
                backoff_multiplier: 2.0,
            },
            ..RegistryConfig::new("memory")
        }
    }

    #[tokio::test]
    async fn test_reconnect_replays_entries() {
        let ensemble = MemoryEnsemble::new();
        let registry = RegistryClient::builder(Arc::new(ensemble.clone()))
            .config(fast_config())
            .open()
            .await
            .unwrap();
        registry.register("files", "http", "a").await.unwrap();

        let mut status = registry.watcher_status();
        assert!(ensemble.expire_all() > 0);

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.generation == 2 && s.state == WatcherState::WaitingForEvent),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(registry.get("files", "http").await.unwrap(), vec!["a"]);
        assert_eq!(registry.entry_count(), 1);
        assert_eq!(registry.metrics().reconnects, 1);

        registry.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_connected_event_is_ignored() {
        let (tx, mut events) = EventStream::channel();
        tx.send(SessionEvent::Connected).unwrap();
        tx.send(SessionEvent::Connected).unwrap();
        tx.send(SessionEvent::Disconnected).unwrap();

        assert_eq!(
            wait_for_loss(&mut events).await,
            Some(SessionEvent::Disconnected)
        );

        drop(tx);
        assert_eq!(wait_for_loss(&mut events).await, None);
    }
}
