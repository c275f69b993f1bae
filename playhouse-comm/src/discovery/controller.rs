//! Periodic heartbeat publishing and refresh of the server info center.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

// Layer 3: Internal module imports
use super::center::{ServerChange, ServerInfoCenter};
use super::server_info::ServerInfo;
use crate::error::CommError;

/// Pluggable discovery backend.
///
/// Implementations publish this server's heartbeat and return the full
/// active list. Backends are free to be a shared database table, a
/// coordination service, or a static list in tests; the core only needs
/// this one call.
#[async_trait]
pub trait ServerInfoProvider: Send + Sync + 'static {
    async fn update_server_info(
        &self,
        self_info: ServerInfo,
    ) -> Result<Vec<ServerInfo>, CommError>;
}

/// Drives the refresh loop: heartbeat out, full list in, diff + TTL sweep.
///
/// Emits batched [`ServerChange`]s on the channel returned by
/// [`DiscoveryController::start`]; the communicator consumes them to open
/// and close peer links.
pub struct DiscoveryController {
    handle: JoinHandle<()>,
}

impl DiscoveryController {
    pub fn start(
        provider: Arc<dyn ServerInfoProvider>,
        center: Arc<ServerInfoCenter>,
        mut self_info: ServerInfo,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<Vec<ServerChange>>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self_info.touch();
                match provider.update_server_info(self_info.clone()).await {
                    Ok(list) => {
                        let mut changes = center.update(list);
                        changes.extend(center.evict_expired());
                        if !changes.is_empty() && tx.send(changes).await.is_err() {
                            // Consumer is gone; the mesh is shutting down.
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "discovery refresh failed; keeping cached list");
                    }
                }
            }
        });
        (Self { handle }, rx)
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for DiscoveryController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::discovery::ServiceType;
    use parking_lot::Mutex;

    struct StaticProvider {
        list: Mutex<Vec<ServerInfo>>,
    }

    #[async_trait]
    impl ServerInfoProvider for StaticProvider {
        async fn update_server_info(
            &self,
            _self_info: ServerInfo,
        ) -> Result<Vec<ServerInfo>, CommError> {
            Ok(self.list.lock().clone())
        }
    }

    #[tokio::test]
    async fn test_changes_flow_to_subscriber() {
        let provider = Arc::new(StaticProvider {
            list: Mutex::new(vec![ServerInfo::new(
                ServiceType::Play,
                1,
                "play-1",
                "127.0.0.1:7001",
            )]),
        });
        let center = Arc::new(ServerInfoCenter::new(Duration::from_secs(10)));
        let self_info = ServerInfo::new(ServiceType::Api, 2, "api-1", "127.0.0.1:7002");

        let (controller, mut rx) =
            DiscoveryController::start(provider, Arc::clone(&center), self_info, Duration::from_millis(20));

        let changes = rx.recv().await.unwrap();
        assert!(matches!(changes[0], ServerChange::Added(_)));
        assert_eq!(center.len(), 1);

        controller.stop();
    }

    #[tokio::test]
    async fn test_provider_error_keeps_cache() {
        struct FailingProvider;

        #[async_trait]
        impl ServerInfoProvider for FailingProvider {
            async fn update_server_info(
                &self,
                _self_info: ServerInfo,
            ) -> Result<Vec<ServerInfo>, CommError> {
                Err(CommError::Closed("backend offline".to_string()))
            }
        }

        let center = Arc::new(ServerInfoCenter::new(Duration::from_secs(10)));
        center.update(vec![ServerInfo::new(
            ServiceType::Play,
            1,
            "play-1",
            "127.0.0.1:7001",
        )]);

        let self_info = ServerInfo::new(ServiceType::Api, 2, "api-1", "127.0.0.1:7002");
        let (controller, _rx) = DiscoveryController::start(
            Arc::new(FailingProvider),
            Arc::clone(&center),
            self_info,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(center.len(), 1);
        controller.stop();
    }
}
