//! Api service wiring and lifecycle.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tracing::info;

// Layer 3: Internal module imports
use crate::config::ApiConfig;
use crate::dispatcher::ApiDispatcher;
use crate::handler::HandlerRegistry;
use playhouse_comm::communicator::{Communicator, PacketDispatcher};
use playhouse_comm::discovery::ServerInfoProvider;
use playhouse_comm::error::CommError;

/// A running api server.
pub struct ApiService {
    communicator: Arc<Communicator>,
}

impl ApiService {
    /// Validate configuration, bind the router socket, and go live.
    pub async fn start(
        config: ApiConfig,
        provider: Arc<dyn ServerInfoProvider>,
        registry: HandlerRegistry,
    ) -> Result<Self, CommError> {
        config.validate()?;

        let communicator = Communicator::start(config.comm, provider).await?;
        let dispatcher = ApiDispatcher::new(Arc::new(registry));
        dispatcher.attach(Arc::clone(&communicator));
        communicator.register_dispatcher(dispatcher as Arc<dyn PacketDispatcher>);

        info!(
            nid = communicator.nid(),
            endpoint = communicator.local_endpoint(),
            "api service started"
        );
        Ok(Self { communicator })
    }

    pub fn communicator(&self) -> &Arc<Communicator> {
        &self.communicator
    }

    pub fn nid(&self) -> &str {
        self.communicator.nid()
    }

    pub async fn shutdown(&self) {
        self.communicator.shutdown().await;
        info!(nid = self.communicator.nid(), "api service stopped");
    }
}
