//! Play service wiring and lifecycle.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use tracing::{info, warn};

// Layer 3: Internal module imports
use crate::config::PlayConfig;
use crate::dispatch::PlayDispatcher;
use crate::stage::StageRegistry;
use playhouse_comm::communicator::{Communicator, PacketDispatcher};
use playhouse_comm::discovery::ServerInfoProvider;
use playhouse_comm::error::CommError;

/// How long shutdown waits for stages to process their `Close`.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running play server: communicator plus stage dispatcher.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = StageRegistry::new()
///     .register_stage("ChatStage", |stage_id| ChatStage::new(stage_id))
///     .register_actor(|account_id| ChatActor::new(account_id));
/// let service = PlayService::start(config, provider, registry).await?;
/// ```
pub struct PlayService {
    communicator: Arc<Communicator>,
    dispatcher: Arc<PlayDispatcher>,
}

impl PlayService {
    /// Validate configuration, bind the router socket, and go live.
    ///
    /// Fatal errors carry an exit code: 1 for configuration, 2 for bind.
    pub async fn start(
        config: PlayConfig,
        provider: Arc<dyn ServerInfoProvider>,
        registry: StageRegistry,
    ) -> Result<Self, CommError> {
        config.validate()?;
        registry.validate()?;

        let communicator = Communicator::start(config.comm.clone(), provider).await?;
        let dispatcher = PlayDispatcher::new(Arc::new(config), Arc::new(registry));
        dispatcher.attach(Arc::clone(&communicator));
        communicator
            .register_dispatcher(Arc::clone(&dispatcher) as Arc<dyn PacketDispatcher>);

        info!(
            nid = communicator.nid(),
            endpoint = communicator.local_endpoint(),
            "play service started"
        );
        Ok(Self {
            communicator,
            dispatcher,
        })
    }

    pub fn communicator(&self) -> &Arc<Communicator> {
        &self.communicator
    }

    pub fn dispatcher(&self) -> &Arc<PlayDispatcher> {
        &self.dispatcher
    }

    pub fn nid(&self) -> &str {
        self.communicator.nid()
    }

    /// Close every stage, drain their mailboxes, then leave the mesh.
    pub async fn shutdown(&self) {
        self.dispatcher.close_all();

        let deadline = Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while !self.dispatcher.all_closed() {
            if Instant::now() >= deadline {
                warn!("shutdown drain timed out; abandoning unflushed stages");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.communicator.shutdown().await;
        info!(nid = self.communicator.nid(), "play service stopped");
    }
}
