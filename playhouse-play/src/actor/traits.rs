//! The user-implemented actor trait.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::error::PlayError;
use playhouse_comm::packet::{Packet, Payload};

/// Per-player game logic bound to a stage.
///
/// Lifecycle: `on_create` once when the actor joins a stage, then
/// `on_authenticate` / `on_post_authenticate` on the first packet carrying
/// the configured authenticate msg id, then `on_destroy` when the actor
/// leaves. Every callback runs on the owning stage's mailbox, never
/// concurrently with other handlers of the same stage.
#[async_trait]
pub trait Actor: Send + Sync + 'static {
    /// Called once, before any packet reaches this actor.
    async fn on_create(&mut self) -> Result<(), PlayError> {
        Ok(())
    }

    /// Validate the client's credentials.
    ///
    /// Returning `Ok(reply)` authenticates the actor and sends `reply`
    /// with code 0; returning `Err` sends the error's code. Reconnects
    /// with a live authentication do not re-invoke this.
    async fn on_authenticate(&mut self, packet: &Packet) -> Result<Payload, PlayError>;

    /// Called after a successful `on_authenticate`, once the session
    /// binding is recorded.
    async fn on_post_authenticate(&mut self) {}

    /// Called when the actor is removed from its stage.
    async fn on_destroy(&mut self) {}
}

/// Factory building the user actor for a joining account.
pub type ActorFactory = Arc<dyn Fn(i64) -> Box<dyn Actor> + Send + Sync>;
