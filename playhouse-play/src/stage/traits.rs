//! The user-implemented stage trait and the factory registry.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use super::context::StageContext;
use super::timer::TimerId;
use crate::actor::ActorFactory;
use crate::error::PlayError;
use playhouse_comm::error::CommError;
use playhouse_comm::packet::{Packet, Payload};
use playhouse_comm::system::DisconnectReason;

/// A game room's logic.
///
/// Every callback runs to completion on the stage's mailbox: for one
/// stage, no two callbacks ever interleave, even across await points.
/// Actors are addressed by `account_id`; the entries themselves live in
/// the [`StageContext`] registry.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Runs exactly once, before any other callback. `payload` is the
    /// creation payload supplied by the caller.
    async fn on_create(
        &mut self,
        ctx: &mut StageContext,
        payload: &Payload,
    ) -> Result<(), PlayError>;

    /// Runs immediately after a successful `on_create`.
    async fn on_post_create(&mut self, _ctx: &mut StageContext) -> Result<(), PlayError> {
        Ok(())
    }

    /// Admit (or reject) a joining actor.
    ///
    /// `Ok(reply)` admits the actor and sends `reply` with code 0; `Err`
    /// rejects it, the actor is not added, and the error's code is sent.
    async fn on_join_room(
        &mut self,
        ctx: &mut StageContext,
        account_id: i64,
        user_info: &Payload,
    ) -> Result<Payload, PlayError>;

    /// An actor is leaving: explicit leave, disconnect, or stage close.
    async fn on_leave_room(
        &mut self,
        ctx: &mut StageContext,
        account_id: i64,
        reason: DisconnectReason,
    );

    /// A user packet addressed to one of this stage's actors.
    async fn on_dispatch(
        &mut self,
        ctx: &mut StageContext,
        account_id: i64,
        packet: Packet,
    ) -> Result<(), PlayError>;

    /// Client socket state changed. Only called for authenticated actors.
    async fn on_connection_changed(
        &mut self,
        _ctx: &mut StageContext,
        _account_id: i64,
        _connected: bool,
        _reason: DisconnectReason,
    ) {
    }

    /// A stage timer fired; look the id up to know what to do.
    async fn on_timer(&mut self, _ctx: &mut StageContext, _timer_id: TimerId) {}

    /// One fixed-timestep tick of the stage's game loop.
    async fn on_game_loop_tick(&mut self, _ctx: &mut StageContext, _dt: Duration) {}
}

/// Factory building a user stage for a new `stage_id`.
pub type StageFactory = Arc<dyn Fn(i64) -> Box<dyn Stage> + Send + Sync>;

/// Factory tables built at bootstrap: `stage type name -> stage factory`
/// plus the actor factory shared by every stage.
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
    actor_factory: Option<ActorFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            actor_factory: None,
        }
    }

    /// Register a stage type by name.
    pub fn register_stage<F, S>(mut self, stage_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(i64) -> S + Send + Sync + 'static,
        S: Stage,
    {
        self.factories.insert(
            stage_type.into(),
            Arc::new(move |stage_id| Box::new(factory(stage_id)) as Box<dyn Stage>),
        );
        self
    }

    /// Register the actor factory.
    pub fn register_actor<F, A>(mut self, factory: F) -> Self
    where
        F: Fn(i64) -> A + Send + Sync + 'static,
        A: crate::actor::Actor,
    {
        self.actor_factory = Some(Arc::new(move |account_id| {
            Box::new(factory(account_id)) as Box<dyn crate::actor::Actor>
        }));
        self
    }

    pub fn stage_factory(&self, stage_type: &str) -> Option<StageFactory> {
        self.factories.get(stage_type).cloned()
    }

    pub fn stage_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub(crate) fn actor_factory(&self) -> Option<ActorFactory> {
        self.actor_factory.clone()
    }

    /// A play service cannot run without at least one stage type and an
    /// actor factory.
    pub fn validate(&self) -> Result<(), CommError> {
        if self.factories.is_empty() {
            return Err(CommError::Config(
                "no stage types registered".to_string(),
            ));
        }
        if self.actor_factory.is_none() {
            return Err(CommError::Config(
                "no actor factory registered".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
