//! The API surface handed to stage callbacks.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tracing::warn;

// Layer 3: Internal module imports
use super::event_loop::Postbox;
use super::game_loop::{GameLoopConfig, GameLoopDriver};
use super::message::StageMessage;
use super::timer::{TimerId, TimerSet};
use crate::actor::{ActorEntry, ActorFactory};
use crate::config::PlayConfig;
use crate::error::PlayError;
use playhouse_comm::communicator::Communicator;
use playhouse_comm::discovery::ServiceType;
use playhouse_comm::packet::{Packet, Payload, RouteHeader};
use playhouse_comm::request::ReplyFuture;
use playhouse_comm::system::DisconnectReason;

/// Everything a stage callback may touch besides its own state: the actor
/// registry, timers, the game loop, and the mesh.
///
/// The context owns its actors; handlers refer to them by `account_id`.
pub struct StageContext {
    stage_id: i64,
    stage_type: String,
    comm: Arc<Communicator>,
    config: Arc<PlayConfig>,
    postbox: Postbox,
    pub(crate) actors: HashMap<i64, ActorEntry>,
    pub(crate) timers: TimerSet,
    pub(crate) game_loop: Option<GameLoopDriver>,
    pub(crate) last_timestep: Duration,
    pub(crate) actor_factory: ActorFactory,
    pub(crate) inflight: Vec<(String, u16)>,
    current_request: Option<RouteHeader>,
    replied: bool,
}

impl StageContext {
    pub(crate) fn new(
        stage_id: i64,
        stage_type: String,
        comm: Arc<Communicator>,
        config: Arc<PlayConfig>,
        actor_factory: ActorFactory,
        postbox: Postbox,
    ) -> Self {
        Self {
            stage_id,
            stage_type,
            comm,
            config,
            postbox,
            actors: HashMap::new(),
            timers: TimerSet::new(),
            game_loop: None,
            last_timestep: Duration::ZERO,
            actor_factory,
            inflight: Vec::new(),
            current_request: None,
            replied: false,
        }
    }

    pub fn stage_id(&self) -> i64 {
        self.stage_id
    }

    pub fn stage_type(&self) -> &str {
        &self.stage_type
    }

    pub fn actor(&self, account_id: i64) -> Option<&ActorEntry> {
        self.actors.get(&account_id)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn actor_ids(&self) -> Vec<i64> {
        self.actors.keys().copied().collect()
    }

    /// Fire after `initial_delay`, then every `period`, until canceled.
    pub fn add_repeat_timer(&mut self, initial_delay: Duration, period: Duration) -> TimerId {
        self.timers
            .add_repeat(self.postbox.clone(), initial_delay, period)
    }

    /// Fire `count` times, `period` apart, after `initial_delay`.
    pub fn add_count_timer(
        &mut self,
        initial_delay: Duration,
        count: u32,
        period: Duration,
    ) -> TimerId {
        self.timers
            .add_count(self.postbox.clone(), initial_delay, count, period)
    }

    /// Cancel a timer. Idempotent.
    pub fn cancel_timer(&mut self, timer_id: TimerId) {
        self.timers.cancel(timer_id);
    }

    /// Start (or restart) the fixed-timestep game loop.
    ///
    /// Fails synchronously when the configuration is invalid.
    pub fn start_game_loop(&mut self, config: GameLoopConfig) -> Result<(), PlayError> {
        config.validate()?;
        if let Some(previous) = self.game_loop.take() {
            previous.stop();
        }
        self.last_timestep = config.fixed_timestep;
        self.game_loop = Some(GameLoopDriver::start(self.postbox.clone(), config));
        Ok(())
    }

    /// Stop the game loop. Ticks already enqueued still run.
    pub fn stop_game_loop(&mut self) {
        if let Some(driver) = self.game_loop.take() {
            driver.stop();
        }
    }

    pub fn is_game_loop_running(&self) -> bool {
        self.game_loop.is_some()
    }

    /// Push a packet to one actor's client.
    pub async fn send_to_actor(&self, account_id: i64, packet: Packet) -> Result<(), PlayError> {
        let entry = self
            .actors
            .get(&account_id)
            .ok_or_else(|| PlayError::Handler(format!("actor {account_id} not on stage")))?;
        self.send_to_session(entry, packet).await
    }

    /// Push a packet to every connected, authenticated actor, optionally
    /// excluding one account.
    pub async fn broadcast(&self, packet: Packet, exclude: Option<i64>) {
        for entry in self.actors.values() {
            if Some(entry.account_id()) == exclude {
                continue;
            }
            if !entry.is_connected() || !entry.is_authenticated() {
                continue;
            }
            if let Err(error) = self.send_to_session(entry, packet.clone()).await {
                warn!(
                    %error,
                    account_id = entry.account_id(),
                    "broadcast delivery failed"
                );
            }
        }
    }

    /// Request another server; the reply resolves the returned future.
    ///
    /// In-flight requests are failed with `ServerNotFound` when the stage
    /// closes.
    pub async fn request(
        &mut self,
        to_nid: impl Into<String>,
        msg_id: impl Into<String>,
        payload: Payload,
    ) -> Result<ReplyFuture, PlayError> {
        let to_nid = to_nid.into();
        let service_type = self
            .comm
            .center()
            .find_by_nid(&to_nid)
            .map(|info| info.service_type)
            .unwrap_or(ServiceType::Play);
        let mut header =
            RouteHeader::to(service_type, nid_service_id(&to_nid), to_nid, msg_id);
        header.stage_id = self.stage_id;
        header.flags.is_backend = true;
        let future = self.comm.request(header, payload).await?;
        self.inflight.push((future.peer().to_string(), future.seq()));
        Ok(future)
    }

    /// Ask the runtime to close this stage after the current handler.
    pub fn close_stage(&self) {
        self.postbox.post(StageMessage::Close { header: None });
    }

    /// Ask the runtime to detach an actor after the current handler.
    pub fn leave_actor(&self, account_id: i64, reason: DisconnectReason) {
        self.postbox.post(StageMessage::Leave {
            account_id,
            reason,
            header: None,
        });
    }

    pub(crate) async fn send_to_session(
        &self,
        entry: &ActorEntry,
        packet: Packet,
    ) -> Result<(), PlayError> {
        let mut header = RouteHeader::to(
            ServiceType::Session,
            nid_service_id(entry.session_nid()),
            entry.session_nid(),
            packet.msg_id(),
        );
        header.stage_id = self.stage_id;
        header.account_id = entry.account_id();
        header.sid = entry.sid();
        header.msg_seq = packet.msg_seq();
        header.error_code = packet.error_code();
        self.comm.send(header, packet.into_payload()).await?;
        Ok(())
    }

    /// Answer the request currently being dispatched.
    ///
    /// Valid only inside `on_dispatch` for a request packet; the runtime
    /// auto-replies success when the handler never calls this.
    pub async fn reply(&mut self, packet: Packet) -> Result<(), PlayError> {
        let header = self
            .current_request
            .clone()
            .ok_or_else(|| PlayError::Handler("no request to reply to".to_string()))?;
        let msg_id = packet.msg_id().to_string();
        let error_code = packet.error_code();
        self.comm
            .reply_to(&header, msg_id, error_code, packet.into_payload())
            .await?;
        self.replied = true;
        Ok(())
    }

    pub(crate) fn begin_request(&mut self, header: &RouteHeader) {
        self.current_request = header.is_request().then(|| header.clone());
        self.replied = false;
    }

    /// Returns whether the handler replied on its own.
    pub(crate) fn end_request(&mut self) -> bool {
        self.current_request = None;
        std::mem::replace(&mut self.replied, false)
    }

    pub(crate) fn comm(&self) -> &Arc<Communicator> {
        &self.comm
    }

    pub(crate) fn config(&self) -> &Arc<PlayConfig> {
        &self.config
    }
}

/// Service id embedded in a nid (`"{service_id}:{server_id}"`).
pub(crate) fn nid_service_id(nid: &str) -> u16 {
    nid.split(':')
        .next()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}
