//! Per-stage mailbox execution.
//!
//! A stage has no thread of its own. Messages go into a FIFO queue; the
//! first enqueuer to flip the `is_running` claim flag spawns a worker that
//! drains the queue one message at a time, running each user callback to
//! completion. Await points inside a callback suspend the worker but keep
//! the claim, so no second worker can interleave on the same stage. When
//! the queue looks empty the worker releases the claim and re-checks,
//! which closes the lost-wakeup window against concurrent enqueuers.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use parking_lot::Mutex;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::context::{nid_service_id, StageContext};
use super::message::StageMessage;
use super::traits::Stage;
use crate::actor::{ActorEntry, ActorFactory};
use crate::config::PlayConfig;
use crate::error::PlayError;
use playhouse_comm::communicator::Communicator;
use playhouse_comm::discovery::ServiceType;
use playhouse_comm::error::{CommError, ErrorCode};
use playhouse_comm::packet::{Packet, Payload, RouteHeader};
use playhouse_comm::system::{
    self, BindSessionMsg, DisconnectReason, KickSessionMsg, BIND_SESSION_ID, CLOSE_STAGE_RES_ID,
    JOIN_STAGE_RES_ID, KICK_SESSION_ID, LEAVE_STAGE_RES_ID,
};

/// Weak posting handle given to timers and the game loop driver.
///
/// Returns `false` once the stage is gone or closed, which is the signal
/// for the periodic tasks to stop themselves.
#[derive(Clone)]
pub(crate) struct Postbox(Weak<StageCore>);

impl Postbox {
    pub(crate) fn post(&self, msg: StageMessage) -> bool {
        match self.0.upgrade() {
            Some(core) => core.post(msg),
            None => false,
        }
    }
}

/// Shared handle to one stage's mailbox.
#[derive(Clone)]
pub struct StageCell {
    core: Arc<StageCore>,
}

impl StageCell {
    /// Build the stage. Nothing runs until the first message is posted;
    /// the dispatcher posts `Create` immediately after.
    pub(crate) fn new(
        stage_id: i64,
        stage_type: String,
        user: Box<dyn Stage>,
        comm: Arc<Communicator>,
        config: Arc<PlayConfig>,
        actor_factory: ActorFactory,
    ) -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<StageCore>| {
            let ctx = StageContext::new(
                stage_id,
                stage_type,
                comm,
                config,
                actor_factory,
                Postbox(weak.clone()),
            );
            StageCore {
                stage_id,
                queue: Mutex::new(VecDeque::new()),
                is_running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                runtime: tokio::sync::Mutex::new(StageRuntime {
                    user,
                    ctx,
                    created: false,
                }),
            }
        });
        Self { core }
    }

    pub fn stage_id(&self) -> i64 {
        self.core.stage_id
    }

    /// Enqueue a message. Returns `false` when the stage is closed, in
    /// which case the caller owes the origin a `StageNotFound` reply.
    pub(crate) fn post(&self, msg: StageMessage) -> bool {
        self.core.post(msg)
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }
}

pub(crate) struct StageCore {
    stage_id: i64,
    queue: Mutex<VecDeque<StageMessage>>,
    is_running: AtomicBool,
    closed: AtomicBool,
    runtime: tokio::sync::Mutex<StageRuntime>,
}

impl StageCore {
    fn post(self: &Arc<Self>, msg: StageMessage) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.queue.lock().push_back(msg);
        self.try_claim();
        true
    }

    /// CAS the claim flag; the winner schedules a drain worker.
    fn try_claim(self: &Arc<Self>) {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let core = Arc::clone(self);
            tokio::spawn(async move { core.drain().await });
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            loop {
                let msg = self.queue.lock().pop_front();
                let Some(msg) = msg else { break };
                self.process(msg).await;
            }

            self.is_running.store(false, Ordering::Release);
            // Double-check: an enqueue may have raced the release.
            if self.queue.lock().is_empty() {
                return;
            }
            if self
                .is_running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Someone else claimed the new work.
                return;
            }
        }
    }

    async fn process(&self, msg: StageMessage) {
        let mut runtime = self.runtime.lock().await;

        if self.closed.load(Ordering::Acquire) {
            // Terminal: messages queued behind `Close` still owe replies.
            if let Some(header) = message_header(&msg) {
                if header.is_request() {
                    runtime
                        .ctx
                        .comm()
                        .reply_error(header, ErrorCode::StageNotFound.as_u16())
                        .await;
                }
            }
            return;
        }

        match msg {
            StageMessage::Create { payload, header } => {
                if !runtime.handle_create(payload, header).await {
                    self.closed.store(true, Ordering::Release);
                }
            }
            StageMessage::Join {
                account_id,
                sid,
                session_nid,
                user_info,
                header,
            } => {
                runtime
                    .handle_join(account_id, sid, session_nid, user_info, header)
                    .await;
            }
            StageMessage::Leave {
                account_id,
                reason,
                header,
            } => {
                runtime.handle_leave(account_id, reason, header).await;
            }
            StageMessage::Dispatch {
                account_id,
                packet,
                header,
            } => {
                runtime.handle_dispatch(account_id, packet, header).await;
            }
            StageMessage::ConnectionChanged {
                account_id,
                connected,
                reason,
            } => {
                runtime
                    .handle_connection_changed(account_id, connected, reason)
                    .await;
            }
            StageMessage::Timer(timer_id) => {
                runtime.handle_timer(timer_id).await;
            }
            StageMessage::GameLoopTick => {
                runtime.handle_tick().await;
            }
            StageMessage::Close { header } => {
                runtime.handle_close(header).await;
                self.closed.store(true, Ordering::Release);
                debug!(stage_id = self.stage_id, "stage closed");
            }
        }
    }
}

struct StageRuntime {
    user: Box<dyn Stage>,
    ctx: StageContext,
    created: bool,
}

impl StageRuntime {
    /// Returns `false` when creation failed and the stage must die.
    async fn handle_create(&mut self, payload: Payload, header: Option<RouteHeader>) -> bool {
        if self.created {
            warn!(stage_id = self.ctx.stage_id(), "duplicate create ignored");
            return true;
        }

        let mut result = self.user.on_create(&mut self.ctx, &payload).await;
        if result.is_ok() {
            result = self.user.on_post_create(&mut self.ctx).await;
        }

        match result {
            Ok(()) => {
                self.created = true;
                if let Some(header) = &header {
                    self.reply(header, system::CREATE_STAGE_RES_ID, 0, Payload::empty())
                        .await;
                }
                true
            }
            Err(error) => {
                warn!(stage_id = self.ctx.stage_id(), %error, "stage create failed");
                let code = coded_or(&error, ErrorCode::StageCreationFailed);
                if let Some(header) = &header {
                    self.reply(header, system::CREATE_STAGE_RES_ID, code, Payload::empty())
                        .await;
                }
                false
            }
        }
    }

    async fn handle_join(
        &mut self,
        account_id: i64,
        sid: u64,
        session_nid: String,
        user_info: Payload,
        header: RouteHeader,
    ) {
        if account_id == 0 {
            self.reply(
                &header,
                JOIN_STAGE_RES_ID,
                ErrorCode::InvalidAccountId.as_u16(),
                Payload::empty(),
            )
            .await;
            return;
        }

        if self.ctx.actors.contains_key(&account_id) {
            self.handle_rejoin(account_id, sid, session_nid, header).await;
            return;
        }

        let mut user_actor = (self.ctx.actor_factory)(account_id);
        if let Err(error) = user_actor.on_create().await {
            warn!(account_id, %error, "actor create failed");
            self.reply(
                &header,
                JOIN_STAGE_RES_ID,
                coded_or(&error, ErrorCode::JoinStageFailed),
                Payload::empty(),
            )
            .await;
            return;
        }

        self.ctx.actors.insert(
            account_id,
            ActorEntry::new(account_id, sid, session_nid.clone(), user_actor),
        );

        let join_result = self
            .user
            .on_join_room(&mut self.ctx, account_id, &user_info)
            .await;
        match join_result {
            Ok(reply_payload) => {
                self.send_bind(account_id, sid, &session_nid).await;
                self.reply(&header, JOIN_STAGE_RES_ID, 0, reply_payload).await;
            }
            Err(error) => {
                if let Some(mut entry) = self.ctx.actors.remove(&account_id) {
                    entry.user.on_destroy().await;
                }
                self.reply(
                    &header,
                    JOIN_STAGE_RES_ID,
                    coded_or(&error, ErrorCode::JoinStageFailed),
                    Payload::empty(),
                )
                .await;
            }
        }
    }

    /// Reconnection: the same account joins while still bound. The old
    /// session is preempted with `Replaced`; the actor keeps its identity
    /// and authentication, so `on_authenticate` is not re-run.
    async fn handle_rejoin(
        &mut self,
        account_id: i64,
        sid: u64,
        session_nid: String,
        header: RouteHeader,
    ) {
        let (old_sid, old_nid, was_connected, authed) = match self.ctx.actors.get(&account_id) {
            Some(entry) => (
                entry.sid(),
                entry.session_nid().to_string(),
                entry.is_connected(),
                entry.is_authenticated(),
            ),
            None => return,
        };

        let preempting = old_sid != sid || old_nid != session_nid;
        if preempting && was_connected {
            self.send_kick(&old_nid, old_sid, DisconnectReason::Replaced)
                .await;
            if authed {
                self.user
                    .on_connection_changed(
                        &mut self.ctx,
                        account_id,
                        false,
                        DisconnectReason::Replaced,
                    )
                    .await;
            }
        }

        if let Some(entry) = self.ctx.actors.get_mut(&account_id) {
            entry.rebind_session(sid, session_nid.clone());
        }
        if preempting && authed {
            self.user
                .on_connection_changed(&mut self.ctx, account_id, true, DisconnectReason::Replaced)
                .await;
        }

        self.send_bind(account_id, sid, &session_nid).await;
        self.reply(&header, JOIN_STAGE_RES_ID, 0, Payload::empty())
            .await;
    }

    async fn handle_leave(
        &mut self,
        account_id: i64,
        reason: DisconnectReason,
        header: Option<RouteHeader>,
    ) {
        if !self.ctx.actors.contains_key(&account_id) {
            if let Some(header) = &header {
                self.reply(
                    header,
                    LEAVE_STAGE_RES_ID,
                    ErrorCode::ActorNotFound.as_u16(),
                    Payload::empty(),
                )
                .await;
            }
            return;
        }

        self.user
            .on_leave_room(&mut self.ctx, account_id, reason)
            .await;

        if let Some(mut entry) = self.ctx.actors.remove(&account_id) {
            entry.user.on_destroy().await;
            let session_gone = matches!(
                reason,
                DisconnectReason::ClientClose | DisconnectReason::ConnectionTimeout
            );
            if entry.is_connected() && !session_gone {
                self.send_kick(entry.session_nid(), entry.sid(), reason).await;
            }
        }

        if let Some(header) = &header {
            self.reply(header, LEAVE_STAGE_RES_ID, 0, Payload::empty())
                .await;
        }

        if self.ctx.actors.is_empty() && self.ctx.config().close_stage_on_empty {
            self.ctx.close_stage();
        }
    }

    async fn handle_dispatch(&mut self, account_id: i64, packet: Packet, header: RouteHeader) {
        let auth_msg_id = self.ctx.config().authenticate_msg_id.clone();

        if !self.ctx.actors.contains_key(&account_id) {
            if header.is_request() {
                self.reply_code(&header, ErrorCode::ActorNotFound).await;
            } else {
                warn!(account_id, msg_id = packet.msg_id(), "packet for unknown actor dropped");
            }
            return;
        }
        let Some(entry) = self.ctx.actors.get_mut(&account_id) else {
            return;
        };

        if !entry.is_authenticated() {
            if packet.msg_id() == auth_msg_id {
                let auth_result = entry.user.on_authenticate(&packet).await;
                match auth_result {
                    Ok(reply_payload) => {
                        entry.set_authenticated();
                        entry.user.on_post_authenticate().await;
                        let sid = entry.sid();
                        let session_nid = entry.session_nid().to_string();
                        self.send_bind(account_id, sid, &session_nid).await;
                        if header.is_request() {
                            let msg_id = header.msg_id.clone();
                            self.reply(&header, msg_id, 0, reply_payload).await;
                        }
                    }
                    Err(error) => {
                        debug!(account_id, %error, "authentication rejected");
                        let code = coded_or(&error, ErrorCode::AuthenticationFailed);
                        if header.is_request() {
                            let msg_id = header.msg_id.clone();
                            self.reply(&header, msg_id, code, Payload::empty()).await;
                        }
                    }
                }
            } else if header.is_request() {
                self.reply_code(&header, ErrorCode::NotAuthenticated).await;
            }
            return;
        }

        if packet.msg_id() == auth_msg_id {
            if header.is_request() {
                self.reply_code(&header, ErrorCode::AlreadyAuthenticated)
                    .await;
            }
            return;
        }

        self.ctx.begin_request(&header);
        let result = self.user.on_dispatch(&mut self.ctx, account_id, packet).await;
        let replied = self.ctx.end_request();

        match result {
            Ok(()) => {
                // Every request gets a reply; an untouched handler means
                // success with an empty body.
                if header.is_request() && !replied {
                    let msg_id = header.msg_id.clone();
                    self.reply(&header, msg_id, 0, Payload::empty()).await;
                }
            }
            Err(error) => {
                warn!(
                    stage_id = self.ctx.stage_id(),
                    account_id,
                    %error,
                    "dispatch handler failed"
                );
                if header.is_request() && !replied {
                    let msg_id = header.msg_id.clone();
                    self.reply(&header, msg_id, error.code(), Payload::empty())
                        .await;
                }
            }
        }
    }

    async fn handle_connection_changed(
        &mut self,
        account_id: i64,
        connected: bool,
        reason: DisconnectReason,
    ) {
        let Some(entry) = self.ctx.actors.get_mut(&account_id) else {
            return;
        };
        entry.set_connected(connected);
        if entry.is_authenticated() {
            self.user
                .on_connection_changed(&mut self.ctx, account_id, connected, reason)
                .await;
        }
    }

    async fn handle_timer(&mut self, timer_id: super::timer::TimerId) {
        // Fires queued before a cancel are dropped here, never duplicated.
        // Acknowledging clears the repeat timer's in-flight flag, so the
        // next period may post again while the handler runs.
        if !self.ctx.timers.acknowledge_fire(timer_id) {
            return;
        }
        self.user.on_timer(&mut self.ctx, timer_id).await;
        self.ctx.timers.prune_finished(timer_id);
    }

    async fn handle_tick(&mut self) {
        let dt = self.ctx.last_timestep;
        if dt.is_zero() {
            return;
        }
        self.user.on_game_loop_tick(&mut self.ctx, dt).await;
    }

    async fn handle_close(&mut self, header: Option<RouteHeader>) {
        for account_id in self.ctx.actor_ids() {
            self.user
                .on_leave_room(&mut self.ctx, account_id, DisconnectReason::StageClosed)
                .await;
            if let Some(mut entry) = self.ctx.actors.remove(&account_id) {
                entry.user.on_destroy().await;
                if entry.is_connected() {
                    self.send_kick(
                        entry.session_nid(),
                        entry.sid(),
                        DisconnectReason::StageClosed,
                    )
                    .await;
                }
            }
        }

        self.ctx.timers.cancel_all();
        if let Some(driver) = self.ctx.game_loop.take() {
            driver.abort();
        }

        // The stage is gone; its outstanding requests can never be used.
        let inflight = std::mem::take(&mut self.ctx.inflight);
        for (peer, seq) in inflight {
            self.ctx
                .comm()
                .request_cache()
                .fail(&peer, seq, CommError::ServerNotFound(peer.clone()));
        }

        if let Some(header) = &header {
            self.reply(header, CLOSE_STAGE_RES_ID, 0, Payload::empty())
                .await;
        }
    }

    async fn send_bind(&self, account_id: i64, sid: u64, session_nid: &str) {
        let msg = BindSessionMsg {
            sid,
            account_id,
            stage_id: self.ctx.stage_id(),
            play_nid: self.ctx.comm().nid().to_string(),
        };
        let mut header = RouteHeader::to(
            ServiceType::Session,
            nid_service_id(session_nid),
            session_nid,
            BIND_SESSION_ID,
        );
        header.flags.is_base = true;
        header.account_id = account_id;
        header.sid = sid;
        header.stage_id = self.ctx.stage_id();
        if let Err(error) = self.ctx.comm().send(header, system::encode(&msg)).await {
            warn!(%error, %session_nid, "session bind notification failed");
        }
    }

    async fn send_kick(&self, session_nid: &str, sid: u64, reason: DisconnectReason) {
        let msg = KickSessionMsg {
            sid,
            reason: reason.as_i32(),
        };
        let mut header = RouteHeader::to(
            ServiceType::Session,
            nid_service_id(session_nid),
            session_nid,
            KICK_SESSION_ID,
        );
        header.flags.is_base = true;
        header.sid = sid;
        if let Err(error) = self.ctx.comm().send(header, system::encode(&msg)).await {
            warn!(%error, %session_nid, "session kick notification failed");
        }
    }

    async fn reply(&self, header: &RouteHeader, msg_id: impl Into<String>, code: u16, payload: Payload) {
        if !header.is_request() {
            return;
        }
        if let Err(error) = self
            .ctx
            .comm()
            .reply_to(header, msg_id, code, payload)
            .await
        {
            warn!(%error, to = %header.from_nid, "stage reply failed");
        }
    }

    async fn reply_code(&self, header: &RouteHeader, code: ErrorCode) {
        let msg_id = header.msg_id.clone();
        self.reply(header, msg_id, code.as_u16(), Payload::empty())
            .await;
    }
}

fn coded_or(error: &PlayError, fallback: ErrorCode) -> u16 {
    match error {
        PlayError::Coded { code, .. } => *code,
        _ => fallback.as_u16(),
    }
}

fn message_header(msg: &StageMessage) -> Option<&RouteHeader> {
    match msg {
        StageMessage::Create { header, .. } => header.as_ref(),
        StageMessage::Join { header, .. } => Some(header),
        StageMessage::Leave { header, .. } => header.as_ref(),
        StageMessage::Dispatch { header, .. } => Some(header),
        StageMessage::Close { header } => header.as_ref(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stage::GameLoopConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex as StateMutex;
    use std::sync::atomic::AtomicU32;
    use std::time::{Duration, Instant};

    use playhouse_comm::config::CommConfig;
    use playhouse_comm::discovery::{ServerInfo, ServerInfoProvider};
    use playhouse_comm::system::DisconnectReason;

    struct EmptyProvider;

    #[async_trait]
    impl ServerInfoProvider for EmptyProvider {
        async fn update_server_info(
            &self,
            _self_info: ServerInfo,
        ) -> Result<Vec<ServerInfo>, CommError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Probe {
        events: StateMutex<Vec<String>>,
        in_handler: AtomicBool,
        overlaps: AtomicU32,
        ticks: AtomicU32,
        timer_fires: AtomicU32,
        auth_calls: AtomicU32,
    }

    impl Probe {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    struct TestStage {
        probe: Arc<Probe>,
        game_tick_stop_at: Option<u32>,
        timer_cancel_at: Option<u32>,
        timer_block_first: bool,
    }

    #[async_trait]
    impl Stage for TestStage {
        async fn on_create(
            &mut self,
            ctx: &mut StageContext,
            payload: &Payload,
        ) -> Result<(), PlayError> {
            self.probe.push("create");
            match payload.as_slice() {
                b"gameloop" => ctx.start_game_loop(GameLoopConfig::new(
                    Duration::from_millis(50),
                    Duration::from_millis(200),
                ))?,
                b"gameloop-stop" => {
                    self.game_tick_stop_at = Some(3);
                    ctx.start_game_loop(GameLoopConfig::new(
                        Duration::from_millis(30),
                        Duration::from_millis(120),
                    ))?;
                }
                b"count-timer" => {
                    ctx.add_count_timer(Duration::from_millis(10), 3, Duration::from_millis(20));
                }
                b"repeat-cancel" => {
                    self.timer_cancel_at = Some(3);
                    ctx.add_repeat_timer(Duration::from_millis(10), Duration::from_millis(25));
                }
                b"timer-block" => {
                    self.timer_block_first = true;
                    ctx.add_repeat_timer(Duration::from_millis(10), Duration::from_millis(30));
                }
                _ => {}
            }
            Ok(())
        }

        async fn on_post_create(&mut self, _ctx: &mut StageContext) -> Result<(), PlayError> {
            self.probe.push("post_create");
            Ok(())
        }

        async fn on_join_room(
            &mut self,
            _ctx: &mut StageContext,
            account_id: i64,
            _user_info: &Payload,
        ) -> Result<Payload, PlayError> {
            self.probe.push(format!("join:{account_id}"));
            Ok(Payload::empty())
        }

        async fn on_leave_room(
            &mut self,
            _ctx: &mut StageContext,
            account_id: i64,
            reason: DisconnectReason,
        ) {
            self.probe.push(format!("leave:{account_id}:{reason:?}"));
        }

        async fn on_dispatch(
            &mut self,
            _ctx: &mut StageContext,
            account_id: i64,
            packet: Packet,
        ) -> Result<(), PlayError> {
            if self.probe.in_handler.swap(true, Ordering::SeqCst) {
                self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            // Yield so an interleaving worker would have every chance.
            tokio::task::yield_now().await;
            self.probe.push(format!(
                "msg:{account_id}:{}",
                String::from_utf8_lossy(packet.payload().as_slice())
            ));
            self.probe.in_handler.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn on_timer(&mut self, ctx: &mut StageContext, timer_id: super::super::timer::TimerId) {
            let fired = self.probe.timer_fires.fetch_add(1, Ordering::SeqCst) + 1;
            if fired == 1 && self.timer_block_first {
                // Saturate the mailbox across many timer periods.
                tokio::time::sleep(Duration::from_millis(360)).await;
            }
            if Some(fired) == self.timer_cancel_at {
                ctx.cancel_timer(timer_id);
            }
        }

        async fn on_game_loop_tick(&mut self, ctx: &mut StageContext, _dt: Duration) {
            let ticks = self.probe.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(ticks) == self.game_tick_stop_at {
                ctx.stop_game_loop();
            }
        }
    }

    struct TestActor {
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl crate::actor::Actor for TestActor {
        async fn on_authenticate(&mut self, _packet: &Packet) -> Result<Payload, PlayError> {
            self.probe.auth_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Payload::empty())
        }
    }

    async fn spawn_stage(probe: Arc<Probe>) -> (StageCell, Arc<Communicator>) {
        let comm_config = CommConfig::builder(ServiceType::Play, 1, "play-test")
            .with_bind_endpoint("127.0.0.1:0")
            .build()
            .unwrap();
        let comm = Communicator::start(comm_config, Arc::new(EmptyProvider))
            .await
            .unwrap();

        let config = Arc::new(PlayConfig::new(comm.config().clone()));
        let stage_probe = Arc::clone(&probe);
        let actor_probe = Arc::clone(&probe);
        let cell = StageCell::new(
            100,
            "TestStage".to_string(),
            Box::new(TestStage {
                probe: stage_probe,
                game_tick_stop_at: None,
                timer_cancel_at: None,
                timer_block_first: false,
            }),
            Arc::clone(&comm),
            config,
            Arc::new(move |_| {
                Box::new(TestActor {
                    probe: Arc::clone(&actor_probe),
                }) as Box<dyn crate::actor::Actor>
            }),
        );
        (cell, comm)
    }

    fn push_header(msg_id: &str, account_id: i64) -> RouteHeader {
        let mut header = RouteHeader::to(ServiceType::Play, 1, "1:play-test", msg_id);
        header.from_nid = "3:session-test".to_string();
        header.stage_id = 100;
        header.account_id = account_id;
        header
    }

    fn create_msg(payload: &'static [u8]) -> StageMessage {
        StageMessage::Create {
            payload: Payload::from(payload),
            header: None,
        }
    }

    fn join_msg(account_id: i64, sid: u64) -> StageMessage {
        StageMessage::Join {
            account_id,
            sid,
            session_nid: "3:session-test".to_string(),
            user_info: Payload::empty(),
            header: push_header("join", account_id),
        }
    }

    fn dispatch_msg(msg_id: &str, account_id: i64, body: String) -> StageMessage {
        StageMessage::Dispatch {
            account_id,
            packet: Packet::with_payload(msg_id, body.into_bytes()).with_stage(100),
            header: push_header(msg_id, account_id),
        }
    }

    async fn wait_until(probe: &Probe, timeout: Duration, predicate: impl Fn(&Probe) -> bool) {
        let deadline = Instant::now() + timeout;
        while !predicate(probe) {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_lifecycle_callback_order() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b""));
        cell.post(join_msg(7, 1));
        cell.post(dispatch_msg("Authenticate", 7, String::new()));
        cell.post(dispatch_msg("Hello", 7, "hi".to_string()));

        wait_until(&probe, Duration::from_secs(2), |p| p.events().len() >= 4).await;
        assert_eq!(
            probe.events(),
            vec!["create", "post_create", "join:7", "msg:7:hi"]
        );
        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_per_stage_serializability() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b""));
        cell.post(join_msg(1, 1));
        cell.post(join_msg(2, 2));
        cell.post(dispatch_msg("Authenticate", 1, String::new()));
        cell.post(dispatch_msg("Authenticate", 2, String::new()));

        let writer_a = {
            let cell = cell.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    cell.post(dispatch_msg("Chat", 1, format!("a{i:02}")));
                    tokio::task::yield_now().await;
                }
            })
        };
        let writer_b = {
            let cell = cell.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    cell.post(dispatch_msg("Chat", 2, format!("b{i:02}")));
                    tokio::task::yield_now().await;
                }
            })
        };
        writer_a.await.unwrap();
        writer_b.await.unwrap();

        wait_until(&probe, Duration::from_secs(5), |p| {
            p.events().iter().filter(|e| e.starts_with("msg:")).count() >= 100
        })
        .await;

        // Handlers never overlapped.
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);

        // Per-sender enqueue order survived.
        let events = probe.events();
        let of = |prefix: &str| -> Vec<String> {
            events
                .iter()
                .filter(|e| e.starts_with(prefix))
                .cloned()
                .collect()
        };
        let a = of("msg:1:");
        let mut sorted_a = a.clone();
        sorted_a.sort();
        assert_eq!(a, sorted_a);
        let b = of("msg:2:");
        let mut sorted_b = b.clone();
        sorted_b.sort();
        assert_eq!(b, sorted_b);

        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_authentication_gate() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b""));
        cell.post(join_msg(7, 1));
        // Not authenticated yet: must not reach on_dispatch.
        cell.post(dispatch_msg("Hello", 7, "early".to_string()));
        cell.post(dispatch_msg("Authenticate", 7, String::new()));
        cell.post(dispatch_msg("Hello", 7, "late".to_string()));
        // Re-authentication attempt must not call on_authenticate again.
        cell.post(dispatch_msg("Authenticate", 7, String::new()));

        wait_until(&probe, Duration::from_secs(2), |p| {
            p.events().iter().any(|e| e == "msg:7:late")
        })
        .await;

        let events = probe.events();
        assert!(!events.iter().any(|e| e == "msg:7:early"));
        assert_eq!(probe.auth_calls.load(Ordering::SeqCst), 1);

        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_runs_leaves_and_drops_later_posts() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b""));
        cell.post(join_msg(7, 1));
        cell.post(join_msg(8, 2));
        cell.post(StageMessage::Close { header: None });

        wait_until(&probe, Duration::from_secs(2), |p| {
            p.events()
                .iter()
                .filter(|e| e.starts_with("leave:") && e.ends_with("StageClosed"))
                .count()
                >= 2
        })
        .await;
        assert!(cell.is_closed());

        // Enqueues after close are rejected.
        assert!(!cell.post(dispatch_msg("Hello", 7, "dead".to_string())));

        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_game_loop_tick_rate() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b"gameloop"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let ticks = probe.ticks.load(Ordering::SeqCst);
        assert!(
            (15..=25).contains(&ticks),
            "expected ~20 ticks over 1s at 50ms, got {ticks}"
        );
        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_game_loop_from_tick_handler() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b"gameloop-stop"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        // Stopped at the third tick; already-enqueued ticks may drain.
        let ticks = probe.ticks.load(Ordering::SeqCst);
        assert!(
            (3..=6).contains(&ticks),
            "expected the loop to stop around 3 ticks, got {ticks}"
        );

        let settled = probe.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(probe.ticks.load(Ordering::SeqCst), settled);

        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_count_timer_fires_exactly_count_times() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b"count-timer"));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(probe.timer_fires.load(Ordering::SeqCst), 3);
        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeat_timer_cancel_is_effective() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        cell.post(create_msg(b"repeat-cancel"));
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Canceled at the third fire; one queued fire may slip through.
        let fires = probe.timer_fires.load(Ordering::SeqCst);
        assert!(
            (3..=4).contains(&fires),
            "expected ~3 fires before cancel, got {fires}"
        );
        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_saturated_repeat_timer_coalesces_fires() {
        let probe = Arc::new(Probe::default());
        let (cell, comm) = spawn_stage(Arc::clone(&probe)).await;

        // The first fire holds the mailbox for ~12 periods. Without
        // coalescing, the backlog would deliver a fire per elapsed period
        // the moment the handler returns (13+ observed here); with it, the
        // blocked window collapses into a single pending fire.
        cell.post(create_msg(b"timer-block"));
        tokio::time::sleep(Duration::from_millis(450)).await;

        let fires = probe.timer_fires.load(Ordering::SeqCst);
        assert!(
            (2..=6).contains(&fires),
            "expected coalesced fires after saturation, got {fires}"
        );
        comm.shutdown().await;
    }
}
