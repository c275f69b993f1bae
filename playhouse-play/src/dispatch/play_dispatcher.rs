//! Routes inbound packets to stages and services the base stage protocol.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::sync::OnceLock;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::config::PlayConfig;
use crate::stage::{StageCell, StageMessage, StageRegistry};
use playhouse_comm::communicator::{Communicator, PacketDispatcher};
use playhouse_comm::error::ErrorCode;
use playhouse_comm::packet::{Packet, Payload, RouteHeader, RoutePacket};
use playhouse_comm::system::{
    self, CreateStageMsg, DisconnectReason, JoinStageMsg, StageActorMsg, CLOSE_STAGE_REQ_ID,
    CREATE_STAGE_REQ_ID, JOIN_STAGE_REQ_ID, LEAVE_STAGE_REQ_ID, SESSION_CLOSED_ID,
};

/// The play server's packet sink: a registry of live stages plus the base
/// operations that create, join, leave, and close them.
///
/// User packets are enqueued on their stage's mailbox; requests for a
/// stage that does not exist (or is closed) are answered `StageNotFound`.
pub struct PlayDispatcher {
    config: Arc<PlayConfig>,
    registry: Arc<StageRegistry>,
    stages: DashMap<i64, StageCell>,
    comm: OnceLock<Arc<Communicator>>,
}

impl PlayDispatcher {
    pub fn new(config: Arc<PlayConfig>, registry: Arc<StageRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            stages: DashMap::new(),
            comm: OnceLock::new(),
        })
    }

    /// Wire the dispatcher to its communicator. Called once at service
    /// start, before the dispatcher is registered.
    pub fn attach(&self, comm: Arc<Communicator>) {
        let _ = self.comm.set(comm);
    }

    pub fn stage(&self, stage_id: i64) -> Option<StageCell> {
        self.stages.get(&stage_id).map(|cell| cell.clone())
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Post `Close` to every stage (service shutdown).
    pub fn close_all(&self) {
        for cell in self.stages.iter() {
            cell.post(StageMessage::Close { header: None });
        }
    }

    /// Whether every stage has processed its terminal message.
    pub fn all_closed(&self) -> bool {
        self.stages.iter().all(|cell| cell.is_closed())
    }

    fn communicator(&self) -> Option<Arc<Communicator>> {
        self.comm.get().cloned()
    }

    fn reply_error_async(&self, header: RouteHeader, code: ErrorCode) {
        let Some(comm) = self.communicator() else {
            return;
        };
        tokio::spawn(async move {
            comm.reply_error(&header, code.as_u16()).await;
        });
    }

    fn handle_base(&self, packet: RoutePacket) {
        let RoutePacket { header, payload } = packet;
        match header.msg_id.as_str() {
            CREATE_STAGE_REQ_ID => match system::decode::<CreateStageMsg>(&payload) {
                Ok(msg) => self.create_stage(msg, header),
                Err(error) => {
                    warn!(%error, "malformed create stage request");
                    self.reply_error_async(header, ErrorCode::InvalidMessage);
                }
            },
            JOIN_STAGE_REQ_ID => match system::decode::<JoinStageMsg>(&payload) {
                Ok(msg) => self.join_stage(msg, header),
                Err(error) => {
                    warn!(%error, "malformed join stage request");
                    self.reply_error_async(header, ErrorCode::InvalidMessage);
                }
            },
            CLOSE_STAGE_REQ_ID => {
                let stage_id = header.stage_id;
                match self.stages.remove(&stage_id) {
                    Some((_, cell)) => {
                        if !cell.post(StageMessage::Close {
                            header: Some(header.clone()),
                        }) {
                            self.reply_error_async(header, ErrorCode::StageNotFound);
                        }
                    }
                    None => self.reply_error_async(header, ErrorCode::StageNotFound),
                }
            }
            LEAVE_STAGE_REQ_ID => match system::decode::<StageActorMsg>(&payload) {
                Ok(msg) => {
                    let reason = DisconnectReason::from_i32(msg.reason);
                    match self.stage(msg.stage_id) {
                        Some(cell) => {
                            if !cell.post(StageMessage::Leave {
                                account_id: msg.account_id,
                                reason,
                                header: Some(header.clone()),
                            }) {
                                self.drop_closed(msg.stage_id);
                                self.reply_error_async(header, ErrorCode::StageNotFound);
                            }
                        }
                        None => self.reply_error_async(header, ErrorCode::StageNotFound),
                    }
                }
                Err(error) => {
                    warn!(%error, "malformed leave stage request");
                    self.reply_error_async(header, ErrorCode::InvalidMessage);
                }
            },
            SESSION_CLOSED_ID => match system::decode::<StageActorMsg>(&payload) {
                Ok(msg) => self.session_closed(msg),
                Err(error) => warn!(%error, "malformed session closed notification"),
            },
            other => {
                warn!(msg_id = other, "unknown base operation");
                if header.is_request() {
                    self.reply_error_async(header, ErrorCode::InvalidMessage);
                }
            }
        }
    }

    fn create_stage(&self, msg: CreateStageMsg, header: RouteHeader) {
        let stage_type = if msg.stage_type.is_empty() {
            self.config.default_stage_type.clone()
        } else {
            msg.stage_type.clone()
        };

        if msg.stage_id == 0 {
            self.reply_error_async(header, ErrorCode::InvalidMessage);
            return;
        }

        let Some(factory) = self.registry.stage_factory(&stage_type) else {
            warn!(%stage_type, "create for unregistered stage type");
            self.reply_error_async(header, ErrorCode::InvalidStageType);
            return;
        };
        let Some(actor_factory) = self.registry.actor_factory() else {
            self.reply_error_async(header, ErrorCode::SystemError);
            return;
        };
        let Some(comm) = self.communicator() else {
            return;
        };

        match self.stages.entry(msg.stage_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                self.reply_error_async(header, ErrorCode::StageAlreadyExists);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let cell = StageCell::new(
                    msg.stage_id,
                    stage_type.clone(),
                    factory(msg.stage_id),
                    comm,
                    Arc::clone(&self.config),
                    actor_factory,
                );
                cell.post(StageMessage::Create {
                    payload: Payload::from(msg.payload),
                    header: Some(header),
                });
                vacant.insert(cell);
                debug!(stage_id = msg.stage_id, %stage_type, "stage created");
            }
        }
    }

    fn join_stage(&self, msg: JoinStageMsg, header: RouteHeader) {
        match self.stage(msg.stage_id) {
            Some(cell) => {
                let delivered = cell.post(StageMessage::Join {
                    account_id: msg.account_id,
                    sid: msg.sid,
                    session_nid: msg.session_nid.clone(),
                    user_info: Payload::from(msg.user_info),
                    header: header.clone(),
                });
                if !delivered {
                    self.drop_closed(msg.stage_id);
                    self.reply_error_async(header, ErrorCode::StageNotFound);
                }
            }
            None => self.reply_error_async(header, ErrorCode::StageNotFound),
        }
    }

    /// Client socket went away: the stage observes the connection change,
    /// then the actor leaves (`Replaced` keeps the actor for the incoming
    /// session instead).
    fn session_closed(&self, msg: StageActorMsg) {
        let reason = DisconnectReason::from_i32(msg.reason);
        let Some(cell) = self.stage(msg.stage_id) else {
            return;
        };
        cell.post(StageMessage::ConnectionChanged {
            account_id: msg.account_id,
            connected: false,
            reason,
        });
        if reason != DisconnectReason::Replaced {
            cell.post(StageMessage::Leave {
                account_id: msg.account_id,
                reason,
                header: None,
            });
        }
    }

    fn route_to_stage(&self, packet: RoutePacket) {
        let RoutePacket { header, payload } = packet;
        let stage_id = header.stage_id;

        let Some(cell) = self.stage(stage_id) else {
            if header.is_request() {
                self.reply_error_async(header, ErrorCode::StageNotFound);
            } else {
                debug!(stage_id, msg_id = %header.msg_id, "push for unknown stage dropped");
            }
            return;
        };

        let user_packet = Packet::with_payload(header.msg_id.clone(), payload)
            .with_seq(header.msg_seq)
            .with_stage(stage_id);
        let delivered = cell.post(StageMessage::Dispatch {
            account_id: header.account_id,
            packet: user_packet,
            header: header.clone(),
        });
        if !delivered {
            self.drop_closed(stage_id);
            if header.is_request() {
                self.reply_error_async(header, ErrorCode::StageNotFound);
            }
        }
    }

    fn drop_closed(&self, stage_id: i64) {
        self.stages
            .remove_if(&stage_id, |_, cell| cell.is_closed());
    }
}

impl PacketDispatcher for PlayDispatcher {
    fn on_packet(&self, packet: RoutePacket) {
        if packet.header.flags.is_base {
            self.handle_base(packet);
        } else {
            self.route_to_stage(packet);
        }
    }
}
