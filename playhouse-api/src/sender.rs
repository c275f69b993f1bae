//! Per-call facade handed to api handlers.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::error::ApiError;
use playhouse_comm::communicator::Communicator;
use playhouse_comm::discovery::{ServerInfo, ServiceType};
use playhouse_comm::packet::{Packet, Payload, RouteHeader, RoutePacket};
use playhouse_comm::system::{
    self, CreateStageMsg, JoinStageMsg, CLOSE_STAGE_REQ_ID, CREATE_STAGE_REQ_ID,
    JOIN_STAGE_REQ_ID,
};

/// What an api handler can do with the mesh: answer its caller, call other
/// servers, and create/join/close stages on play servers.
///
/// Constructed per inbound packet; cloning shares the replied-once flag.
#[derive(Clone)]
pub struct ApiSender {
    comm: Arc<Communicator>,
    origin: RouteHeader,
    replied: Arc<AtomicBool>,
}

impl ApiSender {
    pub(crate) fn new(comm: Arc<Communicator>, origin: RouteHeader) -> Self {
        Self {
            comm,
            origin,
            replied: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Header of the packet this handler is serving.
    pub fn origin(&self) -> &RouteHeader {
        &self.origin
    }

    /// Account the inbound packet was attributed to (0 when anonymous).
    pub fn account_id(&self) -> i64 {
        self.origin.account_id
    }

    /// Session id at the origin gateway (0 for backend calls).
    pub fn sid(&self) -> u64 {
        self.origin.sid
    }

    /// Nid of the session gateway the packet came through.
    pub fn session_nid(&self) -> &str {
        &self.origin.from_nid
    }

    /// Answer the inbound request. No-op for pushes; at most one reply is
    /// sent even if the handler calls this several times.
    pub async fn reply(&self, packet: Packet) -> Result<(), ApiError> {
        if !self.origin.is_request() {
            return Ok(());
        }
        if self.replied.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let msg_id = packet.msg_id().to_string();
        let error_code = packet.error_code();
        self.comm
            .reply_to(&self.origin, msg_id, error_code, packet.into_payload())
            .await?;
        Ok(())
    }

    pub(crate) fn has_replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }

    pub(crate) fn mark_replied(&self) -> bool {
        self.replied.swap(true, Ordering::AcqRel)
    }

    /// Pick a Running play server round-robin.
    pub fn pick_play_server(&self, service_id: u16) -> Option<ServerInfo> {
        self.comm.center().find_round_robin(service_id)
    }

    /// Pick the play server an account shards onto.
    pub fn pick_play_server_for(&self, service_id: u16, account_id: i64) -> Option<ServerInfo> {
        self.comm.center().find_by_account_id(service_id, account_id)
    }

    /// Request any server and await its reply.
    pub async fn request(
        &self,
        to_nid: impl Into<String>,
        msg_id: impl Into<String>,
        payload: Payload,
    ) -> Result<RoutePacket, ApiError> {
        let to_nid = to_nid.into();
        let service_type = self
            .comm
            .center()
            .find_by_nid(&to_nid)
            .map(|info| info.service_type)
            .unwrap_or(ServiceType::Play);
        let header = RouteHeader::to(service_type, nid_service_id(&to_nid), to_nid, msg_id);
        let reply = self.comm.request(header, payload).await?.await?;
        Ok(reply)
    }

    /// Create a stage on `play_nid`. Resolves with the play server's
    /// result code (0 on success).
    pub async fn create_stage(
        &self,
        play_nid: &str,
        stage_type: &str,
        stage_id: i64,
        payload: Payload,
    ) -> Result<u16, ApiError> {
        let msg = CreateStageMsg {
            stage_type: stage_type.to_string(),
            stage_id,
            payload: payload.into_bytes().to_vec(),
        };
        self.base_request(play_nid, CREATE_STAGE_REQ_ID, stage_id, system::encode(&msg))
            .await
    }

    /// Join `account_id` onto a stage, binding it to the given session.
    pub async fn join_stage(
        &self,
        play_nid: &str,
        stage_id: i64,
        account_id: i64,
        sid: u64,
        session_nid: &str,
        user_info: Payload,
    ) -> Result<u16, ApiError> {
        let msg = JoinStageMsg {
            stage_id,
            account_id,
            sid,
            session_nid: session_nid.to_string(),
            user_info: user_info.into_bytes().to_vec(),
        };
        self.base_request(play_nid, JOIN_STAGE_REQ_ID, stage_id, system::encode(&msg))
            .await
    }

    /// Close a stage on `play_nid`.
    pub async fn close_stage(&self, play_nid: &str, stage_id: i64) -> Result<u16, ApiError> {
        self.base_request(play_nid, CLOSE_STAGE_REQ_ID, stage_id, Payload::empty())
            .await
    }

    async fn base_request(
        &self,
        play_nid: &str,
        msg_id: &str,
        stage_id: i64,
        payload: Payload,
    ) -> Result<u16, ApiError> {
        let mut header = RouteHeader::to(
            ServiceType::Play,
            nid_service_id(play_nid),
            play_nid,
            msg_id,
        );
        header.stage_id = stage_id;
        header.flags.is_base = true;
        let reply = self.comm.request(header, payload).await?.await?;
        Ok(reply.header.error_code)
    }
}

/// Service id embedded in a nid (`"{service_id}:{server_id}"`).
fn nid_service_id(nid: &str) -> u16 {
    nid.split(':')
        .next()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}
