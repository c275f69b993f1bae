//! Framework-internal message protocol.
//!
//! Base operations (stage create/join/close, session bind, disconnect
//! notifications) travel as ordinary route packets with `is_base` set and
//! one of the reserved msg ids below. Payloads are small protobuf
//! messages; result codes ride the route header's `error_code`.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use prost::Message as ProstMessage;

// Layer 3: Internal module imports
use crate::error::CommError;
use crate::packet::Payload;

pub const CREATE_STAGE_REQ_ID: &str = "@CreateStage@Req@";
pub const CREATE_STAGE_RES_ID: &str = "@CreateStage@Res@";
pub const JOIN_STAGE_REQ_ID: &str = "@JoinStage@Req@";
pub const JOIN_STAGE_RES_ID: &str = "@JoinStage@Res@";
pub const CLOSE_STAGE_REQ_ID: &str = "@CloseStage@Req@";
pub const CLOSE_STAGE_RES_ID: &str = "@CloseStage@Res@";
pub const LEAVE_STAGE_REQ_ID: &str = "@LeaveStage@Req@";
pub const LEAVE_STAGE_RES_ID: &str = "@LeaveStage@Res@";
pub const BIND_SESSION_ID: &str = "@BindSession@";
pub const SESSION_CLOSED_ID: &str = "@SessionClosed@";
pub const KICK_SESSION_ID: &str = "@KickSession@";

/// Why a client connection went away (wire-stable values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DisconnectReason {
    ConnectionTimeout = 0,
    ClientClose = 1,
    /// A newer session for the same account took over.
    Replaced = 2,
    StageClosed = 3,
    ServerShutdown = 4,
}

impl DisconnectReason {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::ClientClose,
            2 => Self::Replaced,
            3 => Self::StageClosed,
            4 => Self::ServerShutdown,
            _ => Self::ConnectionTimeout,
        }
    }
}

/// Payload of `@CreateStage@Req@` / `@CreateStage@Res@`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateStageMsg {
    #[prost(string, tag = "1")]
    pub stage_type: String,
    #[prost(int64, tag = "2")]
    pub stage_id: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// Payload of `@JoinStage@Req@` / `@JoinStage@Res@`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinStageMsg {
    #[prost(int64, tag = "1")]
    pub stage_id: i64,
    #[prost(int64, tag = "2")]
    pub account_id: i64,
    #[prost(uint64, tag = "3")]
    pub sid: u64,
    #[prost(string, tag = "4")]
    pub session_nid: String,
    #[prost(bytes = "vec", tag = "5")]
    pub user_info: Vec<u8>,
}

/// Payload of `@LeaveStage@Req@` and `@SessionClosed@`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StageActorMsg {
    #[prost(int64, tag = "1")]
    pub stage_id: i64,
    #[prost(int64, tag = "2")]
    pub account_id: i64,
    #[prost(uint64, tag = "3")]
    pub sid: u64,
    #[prost(int32, tag = "4")]
    pub reason: i32,
}

/// Payload of `@BindSession@`: tells the gateway where an authenticated
/// session now lives.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BindSessionMsg {
    #[prost(uint64, tag = "1")]
    pub sid: u64,
    #[prost(int64, tag = "2")]
    pub account_id: i64,
    #[prost(int64, tag = "3")]
    pub stage_id: i64,
    #[prost(string, tag = "4")]
    pub play_nid: String,
}

/// Payload of `@KickSession@`: play tells the gateway to drop a client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KickSessionMsg {
    #[prost(uint64, tag = "1")]
    pub sid: u64,
    #[prost(int32, tag = "2")]
    pub reason: i32,
}

/// Encode a system payload.
pub fn encode<M: ProstMessage>(msg: &M) -> Payload {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    // encoding into a pre-sized Vec cannot fail
    let _ = msg.encode(&mut buf);
    Payload::from(buf)
}

/// Decode a system payload.
pub fn decode<M: ProstMessage + Default>(payload: &Payload) -> Result<M, CommError> {
    M::decode(payload.as_slice()).map_err(|e| CommError::Decode(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_system_payload_round_trip() {
        let msg = JoinStageMsg {
            stage_id: 100,
            account_id: 7,
            sid: 3,
            session_nid: "3:session-1".to_string(),
            user_info: b"nickname".to_vec(),
        };
        let payload = encode(&msg);
        let decoded: JoinStageMsg = decode(&payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_disconnect_reason_round_trip() {
        for reason in [
            DisconnectReason::ConnectionTimeout,
            DisconnectReason::ClientClose,
            DisconnectReason::Replaced,
            DisconnectReason::StageClosed,
            DisconnectReason::ServerShutdown,
        ] {
            assert_eq!(DisconnectReason::from_i32(reason.as_i32()), reason);
        }
    }
}
