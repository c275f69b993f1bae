//! The route header attached to every inter-server packet.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::Bytes;
use prost::Message as ProstMessage;

// Layer 3: Internal module imports
use super::message::{Packet, Payload};
use crate::discovery::ServiceType;
use crate::error::CommError;

/// Wire form of the route header (protobuf).
///
/// Field tags are frozen; add new fields with fresh tags only.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteHeaderProto {
    #[prost(string, tag = "1")]
    pub from_nid: String,
    #[prost(string, tag = "2")]
    pub to_nid: String,
    #[prost(uint32, tag = "3")]
    pub service_id: u32,
    #[prost(int32, tag = "4")]
    pub service_type: i32,
    #[prost(string, tag = "5")]
    pub msg_id: String,
    #[prost(uint32, tag = "6")]
    pub msg_seq: u32,
    #[prost(int64, tag = "7")]
    pub stage_id: i64,
    #[prost(int64, tag = "8")]
    pub account_id: i64,
    #[prost(uint64, tag = "9")]
    pub sid: u64,
    #[prost(uint32, tag = "10")]
    pub error_code: u32,
    #[prost(bool, tag = "11")]
    pub is_system: bool,
    #[prost(bool, tag = "12")]
    pub is_reply: bool,
    #[prost(bool, tag = "13")]
    pub is_base: bool,
    #[prost(bool, tag = "14")]
    pub is_backend: bool,
}

/// Routing flags.
///
/// `is_system`: mesh housekeeping, handled before user dispatch.
/// `is_reply`: answers the request with the same `msg_seq`.
/// `is_base`: framework-defined operation (stage create/join/close, binds).
/// `is_backend`: originated server-side, bypassed the session gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteFlags {
    pub is_system: bool,
    pub is_reply: bool,
    pub is_base: bool,
    pub is_backend: bool,
}

/// Routing metadata for one inter-server packet.
///
/// Invariant: `flags.is_reply` implies `msg_seq` equals the sequence of the
/// request being answered; [`RouteHeader::reply`] is the only way replies
/// are built.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteHeader {
    pub from_nid: String,
    pub to_nid: String,
    /// Service id of the destination.
    pub service_id: u16,
    /// Service type of the destination.
    pub service_type: ServiceType,
    pub msg_id: String,
    pub msg_seq: u16,
    pub stage_id: i64,
    pub account_id: i64,
    /// Client session id on the originating session server, 0 if none.
    pub sid: u64,
    pub error_code: u16,
    pub flags: RouteFlags,
}

impl RouteHeader {
    /// Minimal header for a packet addressed to `to_nid`.
    pub fn to(
        service_type: ServiceType,
        service_id: u16,
        to_nid: impl Into<String>,
        msg_id: impl Into<String>,
    ) -> Self {
        Self {
            from_nid: String::new(),
            to_nid: to_nid.into(),
            service_id,
            service_type,
            msg_id: msg_id.into(),
            msg_seq: 0,
            stage_id: 0,
            account_id: 0,
            sid: 0,
            error_code: 0,
            flags: RouteFlags::default(),
        }
    }

    /// Build the reply header for this request: endpoints swapped, same
    /// sequence, `is_reply` set.
    pub fn reply(&self, msg_id: impl Into<String>, error_code: u16) -> Self {
        Self {
            from_nid: self.to_nid.clone(),
            to_nid: self.from_nid.clone(),
            service_id: self.service_id,
            service_type: self.service_type,
            msg_id: msg_id.into(),
            msg_seq: self.msg_seq,
            stage_id: self.stage_id,
            account_id: self.account_id,
            sid: self.sid,
            error_code,
            flags: RouteFlags {
                is_reply: true,
                is_system: self.flags.is_system,
                is_base: self.flags.is_base,
                is_backend: self.flags.is_backend,
            },
        }
    }

    /// Whether the sender expects a reply.
    pub fn is_request(&self) -> bool {
        self.msg_seq > 0 && !self.flags.is_reply
    }

    /// Serialize to the protobuf wire form.
    pub fn encode_proto(&self) -> Bytes {
        let proto = RouteHeaderProto {
            from_nid: self.from_nid.clone(),
            to_nid: self.to_nid.clone(),
            service_id: u32::from(self.service_id),
            service_type: self.service_type.as_i32(),
            msg_id: self.msg_id.clone(),
            msg_seq: u32::from(self.msg_seq),
            stage_id: self.stage_id,
            account_id: self.account_id,
            sid: self.sid,
            error_code: u32::from(self.error_code),
            is_system: self.flags.is_system,
            is_reply: self.flags.is_reply,
            is_base: self.flags.is_base,
            is_backend: self.flags.is_backend,
        };
        let mut buf = Vec::with_capacity(proto.encoded_len());
        // encoding into a pre-sized Vec cannot fail
        let _ = proto.encode(&mut buf);
        Bytes::from(buf)
    }

    /// Deserialize from the protobuf wire form.
    pub fn decode_proto(buf: &[u8]) -> Result<Self, CommError> {
        let proto =
            RouteHeaderProto::decode(buf).map_err(|e| CommError::Decode(e.to_string()))?;
        let service_type = ServiceType::from_i32(proto.service_type).ok_or_else(|| {
            CommError::Decode(format!("unknown service type {}", proto.service_type))
        })?;
        Ok(Self {
            from_nid: proto.from_nid,
            to_nid: proto.to_nid,
            service_id: proto.service_id as u16,
            service_type,
            msg_id: proto.msg_id,
            msg_seq: proto.msg_seq as u16,
            stage_id: proto.stage_id,
            account_id: proto.account_id,
            sid: proto.sid,
            error_code: proto.error_code as u16,
            flags: RouteFlags {
                is_system: proto.is_system,
                is_reply: proto.is_reply,
                is_base: proto.is_base,
                is_backend: proto.is_backend,
            },
        })
    }
}

/// A routed unit flowing through the mesh: header plus payload.
#[derive(Debug, Clone)]
pub struct RoutePacket {
    pub header: RouteHeader,
    pub payload: Payload,
}

impl RoutePacket {
    pub fn new(header: RouteHeader, payload: Payload) -> Self {
        Self { header, payload }
    }

    /// Collapse into the client-visible packet form.
    pub fn into_packet(self) -> Packet {
        Packet::with_payload(self.header.msg_id, self.payload)
            .with_seq(self.header.msg_seq)
            .with_stage(self.header.stage_id)
            .with_error(self.header.error_code)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_header() -> RouteHeader {
        let mut header = RouteHeader::to(ServiceType::Play, 1, "1:play-1", "JoinStage");
        header.from_nid = "3:session-1".to_string();
        header.msg_seq = 42;
        header.stage_id = 100;
        header.account_id = 777;
        header.sid = 9;
        header
    }

    #[test]
    fn test_proto_round_trip() {
        let header = sample_header();
        let wire = header.encode_proto();
        let decoded = RouteHeader::decode_proto(&wire).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_reply_swaps_endpoints_and_keeps_seq() {
        let request = sample_header();
        let reply = request.reply("JoinStageRes", 0);

        assert_eq!(reply.from_nid, request.to_nid);
        assert_eq!(reply.to_nid, request.from_nid);
        assert_eq!(reply.msg_seq, request.msg_seq);
        assert!(reply.flags.is_reply);
        assert!(!reply.is_request());
        assert!(request.is_request());
    }

    #[test]
    fn test_unknown_service_type_is_a_decode_error() {
        let mut proto = RouteHeaderProto::default();
        proto.service_type = 9;
        let mut buf = Vec::new();
        proto.encode(&mut buf).unwrap();
        assert!(RouteHeader::decode_proto(&buf).is_err());
    }

    #[test]
    fn test_into_packet_carries_error_code() {
        let mut header = sample_header();
        header.error_code = 3;
        let packet = RoutePacket::new(header, Payload::empty()).into_packet();
        assert_eq!(packet.error_code(), 3);
        assert_eq!(packet.msg_seq(), 42);
    }
}
