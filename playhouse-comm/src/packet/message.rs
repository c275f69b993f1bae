//! The canonical in-memory message value.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use bytes::Bytes;

// Layer 3: Internal module imports
use crate::error::CommError;

/// Maximum length of a message id in bytes.
pub const MAX_MSG_ID_LEN: usize = 256;

/// Maximum payload size in bytes (2 MiB).
pub const MAX_PAYLOAD_LEN: usize = 2 * 1024 * 1024;

/// Reserved msg id for client keepalive frames (zero payload).
pub const HEARTBEAT_MSG_ID: &str = "@Heart@Beat@";

/// Reserved msg id for diagnostic frames; logged and dropped by the gateway.
pub const DEBUG_MSG_ID: &str = "@Debug@";

/// Reserved msg id carried by synthetic timeout replies.
pub const TIMEOUT_MSG_ID: &str = "@Timeout@";

/// Opaque message payload backed by a reference-counted buffer.
///
/// Cloning is a cheap refcount bump; broadcast paths rely on that. Sending
/// a packet consumes it (`send` takes the packet by value), so payload
/// reuse after send is rejected by the compiler rather than at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    /// The empty payload.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }
}

/// The canonical in-memory message.
///
/// `msg_seq == 0` marks a push; any other value marks a request (or the
/// reply paired to it). `original_size` is nonzero only when the payload
/// was compressed before framing and records the pre-compression length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    msg_id: String,
    msg_seq: u16,
    stage_id: i64,
    error_code: u16,
    original_size: u32,
    payload: Payload,
}

impl Packet {
    /// Create a push packet with an empty payload.
    pub fn of(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            msg_seq: 0,
            stage_id: 0,
            error_code: 0,
            original_size: 0,
            payload: Payload::empty(),
        }
    }

    /// Create a push packet carrying `payload`.
    pub fn with_payload(msg_id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        let mut packet = Self::of(msg_id);
        packet.payload = payload.into();
        packet
    }

    /// Builder: set the request sequence.
    pub fn with_seq(mut self, msg_seq: u16) -> Self {
        self.msg_seq = msg_seq;
        self
    }

    /// Builder: set the target stage.
    pub fn with_stage(mut self, stage_id: i64) -> Self {
        self.stage_id = stage_id;
        self
    }

    /// Builder: set the wire error code.
    pub fn with_error(mut self, error_code: u16) -> Self {
        self.error_code = error_code;
        self
    }

    /// Builder: record the pre-compression payload length.
    pub fn with_original_size(mut self, original_size: u32) -> Self {
        self.original_size = original_size;
        self
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn msg_seq(&self) -> u16 {
        self.msg_seq
    }

    pub fn stage_id(&self) -> i64 {
        self.stage_id
    }

    pub fn error_code(&self) -> u16 {
        self.error_code
    }

    pub fn original_size(&self) -> u32 {
        self.original_size
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the packet, yielding its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Whether this packet expects (or answers) a paired reply.
    pub fn is_request(&self) -> bool {
        self.msg_seq > 0
    }

    pub fn is_heartbeat(&self) -> bool {
        self.msg_id == HEARTBEAT_MSG_ID
    }

    pub fn is_debug(&self) -> bool {
        self.msg_id == DEBUG_MSG_ID
    }

    /// Validate the size limits enforced by every encoder.
    pub fn validate(&self) -> Result<(), CommError> {
        if self.msg_id.len() > MAX_MSG_ID_LEN {
            return Err(CommError::InvalidMessage(format!(
                "msg_id length {} exceeds {}",
                self.msg_id.len(),
                MAX_MSG_ID_LEN
            )));
        }
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(CommError::InvalidMessage(format!(
                "payload size {} exceeds {}",
                self.payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet[{} seq={} stage={} err={} len={}]",
            self.msg_id,
            self.msg_seq,
            self.stage_id,
            self.error_code,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_vs_request() {
        let push = Packet::of("Move");
        assert!(!push.is_request());

        let request = Packet::of("Move").with_seq(3);
        assert!(request.is_request());
    }

    #[test]
    fn test_reserved_ids() {
        assert!(Packet::of(HEARTBEAT_MSG_ID).is_heartbeat());
        assert!(Packet::of(DEBUG_MSG_ID).is_debug());
    }

    #[test]
    fn test_validate_rejects_long_msg_id() {
        let packet = Packet::of("x".repeat(MAX_MSG_ID_LEN + 1));
        assert!(packet.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let packet = Packet::with_payload("Big", vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(packet.validate().is_err());
    }

    #[test]
    fn test_payload_clone_is_shallow() {
        let payload = Payload::from(vec![1u8, 2, 3]);
        let other = payload.clone();
        assert_eq!(payload.as_slice(), other.as_slice());
    }
}
