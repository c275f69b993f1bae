//! Multipart wire framing for the router transport.
//!
//! Each frame carries three parts, mirroring the logical multipart send:
//!
//! ```text
//! | frameLen u32 | targetLen u8 | targetNid | headerLen u16 | routeHeader proto | payload |
//! ```
//!
//! `frameLen` counts everything after itself. Header and payload sizes are
//! bounded; anything larger is a decode error, not a truncation.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// Layer 3: Internal module imports
use crate::error::CommError;
use crate::packet::{Payload, RouteHeader, MAX_PAYLOAD_LEN};

/// Route headers are small; 16 KiB of headroom is generous.
const MAX_HEADER_LEN: usize = 16 * 1024;

/// Hard ceiling for one frame on the wire.
const MAX_FRAME_LEN: usize = MAX_PAYLOAD_LEN + MAX_HEADER_LEN + 512;

/// One multipart frame: `[target | route header | payload]`.
#[derive(Debug, Clone)]
pub struct RouterFrame {
    pub target_nid: String,
    pub header: RouteHeader,
    pub payload: Payload,
}

impl RouterFrame {
    pub fn new(target_nid: impl Into<String>, header: RouteHeader, payload: Payload) -> Self {
        Self {
            target_nid: target_nid.into(),
            header,
            payload,
        }
    }
}

/// Codec for router frames over a TCP stream.
#[derive(Debug, Default)]
pub struct RouterFrameCodec;

impl RouterFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<RouterFrame> for RouterFrameCodec {
    type Error = CommError;

    fn encode(&mut self, frame: RouterFrame, dst: &mut BytesMut) -> Result<(), CommError> {
        let header_bytes = frame.header.encode_proto();
        let target = frame.target_nid.as_bytes();
        let payload = frame.payload.as_slice();

        if target.len() > u8::MAX as usize {
            return Err(CommError::InvalidMessage(format!(
                "target nid length {} exceeds 255",
                target.len()
            )));
        }
        if header_bytes.len() > MAX_HEADER_LEN {
            return Err(CommError::InvalidMessage(format!(
                "route header length {} exceeds {MAX_HEADER_LEN}",
                header_bytes.len()
            )));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CommError::InvalidMessage(format!(
                "payload size {} exceeds {MAX_PAYLOAD_LEN}",
                payload.len()
            )));
        }

        let frame_len = 1 + target.len() + 2 + header_bytes.len() + payload.len();
        dst.reserve(4 + frame_len);
        dst.put_u32_le(frame_len as u32);
        dst.put_u8(target.len() as u8);
        dst.put_slice(target);
        dst.put_u16_le(header_bytes.len() as u16);
        dst.put_slice(&header_bytes);
        dst.put_slice(payload);
        Ok(())
    }
}

impl Decoder for RouterFrameCodec {
    type Item = RouterFrame;
    type Error = CommError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RouterFrame>, CommError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut peek = &src[..];
        let frame_len = peek.get_u32_le() as usize;
        if frame_len > MAX_FRAME_LEN {
            return Err(CommError::Decode(format!(
                "router frame length {frame_len} exceeds {MAX_FRAME_LEN}"
            )));
        }
        if src.len() < 4 + frame_len {
            src.reserve(4 + frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(4 + frame_len);
        frame.advance(4);

        let target_len = frame.get_u8() as usize;
        if frame.remaining() < target_len + 2 {
            return Err(CommError::Decode("router frame truncated".to_string()));
        }
        let target_bytes = frame.split_to(target_len);
        let target_nid = std::str::from_utf8(&target_bytes)
            .map_err(|_| CommError::Decode("target nid is not valid utf-8".to_string()))?
            .to_string();

        let header_len = frame.get_u16_le() as usize;
        if frame.remaining() < header_len {
            return Err(CommError::Decode("router frame truncated".to_string()));
        }
        let header = RouteHeader::decode_proto(&frame.split_to(header_len))?;
        let payload = Payload::from(frame.freeze());

        Ok(Some(RouterFrame {
            target_nid,
            header,
            payload,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::discovery::ServiceType;

    fn sample_frame() -> RouterFrame {
        let mut header = RouteHeader::to(ServiceType::Play, 1, "1:play-1", "ChatMessage");
        header.from_nid = "3:session-1".to_string();
        header.msg_seq = 11;
        header.stage_id = 100;
        RouterFrame::new("1:play-1", header, Payload::from("hello"))
    }

    #[test]
    fn test_round_trip() {
        let frame = sample_frame();
        let mut codec = RouterFrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(frame.clone(), &mut wire).unwrap();

        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.target_nid, frame.target_nid);
        assert_eq!(decoded.header, frame.header);
        assert_eq!(decoded.payload, frame.payload);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = RouterFrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(sample_frame(), &mut wire).unwrap();

        let tail = wire.split_off(wire.len() - 3);
        assert!(codec.decode(&mut wire).unwrap().is_none());
        wire.unsplit(tail);
        assert!(codec.decode(&mut wire).unwrap().is_some());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u32_le((MAX_FRAME_LEN + 1) as u32);
        let mut codec = RouterFrameCodec::new();
        assert!(matches!(
            codec.decode(&mut wire),
            Err(CommError::Decode(_))
        ));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = RouterFrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(sample_frame(), &mut wire).unwrap();
        codec.encode(sample_frame(), &mut wire).unwrap();

        assert!(codec.decode(&mut wire).unwrap().is_some());
        assert!(codec.decode(&mut wire).unwrap().is_some());
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }
}
