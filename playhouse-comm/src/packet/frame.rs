//! Client-facing wire framing.
//!
//! Little-endian layout, shared by TCP, TLS and WebSocket transports:
//!
//! ```text
//! client -> server: | bodySize u32 | msgIdLen u8 | msgId | msgSeq u16 | stageId i64 | payload |
//! server -> client: | bodySize u32 | msgIdLen u8 | msgId | msgSeq u16 | stageId i64 |
//!                   | errorCode u16 | originalSize u32 | payload |
//! ```
//!
//! The minimum client->server frame is 15 bytes of header, server->client 21.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// Layer 3: Internal module imports
use super::message::{Packet, Payload, MAX_PAYLOAD_LEN};
use crate::error::CommError;

/// Fixed header bytes in a client->server frame, excluding the msg id.
const INBOUND_FIXED_LEN: usize = 4 + 1 + 2 + 8;

/// A msg id must fit the one-byte length prefix.
const FRAME_MSG_ID_MAX: usize = u8::MAX as usize;

/// Server-side codec: decodes client->server frames, encodes
/// server->client frames.
///
/// One instance per session; the decoder keeps no state beyond the
/// accumulation buffer handed in by `Framed`.
#[derive(Debug, Default)]
pub struct ClientFrameCodec;

impl ClientFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ClientFrameCodec {
    type Item = Packet;
    type Error = CommError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CommError> {
        if src.len() < 5 {
            return Ok(None);
        }

        let mut peek = &src[..];
        let body_size = peek.get_u32_le() as usize;
        let id_len = peek.get_u8() as usize;

        if body_size > MAX_PAYLOAD_LEN {
            return Err(CommError::InvalidMessage(format!(
                "frame body {body_size} exceeds {MAX_PAYLOAD_LEN}"
            )));
        }

        let total = INBOUND_FIXED_LEN + id_len + body_size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(5);
        let msg_id_bytes = frame.split_to(id_len);
        let msg_id = std::str::from_utf8(&msg_id_bytes)
            .map_err(|_| CommError::Decode("msg id is not valid utf-8".to_string()))?
            .to_string();
        let msg_seq = frame.get_u16_le();
        let stage_id = frame.get_i64_le();
        let payload = Payload::from(frame.freeze());

        Ok(Some(
            Packet::with_payload(msg_id, payload)
                .with_seq(msg_seq)
                .with_stage(stage_id),
        ))
    }
}

impl Encoder<Packet> for ClientFrameCodec {
    type Error = CommError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CommError> {
        packet.validate()?;
        if packet.msg_id().len() > FRAME_MSG_ID_MAX {
            return Err(CommError::InvalidMessage(format!(
                "msg_id length {} does not fit the frame length prefix",
                packet.msg_id().len()
            )));
        }

        let body = packet.payload().as_slice();
        dst.reserve(21 + packet.msg_id().len() + body.len());
        dst.put_u32_le(body.len() as u32);
        dst.put_u8(packet.msg_id().len() as u8);
        dst.put_slice(packet.msg_id().as_bytes());
        dst.put_u16_le(packet.msg_seq());
        dst.put_i64_le(packet.stage_id());
        dst.put_u16_le(packet.error_code());
        dst.put_u32_le(packet.original_size());
        dst.put_slice(body);
        Ok(())
    }
}

/// Encode a client->server frame the way a game client would.
///
/// Used by tests and reference clients; the gateway itself only decodes
/// this direction.
pub fn encode_client_frame(packet: &Packet, dst: &mut BytesMut) -> Result<(), CommError> {
    packet.validate()?;
    if packet.msg_id().len() > FRAME_MSG_ID_MAX {
        return Err(CommError::InvalidMessage(format!(
            "msg_id length {} does not fit the frame length prefix",
            packet.msg_id().len()
        )));
    }

    let body = packet.payload().as_slice();
    dst.reserve(INBOUND_FIXED_LEN + packet.msg_id().len() + body.len());
    dst.put_u32_le(body.len() as u32);
    dst.put_u8(packet.msg_id().len() as u8);
    dst.put_slice(packet.msg_id().as_bytes());
    dst.put_u16_le(packet.msg_seq());
    dst.put_i64_le(packet.stage_id());
    dst.put_slice(body);
    Ok(())
}

/// Decode a server->client frame the way a game client would.
pub fn decode_server_frame(src: &mut BytesMut) -> Result<Option<Packet>, CommError> {
    if src.len() < 5 {
        return Ok(None);
    }

    let mut peek = &src[..];
    let body_size = peek.get_u32_le() as usize;
    let id_len = peek.get_u8() as usize;

    if body_size > MAX_PAYLOAD_LEN {
        return Err(CommError::InvalidMessage(format!(
            "frame body {body_size} exceeds {MAX_PAYLOAD_LEN}"
        )));
    }

    let total = 21 + id_len + body_size;
    if src.len() < total {
        return Ok(None);
    }

    let mut frame = src.split_to(total);
    frame.advance(5);
    let msg_id_bytes = frame.split_to(id_len);
    let msg_id = std::str::from_utf8(&msg_id_bytes)
        .map_err(|_| CommError::Decode("msg id is not valid utf-8".to_string()))?
        .to_string();
    let msg_seq = frame.get_u16_le();
    let stage_id = frame.get_i64_le();
    let error_code = frame.get_u16_le();
    let original_size = frame.get_u32_le();
    let payload: Bytes = frame.freeze();

    Ok(Some(
        Packet::with_payload(msg_id, payload)
            .with_seq(msg_seq)
            .with_stage(stage_id)
            .with_error(error_code)
            .with_original_size(original_size),
    ))
}
