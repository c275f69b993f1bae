//! Packet value, client frame codec, and inter-server route header.

mod frame;
mod message;
mod route;

pub use frame::{decode_server_frame, encode_client_frame, ClientFrameCodec};
pub use message::{
    Packet, Payload, DEBUG_MSG_ID, HEARTBEAT_MSG_ID, MAX_MSG_ID_LEN, MAX_PAYLOAD_LEN,
    TIMEOUT_MSG_ID,
};
pub use route::{RouteFlags, RouteHeader, RouteHeaderProto, RoutePacket};
