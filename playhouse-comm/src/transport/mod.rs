//! Router-to-router transport: multipart frame codec and TCP socket.

mod codec;
mod socket;

pub use codec::{RouterFrame, RouterFrameCodec};
pub use socket::{RouterSocket, SocketOptions};
