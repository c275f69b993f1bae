//! Inbound packet sink implemented by each service.

use crate::packet::RoutePacket;

/// Receives the non-reply packets addressed to this server.
///
/// Implementations must not block: hand the packet to a mailbox or spawn a
/// task and return. The communicator calls this from its single demux
/// loop, so a stalled dispatcher stalls the whole inbound path.
pub trait PacketDispatcher: Send + Sync + 'static {
    fn on_packet(&self, packet: RoutePacket);
}
