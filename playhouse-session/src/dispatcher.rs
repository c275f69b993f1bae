//! Mesh-to-client demultiplexing.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::gateway::GatewayInner;
use crate::session::Binding;
use playhouse_comm::communicator::PacketDispatcher;
use playhouse_comm::packet::{Packet, RoutePacket};
use playhouse_comm::system::{
    self, BindSessionMsg, DisconnectReason, KickSessionMsg, BIND_SESSION_ID, KICK_SESSION_ID,
};

/// Receives everything the mesh sends this gateway: bind and kick
/// notifications, plus packets destined for connected clients (addressed
/// by `sid` in the route header).
pub struct SessionDispatcher {
    inner: Arc<GatewayInner>,
}

impl SessionDispatcher {
    pub(crate) fn new(inner: Arc<GatewayInner>) -> Self {
        Self { inner }
    }
}

impl PacketDispatcher for SessionDispatcher {
    fn on_packet(&self, packet: RoutePacket) {
        let RoutePacket { header, payload } = packet;

        if header.flags.is_base {
            match header.msg_id.as_str() {
                BIND_SESSION_ID => match system::decode::<BindSessionMsg>(&payload) {
                    Ok(msg) => {
                        let Some(session) = self.inner.registry.get(msg.sid) else {
                            debug!(sid = msg.sid, "bind for unknown session");
                            return;
                        };
                        session.bind(Binding {
                            account_id: msg.account_id,
                            play_nid: msg.play_nid,
                            stage_id: msg.stage_id,
                        });
                        debug!(sid = msg.sid, account_id = msg.account_id, "session bound");
                    }
                    Err(error) => warn!(%error, "malformed bind notification"),
                },
                KICK_SESSION_ID => match system::decode::<KickSessionMsg>(&payload) {
                    Ok(msg) => {
                        let Some(session) = self.inner.registry.get(msg.sid) else {
                            return;
                        };
                        let reason = DisconnectReason::from_i32(msg.reason);
                        session.unbind();
                        // A replaced or shut-down session loses the socket
                        // too; a closed stage only unbinds.
                        if matches!(
                            reason,
                            DisconnectReason::Replaced | DisconnectReason::ServerShutdown
                        ) {
                            session.close(reason);
                        }
                        debug!(sid = msg.sid, ?reason, "session kicked");
                    }
                    Err(error) => warn!(%error, "malformed kick notification"),
                },
                other => debug!(msg_id = other, "unhandled base message"),
            }
            return;
        }

        let Some(session) = self.inner.registry.get(header.sid) else {
            debug!(sid = header.sid, msg_id = %header.msg_id, "packet for gone session dropped");
            return;
        };
        let client_packet = Packet::with_payload(header.msg_id.clone(), payload)
            .with_seq(header.msg_seq)
            .with_stage(header.stage_id)
            .with_error(header.error_code);
        if !session.push(client_packet) {
            warn!(sid = header.sid, "session outbound queue full; packet dropped");
        }
    }
}
