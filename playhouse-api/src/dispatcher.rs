//! Runs registered handlers, one task per inbound packet.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::sync::OnceLock;

// Layer 2: Third-party crate imports
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::handler::HandlerRegistry;
use crate::sender::ApiSender;
use playhouse_comm::communicator::{Communicator, PacketDispatcher};
use playhouse_comm::error::ErrorCode;
use playhouse_comm::packet::{Packet, Payload, RoutePacket};

/// Stateless packet sink for the api service.
///
/// Each inbound packet spawns its own task: api calls are independent,
/// unordered, and never share mutable state through the dispatcher.
/// Unknown msg ids answer `HandlerNotFound`; a handler error answers its
/// code; a handler that returns without replying answers success, so every
/// request gets exactly one reply.
pub struct ApiDispatcher {
    registry: Arc<HandlerRegistry>,
    comm: OnceLock<Arc<Communicator>>,
}

impl ApiDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            comm: OnceLock::new(),
        })
    }

    pub fn attach(&self, comm: Arc<Communicator>) {
        let _ = self.comm.set(comm);
    }
}

impl PacketDispatcher for ApiDispatcher {
    fn on_packet(&self, packet: RoutePacket) {
        let Some(comm) = self.comm.get().cloned() else {
            return;
        };
        let RoutePacket { header, payload } = packet;

        let Some(handler) = self.registry.get(&header.msg_id) else {
            debug!(msg_id = %header.msg_id, from = %header.from_nid, "no handler registered");
            if header.is_request() {
                let comm = Arc::clone(&comm);
                tokio::spawn(async move {
                    comm.reply_error(&header, ErrorCode::HandlerNotFound.as_u16())
                        .await;
                });
            }
            return;
        };

        let user_packet = Packet::with_payload(header.msg_id.clone(), payload)
            .with_seq(header.msg_seq)
            .with_stage(header.stage_id);
        let sender = ApiSender::new(Arc::clone(&comm), header.clone());

        tokio::spawn(async move {
            let result = handler(user_packet, sender.clone()).await;
            if !header.is_request() {
                if let Err(error) = result {
                    warn!(msg_id = %header.msg_id, %error, "push handler failed");
                }
                return;
            }
            match result {
                Ok(()) => {
                    if !sender.mark_replied() {
                        // Handler never replied; acknowledge with success.
                        if let Err(error) = comm
                            .reply_to(&header, header.msg_id.clone(), 0, Payload::empty())
                            .await
                        {
                            warn!(%error, "auto-ack failed");
                        }
                    }
                }
                Err(error) => {
                    warn!(msg_id = %header.msg_id, %error, "api handler failed");
                    if !sender.has_replied() {
                        comm.reply_error(&header, error.code()).await;
                    }
                }
            }
        });
    }
}
