//! The communicator: everything a service needs to talk to the mesh.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::dispatcher::PacketDispatcher;
use crate::config::CommConfig;
use crate::discovery::{
    DiscoveryController, ServerChange, ServerInfoCenter, ServerInfoProvider,
};
use crate::error::CommError;
use crate::packet::{Payload, RouteHeader, RoutePacket};
use crate::request::{ReplyFuture, RequestCache};
use crate::transport::{RouterFrame, RouterSocket};
use crate::util::MsgSeqCounter;

/// Connects the router socket, info center, request cache and discovery
/// into one mesh endpoint.
///
/// Outbound: [`send`](Communicator::send) and
/// [`request`](Communicator::request) route by destination nid, opening
/// peer links on demand from the info center. Inbound: replies resolve
/// their pending request; everything else goes to the registered
/// [`PacketDispatcher`] (system packets to the system dispatcher when one
/// is set).
pub struct Communicator {
    config: CommConfig,
    nid: String,
    socket: RouterSocket,
    center: Arc<ServerInfoCenter>,
    cache: RequestCache,
    seq: MsgSeqCounter,
    dispatcher: RwLock<Option<Arc<dyn PacketDispatcher>>>,
    system_dispatcher: RwLock<Option<Arc<dyn PacketDispatcher>>>,
    discovery: DiscoveryController,
    pump: RwLock<Option<JoinHandle<()>>>,
}

impl Communicator {
    /// Bind the router socket, start discovery, and begin pumping.
    pub async fn start(
        config: CommConfig,
        provider: Arc<dyn ServerInfoProvider>,
    ) -> Result<Arc<Self>, CommError> {
        config.validate()?;

        let nid = config.nid();
        let (socket, inbound_rx) =
            RouterSocket::bind(nid.clone(), &config.bind_endpoint, config.socket_options())
                .await?;
        let center = Arc::new(ServerInfoCenter::new(config.server_ttl));
        let self_info = config.to_server_info(socket.local_endpoint());
        let (discovery, changes_rx) = DiscoveryController::start(
            provider,
            Arc::clone(&center),
            self_info,
            config.discovery_interval,
        );

        let communicator = Arc::new(Self {
            config,
            nid,
            socket,
            center,
            cache: RequestCache::new(),
            seq: MsgSeqCounter::new(),
            dispatcher: RwLock::new(None),
            system_dispatcher: RwLock::new(None),
            discovery,
            pump: RwLock::new(None),
        });

        let pump = tokio::spawn(Self::pump(
            Arc::clone(&communicator),
            inbound_rx,
            changes_rx,
        ));
        *communicator.pump.write() = Some(pump);
        Ok(communicator)
    }

    /// Register the service's packet sink. Must happen before peers start
    /// sending, i.e. right after `start`.
    pub fn register_dispatcher(&self, dispatcher: Arc<dyn PacketDispatcher>) {
        *self.dispatcher.write() = Some(dispatcher);
    }

    /// Optional separate sink for `is_system` packets.
    pub fn register_system_dispatcher(&self, dispatcher: Arc<dyn PacketDispatcher>) {
        *self.system_dispatcher.write() = Some(dispatcher);
    }

    pub fn nid(&self) -> &str {
        &self.nid
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    /// Resolved router endpoint (useful when binding to port 0).
    pub fn local_endpoint(&self) -> String {
        self.socket.local_endpoint()
    }

    pub fn center(&self) -> &Arc<ServerInfoCenter> {
        &self.center
    }

    pub fn request_cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Fire-and-forget send to `header.to_nid`.
    pub async fn send(&self, mut header: RouteHeader, payload: Payload) -> Result<(), CommError> {
        header.from_nid = self.nid.clone();
        let to = header.to_nid.clone();
        self.ensure_link(&to).await?;
        self.socket
            .send(&to, RouterFrame::new(to.clone(), header, payload))
            .await
    }

    /// Send a request and hand back the reply future.
    ///
    /// The future always resolves: with the reply, with the send failure
    /// mapped onto it (`ServerNotFound` for unknown destinations), or with
    /// `RequestTimeout` at the deadline.
    pub async fn request(
        &self,
        header: RouteHeader,
        payload: Payload,
    ) -> Result<ReplyFuture, CommError> {
        self.request_with_timeout(header, payload, self.config.request_timeout)
            .await
    }

    /// [`request`](Communicator::request) with an explicit deadline.
    pub async fn request_with_timeout(
        &self,
        mut header: RouteHeader,
        payload: Payload,
        timeout: Duration,
    ) -> Result<ReplyFuture, CommError> {
        let seq = self.seq.next_seq();
        header.msg_seq = seq;
        header.flags.is_reply = false;
        let to = header.to_nid.clone();

        let future = self.cache.register(&to, seq, timeout)?;
        if let Err(error) = self.send(header, payload).await {
            warn!(%error, %to, seq, "request send failed; resolving synthetically");
            let synthetic = match error {
                CommError::ServerNotFound(nid) => CommError::ServerNotFound(nid),
                other => other,
            };
            self.cache.fail(&to, seq, synthetic);
        }
        Ok(future)
    }

    /// Reply to `request` with `msg_id`, `error_code` and `payload`.
    pub async fn reply_to(
        &self,
        request: &RouteHeader,
        msg_id: impl Into<String>,
        error_code: u16,
        payload: Payload,
    ) -> Result<(), CommError> {
        let header = request.reply(msg_id, error_code);
        self.send(header, payload).await
    }

    /// Error reply carrying the request's own msg id and no payload.
    pub async fn reply_error(&self, request: &RouteHeader, error_code: u16) {
        if !request.is_request() {
            return;
        }
        let msg_id = request.msg_id.clone();
        if let Err(error) = self.reply_to(request, msg_id, error_code, Payload::empty()).await {
            warn!(%error, to = %request.from_nid, "error reply could not be delivered");
        }
    }

    /// Stop discovery, cancel pending requests, close every link.
    pub async fn shutdown(&self) {
        self.discovery.stop();
        if let Some(pump) = self.pump.write().take() {
            pump.abort();
        }
        self.cache.cancel_all();
        self.socket.shutdown();
    }

    async fn pump(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<RouterFrame>,
        mut changes: mpsc::Receiver<Vec<ServerChange>>,
    ) {
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_inbound(frame).await,
                    None => break,
                },
                batch = changes.recv() => match batch {
                    Some(batch) => self.handle_changes(batch).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_changes(&self, batch: Vec<ServerChange>) {
        for change in batch {
            match change {
                ServerChange::Added(info) | ServerChange::Updated(info) => {
                    let nid = info.nid();
                    if nid == self.nid {
                        continue;
                    }
                    if let Err(error) = self.socket.connect(&nid, &info.endpoint).await {
                        // The send path retries lazily from the info center.
                        warn!(%error, %nid, endpoint = %info.endpoint, "peer connect failed");
                    }
                }
                ServerChange::Removed(info) => {
                    let nid = info.nid();
                    self.socket.disconnect(&nid);
                    let failed = self.cache.fail_peer(&nid);
                    if failed > 0 {
                        debug!(%nid, failed, "failed pending requests toward removed peer");
                    }
                }
            }
        }
    }

    async fn handle_inbound(&self, frame: RouterFrame) {
        let RouterFrame {
            header, payload, ..
        } = frame;

        if header.flags.is_reply {
            let from_nid = header.from_nid.clone();
            let msg_seq = header.msg_seq;
            self.cache
                .complete(&from_nid, msg_seq, RoutePacket::new(header, payload));
            return;
        }

        let packet = RoutePacket::new(header, payload);
        let sink = if packet.header.flags.is_system {
            self.system_dispatcher
                .read()
                .clone()
                .or_else(|| self.dispatcher.read().clone())
        } else {
            self.dispatcher.read().clone()
        };

        match sink {
            Some(dispatcher) => dispatcher.on_packet(packet),
            None => {
                warn!(
                    msg_id = %packet.header.msg_id,
                    from = %packet.header.from_nid,
                    "no dispatcher registered; packet dropped"
                );
                self.reply_error(
                    &packet.header,
                    crate::error::ErrorCode::ServerNotFound.as_u16(),
                )
                .await;
            }
        }
    }

    async fn ensure_link(&self, to_nid: &str) -> Result<(), CommError> {
        if self.socket.is_connected(to_nid) {
            return Ok(());
        }
        match self.center.find_by_nid(to_nid) {
            Some(info) => self.socket.connect(to_nid, &info.endpoint).await,
            None => Err(CommError::ServerNotFound(to_nid.to_string())),
        }
    }
}
