//! Listeners, per-session loops, and mesh forwarding.

// Layer 1: Standard library imports
use std::net::SocketAddr;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use crate::config::SessionConfig;
use crate::dispatcher::SessionDispatcher;
use crate::error::SessionError;
use crate::session::{SessionHandle, SessionRegistry};
use crate::transport::{load_tls_acceptor, split_socket, split_ws, ClientRx, ClientSink};
use playhouse_comm::communicator::{Communicator, PacketDispatcher};
use playhouse_comm::discovery::{ServerInfoProvider, ServiceType};
use playhouse_comm::error::{CommError, ErrorCode};
use playhouse_comm::packet::{Packet, RouteHeader};
use playhouse_comm::system::{self, DisconnectReason, StageActorMsg, SESSION_CLOSED_ID};

/// Outbound queue depth per session; a client that cannot drain its
/// pushes this far behind starts losing them.
const OUTBOUND_QUEUE: usize = 256;

/// Resolved listener addresses, useful with port-0 binds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundAddrs {
    pub tcp: Option<SocketAddr>,
    pub tls: Option<SocketAddr>,
    pub ws: Option<SocketAddr>,
    pub wss: Option<SocketAddr>,
}

pub(crate) struct GatewayInner {
    pub(crate) config: SessionConfig,
    pub(crate) comm: Arc<Communicator>,
    pub(crate) registry: SessionRegistry,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    addrs: Mutex<BoundAddrs>,
}

/// The client-facing gateway service.
pub struct SessionGateway {
    inner: Arc<GatewayInner>,
}

impl SessionGateway {
    /// Join the mesh and bring up every enabled client listener.
    pub async fn start(
        config: SessionConfig,
        provider: Arc<dyn ServerInfoProvider>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let comm = Communicator::start(config.comm.clone(), provider)
            .await
            .map_err(SessionError::Comm)?;
        let inner = Arc::new(GatewayInner {
            config,
            comm: Arc::clone(&comm),
            registry: SessionRegistry::new(),
            listeners: Mutex::new(Vec::new()),
            addrs: Mutex::new(BoundAddrs::default()),
        });
        comm.register_dispatcher(
            Arc::new(SessionDispatcher::new(Arc::clone(&inner))) as Arc<dyn PacketDispatcher>
        );

        let tls_acceptor = match (&inner.config.cert_path, &inner.config.key_path) {
            (Some(cert), Some(key))
                if inner.config.tls_port.is_some() || inner.config.wss_port.is_some() =>
            {
                Some(load_tls_acceptor(cert, key)?)
            }
            _ => None,
        };

        if let Some(port) = inner.config.tcp_port {
            let listener = Self::bind(&inner.config.bind_host, port).await?;
            inner.addrs.lock().tcp = Some(listener.local_addr()?);
            let task = tokio::spawn(accept_plain(Arc::clone(&inner), listener, false));
            inner.listeners.lock().push(task);
        }
        if let Some(port) = inner.config.ws_port {
            let listener = Self::bind(&inner.config.bind_host, port).await?;
            inner.addrs.lock().ws = Some(listener.local_addr()?);
            let task = tokio::spawn(accept_plain(Arc::clone(&inner), listener, true));
            inner.listeners.lock().push(task);
        }
        if let Some(port) = inner.config.tls_port {
            let listener = Self::bind(&inner.config.bind_host, port).await?;
            inner.addrs.lock().tls = Some(listener.local_addr()?);
            let acceptor = tls_acceptor.clone().ok_or_else(|| {
                SessionError::Config("tls listener without certificates".to_string())
            })?;
            let task = tokio::spawn(accept_tls(Arc::clone(&inner), listener, acceptor, false));
            inner.listeners.lock().push(task);
        }
        if let Some(port) = inner.config.wss_port {
            let listener = Self::bind(&inner.config.bind_host, port).await?;
            inner.addrs.lock().wss = Some(listener.local_addr()?);
            let acceptor = tls_acceptor.ok_or_else(|| {
                SessionError::Config("wss listener without certificates".to_string())
            })?;
            let task = tokio::spawn(accept_tls(Arc::clone(&inner), listener, acceptor, true));
            inner.listeners.lock().push(task);
        }

        let addrs = *inner.addrs.lock();
        info!(nid = comm.nid(), ?addrs, "session gateway started");
        Ok(Self { inner })
    }

    pub fn addrs(&self) -> BoundAddrs {
        *self.inner.addrs.lock()
    }

    pub fn nid(&self) -> &str {
        self.inner.comm.nid()
    }

    pub fn communicator(&self) -> &Arc<Communicator> {
        &self.inner.comm
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Stop accepting, close every session, leave the mesh.
    pub async fn shutdown(&self) {
        for task in self.inner.listeners.lock().drain(..) {
            task.abort();
        }
        self.inner
            .registry
            .close_all(DisconnectReason::ServerShutdown);
        self.inner.comm.shutdown().await;
        info!(nid = self.inner.comm.nid(), "session gateway stopped");
    }

    async fn bind(host: &str, port: u16) -> Result<TcpListener, SessionError> {
        let endpoint = format!("{host}:{port}");
        TcpListener::bind(&endpoint)
            .await
            .map_err(|source| SessionError::Comm(CommError::Bind { endpoint, source }))
    }
}

async fn accept_plain(inner: Arc<GatewayInner>, listener: TcpListener, websocket: bool) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "client accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            if websocket {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => {
                        let (sink, rx) = split_ws(ws);
                        run_session(inner, sink, rx, "ws", peer).await;
                    }
                    Err(error) => debug!(%error, %peer, "websocket handshake failed"),
                }
            } else {
                let (sink, rx) = split_socket(stream);
                run_session(inner, sink, rx, "tcp", peer).await;
            }
        });
    }
}

async fn accept_tls(
    inner: Arc<GatewayInner>,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    websocket: bool,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "client accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let inner = Arc::clone(&inner);
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(error) => {
                    debug!(%error, %peer, "tls handshake failed");
                    return;
                }
            };
            if websocket {
                match tokio_tungstenite::accept_async(tls).await {
                    Ok(ws) => {
                        let (sink, rx) = split_ws(ws);
                        run_session(inner, sink, rx, "wss", peer).await;
                    }
                    Err(error) => debug!(%error, %peer, "websocket handshake failed"),
                }
            } else {
                let (sink, rx) = split_socket(tls);
                run_session(inner, sink, rx, "tls", peer).await;
            }
        });
    }
}

async fn run_session(
    inner: Arc<GatewayInner>,
    mut sink: ClientSink,
    mut rx: ClientRx,
    transport: &'static str,
    peer: SocketAddr,
) {
    let sid = inner.registry.next_sid();
    let (out_tx, mut out_rx) = mpsc::channel::<Packet>(OUTBOUND_QUEUE);
    let (close_tx, mut close_rx) = mpsc::channel::<DisconnectReason>(1);
    let handle = Arc::new(SessionHandle::new(sid, out_tx, close_tx));
    inner.registry.insert(Arc::clone(&handle));
    debug!(sid, transport, %peer, "session opened");

    let writer = tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            if sink.send(packet).await.is_err() {
                break;
            }
        }
    });

    let ttl = inner.config.heartbeat_ttl();
    let reason = loop {
        let idle = tokio::time::sleep(ttl);
        tokio::select! {
            next = rx.next() => match next {
                Some(Ok(packet)) => {
                    handle_client_packet(&inner, &handle, packet).await;
                }
                Some(Err(error)) => {
                    debug!(sid, %error, "session read failed");
                    break DisconnectReason::ClientClose;
                }
                None => break DisconnectReason::ClientClose,
            },
            reason = close_rx.recv() => {
                break reason.unwrap_or(DisconnectReason::ServerShutdown);
            }
            _ = idle => break DisconnectReason::ConnectionTimeout,
        }
    };

    inner.registry.remove(sid);
    writer.abort();
    if let Some(binding) = handle.binding() {
        let msg = StageActorMsg {
            stage_id: binding.stage_id,
            account_id: binding.account_id,
            sid,
            reason: reason.as_i32(),
        };
        let mut header = RouteHeader::to(
            ServiceType::Play,
            nid_service_id(&binding.play_nid),
            binding.play_nid.clone(),
            SESSION_CLOSED_ID,
        );
        header.flags.is_base = true;
        header.sid = sid;
        header.account_id = binding.account_id;
        header.stage_id = binding.stage_id;
        if let Err(error) = inner.comm.send(header, system::encode(&msg)).await {
            warn!(sid, %error, "session close notification failed");
        }
    }
    debug!(sid, ?reason, "session closed");
}

async fn handle_client_packet(
    inner: &Arc<GatewayInner>,
    handle: &Arc<SessionHandle>,
    packet: Packet,
) {
    if packet.is_heartbeat() {
        handle.push(Packet::of(playhouse_comm::packet::HEARTBEAT_MSG_ID));
        return;
    }
    if packet.is_debug() {
        debug!(sid = handle.sid(), "debug frame dropped");
        return;
    }
    if let Err(error) = packet.validate() {
        warn!(sid = handle.sid(), %error, "invalid client frame");
        if packet.is_request() {
            handle.push(
                Packet::of(packet.msg_id())
                    .with_seq(packet.msg_seq())
                    .with_error(ErrorCode::InvalidMessage.as_u16()),
            );
        }
        return;
    }

    let (to_nid, service_type, stage_id, account_id) = match handle.binding() {
        Some(binding) => {
            let stage_id = if packet.stage_id() != 0 {
                packet.stage_id()
            } else {
                binding.stage_id
            };
            (
                binding.play_nid,
                ServiceType::Play,
                stage_id,
                binding.account_id,
            )
        }
        None => match inner
            .comm
            .center()
            .find_round_robin(inner.config.api_service_id)
        {
            Some(info) => (info.nid(), ServiceType::Api, packet.stage_id(), 0),
            None => {
                debug!(sid = handle.sid(), "no api server for unbound session");
                if packet.is_request() {
                    handle.push(
                        Packet::of(packet.msg_id())
                            .with_seq(packet.msg_seq())
                            .with_error(ErrorCode::ServerNotFound.as_u16()),
                    );
                }
                return;
            }
        },
    };

    let mut header = RouteHeader::to(
        service_type,
        nid_service_id(&to_nid),
        to_nid,
        packet.msg_id(),
    );
    header.stage_id = stage_id;
    header.account_id = account_id;
    header.sid = handle.sid();

    if packet.is_request() {
        let client_seq = packet.msg_seq();
        let msg_id = packet.msg_id().to_string();
        let handle = Arc::clone(handle);
        match inner.comm.request(header, packet.into_payload()).await {
            Ok(future) => {
                // Correlate the mesh reply back onto the client's own seq.
                tokio::spawn(async move {
                    let response = match future.await {
                        Ok(reply) => Packet::with_payload(
                            reply.header.msg_id.clone(),
                            reply.payload,
                        )
                        .with_seq(client_seq)
                        .with_stage(reply.header.stage_id)
                        .with_error(reply.header.error_code),
                        Err(error) => Packet::of(msg_id)
                            .with_seq(client_seq)
                            .with_error(error.error_code().as_u16()),
                    };
                    handle.push(response);
                });
            }
            Err(error) => {
                handle.push(
                    Packet::of(msg_id)
                        .with_seq(client_seq)
                        .with_error(error.error_code().as_u16()),
                );
            }
        }
    } else if let Err(error) = inner.comm.send(header, packet.into_payload()).await {
        debug!(sid = handle.sid(), %error, "client push not delivered");
    }
}

/// Service id embedded in a nid (`"{service_id}:{server_id}"`).
pub(crate) fn nid_service_id(nid: &str) -> u16 {
    nid.split(':')
        .next()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}
