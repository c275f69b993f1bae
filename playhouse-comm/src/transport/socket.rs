//! The router socket: one bound listener, one outbound link per peer.
//!
//! Connections are unidirectional. Each server accepts inbound streams
//! from any peer and opens exactly one outbound stream per peer it routes
//! to. A single writer task per link and a single reader task per accepted
//! stream preserve in-order delivery per peer.

// Layer 1: Standard library imports
use std::net::SocketAddr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::codec::{RouterFrame, RouterFrameCodec};
use crate::error::CommError;

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Outbound queue depth per peer link.
    pub send_hwm: usize,
    /// Inbound queue depth shared by all accepted streams.
    pub recv_hwm: usize,
    /// Bounded wait on a full send queue before `BufferOverflow`.
    pub hwm_wait: Duration,
    pub tcp_nodelay: bool,
    /// TCP keepalive probe interval; `None` leaves keepalive off.
    pub tcp_keepalive: Option<Duration>,
    /// SO_LINGER on peer streams.
    pub linger: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            send_hwm: 100_000,
            recv_hwm: 100_000,
            hwm_wait: Duration::from_millis(1_000),
            tcp_nodelay: true,
            tcp_keepalive: None,
            linger: None,
        }
    }
}

fn tune_stream(stream: &TcpStream, options: &SocketOptions) {
    if options.tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }
    if options.linger.is_some() {
        let _ = stream.set_linger(options.linger);
    }
    if let Some(interval) = options.tcp_keepalive {
        let sock = socket2::SockRef::from(stream);
        let _ = sock.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(interval));
    }
}

struct PeerLink {
    endpoint: String,
    tx: mpsc::Sender<RouterFrame>,
    writer: JoinHandle<()>,
}

/// Router-to-router transport endpoint.
pub struct RouterSocket {
    local_nid: String,
    options: SocketOptions,
    local_addr: SocketAddr,
    peers: DashMap<String, PeerLink>,
    accept_handle: JoinHandle<()>,
}

impl RouterSocket {
    /// Bind the listener and start accepting peer streams.
    ///
    /// Returns the socket and the inbound frame channel the communicator
    /// drains. Frames addressed to a different nid are dropped with a
    /// warning; they indicate a routing bug upstream.
    pub async fn bind(
        local_nid: impl Into<String>,
        endpoint: &str,
        options: SocketOptions,
    ) -> Result<(Self, mpsc::Receiver<RouterFrame>), CommError> {
        let local_nid = local_nid.into();
        let listener = TcpListener::bind(endpoint)
            .await
            .map_err(|source| CommError::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = mpsc::channel(options.recv_hwm);

        let accept_nid = local_nid.clone();
        let accept_options = options.clone();
        let accept_handle = tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(%error, "router accept failed");
                        continue;
                    }
                };
                tune_stream(&stream, &accept_options);
                debug!(%peer_addr, "router stream accepted");

                let tx = inbound_tx.clone();
                let local = accept_nid.clone();
                tokio::spawn(async move {
                    let mut reader = FramedRead::new(stream, RouterFrameCodec::new());
                    while let Some(next) = reader.next().await {
                        match next {
                            Ok(frame) => {
                                if frame.target_nid != local {
                                    warn!(
                                        target = %frame.target_nid,
                                        %local,
                                        "misrouted frame dropped"
                                    );
                                    continue;
                                }
                                if tx.send(frame).await.is_err() {
                                    return;
                                }
                            }
                            Err(error) => {
                                warn!(%error, %peer_addr, "router stream decode failed");
                                return;
                            }
                        }
                    }
                    debug!(%peer_addr, "router stream closed");
                });
            }
        });

        Ok((
            Self {
                local_nid,
                options,
                local_addr,
                peers: DashMap::new(),
                accept_handle,
            },
            inbound_rx,
        ))
    }

    pub fn local_nid(&self) -> &str {
        &self.local_nid
    }

    /// Actual bound endpoint (resolves port 0 binds).
    pub fn local_endpoint(&self) -> String {
        self.local_addr.to_string()
    }

    /// Open (or keep) the outbound link to `nid` at `endpoint`.
    ///
    /// Reconnecting to a new endpoint tears the old link down first.
    pub async fn connect(&self, nid: &str, endpoint: &str) -> Result<(), CommError> {
        if let Some(link) = self.peers.get(nid) {
            if link.endpoint == endpoint && !link.tx.is_closed() {
                return Ok(());
            }
        }

        let stream = TcpStream::connect(endpoint).await?;
        tune_stream(&stream, &self.options);

        let (tx, mut rx) = mpsc::channel::<RouterFrame>(self.options.send_hwm);
        let peer = nid.to_string();
        let writer = tokio::spawn(async move {
            let mut framed = FramedWrite::new(stream, RouterFrameCodec::new());
            while let Some(frame) = rx.recv().await {
                if let Err(error) = framed.send(frame).await {
                    warn!(%error, %peer, "router link write failed");
                    rx.close();
                    return;
                }
            }
        });

        let replaced = self.peers.insert(
            nid.to_string(),
            PeerLink {
                endpoint: endpoint.to_string(),
                tx,
                writer,
            },
        );
        if let Some(old) = replaced {
            old.writer.abort();
        }
        debug!(%nid, %endpoint, "router link connected");
        Ok(())
    }

    /// Queue a frame toward `to_nid`.
    ///
    /// A full queue blocks for at most `hwm_wait`, then fails with
    /// `BufferOverflow`. A dead link is removed and reported as `Closed`.
    pub async fn send(&self, to_nid: &str, frame: RouterFrame) -> Result<(), CommError> {
        let tx = {
            let link = self
                .peers
                .get(to_nid)
                .ok_or_else(|| CommError::ServerNotFound(to_nid.to_string()))?;
            link.tx.clone()
        };

        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                match tokio::time::timeout(self.options.hwm_wait, tx.send(frame)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => {
                        self.disconnect(to_nid);
                        Err(CommError::Closed(to_nid.to_string()))
                    }
                    Err(_) => Err(CommError::BufferOverflow {
                        peer: to_nid.to_string(),
                    }),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect(to_nid);
                Err(CommError::Closed(to_nid.to_string()))
            }
        }
    }

    /// Tear down the outbound link to `nid`. Idempotent.
    pub fn disconnect(&self, nid: &str) {
        if let Some((_, link)) = self.peers.remove(nid) {
            link.writer.abort();
            debug!(%nid, "router link disconnected");
        }
    }

    pub fn is_connected(&self, nid: &str) -> bool {
        self.peers
            .get(nid)
            .map(|link| !link.tx.is_closed())
            .unwrap_or(false)
    }

    /// Abort the accept loop and every link.
    pub fn shutdown(&self) {
        self.accept_handle.abort();
        let nids: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        for nid in nids {
            self.disconnect(&nid);
        }
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        self.accept_handle.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::discovery::ServiceType;
    use crate::packet::{Payload, RouteHeader};

    fn frame_to(target: &str, seq: u16) -> RouterFrame {
        let mut header = RouteHeader::to(ServiceType::Play, 1, target, "Echo");
        header.from_nid = "2:api-1".to_string();
        header.msg_seq = seq;
        RouterFrame::new(target, header, Payload::from("ping"))
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (a, _a_rx) = RouterSocket::bind("2:api-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();
        let (b, mut b_rx) = RouterSocket::bind("1:play-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();

        a.connect("1:play-1", &b.local_endpoint()).await.unwrap();
        a.send("1:play-1", frame_to("1:play-1", 1)).await.unwrap();

        let received = b_rx.recv().await.unwrap();
        assert_eq!(received.header.msg_seq, 1);
        assert_eq!(received.target_nid, "1:play-1");
    }

    #[tokio::test]
    async fn test_per_peer_ordering() {
        let (a, _a_rx) = RouterSocket::bind("2:api-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();
        let (b, mut b_rx) = RouterSocket::bind("1:play-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();
        a.connect("1:play-1", &b.local_endpoint()).await.unwrap();

        for seq in 1..=100u16 {
            a.send("1:play-1", frame_to("1:play-1", seq)).await.unwrap();
        }
        for expected in 1..=100u16 {
            let frame = b_rx.recv().await.unwrap();
            assert_eq!(frame.header.msg_seq, expected);
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let (a, _rx) = RouterSocket::bind("2:api-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();
        let result = a.send("1:ghost", frame_to("1:ghost", 1)).await;
        assert!(matches!(result, Err(CommError::ServerNotFound(_))));
    }

    #[tokio::test]
    async fn test_misrouted_frame_is_dropped() {
        let (a, _a_rx) = RouterSocket::bind("2:api-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();
        let (b, mut b_rx) = RouterSocket::bind("1:play-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();
        a.connect("1:play-1", &b.local_endpoint()).await.unwrap();

        // Addressed to somebody else entirely; b must not deliver it.
        a.send("1:play-1", frame_to("1:other", 7)).await.unwrap();
        a.send("1:play-1", frame_to("1:play-1", 8)).await.unwrap();

        let received = b_rx.recv().await.unwrap();
        assert_eq!(received.header.msg_seq, 8);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (a, _rx) = RouterSocket::bind("2:api-1", "127.0.0.1:0", SocketOptions::default())
            .await
            .unwrap();
        a.disconnect("1:play-1");
        a.disconnect("1:play-1");
        assert!(!a.is_connected("1:play-1"));
    }
}
