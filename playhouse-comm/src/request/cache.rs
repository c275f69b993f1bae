//! Pending-request table keyed by `(peer_nid, msg_seq)`.
//!
//! The 16-bit sequence wraps; keying on the peer as well keeps entries
//! unambiguous across the mesh as long as fewer than 65535 requests to the
//! same peer are in flight, which the sender-side counter guarantees.

// Layer 1: Standard library imports
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

// Layer 3: Internal module imports
use crate::error::CommError;
use crate::packet::RoutePacket;

type RequestKey = (String, u16);
type ReplyResult = Result<RoutePacket, CommError>;

struct PendingRequest {
    tx: oneshot::Sender<ReplyResult>,
    created_at: Instant,
    timeout_task: JoinHandle<()>,
}

/// Correlates outbound requests to inbound replies.
///
/// Every entry is resolved exactly once, by whichever of reply, failure,
/// cancel, or timeout removes it from the map first; the removal is the
/// linearization point.
#[derive(Clone)]
pub struct RequestCache {
    pending: Arc<DashMap<RequestKey, PendingRequest>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Register a pending request and arm its timeout.
    ///
    /// Fails with `InvalidMessage` if `(peer, seq)` is already registered.
    pub fn register(
        &self,
        peer: &str,
        seq: u16,
        timeout: Duration,
    ) -> Result<ReplyFuture, CommError> {
        let key = (peer.to_string(), seq);
        if self.pending.contains_key(&key) {
            return Err(CommError::InvalidMessage(format!(
                "request seq {seq} toward {peer} already pending"
            )));
        }

        let (tx, rx) = oneshot::channel();
        let cache = self.clone();
        let peer_owned = peer.to_string();
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cache.fail(&peer_owned, seq, CommError::RequestTimeout(timeout));
        });

        let entry = PendingRequest {
            tx,
            created_at: Instant::now(),
            timeout_task,
        };
        if self.pending.insert(key.clone(), entry).is_some() {
            // Lost a race with a concurrent register of the same key; the
            // displaced entry is unresolvable, which the seq counter makes
            // unreachable in practice.
            return Err(CommError::InvalidMessage(format!(
                "request seq {seq} toward {peer} registered concurrently"
            )));
        }
        Ok(ReplyFuture { rx, key })
    }

    /// Resolve a pending request with its reply. Late replies are a no-op.
    pub fn complete(&self, peer: &str, seq: u16, packet: RoutePacket) {
        let key = (peer.to_string(), seq);
        if let Some((_, pending)) = self.pending.remove(&key) {
            trace!(
                peer,
                seq,
                elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                "request completed"
            );
            let _ = pending.tx.send(Ok(packet));
            pending.timeout_task.abort();
        } else {
            trace!(peer, seq, "late reply dropped");
        }
    }

    /// Resolve a pending request with an error. Absent entries are a no-op.
    pub fn fail(&self, peer: &str, seq: u16, error: CommError) {
        let key = (peer.to_string(), seq);
        if let Some((_, pending)) = self.pending.remove(&key) {
            let _ = pending.tx.send(Err(error));
            pending.timeout_task.abort();
        }
    }

    /// Cancel one pending request.
    pub fn cancel(&self, peer: &str, seq: u16) {
        self.fail(peer, seq, CommError::Canceled);
    }

    /// Fail every request pending toward `peer`; returns how many resolved.
    ///
    /// Used when discovery evicts a server while requests to it are in
    /// flight.
    pub fn fail_peer(&self, peer: &str) -> usize {
        let keys: Vec<RequestKey> = self
            .pending
            .iter()
            .filter(|entry| entry.key().0 == peer)
            .map(|entry| entry.key().clone())
            .collect();
        let count = keys.len();
        for (peer, seq) in keys {
            self.fail(&peer, seq, CommError::ServerNotFound(peer.clone()));
        }
        count
    }

    /// Cancel everything; called once at shutdown.
    pub fn cancel_all(&self) {
        let keys: Vec<RequestKey> = self.pending.iter().map(|e| e.key().clone()).collect();
        for (peer, seq) in keys {
            self.cancel(&peer, seq);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion future handed to the requester.
///
/// Resolves with the reply packet, the mapped failure, or
/// [`CommError::Canceled`] if the cache itself was dropped mid-flight.
pub struct ReplyFuture {
    rx: oneshot::Receiver<ReplyResult>,
    key: RequestKey,
}

impl ReplyFuture {
    /// Peer nid this request is pending toward.
    pub fn peer(&self) -> &str {
        &self.key.0
    }

    /// Sequence of this request, for targeted cancellation.
    pub fn seq(&self) -> u16 {
        self.key.1
    }
}

impl Future for ReplyFuture {
    type Output = ReplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
