//! Session registry and binding state.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use playhouse_comm::packet::Packet;
use playhouse_comm::system::DisconnectReason;
use playhouse_comm::util::SessionIdGenerator;

/// Where an authenticated session's packets go.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub account_id: i64,
    pub play_nid: String,
    pub stage_id: i64,
}

/// One live client connection as the rest of the gateway sees it.
///
/// The outbound channel is the session's single writer: everything that
/// reaches the client funnels through it in order.
pub struct SessionHandle {
    sid: u64,
    out_tx: mpsc::Sender<Packet>,
    close_tx: mpsc::Sender<DisconnectReason>,
    binding: Mutex<Option<Binding>>,
}

impl SessionHandle {
    pub fn new(
        sid: u64,
        out_tx: mpsc::Sender<Packet>,
        close_tx: mpsc::Sender<DisconnectReason>,
    ) -> Self {
        Self {
            sid,
            out_tx,
            close_tx,
            binding: Mutex::new(None),
        }
    }

    pub fn sid(&self) -> u64 {
        self.sid
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding.lock().clone()
    }

    pub fn bind(&self, binding: Binding) {
        *self.binding.lock() = Some(binding);
    }

    pub fn unbind(&self) {
        *self.binding.lock() = None;
    }

    /// Queue a packet toward the client. Returns `false` when the session
    /// is gone or its queue is full (the packet is dropped).
    pub fn push(&self, packet: Packet) -> bool {
        self.out_tx.try_send(packet).is_ok()
    }

    /// Ask the session loop to close the connection.
    pub fn close(&self, reason: DisconnectReason) {
        let _ = self.close_tx.try_send(reason);
    }
}

/// Owner of every live session, keyed by session id.
pub struct SessionRegistry {
    sessions: DashMap<u64, Arc<SessionHandle>>,
    ids: SessionIdGenerator,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            ids: SessionIdGenerator::new(),
        }
    }

    pub fn next_sid(&self) -> u64 {
        self.ids.next_id()
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.insert(handle.sid(), handle);
    }

    pub fn get(&self, sid: u64) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&sid).map(|h| Arc::clone(&h))
    }

    pub fn remove(&self, sid: u64) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(&sid).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ask every session loop to close (service shutdown).
    pub fn close_all(&self, reason: DisconnectReason) {
        for entry in self.sessions.iter() {
            entry.close(reason);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn handle(sid: u64) -> (Arc<SessionHandle>, mpsc::Receiver<Packet>) {
        let (out_tx, out_rx) = mpsc::channel(4);
        let (close_tx, _close_rx) = mpsc::channel(1);
        (Arc::new(SessionHandle::new(sid, out_tx, close_tx)), out_rx)
    }

    #[tokio::test]
    async fn test_registry_round_trip() {
        let registry = SessionRegistry::new();
        let sid = registry.next_sid();
        let (session, _rx) = handle(sid);
        registry.insert(session);

        assert!(registry.get(sid).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(sid).is_some());
        assert!(registry.get(sid).is_none());
    }

    #[tokio::test]
    async fn test_binding_lifecycle() {
        let (session, _rx) = handle(1);
        assert!(session.binding().is_none());

        session.bind(Binding {
            account_id: 7,
            play_nid: "1:play-1".to_string(),
            stage_id: 100,
        });
        assert_eq!(session.binding().unwrap().account_id, 7);

        session.unbind();
        assert!(session.binding().is_none());
    }

    #[tokio::test]
    async fn test_push_drops_when_full() {
        let (session, mut rx) = handle(1);
        for _ in 0..4 {
            assert!(session.push(Packet::of("Tick")));
        }
        // Queue depth is 4; the fifth is dropped, not blocked on.
        assert!(!session.push(Packet::of("Tick")));

        assert_eq!(rx.recv().await.unwrap().msg_id(), "Tick");
    }
}
