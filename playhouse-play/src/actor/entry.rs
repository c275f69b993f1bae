//! Runtime record for an actor attached to a stage.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use super::traits::Actor;

/// An actor as the stage runtime sees it: the user object plus session
/// binding and authentication state.
///
/// Owned exclusively by the stage's actor registry; everything else refers
/// to the actor by `account_id`.
pub struct ActorEntry {
    account_id: i64,
    sid: u64,
    session_nid: String,
    authenticated: bool,
    connected: bool,
    pub(crate) user: Box<dyn Actor>,
}

impl ActorEntry {
    pub(crate) fn new(
        account_id: i64,
        sid: u64,
        session_nid: String,
        user: Box<dyn Actor>,
    ) -> Self {
        Self {
            account_id,
            sid,
            session_nid,
            authenticated: false,
            connected: true,
            user,
        }
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    /// Client session id on the session gateway.
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Nid of the session gateway holding the client connection.
    pub fn session_nid(&self) -> &str {
        &self.session_nid
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn set_authenticated(&mut self) {
        self.authenticated = true;
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Rebind to a new client session (reconnect / preemption).
    pub(crate) fn rebind_session(&mut self, sid: u64, session_nid: String) {
        self.sid = sid;
        self.session_nid = session_nid;
        self.connected = true;
    }
}
