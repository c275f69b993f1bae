//! Messages flowing through a stage mailbox.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use super::timer::TimerId;
use playhouse_comm::packet::{Packet, Payload, RouteHeader};
use playhouse_comm::system::DisconnectReason;

/// One unit of stage work. Strict FIFO per stage.
///
/// Messages carrying a `RouteHeader` may be requests; the runtime replies
/// through the header. `Close` is terminal: once processed, further
/// enqueues are dropped.
pub enum StageMessage {
    /// Run `on_create` / `on_post_create`. Enqueued exactly once, first.
    Create {
        payload: Payload,
        header: Option<RouteHeader>,
    },
    /// Attach an account to the stage.
    Join {
        account_id: i64,
        sid: u64,
        session_nid: String,
        user_info: Payload,
        header: RouteHeader,
    },
    /// Detach an account (explicit leave, disconnect, close).
    Leave {
        account_id: i64,
        reason: DisconnectReason,
        header: Option<RouteHeader>,
    },
    /// A user packet for one of the stage's actors.
    Dispatch {
        account_id: i64,
        packet: Packet,
        header: RouteHeader,
    },
    /// Client socket went up or down.
    ConnectionChanged {
        account_id: i64,
        connected: bool,
        reason: DisconnectReason,
    },
    /// A stage timer fired.
    Timer(TimerId),
    /// Fixed-timestep game loop tick.
    GameLoopTick,
    /// Terminal close.
    Close { header: Option<RouteHeader> },
}
