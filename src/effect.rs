//! Effects the replica hands back to its runtime for execution.

use crate::message::Envelope;

/// One instruction from the state machine to the outside world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Transmit a message; the envelope carries its own routing.
    Send(Envelope),
    /// Re-arm the election timer with a fresh randomized timeout.
    ResetElectionTimer,
    /// Re-arm the leader heartbeat timer.
    ResetHeartbeatTimer,
}
