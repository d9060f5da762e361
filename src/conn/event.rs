//! Events into, and actions out of, the dispatcher.
//!
//! Everything the state machine wants done in the world, other than
//! mutating its own record, comes back as an [`Action`] list for the
//! caller to execute. The dispatcher itself never touches the device or
//! the upper layer.

use crate::conn::timer::TimerKind;
use crate::pdu::Pdu;

/// One event applied to one connection.
///
/// Events for a single connection are processed strictly in delivery
/// order; processing one is a single logical transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    /// A PDU demultiplexed to this connection arrived.
    Pdu(Pdu),
    /// Local request: establish the link.
    ConnectReq,
    /// Local request: send data. The manager pre-validates size, window
    /// and busy conditions before dispatching.
    DataReq(Vec<u8>),
    /// Local request: close the link.
    DisconnectReq,
    /// Local request: reset the link (also accepts a remote reset).
    ResetReq,
    /// One of the four timers expired.
    Timer(TimerKind),
}

/// Why a connection terminated. Carried by the single
/// [`Action::Disconnected`] notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Local disconnect request completed.
    LocalClose,
    /// Peer sent DISC.
    RemoteClose,
    /// Peer refused or dropped the link (DM).
    Refused,
    /// N2 consecutive retransmissions went unanswered.
    RetryLimit,
    /// Unrecoverable frame-reject condition.
    FrameReject,
}

/// A side effect requested by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Transmit a PDU to the peer (fire-and-forget).
    Send(Pdu),
    /// Deliver an accepted in-sequence information field upward.
    Deliver(Vec<u8>),
    /// The locally requested connection is established.
    ConnectConfirm,
    /// The peer established a connection to a local SAP.
    ConnectIndication,
    /// The link reset completed; data transfer starts over from zero.
    ResetConfirm,
    /// The peer requested a link reset; answer with a reset request.
    ResetIndication,
    /// The connection is gone. Emitted exactly once per teardown.
    Disconnected(DisconnectReason),
}
