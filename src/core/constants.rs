//! Protocol and administrative constants for Type-2 operation.

use std::time::Duration;

// =============================================================================
// SEQUENCE NUMBERING
// =============================================================================

/// Sequence number modulus. Type-2 extended operation numbers I-PDUs mod 128.
pub const SEQ_MODULUS: u8 = 128;

/// Largest legal send/receive window (mod-128 leaves 127 outstanding slots).
pub const MAX_WINDOW: u8 = 127;

// =============================================================================
// ADMINISTRATIVE DEFAULTS
// =============================================================================

/// Default maximum octets in the information field of one I-PDU (N1).
pub const DEFAULT_N1: usize = 1500;

/// Default maximum retransmission attempts before teardown (N2).
pub const DEFAULT_N2: u8 = 8;

/// Default transmit window size (k).
pub const DEFAULT_TX_WINDOW: u8 = 7;

/// Default receive window size (rw).
pub const DEFAULT_RX_WINDOW: u8 = 7;

// =============================================================================
// TIMER DEFAULTS
// =============================================================================

/// Acknowledgement timer: how long a sent I-PDU may wait for an ack, and
/// how long an inbound ack may be held back before a standalone RR goes out.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Poll-cycle timer: bound on an outstanding P-bit exchange.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(2000);

/// REJ-sent timer: bound on waiting for retransmission after sending REJ.
pub const DEFAULT_REJ_TIMEOUT: Duration = Duration::from_millis(3000);

/// Remote-busy timer: bound on the peer's receiver-not-ready condition.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(6000);

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Default capacity of the connection table.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
