//! The per-connection state record.
//!
//! Everything one Type-2 connection knows: addresses, protocol state,
//! sequence variables, windows, flags, the four timers, and the
//! unacknowledged-PDU queue. The record is pure bookkeeping; the
//! dispatcher decides how it changes.

use std::time::Instant;

use crate::conn::queue::UnackedQueue;
use crate::conn::timer::{LinkTimer, TimerKind};
use crate::core::address::LinkPair;
use crate::core::constants;
use crate::pdu::Pdu;

/// Protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Disconnected / administratively down. Initial and terminal.
    Adm,
    /// Connection pending, locally initiated (SABME sent, awaiting UA).
    Conn,
    /// Link reset in progress, locally driven (SABME or FRMR sent).
    ResetWait,
    /// Remote requested a reset (SABME received, awaiting local accept).
    ResetCheck,
    /// Established, error-free data transfer.
    Normal,
    /// Established, peer reported receiver-not-ready.
    Busy,
    /// Established, REJ sent and awaiting retransmission.
    Rej,
    /// Disconnection pending (DISC sent, awaiting UA/DM).
    DConn,
}

impl ConnState {
    /// True for states in which the link is established.
    pub fn is_established(&self) -> bool {
        matches!(self, ConnState::Normal | ConnState::Busy | ConnState::Rej)
    }
}

/// Which side initiated the link.
///
/// The role decides the command/response tie-break on retransmission:
/// the initiator re-issues unacknowledged I-PDUs as commands with the
/// poll bit set, the responder as responses with the final bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// This station sent the SABME.
    Initiator,
    /// This station answered the SABME with UA.
    Responder,
}

/// Administrative parameters, fixed at allocation.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Maximum octets in one I-PDU information field.
    pub n1: usize,
    /// Maximum consecutive retransmission attempts.
    pub n2: u8,
    /// Transmit window size, 1..=127.
    pub k: u8,
    /// Receive window size, 1..=127.
    pub rw: u8,
    /// Acknowledgement timer duration.
    pub ack_timeout: std::time::Duration,
    /// Poll-cycle timer duration.
    pub poll_timeout: std::time::Duration,
    /// REJ-sent timer duration.
    pub rej_timeout: std::time::Duration,
    /// Remote-busy timer duration.
    pub busy_timeout: std::time::Duration,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            n1: constants::DEFAULT_N1,
            n2: constants::DEFAULT_N2,
            k: constants::DEFAULT_TX_WINDOW,
            rw: constants::DEFAULT_RX_WINDOW,
            ack_timeout: constants::DEFAULT_ACK_TIMEOUT,
            poll_timeout: constants::DEFAULT_POLL_TIMEOUT,
            rej_timeout: constants::DEFAULT_REJ_TIMEOUT,
            busy_timeout: constants::DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Connection condition flags.
///
/// Kept as plain booleans; nothing here needs bit packing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnFlags {
    /// A command with P=1 is outstanding.
    pub p_flag: bool,
    /// The next response must carry F=1.
    pub f_flag: bool,
    /// A sent FRMR is awaiting remote recovery.
    pub s_flag: bool,
    /// Data arrived while the reject/busy condition was pending.
    pub data_flag: bool,
    /// Peer reported receiver-not-ready.
    pub remote_busy: bool,
    /// An acknowledgement must be sent (standalone or piggybacked).
    pub ack_pending: bool,
}

/// One Type-2 LLC connection.
#[derive(Debug)]
pub struct Connection {
    /// The (local, remote) address pair. Immutable for the connection's life.
    pub pair: LinkPair,
    /// Initiator or responder role, fixed at establishment.
    pub role: LinkRole,
    /// Current protocol state.
    pub state: ConnState,
    /// Administrative parameters.
    pub config: ConnConfig,

    /// Consecutive retransmission attempts since the last valid ack.
    pub retry_count: u8,
    /// Send state variable: N(S) for the next new I-PDU, mod 128.
    pub v_s: u8,
    /// Receive state variable: next expected inbound N(S), mod 128.
    pub v_r: u8,
    /// N(R) carried by the most recently accepted PDU.
    pub last_nr: u8,

    /// Condition flags.
    pub flags: ConnFlags,
    /// Poll bit value to echo on the next acknowledgement.
    pub ack_pf: bool,

    /// Sent I-PDUs awaiting acknowledgement.
    pub unacked: UnackedQueue,
    /// The FRMR last sent, retained for verbatim resend.
    pub saved_frmr: Option<Pdu>,

    /// Acknowledgement timer.
    pub ack_timer: LinkTimer,
    /// Poll-cycle timer.
    pub poll_timer: LinkTimer,
    /// REJ-sent timer.
    pub rej_timer: LinkTimer,
    /// Remote-busy timer.
    pub busy_timer: LinkTimer,
}

impl Connection {
    /// Create a fresh record in `Adm`.
    pub fn new(pair: LinkPair, role: LinkRole, config: ConnConfig) -> Self {
        debug_assert!(config.k >= 1 && config.k <= constants::MAX_WINDOW);
        debug_assert!(config.rw >= 1 && config.rw <= constants::MAX_WINDOW);
        let ack_timer = LinkTimer::new(config.ack_timeout);
        let poll_timer = LinkTimer::new(config.poll_timeout);
        let rej_timer = LinkTimer::new(config.rej_timeout);
        let busy_timer = LinkTimer::new(config.busy_timeout);
        Self {
            pair,
            role,
            state: ConnState::Adm,
            config,
            retry_count: 0,
            v_s: 0,
            v_r: 0,
            last_nr: 0,
            flags: ConnFlags::default(),
            ack_pf: false,
            unacked: UnackedQueue::new(),
            saved_frmr: None,
            ack_timer,
            poll_timer,
            rej_timer,
            busy_timer,
        }
    }

    /// Sequence number of the oldest unacknowledged outbound I-PDU: the
    /// base of the send window. Equals `last_nr` when nothing is
    /// outstanding.
    pub fn first_pdu_ns(&self) -> u8 {
        self.unacked.oldest().unwrap_or(self.last_nr)
    }

    /// Reinitialize the transfer variables after SABME/UA, entering
    /// `Normal`. Timers are cancelled, the queue is dropped, and both
    /// sequence variables return to zero.
    pub fn reinitialize(&mut self, role: LinkRole) {
        self.role = role;
        self.state = ConnState::Normal;
        self.retry_count = 0;
        self.v_s = 0;
        self.v_r = 0;
        self.last_nr = 0;
        self.flags = ConnFlags::default();
        self.ack_pf = false;
        self.unacked.drain();
        self.saved_frmr = None;
        self.cancel_timers();
    }

    /// Return to `Adm` as if freshly allocated, retaining the record.
    pub fn reset_to_adm(&mut self) {
        self.reinitialize(self.role);
        self.state = ConnState::Adm;
    }

    /// Stop all four timers.
    pub fn cancel_timers(&mut self) {
        self.ack_timer.stop();
        self.poll_timer.stop();
        self.rej_timer.stop();
        self.busy_timer.stop();
    }

    /// Access a timer by kind.
    pub fn timer(&self, kind: TimerKind) -> &LinkTimer {
        match kind {
            TimerKind::Ack => &self.ack_timer,
            TimerKind::Poll => &self.poll_timer,
            TimerKind::RejSent => &self.rej_timer,
            TimerKind::Busy => &self.busy_timer,
        }
    }

    /// Mutable access to a timer by kind.
    pub fn timer_mut(&mut self, kind: TimerKind) -> &mut LinkTimer {
        match kind {
            TimerKind::Ack => &mut self.ack_timer,
            TimerKind::Poll => &mut self.poll_timer,
            TimerKind::RejSent => &mut self.rej_timer,
            TimerKind::Busy => &mut self.busy_timer,
        }
    }

    /// Kinds of all currently expired timers, for the event loop.
    pub fn expired_timers(&self) -> Vec<TimerKind> {
        [
            TimerKind::Ack,
            TimerKind::Poll,
            TimerKind::RejSent,
            TimerKind::Busy,
        ]
        .into_iter()
        .filter(|k| self.timer(*k).is_expired())
        .collect()
    }

    /// Earliest deadline among running timers, or `None` when all stopped.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            TimerKind::Ack,
            TimerKind::Poll,
            TimerKind::RejSent,
            TimerKind::Busy,
        ]
        .into_iter()
        .filter_map(|k| self.timer(k).deadline())
        .min()
    }

    /// True while a new I-PDU may be transmitted: established, window
    /// open, and the peer not busy.
    pub fn can_send(&self) -> bool {
        self.state.is_established()
            && !self.flags.remote_busy
            && self.unacked.len() < self.config.k as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::LinkAddr;

    fn pair() -> LinkPair {
        LinkPair::new(
            LinkAddr::new(0x42u8, [1, 1, 1, 1, 1, 1]),
            LinkAddr::new(0x44u8, [2, 2, 2, 2, 2, 2]),
        )
    }

    #[test]
    fn test_new_record_is_adm() {
        let conn = Connection::new(pair(), LinkRole::Initiator, ConnConfig::default());
        assert_eq!(conn.state, ConnState::Adm);
        assert_eq!(conn.v_s, 0);
        assert_eq!(conn.v_r, 0);
        assert!(conn.unacked.is_empty());
        assert!(conn.next_deadline().is_none());
    }

    #[test]
    fn test_reinitialize_clears_transfer_state() {
        let mut conn = Connection::new(pair(), LinkRole::Initiator, ConnConfig::default());
        conn.v_s = 9;
        conn.v_r = 4;
        conn.retry_count = 3;
        conn.flags.remote_busy = true;
        assert!(conn.unacked.enqueue(8, vec![1], 7));
        conn.ack_timer.start();

        conn.reinitialize(LinkRole::Responder);

        assert_eq!(conn.state, ConnState::Normal);
        assert_eq!(conn.role, LinkRole::Responder);
        assert_eq!((conn.v_s, conn.v_r, conn.retry_count), (0, 0, 0));
        assert!(!conn.flags.remote_busy);
        assert!(conn.unacked.is_empty());
        assert!(!conn.ack_timer.is_running());
    }

    #[test]
    fn test_first_pdu_ns_follows_queue() {
        let mut conn = Connection::new(pair(), LinkRole::Initiator, ConnConfig::default());
        conn.last_nr = 5;
        assert_eq!(conn.first_pdu_ns(), 5);
        assert!(conn.unacked.enqueue(5, vec![], 7));
        assert!(conn.unacked.enqueue(6, vec![], 7));
        assert_eq!(conn.first_pdu_ns(), 5);
        conn.unacked.remove_acked(6);
        assert_eq!(conn.first_pdu_ns(), 6);
    }

    #[test]
    fn test_can_send_gates() {
        let mut conn = Connection::new(
            pair(),
            LinkRole::Initiator,
            ConnConfig {
                k: 2,
                ..ConnConfig::default()
            },
        );
        assert!(!conn.can_send()); // Adm

        conn.state = ConnState::Normal;
        assert!(conn.can_send());

        conn.flags.remote_busy = true;
        assert!(!conn.can_send());
        conn.flags.remote_busy = false;

        assert!(conn.unacked.enqueue(0, vec![], 2));
        assert!(conn.unacked.enqueue(1, vec![], 2));
        assert!(!conn.can_send()); // window full
    }

    #[test]
    fn test_next_deadline_picks_earliest() {
        let mut conn = Connection::new(pair(), LinkRole::Initiator, ConnConfig::default());
        conn.busy_timer.start();
        conn.ack_timer.start();
        // Ack timeout is shorter than busy timeout
        assert_eq!(conn.next_deadline(), conn.ack_timer.deadline());
    }
}
