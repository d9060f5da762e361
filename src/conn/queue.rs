//! The unacknowledged-PDU queue.
//!
//! Holds every sent I-PDU from the last fully-acknowledged point onward,
//! in transmission order. Head-to-tail sequence numbers are consecutive
//! mod 128 with no gaps, and the head's N(S) is the base of the send
//! window (`first_pdu_ns`).

use std::collections::VecDeque;

use crate::pdu::seq;

/// One sent-but-unacknowledged I-PDU payload, tagged with its N(S).
#[derive(Debug, Clone)]
pub struct SentPdu {
    /// Sequence number assigned at transmission.
    pub n_s: u8,
    /// Information field as transmitted.
    pub payload: Vec<u8>,
}

/// Ordered queue of outbound I-PDUs awaiting acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct UnackedQueue {
    entries: VecDeque<SentPdu>,
}

impl UnackedQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sent PDU. Returns false when the queue already holds
    /// `capacity` entries (the transmit window `k`).
    pub fn enqueue(&mut self, n_s: u8, payload: Vec<u8>, capacity: u8) -> bool {
        if self.entries.len() >= capacity as usize {
            return false;
        }
        debug_assert!(
            self.entries
                .back()
                .is_none_or(|tail| seq::next(tail.n_s) == n_s),
            "unacked queue must stay gap-free"
        );
        self.entries.push_back(SentPdu { n_s, payload });
        true
    }

    /// Remove every entry whose sequence number is acknowledged by `nr`,
    /// i.e. all of `[first_pdu_ns, nr)` mod 128. Returns how many were
    /// removed, which decides whether the ack timer keeps running.
    pub fn remove_acked(&mut self, nr: u8) -> usize {
        let mut removed = 0;
        while let Some(head) = self.entries.front() {
            if head.n_s == nr {
                break;
            }
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    /// N(S) of the oldest unacknowledged PDU (the send-window base), or
    /// `None` when nothing is outstanding.
    pub fn oldest(&self) -> Option<u8> {
        self.entries.front().map(|e| e.n_s)
    }

    /// Remove and release every entry. Used at teardown and reset.
    pub fn drain(&mut self) {
        self.entries.clear();
    }

    /// Number of outstanding PDUs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries oldest first (the retransmission order).
    pub fn iter(&self) -> impl Iterator<Item = &SentPdu> {
        self.entries.iter()
    }
}
