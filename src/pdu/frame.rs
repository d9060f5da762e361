//! PDU descriptors.
//!
//! The MAC layer hands the engine decoded descriptors rather than raw
//! control octets; likewise everything the engine sends is a descriptor
//! handed to the device collaborator. The binary 802.2 control-field
//! encoding lives outside this crate.

use std::fmt;

/// The Type-2 PDU repertoire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    /// Information: sequence-numbered data.
    I,
    /// Receiver ready (supervisory).
    Rr,
    /// Receiver not ready (supervisory).
    Rnr,
    /// Reject: request retransmission from N(R) (supervisory).
    Rej,
    /// Frame reject: unrecoverable framing/sequencing error (unnumbered).
    Frmr,
    /// Set asynchronous balanced mode extended: connect or reset (unnumbered).
    Sabme,
    /// Disconnect request (unnumbered).
    Disc,
    /// Disconnected mode: connection refused or down (unnumbered).
    Dm,
    /// Unnumbered acknowledgement.
    Ua,
}

impl PduKind {
    /// True for PDU kinds that must carry N(S) (I-format only).
    pub fn carries_ns(&self) -> bool {
        matches!(self, PduKind::I)
    }

    /// True for PDU kinds that must carry N(R).
    pub fn carries_nr(&self) -> bool {
        matches!(self, PduKind::I | PduKind::Rr | PduKind::Rnr | PduKind::Rej)
    }

    /// True for PDU kinds that may carry an information field.
    pub fn carries_payload(&self) -> bool {
        matches!(self, PduKind::I | PduKind::Frmr)
    }
}

impl fmt::Display for PduKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PduKind::I => "I",
            PduKind::Rr => "RR",
            PduKind::Rnr => "RNR",
            PduKind::Rej => "REJ",
            PduKind::Frmr => "FRMR",
            PduKind::Sabme => "SABME",
            PduKind::Disc => "DISC",
            PduKind::Dm => "DM",
            PduKind::Ua => "UA",
        };
        f.write_str(name)
    }
}

/// A decoded PDU.
///
/// `command` carries the 802.2 command/response distinction; `pf` is the
/// poll bit on commands and the final bit on responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// PDU format/kind.
    pub kind: PduKind,
    /// Command (true) or response (false).
    pub command: bool,
    /// Send sequence number, present on I-PDUs.
    pub n_s: Option<u8>,
    /// Receive sequence number, present on I and supervisory PDUs.
    pub n_r: Option<u8>,
    /// Poll/final bit.
    pub pf: bool,
    /// Information field.
    pub payload: Vec<u8>,
}

impl Pdu {
    /// An I command with sequence numbers and data.
    pub fn i(n_s: u8, n_r: u8, pf: bool, payload: Vec<u8>) -> Self {
        Self {
            kind: PduKind::I,
            command: true,
            n_s: Some(n_s),
            n_r: Some(n_r),
            pf,
            payload,
        }
    }

    /// An I response (used for response-mode retransmission).
    pub fn i_response(n_s: u8, n_r: u8, pf: bool, payload: Vec<u8>) -> Self {
        Self {
            command: false,
            ..Self::i(n_s, n_r, pf, payload)
        }
    }

    /// A supervisory PDU (RR, RNR, or REJ).
    pub fn supervisory(kind: PduKind, command: bool, n_r: u8, pf: bool) -> Self {
        debug_assert!(matches!(kind, PduKind::Rr | PduKind::Rnr | PduKind::Rej));
        Self {
            kind,
            command,
            n_s: None,
            n_r: Some(n_r),
            pf,
            payload: Vec::new(),
        }
    }

    /// RR: ready to receive from `n_r`.
    pub fn rr(command: bool, n_r: u8, pf: bool) -> Self {
        Self::supervisory(PduKind::Rr, command, n_r, pf)
    }

    /// RNR: busy, acknowledged up to `n_r`.
    pub fn rnr(command: bool, n_r: u8, pf: bool) -> Self {
        Self::supervisory(PduKind::Rnr, command, n_r, pf)
    }

    /// REJ: retransmit from `n_r`.
    pub fn rej(command: bool, n_r: u8, pf: bool) -> Self {
        Self::supervisory(PduKind::Rej, command, n_r, pf)
    }

    fn unnumbered(kind: PduKind, command: bool, pf: bool) -> Self {
        Self {
            kind,
            command,
            n_s: None,
            n_r: None,
            pf,
            payload: Vec::new(),
        }
    }

    /// SABME command: establish or reset the link.
    pub fn sabme(pf: bool) -> Self {
        Self::unnumbered(PduKind::Sabme, true, pf)
    }

    /// DISC command: close the link.
    pub fn disc(pf: bool) -> Self {
        Self::unnumbered(PduKind::Disc, true, pf)
    }

    /// DM response: link is down / request refused.
    pub fn dm(pf: bool) -> Self {
        Self::unnumbered(PduKind::Dm, false, pf)
    }

    /// UA response: unnumbered acknowledgement.
    pub fn ua(pf: bool) -> Self {
        Self::unnumbered(PduKind::Ua, false, pf)
    }

    /// FRMR response reporting the rejected PDU.
    pub fn frmr(info: &FrmrInfo, pf: bool) -> Self {
        Self {
            kind: PduKind::Frmr,
            command: false,
            n_s: None,
            n_r: None,
            pf,
            payload: info.to_field(),
        }
    }

    /// True if this descriptor is well-formed for its kind.
    ///
    /// A malformed descriptor is what triggers the FRMR path: mandatory
    /// sequence numbers missing, or an information field on a PDU kind
    /// that cannot carry one.
    pub fn is_well_formed(&self) -> bool {
        if self.kind.carries_ns() != self.n_s.is_some() {
            return false;
        }
        if self.kind.carries_nr() != self.n_r.is_some() {
            return false;
        }
        if !self.payload.is_empty() && !self.kind.carries_payload() {
            return false;
        }
        true
    }
}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            self.kind,
            if self.command { " cmd" } else { " rsp" }
        )?;
        if let Some(ns) = self.n_s {
            write!(f, " ns={ns}")?;
        }
        if let Some(nr) = self.n_r {
            write!(f, " nr={nr}")?;
        }
        if self.pf {
            write!(f, " pf")?;
        }
        Ok(())
    }
}

/// The reason field of an FRMR: which PDU was rejected and why.
///
/// W/X/Y/Z follow the 802.2 frame-reject reason bits: invalid or
/// unimplemented control field, information field not permitted,
/// oversized information field, and invalid N(R) respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrmrInfo {
    /// Kind of the rejected PDU.
    pub kind: PduKind,
    /// Its N(S), if present.
    pub n_s: Option<u8>,
    /// Its N(R), if present.
    pub n_r: Option<u8>,
    /// Its poll/final bit.
    pub pf: bool,
    /// W: control field invalid or not implemented.
    pub w: bool,
    /// X: information field not permitted for this PDU kind.
    pub x: bool,
    /// Y: information field exceeded N1.
    pub y: bool,
    /// Z: N(R) outside the acknowledgement window.
    pub z: bool,
}

impl FrmrInfo {
    /// Reject a PDU for a malformed control field (W, optionally X/Y).
    pub fn malformed(pdu: &Pdu, oversized: bool) -> Self {
        Self {
            kind: pdu.kind,
            n_s: pdu.n_s,
            n_r: pdu.n_r,
            pf: pdu.pf,
            w: true,
            x: !pdu.payload.is_empty() && !pdu.kind.carries_payload(),
            y: oversized,
            z: false,
        }
    }

    /// Reject a PDU for an invalid N(R).
    pub fn bad_nr(pdu: &Pdu) -> Self {
        Self {
            kind: pdu.kind,
            n_s: pdu.n_s,
            n_r: pdu.n_r,
            pf: pdu.pf,
            w: false,
            x: false,
            y: false,
            z: true,
        }
    }

    /// Render as the FRMR information field (descriptor form, not wire form).
    fn to_field(&self) -> Vec<u8> {
        vec![
            self.n_s.unwrap_or(0),
            self.n_r.unwrap_or(0),
            u8::from(self.pf),
            (u8::from(self.w))
                | (u8::from(self.x) << 1)
                | (u8::from(self.y) << 2)
                | (u8::from(self.z) << 3),
        ]
    }
}
