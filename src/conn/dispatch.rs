//! The event/action dispatcher: the Type-2 protocol core.
//!
//! [`dispatch`] applies one event to one connection and returns the side
//! effects as an action list. It is a pure state-machine step: no I/O, no
//! blocking, no partial updates visible to anyone else. The manager (or
//! the async driver) executes the actions afterwards.
//!
//! The hard paths live here: I-PDU acceptance and the REJ condition,
//! N(R) validation and ack bookkeeping, command/response retransmission,
//! the busy handshake, and FRMR generation with verbatim resend.

use tracing::{debug, trace, warn};

use crate::conn::connection::{ConnState, Connection, LinkRole};
use crate::conn::event::{Action, ConnEvent, DisconnectReason};
use crate::conn::timer::TimerKind;
use crate::pdu::{seq, FrmrInfo, Pdu, PduKind};

/// Apply one event to a connection, returning the actions to execute.
pub fn dispatch(conn: &mut Connection, event: ConnEvent) -> Vec<Action> {
    let mut actions = Vec::new();
    match event {
        ConnEvent::Pdu(pdu) => on_pdu(conn, pdu, &mut actions),
        ConnEvent::ConnectReq => on_connect_req(conn, &mut actions),
        ConnEvent::DataReq(payload) => on_data_req(conn, payload, &mut actions),
        ConnEvent::DisconnectReq => on_disconnect_req(conn, &mut actions),
        ConnEvent::ResetReq => on_reset_req(conn, &mut actions),
        ConnEvent::Timer(kind) => on_timer(conn, kind, &mut actions),
    }
    actions
}

// =============================================================================
// LOCAL SERVICE REQUESTS
// =============================================================================

fn on_connect_req(conn: &mut Connection, actions: &mut Vec<Action>) {
    if conn.state != ConnState::Adm {
        warn!(pair = %conn.pair, state = ?conn.state, "connect request ignored");
        return;
    }
    debug!(pair = %conn.pair, "connecting");
    conn.retry_count = 0;
    conn.flags.p_flag = true;
    conn.ack_timer.start();
    conn.state = ConnState::Conn;
    actions.push(Action::Send(Pdu::sabme(true)));
}

fn on_data_req(conn: &mut Connection, payload: Vec<u8>, actions: &mut Vec<Action>) {
    // The manager has already rejected oversized payloads, a full window
    // and the remote-busy condition synchronously.
    if !conn.can_send() {
        warn!(pair = %conn.pair, state = ?conn.state, "data request ignored");
        return;
    }
    let n_s = conn.v_s;
    if !conn.unacked.enqueue(n_s, payload.clone(), conn.config.k) {
        warn!(pair = %conn.pair, "send window overflow");
        return;
    }
    conn.v_s = seq::next(conn.v_s);
    // The outbound N(R) piggybacks any pending acknowledgement.
    conn.flags.ack_pending = false;
    conn.ack_timer.start_if_idle();
    trace!(pair = %conn.pair, n_s, n_r = conn.v_r, "sending I");
    actions.push(Action::Send(Pdu::i(n_s, conn.v_r, false, payload)));
}

fn on_disconnect_req(conn: &mut Connection, actions: &mut Vec<Action>) {
    match conn.state {
        ConnState::Adm => {}
        ConnState::DConn => {}
        _ => {
            debug!(pair = %conn.pair, "disconnecting");
            conn.cancel_timers();
            conn.retry_count = 0;
            conn.flags.p_flag = true;
            conn.ack_timer.start();
            conn.state = ConnState::DConn;
            actions.push(Action::Send(Pdu::disc(true)));
        }
    }
}

fn on_reset_req(conn: &mut Connection, actions: &mut Vec<Action>) {
    match conn.state {
        // Accept the peer's pending reset.
        ConnState::ResetCheck => {
            let pf = conn.ack_pf;
            conn.reinitialize(LinkRole::Responder);
            debug!(pair = %conn.pair, "remote reset accepted");
            actions.push(Action::Send(Pdu::ua(pf)));
            actions.push(Action::ResetConfirm);
        }
        s if s.is_established() => {
            debug!(pair = %conn.pair, "resetting link");
            conn.cancel_timers();
            conn.retry_count = 0;
            conn.flags.p_flag = true;
            conn.flags.s_flag = false;
            conn.ack_timer.start();
            conn.state = ConnState::ResetWait;
            actions.push(Action::Send(Pdu::sabme(true)));
        }
        _ => warn!(pair = %conn.pair, state = ?conn.state, "reset request ignored"),
    }
}

// =============================================================================
// INBOUND PDUS
// =============================================================================

fn on_pdu(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    trace!(pair = %conn.pair, pdu = %pdu, state = ?conn.state, "rx");

    // Malformed or oversized descriptors trigger the frame-reject path on
    // an established link and are answered with DM (or dropped) elsewhere.
    let oversized = pdu.kind == PduKind::I && pdu.payload.len() > conn.config.n1;
    if !pdu.is_well_formed() || oversized {
        warn!(pair = %conn.pair, pdu = %pdu, oversized, "malformed pdu");
        if conn.state.is_established() || frmr_outstanding(conn) {
            frmr_condition(conn, FrmrInfo::malformed(&pdu, oversized), actions);
        } else if pdu.command {
            actions.push(Action::Send(Pdu::dm(pdu.pf)));
        }
        return;
    }

    match conn.state {
        ConnState::Adm => on_pdu_adm(conn, pdu, actions),
        ConnState::Conn => on_pdu_conn(conn, pdu, actions),
        ConnState::DConn => on_pdu_dconn(conn, pdu, actions),
        ConnState::ResetWait => on_pdu_reset_wait(conn, pdu, actions),
        ConnState::ResetCheck => on_pdu_reset_check(conn, pdu, actions),
        ConnState::Normal | ConnState::Busy | ConnState::Rej => {
            on_pdu_established(conn, pdu, actions)
        }
    }
}

/// Disconnected: only an accepted SABME brings the link up; other
/// commands are answered DM.
fn on_pdu_adm(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    match pdu.kind {
        PduKind::Sabme => {
            conn.reinitialize(LinkRole::Responder);
            debug!(pair = %conn.pair, "incoming connection established");
            actions.push(Action::Send(Pdu::ua(pdu.pf)));
            actions.push(Action::ConnectIndication);
        }
        _ if pdu.command => actions.push(Action::Send(Pdu::dm(pdu.pf))),
        _ => {}
    }
}

/// Connection pending: waiting for UA to our SABME.
fn on_pdu_conn(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    match pdu.kind {
        PduKind::Ua => {
            conn.reinitialize(LinkRole::Initiator);
            debug!(pair = %conn.pair, "connection established");
            actions.push(Action::ConnectConfirm);
        }
        PduKind::Dm => {
            debug!(pair = %conn.pair, "connection refused");
            teardown(conn, DisconnectReason::Refused, actions);
        }
        // Simultaneous open: both sides sent SABME. Answer UA and treat
        // the link as up; the peer does the same with ours.
        PduKind::Sabme => {
            actions.push(Action::Send(Pdu::ua(pdu.pf)));
            conn.reinitialize(LinkRole::Initiator);
            actions.push(Action::ConnectConfirm);
        }
        PduKind::Disc => {
            actions.push(Action::Send(Pdu::dm(pdu.pf)));
            teardown(conn, DisconnectReason::Refused, actions);
        }
        _ => {}
    }
}

/// Disconnection pending: waiting for UA or DM to our DISC.
fn on_pdu_dconn(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    match pdu.kind {
        PduKind::Ua | PduKind::Dm => {
            teardown(conn, DisconnectReason::LocalClose, actions);
        }
        // Both sides closing at once.
        PduKind::Disc => {
            actions.push(Action::Send(Pdu::ua(pdu.pf)));
            teardown(conn, DisconnectReason::LocalClose, actions);
        }
        PduKind::Sabme => actions.push(Action::Send(Pdu::dm(pdu.pf))),
        _ => {}
    }
}

/// Reset in progress. Two flavours distinguished by `s_flag`: a sent
/// FRMR awaiting remote recovery, or our own SABME awaiting UA.
fn on_pdu_reset_wait(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    if conn.flags.s_flag {
        // FRMR outstanding: remote must reset or tear down.
        match pdu.kind {
            PduKind::Sabme => {
                let pf = pdu.pf;
                conn.reinitialize(conn.role);
                debug!(pair = %conn.pair, "link reset by peer after FRMR");
                actions.push(Action::Send(Pdu::ua(pf)));
                actions.push(Action::ResetConfirm);
            }
            PduKind::Disc => {
                actions.push(Action::Send(Pdu::ua(pdu.pf)));
                teardown(conn, DisconnectReason::RemoteClose, actions);
            }
            PduKind::Dm => teardown(conn, DisconnectReason::FrameReject, actions),
            // The bad condition recurring before recovery: resend the
            // saved FRMR verbatim rather than recomputing it.
            _ => {
                if let Some(saved) = conn.saved_frmr.clone() {
                    actions.push(Action::Send(saved));
                }
            }
        }
    } else {
        match pdu.kind {
            PduKind::Ua => {
                conn.reinitialize(conn.role);
                debug!(pair = %conn.pair, "link reset complete");
                actions.push(Action::ResetConfirm);
            }
            // Reset collision: both sides sent SABME.
            PduKind::Sabme => {
                actions.push(Action::Send(Pdu::ua(pdu.pf)));
                conn.reinitialize(conn.role);
                actions.push(Action::ResetConfirm);
            }
            PduKind::Dm => teardown(conn, DisconnectReason::Refused, actions),
            PduKind::Disc => {
                actions.push(Action::Send(Pdu::dm(pdu.pf)));
                teardown(conn, DisconnectReason::RemoteClose, actions);
            }
            _ => {}
        }
    }
}

/// Remote requested a reset; waiting for the local accept (a reset
/// request) before answering UA.
fn on_pdu_reset_check(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    match pdu.kind {
        // Peer retransmitting its SABME; remember the latest P bit.
        PduKind::Sabme => conn.ack_pf = pdu.pf,
        PduKind::Disc => {
            actions.push(Action::Send(Pdu::ua(pdu.pf)));
            teardown(conn, DisconnectReason::RemoteClose, actions);
        }
        PduKind::Dm => teardown(conn, DisconnectReason::Refused, actions),
        _ => {}
    }
}

/// Established states: Normal, Busy (remote RNR) and Rej (REJ sent).
fn on_pdu_established(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    match pdu.kind {
        PduKind::I => on_i_pdu(conn, pdu, actions),
        PduKind::Rr => {
            if !validate_nr(conn, &pdu, actions) {
                return;
            }
            clear_remote_busy(conn);
            answer_poll(conn, &pdu, actions);
            process_ack(conn, pdu.n_r.unwrap());
        }
        PduKind::Rnr => {
            if !validate_nr(conn, &pdu, actions) {
                return;
            }
            answer_poll(conn, &pdu, actions);
            process_ack(conn, pdu.n_r.unwrap());
            set_remote_busy(conn);
        }
        PduKind::Rej => {
            if !validate_nr(conn, &pdu, actions) {
                return;
            }
            clear_remote_busy(conn);
            answer_poll(conn, &pdu, actions);
            let nr = pdu.n_r.unwrap();
            process_ack(conn, nr);
            debug!(pair = %conn.pair, nr, "peer requested retransmission");
            retransmit(conn, actions);
        }
        // The peer rejected one of our frames: the only recovery is a
        // link reset, which we initiate ourselves.
        PduKind::Frmr => {
            warn!(pair = %conn.pair, "FRMR received, resetting link");
            conn.cancel_timers();
            conn.retry_count = 0;
            conn.flags.p_flag = true;
            conn.flags.s_flag = false;
            conn.ack_timer.start();
            conn.state = ConnState::ResetWait;
            actions.push(Action::Send(Pdu::sabme(true)));
        }
        // Remote reset: hold the link until the local user accepts.
        PduKind::Sabme => {
            debug!(pair = %conn.pair, "peer requested link reset");
            conn.cancel_timers();
            conn.ack_pf = pdu.pf;
            conn.state = ConnState::ResetCheck;
            actions.push(Action::ResetIndication);
        }
        PduKind::Disc => {
            actions.push(Action::Send(Pdu::ua(pdu.pf)));
            teardown(conn, DisconnectReason::RemoteClose, actions);
        }
        PduKind::Dm => teardown(conn, DisconnectReason::Refused, actions),
        PduKind::Ua => {
            warn!(pair = %conn.pair, "unexpected UA on established link");
        }
    }
}

/// The I-PDU acceptance path.
fn on_i_pdu(conn: &mut Connection, pdu: Pdu, actions: &mut Vec<Action>) {
    if !validate_nr(conn, &pdu, actions) {
        return;
    }
    process_ack(conn, pdu.n_r.unwrap());
    // An I-PDU from the peer shows its receiver is no longer busy.
    clear_remote_busy(conn);

    let n_s = pdu.n_s.unwrap();
    if n_s == conn.v_r {
        // In sequence: accept, advance V(R), clear any REJ condition.
        conn.v_r = seq::next(conn.v_r);
        if conn.state == ConnState::Rej {
            conn.rej_timer.stop();
            conn.state = ConnState::Normal;
            debug!(pair = %conn.pair, "reject condition recovered");
        }
        actions.push(Action::Deliver(pdu.payload));
        if pdu.command && pdu.pf {
            // A poll demands an immediate acknowledgement. The ack timer
            // keeps running only while our own data awaits an ack.
            conn.flags.ack_pending = false;
            if conn.unacked.is_empty() {
                conn.ack_timer.stop();
            }
            actions.push(Action::Send(Pdu::rr(false, conn.v_r, true)));
        } else {
            // Piggyback on the next I-PDU, or stand alone when the ack
            // timer fires first.
            conn.flags.ack_pending = true;
            conn.ack_pf = pdu.pf;
            conn.ack_timer.start_if_idle();
        }
    } else if conn.state == ConnState::Rej {
        // A REJ is already outstanding: never emit a second one.
        conn.flags.data_flag = true;
        trace!(pair = %conn.pair, n_s, v_r = conn.v_r, "out of sequence, REJ outstanding");
    } else {
        debug!(pair = %conn.pair, n_s, v_r = conn.v_r, "out of sequence, sending REJ");
        conn.state = ConnState::Rej;
        conn.rej_timer.start();
        actions.push(Action::Send(Pdu::rej(false, conn.v_r, pdu.command && pdu.pf)));
    }
}

// =============================================================================
// TIMER EXPIRY
// =============================================================================

fn on_timer(conn: &mut Connection, kind: TimerKind, actions: &mut Vec<Action>) {
    match (kind, conn.state) {
        (TimerKind::Ack, ConnState::Conn) => {
            conn.ack_timer.stop();
            retry_or_teardown(conn, DisconnectReason::RetryLimit, actions, |conn, actions| {
                actions.push(Action::Send(Pdu::sabme(true)));
                conn.ack_timer.start();
            });
        }
        (TimerKind::Ack, ConnState::DConn) => {
            conn.ack_timer.stop();
            // Retries exhausted while closing: give up and report the
            // close as done; the peer is unreachable anyway.
            retry_or_teardown(conn, DisconnectReason::LocalClose, actions, |conn, actions| {
                actions.push(Action::Send(Pdu::disc(true)));
                conn.ack_timer.start();
            });
        }
        (TimerKind::Ack, ConnState::ResetWait) => {
            conn.ack_timer.stop();
            if conn.flags.s_flag {
                retry_or_teardown(conn, DisconnectReason::FrameReject, actions, |conn, actions| {
                    if let Some(saved) = conn.saved_frmr.clone() {
                        actions.push(Action::Send(saved));
                    }
                    conn.ack_timer.start();
                });
            } else {
                retry_or_teardown(conn, DisconnectReason::RetryLimit, actions, |conn, actions| {
                    actions.push(Action::Send(Pdu::sabme(true)));
                    conn.ack_timer.start();
                });
            }
        }
        (TimerKind::Ack, s) if s.is_established() => {
            conn.ack_timer.stop();
            // A delayed outbound acknowledgement rides this timer too.
            if conn.flags.ack_pending {
                conn.flags.ack_pending = false;
                actions.push(Action::Send(Pdu::rr(false, conn.v_r, conn.ack_pf)));
            }
            if !conn.unacked.is_empty() {
                retry_or_teardown(conn, DisconnectReason::RetryLimit, actions, |conn, actions| {
                    retransmit(conn, actions);
                });
            }
        }
        (TimerKind::Poll, s) if s.is_established() => {
            conn.poll_timer.stop();
            if conn.flags.p_flag {
                retry_or_teardown(conn, DisconnectReason::RetryLimit, actions, |conn, actions| {
                    actions.push(Action::Send(Pdu::rr(true, conn.v_r, true)));
                    conn.poll_timer.start();
                });
            }
        }
        (TimerKind::RejSent, ConnState::Rej) => {
            conn.rej_timer.stop();
            retry_or_teardown(conn, DisconnectReason::RetryLimit, actions, |conn, actions| {
                actions.push(Action::Send(Pdu::rej(false, conn.v_r, false)));
                conn.rej_timer.start();
            });
        }
        (TimerKind::Busy, s) if s.is_established() => {
            conn.busy_timer.stop();
            if conn.flags.remote_busy {
                // Probe the busy peer; persistent busy forces teardown.
                retry_or_teardown(conn, DisconnectReason::RetryLimit, actions, |conn, actions| {
                    conn.flags.p_flag = true;
                    actions.push(Action::Send(Pdu::rr(true, conn.v_r, true)));
                    conn.poll_timer.start();
                    conn.busy_timer.start();
                });
            }
        }
        _ => trace!(pair = %conn.pair, ?kind, state = ?conn.state, "stale timer"),
    }
}

/// Count one more retransmission attempt. Past N2, the connection is
/// forced down with a single termination notification; otherwise the
/// supplied resend closure runs.
fn retry_or_teardown(
    conn: &mut Connection,
    reason: DisconnectReason,
    actions: &mut Vec<Action>,
    resend: impl FnOnce(&mut Connection, &mut Vec<Action>),
) {
    conn.retry_count = conn.retry_count.saturating_add(1);
    if conn.retry_count > conn.config.n2 {
        warn!(pair = %conn.pair, n2 = conn.config.n2, "retry limit exhausted");
        teardown(conn, reason, actions);
    } else {
        trace!(pair = %conn.pair, retry = conn.retry_count, "retrying");
        resend(conn, actions);
    }
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Validate the PDU's N(R) against the circular window `[last_nr, vS]`.
/// An invalid N(R) is a protocol error that raises the FRMR condition;
/// the queue is left untouched.
fn validate_nr(conn: &mut Connection, pdu: &Pdu, actions: &mut Vec<Action>) -> bool {
    let nr = match pdu.n_r {
        Some(nr) => nr,
        None => return true,
    };
    if seq::in_range_incl(conn.last_nr, nr, conn.v_s) {
        return true;
    }
    warn!(pair = %conn.pair, nr, last_nr = conn.last_nr, v_s = conn.v_s, "invalid N(R)");
    frmr_condition(conn, FrmrInfo::bad_nr(pdu), actions);
    false
}

/// Apply a validated N(R): drop covered entries from the unacked queue,
/// advance the window base, and rearm or stop the ack timer.
fn process_ack(conn: &mut Connection, nr: u8) {
    let removed = conn.unacked.remove_acked(nr);
    conn.last_nr = nr;
    if removed > 0 {
        conn.retry_count = 0;
        if conn.unacked.is_empty() {
            conn.ack_timer.stop();
        } else {
            conn.ack_timer.start();
        }
        trace!(pair = %conn.pair, nr, removed, outstanding = conn.unacked.len(), "acked");
    }
}

/// Honor the P/F bit of an inbound supervisory PDU: a command with P=1
/// demands an immediate RR response with F=1; a response with F=1
/// answers our outstanding poll.
fn answer_poll(conn: &mut Connection, pdu: &Pdu, actions: &mut Vec<Action>) {
    if pdu.command && pdu.pf {
        actions.push(Action::Send(Pdu::rr(false, conn.v_r, true)));
    } else if !pdu.command && pdu.pf && conn.flags.p_flag {
        conn.flags.p_flag = false;
        conn.poll_timer.stop();
    }
}

fn set_remote_busy(conn: &mut Connection) {
    if !conn.flags.remote_busy {
        debug!(pair = %conn.pair, "peer receiver busy");
    }
    conn.flags.remote_busy = true;
    conn.busy_timer.start();
    if conn.state == ConnState::Normal {
        conn.state = ConnState::Busy;
    }
}

fn clear_remote_busy(conn: &mut Connection) {
    if conn.flags.remote_busy {
        debug!(pair = %conn.pair, "peer receiver ready again");
        conn.flags.remote_busy = false;
        conn.busy_timer.stop();
        if conn.state == ConnState::Busy {
            conn.state = ConnState::Normal;
        }
    }
}

/// Resend every unacknowledged I-PDU starting at the window base. The
/// link initiator re-issues them as commands polling for an ack; the
/// responder re-issues them as responses carrying the final bit.
fn retransmit(conn: &mut Connection, actions: &mut Vec<Action>) {
    let total = conn.unacked.len();
    if total == 0 {
        return;
    }
    debug!(pair = %conn.pair, total, base = conn.first_pdu_ns(), role = ?conn.role, "retransmitting");
    let v_r = conn.v_r;
    let as_command = conn.role == LinkRole::Initiator;
    let resent: Vec<Pdu> = conn
        .unacked
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let last = idx + 1 == total;
            if as_command {
                Pdu::i(entry.n_s, v_r, last, entry.payload.clone())
            } else {
                Pdu::i_response(entry.n_s, v_r, last, entry.payload.clone())
            }
        })
        .collect();
    actions.extend(resent.into_iter().map(Action::Send));
    // The retransmitted N(R) carries any pending acknowledgement.
    conn.flags.ack_pending = false;
    if as_command {
        conn.flags.p_flag = true;
        conn.poll_timer.start();
    }
    conn.ack_timer.start();
}

/// Raise the frame-reject condition: send FRMR (or resend the saved one
/// verbatim when the same condition recurs), remember it, and wait for
/// the remote side to reset or drop the link.
fn frmr_condition(conn: &mut Connection, info: FrmrInfo, actions: &mut Vec<Action>) {
    if frmr_outstanding(conn) {
        if let Some(saved) = conn.saved_frmr.clone() {
            actions.push(Action::Send(saved));
        }
        return;
    }
    let frmr = Pdu::frmr(&info, false);
    warn!(pair = %conn.pair, rejected = %info.kind, "sending FRMR");
    conn.saved_frmr = Some(frmr.clone());
    conn.cancel_timers();
    conn.retry_count = 0;
    conn.flags.s_flag = true;
    conn.ack_timer.start();
    conn.state = ConnState::ResetWait;
    actions.push(Action::Send(frmr));
}

fn frmr_outstanding(conn: &Connection) -> bool {
    conn.state == ConnState::ResetWait && conn.flags.s_flag
}

/// Force the connection down: cancel timers, drain the queue, return to
/// `Adm`, and emit the one termination notification.
fn teardown(conn: &mut Connection, reason: DisconnectReason, actions: &mut Vec<Action>) {
    debug!(pair = %conn.pair, ?reason, "connection down");
    conn.reset_to_adm();
    actions.push(Action::Disconnected(reason));
}
