//! Connection lifecycle management and the upward service interface.
//!
//! The [`ConnectionManager`] owns every connection record, keyed by an
//! opaque monotonically-assigned handle, with a secondary index on the
//! (local, remote) address pair. It runs the dispatcher for every
//! inbound event, executes the resulting actions against the bound
//! device, and hands the remaining notifications back to the caller.
//!
//! Lifecycle misuse is a defect, not a runtime condition: debug builds
//! record the call-site of the last allocation and deallocation per
//! handle and panic loudly on double free or use-after-free; release
//! builds surface a typed error instead.

use std::collections::HashMap;
#[cfg(debug_assertions)]
use std::panic::Location;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::conn::{
    dispatch, Action, ConnConfig, ConnEvent, Connection, DisconnectReason, LinkRole, TimerKind,
};
use crate::core::address::{LinkAddr, LinkPair};
use crate::core::constants::DEFAULT_MAX_CONNECTIONS;
use crate::core::error::{AllocError, DataRequestError, DeviceError, LifecycleError, LlcError};
use crate::pdu::Pdu;

/// The outbound network interface, shared by connections and outliving
/// them. Transmission is fire-and-forget: the engine never waits for
/// completion, and failures are logged rather than propagated.
pub trait LinkDevice: Send + Sync {
    /// Hand one PDU to the wire for the given connection.
    fn transmit(&self, pair: &LinkPair, pdu: &Pdu) -> Result<(), DeviceError>;
}

/// Opaque handle to a connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What the engine tells the session layer. Everything a dispatched
/// event produced beyond PDU transmission comes back as one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotification {
    /// In-sequence data accepted from the peer.
    Data(Vec<u8>),
    /// The locally requested connection is up.
    ConnectConfirm,
    /// A peer-initiated connection is up.
    ConnectIndication,
    /// The link reset completed.
    ResetConfirm,
    /// The peer requested a reset; accept it with `reset_request`.
    ResetIndication,
    /// The connection terminated. Emitted exactly once per teardown.
    Disconnected(DisconnectReason),
}

/// Debug-build record of where a handle was last allocated and freed.
#[cfg(debug_assertions)]
#[derive(Debug, Clone, Copy)]
struct AllocSites {
    allocated_at: &'static Location<'static>,
    freed_at: Option<&'static Location<'static>>,
}

struct Entry {
    conn: Connection,
    device: Arc<dyn LinkDevice>,
}

/// Owner of all connection records.
pub struct ConnectionManager {
    capacity: usize,
    next_id: u64,
    table: HashMap<u64, Entry>,
    by_pair: HashMap<LinkPair, ConnId>,
    #[cfg(debug_assertions)]
    sites: HashMap<u64, AllocSites>,
}

impl ConnectionManager {
    /// Create a manager with the default table capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CONNECTIONS)
    }

    /// Create a manager holding at most `capacity` connections.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 0,
            table: HashMap::new(),
            by_pair: HashMap::new(),
            #[cfg(debug_assertions)]
            sites: HashMap::new(),
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no connections exist.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Allocate a fresh record in `Adm` for the address pair.
    #[track_caller]
    pub fn allocate(
        &mut self,
        pair: LinkPair,
        config: ConnConfig,
        device: Arc<dyn LinkDevice>,
    ) -> Result<ConnId, AllocError> {
        if self.table.len() >= self.capacity {
            return Err(AllocError::TableFull {
                capacity: self.capacity,
            });
        }
        if self.by_pair.contains_key(&pair) {
            return Err(AllocError::PairInUse);
        }
        let id = ConnId(self.next_id);
        self.next_id += 1;
        // Role is provisional; establishment fixes it.
        let conn = Connection::new(pair, LinkRole::Initiator, config);
        self.table.insert(id.0, Entry { conn, device });
        self.by_pair.insert(pair, id);
        #[cfg(debug_assertions)]
        self.sites.insert(
            id.0,
            AllocSites {
                allocated_at: Location::caller(),
                freed_at: None,
            },
        );
        debug!(%id, %pair, "connection allocated");
        Ok(id)
    }

    /// Cancel all timers, drain the unacked queue, and release the
    /// record. Freeing twice, or touching a freed handle afterwards, is
    /// a programming error: debug builds panic with the recorded
    /// call-sites, release builds report [`LifecycleError`].
    #[track_caller]
    pub fn free(&mut self, id: ConnId) -> Result<(), LifecycleError> {
        match self.table.remove(&id.0) {
            Some(mut entry) => {
                // Timers must be dead before the record goes away; a
                // callback firing against freed state is the classic
                // use-after-free this layer exists to prevent.
                entry.conn.cancel_timers();
                entry.conn.unacked.drain();
                self.by_pair.remove(&entry.conn.pair);
                #[cfg(debug_assertions)]
                if let Some(sites) = self.sites.get_mut(&id.0) {
                    sites.freed_at = Some(Location::caller());
                }
                debug!(%id, "connection freed");
                Ok(())
            }
            None => Err(self.misuse(id, "free")),
        }
    }

    /// Return an existing connection to `Adm` as if newly allocated,
    /// keeping the record and its handle.
    #[track_caller]
    pub fn reset(&mut self, id: ConnId) -> Result<(), LifecycleError> {
        match self.table.get_mut(&id.0) {
            Some(entry) => {
                entry.conn.reset_to_adm();
                debug!(%id, "connection reset to ADM");
                Ok(())
            }
            None => Err(self.misuse(id, "reset")),
        }
    }

    /// Find the connection for an address pair.
    pub fn lookup(&self, pair: &LinkPair) -> Option<ConnId> {
        self.by_pair.get(pair).copied()
    }

    #[track_caller]
    fn misuse(&self, id: ConnId, op: &str) -> LifecycleError {
        if id.0 >= self.next_id {
            warn!(%id, op, "operation on unknown handle");
            return LifecycleError::NotFound;
        }
        warn!(%id, op, "operation on freed handle");
        #[cfg(debug_assertions)]
        if let Some(sites) = self.sites.get(&id.0) {
            panic!(
                "{op} on freed {id}: allocated at {}, freed at {}, misused at {}",
                sites.allocated_at,
                sites
                    .freed_at
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "<never>".into()),
                Location::caller()
            );
        }
        LifecycleError::AlreadyFreed
    }

    // =========================================================================
    // SERVICE REQUESTS
    // =========================================================================

    /// Establish a connection to `remote` from the local SAP, bound to
    /// the given device. Sends SABME and returns the pending handle;
    /// establishment completes with a `ConnectConfirm` notification.
    #[track_caller]
    pub fn connect_request(
        &mut self,
        local: LinkAddr,
        remote: LinkAddr,
        device: Arc<dyn LinkDevice>,
        config: ConnConfig,
    ) -> Result<ConnId, LlcError> {
        let pair = LinkPair::new(local, remote);
        let id = self.allocate(pair, config, device)?;
        self.run(id, ConnEvent::ConnectReq)?;
        Ok(id)
    }

    /// Queue one payload for in-sequence delivery. Fails synchronously
    /// when the payload exceeds N1, the send window is full, the peer is
    /// busy, or the link is not established.
    #[track_caller]
    pub fn data_request(&mut self, id: ConnId, payload: Vec<u8>) -> Result<(), LlcError> {
        let entry = self.entry(id)?;
        let conn = &entry.conn;
        if !conn.state.is_established() {
            return Err(DataRequestError::NotConnected.into());
        }
        if payload.len() > conn.config.n1 {
            return Err(DataRequestError::FrameTooLarge {
                size: payload.len(),
                limit: conn.config.n1,
            }
            .into());
        }
        if conn.flags.remote_busy {
            return Err(DataRequestError::RemoteBusy.into());
        }
        if conn.unacked.len() >= conn.config.k as usize {
            return Err(DataRequestError::WindowFull.into());
        }
        self.run(id, ConnEvent::DataReq(payload))?;
        Ok(())
    }

    /// Close the link. Completion arrives as a `Disconnected`
    /// notification.
    #[track_caller]
    pub fn disconnect_request(&mut self, id: ConnId) -> Result<Vec<LinkNotification>, LlcError> {
        let entry = self.entry(id)?;
        if entry.conn.state == crate::conn::ConnState::Adm {
            return Err(DataRequestError::NotConnected.into());
        }
        self.run(id, ConnEvent::DisconnectReq)
    }

    /// Reset the link (or accept a peer-requested reset after a
    /// `ResetIndication`).
    #[track_caller]
    pub fn reset_request(&mut self, id: ConnId) -> Result<Vec<LinkNotification>, LlcError> {
        let entry = self.entry(id)?;
        let state = entry.conn.state;
        if !state.is_established() && state != crate::conn::ConnState::ResetCheck {
            return Err(DataRequestError::NotConnected.into());
        }
        self.run(id, ConnEvent::ResetReq)
    }

    // =========================================================================
    // EVENT INGRESS
    // =========================================================================

    /// Deliver a PDU already demultiplexed to this connection.
    #[track_caller]
    pub fn deliver_pdu(&mut self, id: ConnId, pdu: Pdu) -> Result<Vec<LinkNotification>, LlcError> {
        self.run(id, ConnEvent::Pdu(pdu))
    }

    /// Deliver the expiry of one named timer.
    #[track_caller]
    pub fn timer_expired(
        &mut self,
        id: ConnId,
        kind: TimerKind,
    ) -> Result<Vec<LinkNotification>, LlcError> {
        self.run(id, ConnEvent::Timer(kind))
    }

    /// Dispatch every currently-expired timer on the connection.
    #[track_caller]
    pub fn poll_timers(&mut self, id: ConnId) -> Result<Vec<LinkNotification>, LlcError> {
        let expired = self.entry(id)?.conn.expired_timers();
        let mut notes = Vec::new();
        for kind in expired {
            notes.extend(self.run(id, ConnEvent::Timer(kind))?);
        }
        Ok(notes)
    }

    /// Read-only view of a connection record, for inspection and tests.
    #[track_caller]
    pub fn connection(&self, id: ConnId) -> Result<&Connection, LifecycleError> {
        Ok(&self.entry(id)?.conn)
    }

    #[track_caller]
    fn entry(&self, id: ConnId) -> Result<&Entry, LifecycleError> {
        self.table.get(&id.0).ok_or_else(|| self.misuse(id, "use"))
    }

    /// Run one event through the dispatcher and execute its actions:
    /// sends go to the device, the rest become notifications.
    #[track_caller]
    fn run(&mut self, id: ConnId, event: ConnEvent) -> Result<Vec<LinkNotification>, LlcError> {
        let entry = match self.table.get_mut(&id.0) {
            Some(entry) => entry,
            None => return Err(self.misuse(id, "use").into()),
        };
        let actions = dispatch(&mut entry.conn, event);
        let pair = entry.conn.pair;
        let mut notes = Vec::new();
        for action in actions {
            match action {
                Action::Send(pdu) => {
                    if let Err(err) = entry.device.transmit(&pair, &pdu) {
                        // Fire-and-forget: the retransmission machinery
                        // covers lost frames.
                        warn!(%id, %pair, %err, "transmit failed");
                    }
                }
                Action::Deliver(data) => notes.push(LinkNotification::Data(data)),
                Action::ConnectConfirm => notes.push(LinkNotification::ConnectConfirm),
                Action::ConnectIndication => notes.push(LinkNotification::ConnectIndication),
                Action::ResetConfirm => notes.push(LinkNotification::ResetConfirm),
                Action::ResetIndication => notes.push(LinkNotification::ResetIndication),
                Action::Disconnected(reason) => {
                    notes.push(LinkNotification::Disconnected(reason));
                }
            }
        }
        Ok(notes)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Device double that records every transmitted PDU.
    #[derive(Default)]
    struct RecordingDevice {
        sent: Mutex<Vec<Pdu>>,
        fail: bool,
    }

    impl LinkDevice for RecordingDevice {
        fn transmit(&self, _pair: &LinkPair, pdu: &Pdu) -> Result<(), DeviceError> {
            if self.fail {
                return Err(DeviceError {
                    reason: "wire down".into(),
                });
            }
            self.sent.lock().unwrap().push(pdu.clone());
            Ok(())
        }
    }

    fn addrs() -> (LinkAddr, LinkAddr) {
        (
            LinkAddr::new(0x42u8, [1, 1, 1, 1, 1, 1]),
            LinkAddr::new(0x44u8, [2, 2, 2, 2, 2, 2]),
        )
    }

    fn established(
        mgr: &mut ConnectionManager,
        device: &Arc<RecordingDevice>,
    ) -> ConnId {
        let (local, remote) = addrs();
        let id = mgr
            .connect_request(local, remote, device.clone(), ConnConfig::default())
            .unwrap();
        let notes = mgr.deliver_pdu(id, Pdu::ua(true)).unwrap();
        assert_eq!(notes, vec![LinkNotification::ConnectConfirm]);
        id
    }

    #[test]
    fn test_connect_sends_sabme_and_indexes_pair() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let (local, remote) = addrs();
        let id = mgr
            .connect_request(local, remote, device.clone(), ConnConfig::default())
            .unwrap();

        let sent = device.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], Pdu::sabme(true));
        assert_eq!(mgr.lookup(&LinkPair::new(local, remote)), Some(id));
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let (local, remote) = addrs();
        mgr.connect_request(local, remote, device.clone(), ConnConfig::default())
            .unwrap();
        let err = mgr
            .connect_request(local, remote, device.clone(), ConnConfig::default())
            .unwrap_err();
        assert!(matches!(err, LlcError::Alloc(AllocError::PairInUse)));
    }

    #[test]
    fn test_capacity_exhaustion() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::with_capacity(1);
        let (local, remote) = addrs();
        mgr.allocate(
            LinkPair::new(local, remote),
            ConnConfig::default(),
            device.clone(),
        )
        .unwrap();

        let other = LinkPair::new(local, LinkAddr::new(0x46u8, [3, 3, 3, 3, 3, 3]));
        let err = mgr
            .allocate(other, ConnConfig::default(), device.clone())
            .unwrap_err();
        assert_eq!(err, AllocError::TableFull { capacity: 1 });
    }

    #[test]
    fn test_data_request_round_trip() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);

        mgr.data_request(id, vec![0xaa, 0xbb]).unwrap();
        let last = device.sent.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last, Pdu::i(0, 0, false, vec![0xaa, 0xbb]));

        // Peer's ack empties the window.
        mgr.deliver_pdu(id, Pdu::rr(false, 1, false)).unwrap();
        assert!(mgr.connection(id).unwrap().unacked.is_empty());
    }

    #[test]
    fn test_data_request_typed_failures() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let (local, remote) = addrs();

        // Not yet established.
        let id = mgr
            .connect_request(local, remote, device.clone(), ConnConfig::default())
            .unwrap();
        assert!(matches!(
            mgr.data_request(id, vec![1]),
            Err(LlcError::Data(DataRequestError::NotConnected))
        ));

        mgr.deliver_pdu(id, Pdu::ua(true)).unwrap();

        // Oversized.
        let n1 = mgr.connection(id).unwrap().config.n1;
        assert!(matches!(
            mgr.data_request(id, vec![0; n1 + 1]),
            Err(LlcError::Data(DataRequestError::FrameTooLarge { .. }))
        ));

        // Remote busy.
        mgr.deliver_pdu(id, Pdu::rnr(false, 0, false)).unwrap();
        assert!(matches!(
            mgr.data_request(id, vec![1]),
            Err(LlcError::Data(DataRequestError::RemoteBusy))
        ));
        mgr.deliver_pdu(id, Pdu::rr(false, 0, false)).unwrap();

        // Window full.
        let k = mgr.connection(id).unwrap().config.k;
        for n in 0..k {
            mgr.data_request(id, vec![n]).unwrap();
        }
        assert!(matches!(
            mgr.data_request(id, vec![0xff]),
            Err(LlcError::Data(DataRequestError::WindowFull))
        ));
    }

    #[test]
    fn test_inbound_data_surfaces_as_notification() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);

        let notes = mgr
            .deliver_pdu(id, Pdu::i(0, 0, false, vec![1, 2, 3]))
            .unwrap();
        assert_eq!(notes, vec![LinkNotification::Data(vec![1, 2, 3])]);
    }

    #[test]
    fn test_retry_exhaustion_notifies_once() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);
        mgr.data_request(id, vec![1]).unwrap();

        let n2 = mgr.connection(id).unwrap().config.n2;
        let mut disconnects = 0;
        for _ in 0..=n2 {
            for note in mgr.timer_expired(id, TimerKind::Ack).unwrap() {
                if matches!(note, LinkNotification::Disconnected(_)) {
                    disconnects += 1;
                }
            }
        }
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn test_free_cancels_and_releases() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);
        mgr.data_request(id, vec![1]).unwrap();

        mgr.free(id).unwrap();
        assert!(mgr.is_empty());
        let (local, remote) = addrs();
        assert_eq!(mgr.lookup(&LinkPair::new(local, remote)), None);
    }

    #[test]
    fn test_reset_returns_to_adm_keeping_handle() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);
        mgr.data_request(id, vec![1]).unwrap();

        mgr.reset(id).unwrap();
        let conn = mgr.connection(id).unwrap();
        assert_eq!(conn.state, crate::conn::ConnState::Adm);
        assert!(conn.unacked.is_empty());
        assert!(conn.next_deadline().is_none());
        // Handle still valid, pair still indexed.
        let (local, remote) = addrs();
        assert_eq!(mgr.lookup(&LinkPair::new(local, remote)), Some(id));
    }

    #[test]
    fn test_unknown_handle_is_not_found() {
        let mut mgr = ConnectionManager::new();
        assert_eq!(mgr.free(ConnId(99)), Err(LifecycleError::NotFound));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "free on freed")]
    fn test_double_free_panics_in_debug() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);
        mgr.free(id).unwrap();
        let _ = mgr.free(id);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "use on freed")]
    fn test_timer_on_freed_connection_panics_in_debug() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);
        mgr.free(id).unwrap();
        let _ = mgr.timer_expired(id, TimerKind::Ack);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_double_free_errors_in_release() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let id = established(&mut mgr, &device);
        mgr.free(id).unwrap();
        assert_eq!(mgr.free(id), Err(LifecycleError::AlreadyFreed));
    }

    #[test]
    fn test_transmit_failure_is_absorbed() {
        let device = Arc::new(RecordingDevice {
            fail: true,
            ..RecordingDevice::default()
        });
        let mut mgr = ConnectionManager::new();
        let (local, remote) = addrs();
        // Connect still succeeds; the lost SABME is the ack timer's problem.
        let id = mgr
            .connect_request(local, remote, device.clone(), ConnConfig::default())
            .unwrap();
        assert_eq!(
            mgr.connection(id).unwrap().state,
            crate::conn::ConnState::Conn
        );
    }

    #[test]
    fn test_remote_open_via_allocate_and_deliver() {
        let device = Arc::new(RecordingDevice::default());
        let mut mgr = ConnectionManager::new();
        let (local, remote) = addrs();
        let id = mgr
            .allocate(
                LinkPair::new(local, remote),
                ConnConfig::default(),
                device.clone(),
            )
            .unwrap();

        let notes = mgr.deliver_pdu(id, Pdu::sabme(true)).unwrap();
        assert_eq!(notes, vec![LinkNotification::ConnectIndication]);
        assert_eq!(*device.sent.lock().unwrap(), vec![Pdu::ua(true)]);
        assert_eq!(
            mgr.connection(id).unwrap().role,
            crate::conn::LinkRole::Responder
        );
    }
}
