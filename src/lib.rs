//! # llc2-protocol
//!
//! An IEEE 802.2 LLC Type-2 connection engine: a sliding-window,
//! acknowledgement-based, retransmitting data-link protocol with
//! explicit state machine semantics. The crate provides:
//!
//! - **Protocol core**: the per-connection event/action dispatcher
//!   covering I-PDU acceptance, REJ recovery, N(R) validation, the
//!   busy handshake, and FRMR generation
//! - **Sequence management**: mod-128 send/receive state variables and
//!   the unacknowledged-PDU queue bounded by the transmit window
//! - **Lifecycle**: allocation, reset, and teardown of connection
//!   records with debug-build double-free detection
//! - **Async driver**: one serializing tokio task per connection
//!
//! Device I/O, SAP multiplexing, and the binary 802.2 control-octet
//! encoding are external collaborators: frames enter and leave as
//! decoded [`pdu::Pdu`] descriptors.
//!
//! ## Feature Flags
//!
//! - `driver` (default): async per-connection event loop (requires tokio)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use llc2_protocol::prelude::*;
//!
//! struct NullDevice;
//!
//! impl LinkDevice for NullDevice {
//!     fn transmit(&self, _pair: &LinkPair, _pdu: &Pdu) -> Result<(), DeviceError> {
//!         Ok(())
//!     }
//! }
//!
//! let mut manager = ConnectionManager::new();
//! let local = LinkAddr::new(0x42u8, [0, 0, 0, 0, 0, 1]);
//! let remote = LinkAddr::new(0x44u8, [0, 0, 0, 0, 0, 2]);
//! let id = manager
//!     .connect_request(local, remote, Arc::new(NullDevice), ConnConfig::default())
//!     .unwrap();
//!
//! // The peer answers our SABME with UA: the link is up.
//! let notes = manager.deliver_pdu(id, Pdu::ua(true)).unwrap();
//! assert_eq!(notes, vec![LinkNotification::ConnectConfirm]);
//! manager.data_request(id, b"hello".to_vec()).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core types (always included)
pub mod core;

// PDU descriptors and sequence arithmetic
pub mod pdu;

// Per-connection state machine
pub mod conn;

// Lifecycle manager and service interface
pub mod manager;

// Async driver (feature-gated)
#[cfg(feature = "driver")]
#[cfg_attr(docsrs, doc(cfg(feature = "driver")))]
pub mod driver;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::conn::{
        Action, ConnConfig, ConnEvent, ConnState, Connection, DisconnectReason, LinkRole,
        TimerKind,
    };
    pub use crate::core::{
        AllocError, DataRequestError, DeviceError, LifecycleError, LinkAddr, LinkPair, LlcError,
        MacAddr, SapId,
    };
    pub use crate::manager::{ConnId, ConnectionManager, LinkDevice, LinkNotification};
    pub use crate::pdu::{FrmrInfo, Pdu, PduKind};

    #[cfg(feature = "driver")]
    pub use crate::driver::{spawn_link, LinkHandle};
}

// Re-export commonly used items at crate root
pub use crate::conn::{ConnConfig, ConnState, Connection, DisconnectReason};
pub use crate::core::{LinkAddr, LinkPair, LlcError};
pub use crate::manager::{ConnId, ConnectionManager, LinkDevice, LinkNotification};
pub use crate::pdu::{Pdu, PduKind};
