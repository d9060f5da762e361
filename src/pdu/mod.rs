//! PDU descriptors and sequence-number arithmetic.

pub mod frame;
pub mod seq;

pub use frame::{FrmrInfo, Pdu, PduKind};
