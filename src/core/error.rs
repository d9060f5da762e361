//! Error types for the LLC Type-2 engine.
//!
//! Transient protocol errors (an out-of-sequence I-PDU, a stale
//! acknowledgement) are recovered inside the dispatcher and never appear
//! here. These types cover what callers can actually observe: synchronous
//! service-request failures, resource exhaustion, lifecycle misuse in
//! release builds, and device transmit failures.

use thiserror::Error;

/// Synchronous failures of `data_request`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DataRequestError {
    /// The send window already holds `k` unacknowledged I-PDUs.
    #[error("send window full")]
    WindowFull,

    /// The peer reported receiver-not-ready; sending is suspended.
    #[error("remote receiver busy")]
    RemoteBusy,

    /// Payload exceeds the negotiated N1 limit.
    #[error("payload of {size} octets exceeds N1 limit of {limit}")]
    FrameTooLarge {
        /// Offered payload size.
        size: usize,
        /// Administrative N1 limit.
        limit: usize,
    },

    /// The connection is not in a data-transfer state.
    #[error("connection not established")]
    NotConnected,
}

/// Failures of connection allocation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The connection table is at capacity.
    #[error("connection table full ({capacity} entries)")]
    TableFull {
        /// Configured table capacity.
        capacity: usize,
    },

    /// A connection for this address pair already exists.
    #[error("address pair already connected")]
    PairInUse,
}

/// Lifecycle misuse, surfaced as errors in release builds.
///
/// Debug builds panic with the recorded allocation/deallocation
/// call-sites instead; see the manager module.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// No connection with this handle exists.
    #[error("unknown connection handle")]
    NotFound,

    /// The handle refers to a connection that was already freed.
    #[error("connection already freed")]
    AlreadyFreed,
}

/// Failure reported by the network-device collaborator.
///
/// Transmission is fire-and-forget; the engine logs these and moves on.
#[derive(Debug, Error, Clone)]
#[error("device transmit failed: {reason}")]
pub struct DeviceError {
    /// Device-supplied description.
    pub reason: String,
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum LlcError {
    /// Data request failure.
    #[error("data request: {0}")]
    Data(#[from] DataRequestError),

    /// Allocation failure.
    #[error("allocation: {0}")]
    Alloc(#[from] AllocError),

    /// Lifecycle misuse.
    #[error("lifecycle: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Device failure.
    #[error("device: {0}")]
    Device(#[from] DeviceError),
}
