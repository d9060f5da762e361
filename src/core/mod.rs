//! Core types: addressing, constants, and the error taxonomy.

pub mod address;
pub mod constants;
pub mod error;

pub use address::{LinkAddr, LinkPair, MacAddr, SapId};
pub use error::{AllocError, DataRequestError, DeviceError, LifecycleError, LlcError};
