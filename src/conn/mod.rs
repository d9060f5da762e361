//! Per-connection state and the protocol state machine.

pub mod connection;
pub mod dispatch;
pub mod event;
pub mod queue;
pub mod timer;

pub use connection::{ConnConfig, ConnFlags, ConnState, Connection, LinkRole};
pub use dispatch::dispatch;
pub use event::{Action, ConnEvent, DisconnectReason};
pub use queue::{SentPdu, UnackedQueue};
pub use timer::{LinkTimer, TimerKind};
