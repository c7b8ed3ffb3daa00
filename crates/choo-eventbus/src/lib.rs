//! In-process typed pub/sub event bus for a single job, plus the
//! newline-delimited JSON wire form used when events cross a process
//! boundary (subprocess-hosted workers -> daemon, daemon -> clients).

pub mod bus;
pub mod wire;

pub use bus::{EventBus, Subscription, DEFAULT_BUFFER_CAPACITY};
pub use wire::{from_wire, to_wire, WireError};
