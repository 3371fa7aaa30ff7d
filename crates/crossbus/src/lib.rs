//! Top-level facade crate for crossbus.
//!
//! Re-exports the core primitives and the runtime so users can depend on a
//! single crate.

pub mod core {
    pub use crossbus_core::*;
}

pub mod runtime {
    pub use crossbus_runtime::*;
}

pub use crossbus_core::{Envelope, EnvelopeId, Payload, SendError, TypeTag};
pub use crossbus_runtime::{BusBuilder, MessageBus, SendOptions};
