//! crossbus core: transport-agnostic message primitives and error types.
//!
//! This crate defines the envelope record, the payload/type-tag model, and
//! the outcome taxonomy shared by the bus runtime and by transport
//! implementations. It intentionally carries no runtime dependencies so it
//! can be reused on both sides of a connection.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `BusError`/`Result` so a bus process
//! does not crash on malformed traffic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod envelope;
pub mod error;
pub mod payload;

pub use envelope::{Envelope, EnvelopeId, RemoteFault};
pub use error::{BusError, Result, SendError};
pub use payload::{Payload, PayloadData, TypeTag};
