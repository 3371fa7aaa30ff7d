//! crossbus runtime library entry.
//!
//! This crate wires the pipeline, router, dispatcher, connection manager,
//! and receiver registry into a cohesive bus stack. It is intended to be
//! consumed through the [`bus::MessageBus`] facade and by integration tests.

pub mod bus;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod pending;
pub mod pipeline;
pub mod receiver;
pub mod router;
pub mod signal;

pub use bus::{BroadcastHandle, BusBuilder, MessageBus, SendHandle, SendOptions};
pub use connection::{ChannelConnection, ChannelConnectionManager, Connection, ConnectionId, ConnectionManager};
pub use dispatch::{Dispatcher, SerialDispatcher, SpawnDispatcher};
pub use pending::OpState;
pub use receiver::{FnReceiver, Receiver, ReceiverId, ReceiverRegistration};
pub use router::{DefaultRouter, Router};
pub use signal::{NoopSignaler, NotifySignaler, WorkSignaler};
