//! Receiver-callback execution strategies.

mod dispatcher;

pub use dispatcher::{Dispatcher, SerialDispatcher, SpawnDispatcher};
