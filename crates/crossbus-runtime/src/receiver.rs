//! Receiver registrations: an address filter bound to an async callback.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crossbus_core::error::{BusError, Result};
use crossbus_core::payload::Payload;

/// Registration identifier, unique per bus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(pub u64);

/// The single typed callback contract: `(address, payload) → payload`.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, address: Option<&str>, payload: Payload) -> Result<Payload>;
}

/// One registered receiver. Whether an envelope reaches it is decided by the
/// router (`should_receive`), not here; the address is plain match data.
#[derive(Clone)]
pub struct ReceiverRegistration {
    pub id: ReceiverId,
    pub address: Option<String>,
    pub receiver: Arc<dyn Receiver>,
}

/// Closure adapter so simple receivers need no trait impl. The closure gets
/// an owned address, which keeps its future free of borrowed arguments.
pub struct FnReceiver<F> {
    f: F,
}

impl<F, Fut> FnReceiver<F>
where
    F: Fn(Option<String>, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Receiver for FnReceiver<F>
where
    F: Fn(Option<String>, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload>> + Send,
{
    async fn receive(&self, address: Option<&str>, payload: Payload) -> Result<Payload> {
        (self.f)(address.map(ToOwned::to_owned), payload).await
    }
}

/// Echo helper used in examples and tests: answers every request with a
/// fixed text payload.
pub struct StaticReceiver {
    reply: String,
}

impl StaticReceiver {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl Receiver for StaticReceiver {
    async fn receive(&self, _address: Option<&str>, _payload: Payload) -> Result<Payload> {
        Ok(Payload::text(self.reply.clone()))
    }
}

/// Receiver that always fails; exercises the fault-forwarding path.
pub struct FailingReceiver;

#[async_trait]
impl Receiver for FailingReceiver {
    async fn receive(&self, _address: Option<&str>, _payload: Payload) -> Result<Payload> {
        Err(BusError::Receiver("receiver refused the request".into()))
    }
}
