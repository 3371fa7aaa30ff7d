//! The bus facade: caller-facing API over the pipeline.
//!
//! Everything is wired by explicit construction: router, dispatcher, and
//! connection manager are passed in and held as fields. There is no ambient
//! or static lookup anywhere in this crate.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{oneshot, Notify};

use crossbus_core::envelope::{Envelope, EnvelopeId};
use crossbus_core::error::{Result, SendError};
use crossbus_core::payload::Payload;

use crate::config::BusConfig;
use crate::connection::ConnectionManager;
use crate::dispatch::{Dispatcher, SpawnDispatcher};
use crate::pending::{OpResult, PendingOperation};
use crate::pipeline::Pipeline;
use crate::receiver::{FnReceiver, Receiver, ReceiverId, ReceiverRegistration};
use crate::router::{DefaultRouter, Router};
use crate::signal::NotifySignaler;

/// Per-send overrides; anything left `None` falls back to the bus config.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub timeout: Option<Duration>,
    pub to_global: Option<bool>,
}

impl SendOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn to_global(mut self, to_global: bool) -> Self {
        self.to_global = Some(to_global);
        self
    }
}

/// Completion handle for a unary send.
pub struct SendHandle {
    rx: oneshot::Receiver<OpResult>,
    cancel: Arc<AtomicBool>,
}

impl SendHandle {
    /// Request cooperative cancellation; takes effect on the next tick.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Wait for the terminal outcome: the single response payload or one
    /// typed failure.
    pub async fn wait(self) -> std::result::Result<Payload, SendError> {
        match self.rx.await {
            Ok(Ok(mut results)) => match results.pop() {
                Some(payload) => Ok(payload),
                // A unary success always carries exactly one payload; an
                // empty list can only mean the bus resolved degenerately.
                None => Err(SendError::ResponseTimeout),
            },
            Ok(Err(e)) => Err(e),
            // Bus dropped before resolving.
            Err(_) => Err(SendError::Cancelled),
        }
    }
}

/// Completion handle for a broadcast send.
pub struct BroadcastHandle {
    rx: oneshot::Receiver<OpResult>,
    cancel: Arc<AtomicBool>,
}

impl BroadcastHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Wait for the collected results. A collection deadline yields
    /// whatever arrived in time; it is not a failure.
    pub async fn wait(self) -> std::result::Result<Vec<Payload>, SendError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SendError::Cancelled),
        }
    }
}

/// Builder for [`MessageBus`]. Defaults: [`DefaultRouter`],
/// [`SpawnDispatcher`], no connection manager, default config.
pub struct BusBuilder {
    config: BusConfig,
    router: Option<Arc<dyn Router>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    connections: Option<Arc<dyn ConnectionManager>>,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            router: None,
            dispatcher: None,
            connections: None,
        }
    }

    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn connections(mut self, connections: Arc<dyn ConnectionManager>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn build(self) -> Result<MessageBus> {
        self.config.validate()?;
        let router = self.router.unwrap_or_else(|| Arc::new(DefaultRouter::new()));
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(SpawnDispatcher::new()));
        Ok(MessageBus::with_parts(
            self.config,
            router,
            dispatcher,
            self.connections,
        ))
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One bus instance: owns the pipeline and the scheduler.
pub struct MessageBus {
    pipeline: Arc<Pipeline>,
    config: BusConfig,
    wake: Arc<Notify>,
    stop: Arc<AtomicBool>,
}

impl MessageBus {
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    fn with_parts(
        config: BusConfig,
        router: Arc<dyn Router>,
        dispatcher: Arc<dyn Dispatcher>,
        connections: Option<Arc<dyn ConnectionManager>>,
    ) -> Self {
        let signaler = NotifySignaler::new();
        let wake = signaler.wake_handle();
        let pipeline = Arc::new(Pipeline::new(
            config.bus.clone(),
            router,
            dispatcher,
            connections,
            Arc::new(signaler),
        ));
        Self {
            pipeline,
            config,
            wake,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Issue a unary send. The operation starts in `New` and is promoted on
    /// the next tick.
    pub fn send(
        &self,
        address: impl Into<String>,
        payload: Payload,
        options: SendOptions,
    ) -> SendHandle {
        let (rx, cancel) = self.submit(Some(address.into()), payload, false, None, options);
        SendHandle { rx, cancel }
    }

    /// Issue a broadcast collecting zero or more responses, optionally
    /// finishing early at `expected_results`.
    pub fn broadcast(
        &self,
        address: impl Into<String>,
        payload: Payload,
        expected_results: Option<usize>,
        options: SendOptions,
    ) -> BroadcastHandle {
        let (rx, cancel) = self.submit(Some(address.into()), payload, true, expected_results, options);
        BroadcastHandle { rx, cancel }
    }

    fn submit(
        &self,
        address: Option<String>,
        payload: Payload,
        is_broadcast: bool,
        expected_results: Option<usize>,
        options: SendOptions,
    ) -> (oneshot::Receiver<OpResult>, Arc<AtomicBool>) {
        // Placeholder fields; promotion assigns id, sent, direction, and
        // deadline on the tick that builds the request.
        let request = Envelope {
            id: EnvelopeId(0),
            response_to: None,
            address,
            payload,
            routing_info: None,
            sent: SystemTime::now(),
            timeout: Duration::ZERO,
            is_broadcast,
            to_global: false,
            from_global: false,
            fault: None,
        };
        let (op, rx, cancel) =
            PendingOperation::new(request, options.timeout, options.to_global, expected_results);
        self.pipeline.submit(op);
        // Nudge the scheduler so promotion does not wait out the poll
        // interval.
        self.wake.notify_one();
        (rx, cancel)
    }

    /// Register a receiver for an address (`None` receives every request).
    pub fn register_receiver(
        &self,
        address: Option<String>,
        receiver: Arc<dyn Receiver>,
    ) -> ReceiverId {
        let id = ReceiverId(self.pipeline.fresh_id().0);
        self.pipeline.add_registration(ReceiverRegistration {
            id,
            address,
            receiver,
        });
        id
    }

    /// Closure form of [`MessageBus::register_receiver`].
    pub fn register_fn<F, Fut>(&self, address: Option<String>, f: F) -> ReceiverId
    where
        F: Fn(Option<String>, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload>> + Send + 'static,
    {
        self.register_receiver(address, Arc::new(FnReceiver::new(f)))
    }

    pub fn unregister_receiver(&self, id: ReceiverId) -> bool {
        self.pipeline.remove_registration(id)
    }

    /// Outstanding (non-terminal) operations.
    pub fn pending_count(&self) -> usize {
        self.pipeline.pending_count()
    }

    /// Currently registered receivers.
    pub fn registration_count(&self) -> usize {
        self.pipeline.registration_count()
    }

    /// Manual tick; the unit all tests drive the bus with.
    pub fn do_work(&self) {
        self.pipeline.do_work();
    }

    /// Drive ticks until [`MessageBus::shutdown`]: poll interval plus early
    /// wake-ups from sends and productive ticks.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.bus.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            poll_ms = self.config.bus.poll_interval_ms,
            "bus scheduler running"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            self.pipeline.do_work();
        }
        tracing::info!("bus scheduler stopped");
    }

    /// Stop the scheduler loop. Outstanding operations stop being advanced;
    /// their handles resolve as cancelled when the bus is dropped.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
