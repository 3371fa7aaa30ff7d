//! The pipeline: orchestrates one tick of bus work.
//!
//! `do_work` is the single serialization point for all bus-state mutation.
//! It drains inputs, advances pending operations through their state
//! machine, matches responses by correlation id, and drives the router,
//! dispatcher, and connection manager. It runs to completion on whatever
//! thread invokes it; the scheduler in [`crate::bus`] calls it on a poll
//! interval with early wake-ups from the work signaler.
//!
//! Receiver callbacks never run under the bus lock. Their completions are
//! funneled through a bounded mailbox and enter the pipeline on the *next*
//! tick, which bounds per-tick work and prevents reentrant recursion from
//! receiver logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tokio::sync::mpsc;

use crossbus_core::envelope::{Envelope, EnvelopeId, RemoteFault};
use crossbus_core::payload::TypeTag;

use crate::config::BusSection;
use crate::connection::{Connection, ConnectionId, ConnectionManager};
use crate::dispatch::Dispatcher;
use crate::pending::{OpState, PendingOperation};
use crate::receiver::{ReceiverId, ReceiverRegistration};
use crate::router::Router;
use crate::signal::WorkSignaler;

/// Everything guarded by the bus-wide lock: the active operation set and
/// the receiver registrations.
struct BusState {
    pending: Vec<PendingOperation>,
    registrations: Vec<ReceiverRegistration>,
}

pub struct Pipeline {
    cfg: BusSection,
    router: Arc<dyn Router>,
    dispatcher: Arc<dyn Dispatcher>,
    connections: Option<Arc<dyn ConnectionManager>>,
    signaler: Arc<dyn WorkSignaler>,

    state: Mutex<BusState>,

    /// Deferred local-response mailbox. Receiver continuations hold the
    /// sender; only `do_work` drains the receiving end.
    response_tx: mpsc::Sender<Envelope>,
    response_rx: Mutex<mpsc::Receiver<Envelope>>,

    /// Envelope and registration id source. Unique per bus instance.
    next_id: AtomicU64,
}

impl Pipeline {
    pub fn new(
        cfg: BusSection,
        router: Arc<dyn Router>,
        dispatcher: Arc<dyn Dispatcher>,
        connections: Option<Arc<dyn ConnectionManager>>,
        signaler: Arc<dyn WorkSignaler>,
    ) -> Self {
        let (response_tx, response_rx) = mpsc::channel(cfg.response_queue_capacity);
        Self {
            cfg,
            router,
            dispatcher,
            connections,
            signaler,
            state: Mutex::new(BusState {
                pending: Vec::new(),
                registrations: Vec::new(),
            }),
            response_tx,
            response_rx: Mutex::new(response_rx),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn fresh_id(&self) -> EnvelopeId {
        EnvelopeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Hand a freshly created (`New`) operation to the pipeline. Picked up
    /// on the next tick.
    pub fn submit(&self, op: PendingOperation) {
        self.lock_state().pending.push(op);
    }

    pub fn add_registration(&self, registration: ReceiverRegistration) {
        self.lock_state().registrations.push(registration);
    }

    pub fn remove_registration(&self, id: ReceiverId) -> bool {
        let mut st = self.lock_state();
        let before = st.registrations.len();
        st.registrations.retain(|r| r.id != id);
        st.registrations.len() != before
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn registration_count(&self) -> usize {
        self.lock_state().registrations.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    /// One tick. Safe to call repeatedly; idles cheaply when there is
    /// nothing to do.
    pub fn do_work(&self) {
        let now = SystemTime::now();

        // Drain inputs before taking the bus lock.
        let mut inbound: Vec<(Envelope, ConnectionId)> = Vec::new();
        let mut conn_snapshot: Vec<Arc<dyn Connection>> = Vec::new();
        if let Some(cm) = &self.connections {
            cm.dequeue_messages(&mut inbound);
            conn_snapshot = cm.connections();
        }
        let any_broken = conn_snapshot.iter().any(|c| c.is_broken());

        let mut local_responses: Vec<Envelope> = Vec::new();
        {
            let mut rx = match self.response_rx.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            while let Ok(env) = rx.try_recv() {
                local_responses.push(env);
            }
        }

        let mut st = self.lock_state();

        // Cancellation is cooperative, polled once per tick. Covers both
        // New and Waiting operations.
        for op in st.pending.iter_mut() {
            if !op.state.is_terminal() && op.cancel_requested() {
                tracing::debug!(id = %op.request.id, "operation cancelled");
                op.cancelled();
            }
        }

        // Promote New operations into request envelopes. A broadcast whose
        // result bound is already met resolves here instead of waiting out
        // its collection window; its request is never sent.
        let mut new_requests: Vec<Envelope> = Vec::new();
        for op in st.pending.iter_mut() {
            if op.state == OpState::New {
                op.promote(self.fresh_id(), now, &self.cfg);
                if op.collection_complete() {
                    tracing::debug!(id = %op.request.id, "broadcast bound met at promotion");
                    op.finish();
                } else {
                    new_requests.push(op.request.clone());
                }
            }
        }

        // Timeout sweep. A broadcast deadline is success with whatever has
        // been collected; only unary sends fail.
        for op in st.pending.iter_mut() {
            if op.state == OpState::Waiting && op.request.expired(now) {
                if op.request.is_broadcast {
                    tracing::debug!(id = %op.request.id, n = op.results.len(), "broadcast collection closed");
                    op.finish_partial();
                } else {
                    tracing::debug!(id = %op.request.id, "unary send timed out");
                    op.time_out();
                }
            }
        }

        // Broken-connection sweep: bus-wide blast radius. Any broken
        // connection fails every outstanding global send; local-only
        // operations are unaffected.
        if any_broken {
            for op in st.pending.iter_mut() {
                if op.state == OpState::Waiting && op.request.to_global {
                    tracing::warn!(id = %op.request.id, "global send failed: connection broken");
                    op.broken();
                }
            }
        }

        // Purge terminal operations; they were resolved the moment they
        // left Waiting.
        let before = st.pending.len();
        st.pending.retain(|op| !op.state.is_terminal());
        let removed = before - st.pending.len();

        // Idle fast-path: no router or dispatcher interaction at all.
        if inbound.is_empty() && local_responses.is_empty() && new_requests.is_empty() && removed == 0
        {
            return;
        }

        // Router bookkeeping hooks.
        for (env, conn_id) in &inbound {
            if let Some(conn) = conn_snapshot.iter().find(|c| c.id() == *conn_id) {
                self.router.received_from_remote(env, conn.as_ref());
            }
        }
        for env in &new_requests {
            self.router.received_from_local(env);
        }

        // Batch order: inbound, local responses, new requests.
        for (env, _) in &inbound {
            self.process_message(&mut st, env, &conn_snapshot);
        }
        for env in &local_responses {
            self.process_message(&mut st, env, &conn_snapshot);
        }
        for env in &new_requests {
            self.process_message(&mut st, env, &conn_snapshot);
        }

        drop(st);

        self.signaler.signal_work_available();
    }

    /// Per-envelope processing: correlation matching, local forwarding
    /// through the dispatcher, global forwarding through the connection
    /// manager.
    fn process_message(
        &self,
        st: &mut BusState,
        envelope: &Envelope,
        conn_snapshot: &[Arc<dyn Connection>],
    ) {
        // Response matching by correlation id. Late responses to already
        // terminal operations fall through silently.
        if let Some(response_to) = envelope.response_to {
            for op in st.pending.iter_mut() {
                if op.state == OpState::Waiting && op.request.id == response_to {
                    op.record_response(envelope.clone());
                }
            }
        }

        // Local forwarding: dispatch matching receiver callbacks. The
        // continuation queues a synthesized response for the next tick.
        if self.router.forward_to_local(envelope) {
            for reg in &st.registrations {
                if self.router.should_receive(envelope, reg) {
                    self.dispatch_receive(reg, envelope);
                }
            }
        }

        // Global forwarding: offer to each connection the router approves.
        if self.router.forward_to_global(envelope) {
            if let Some(cm) = &self.connections {
                for conn in conn_snapshot {
                    if self.router.should_send(envelope, conn.as_ref()) {
                        if let Err(e) = cm.send_message(envelope, conn.as_ref()) {
                            tracing::warn!(id = %envelope.id, conn = %conn.id(), error = %e, "outbound send failed");
                        }
                    }
                }
            }
        }
    }

    fn dispatch_receive(&self, reg: &ReceiverRegistration, envelope: &Envelope) {
        let receiver = Arc::clone(&reg.receiver);
        let request = envelope.clone();
        let response_id = self.fresh_id();
        let tx = self.response_tx.clone();
        let forward_exceptions = self.cfg.forward_exceptions;

        self.dispatcher.dispatch(Box::pin(async move {
            let outcome = receiver
                .receive(request.address.as_deref(), request.payload.clone())
                .await;
            let now = SystemTime::now();

            let response = match outcome {
                Ok(payload) => Envelope::response(&request, response_id, payload, now),
                Err(e) if forward_exceptions => {
                    let fault = RemoteFault {
                        display: e.to_string(),
                        tag: Some(TypeTag::new("BusError", "crossbus-core")),
                    };
                    Envelope::fault_response(&request, response_id, fault, now)
                }
                Err(e) => {
                    // Not forwarded: the request never hears from this
                    // registration and may finish elsewhere or time out.
                    tracing::warn!(id = %request.id, error = %e, "receiver failed");
                    return;
                }
            };

            // try_send keeps user-callback duration decoupled from tick
            // latency; a full mailbox drops the response.
            if let Err(e) = tx.try_send(response) {
                tracing::warn!(id = %request.id, error = %e, "deferred response queue full; response dropped");
            }
        }));
    }
}
