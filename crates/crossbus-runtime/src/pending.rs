//! Caller-side tracking record for one outstanding send.
//!
//! A pending operation owns the single-assignment completion handle for its
//! send. The pipeline is the only mutator; everything here is synchronous
//! bookkeeping executed under the bus lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;

use crossbus_core::envelope::{Envelope, EnvelopeId};
use crossbus_core::error::SendError;
use crossbus_core::payload::Payload;

use crate::config::BusSection;

/// Operation lifecycle. `New → Waiting → {Finished | TimedOut | Cancelled |
/// Broken}`; the four right-hand states are terminal. A `New` operation may
/// be cancelled before promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    New,
    Waiting,
    Finished,
    TimedOut,
    Cancelled,
    Broken,
}

impl OpState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OpState::New | OpState::Waiting)
    }
}

/// What the completion handle resolves to. Unary sends carry exactly one
/// payload on success; broadcasts carry zero or more.
pub type OpResult = std::result::Result<Vec<Payload>, SendError>;

/// One outstanding send, tracked by the pipeline until a terminal state.
pub struct PendingOperation {
    /// The envelope this operation will send; filled in at promotion.
    pub request: Envelope,
    /// Responses received so far, arrival order.
    pub responses: Vec<Envelope>,
    /// Extracted payloads, parallel to `responses` minus fault responses.
    pub results: Vec<Payload>,
    pub state: OpState,
    /// Broadcast-only early-finish bound.
    pub expected_result_count: Option<usize>,

    /// Deadline given by the caller; `None` falls back to the bus default.
    explicit_timeout: Option<Duration>,
    /// Direction given by the caller; `None` falls back to the bus default.
    explicit_to_global: Option<bool>,

    completion: Option<oneshot::Sender<OpResult>>,
    cancel: Arc<AtomicBool>,
}

impl PendingOperation {
    /// Create an operation in state `New`. Returns the operation, the
    /// completion receiver, and the cooperative cancel flag.
    pub fn new(
        request: Envelope,
        explicit_timeout: Option<Duration>,
        explicit_to_global: Option<bool>,
        expected_result_count: Option<usize>,
    ) -> (Self, oneshot::Receiver<OpResult>, Arc<AtomicBool>) {
        let (tx, rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let op = Self {
            request,
            responses: Vec::new(),
            results: Vec::new(),
            state: OpState::New,
            expected_result_count,
            explicit_timeout,
            explicit_to_global,
            completion: Some(tx),
            cancel: Arc::clone(&cancel),
        };
        (op, rx, cancel)
    }

    /// Whether the caller has requested cancellation. Polled once per tick.
    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Promote `New → Waiting`: assign id and timestamp, settle direction
    /// and deadline from explicit values or bus defaults. Happens once.
    pub fn promote(&mut self, id: EnvelopeId, now: SystemTime, cfg: &BusSection) {
        debug_assert_eq!(self.state, OpState::New);
        self.request.id = id;
        self.request.sent = now;
        self.request.from_global = false;
        self.request.response_to = None;
        self.request.to_global = self.explicit_to_global.unwrap_or(cfg.default_to_global);
        self.request.timeout = self.explicit_timeout.unwrap_or(if self.request.is_broadcast {
            cfg.collect_timeout()
        } else {
            cfg.response_timeout()
        });
        self.state = OpState::Waiting;
    }

    /// Record a matched response. Returns `true` when the response finished
    /// the operation (unary first response, or broadcast bound reached).
    pub fn record_response(&mut self, response: Envelope) -> bool {
        debug_assert_eq!(self.state, OpState::Waiting);

        if let Some(fault) = response.fault.clone() {
            self.responses.push(response);
            if !self.request.is_broadcast {
                self.fail(SendError::Remote {
                    display: fault.display,
                    tag: fault.tag,
                });
                return true;
            }
            // Broadcast: a faulted responder contributes nothing; others
            // may still answer.
            return false;
        }

        self.results.push(response.payload.clone());
        self.responses.push(response);

        if self.request.is_broadcast {
            match self.expected_result_count {
                Some(n) if self.results.len() >= n => {
                    self.finish();
                    true
                }
                _ => false,
            }
        } else {
            self.finish();
            true
        }
    }

    /// Broadcast result bound already met. True without any responses only
    /// when the caller asked for zero.
    pub fn collection_complete(&self) -> bool {
        self.request.is_broadcast
            && self
                .expected_result_count
                .is_some_and(|n| self.results.len() >= n)
    }

    /// Resolve as success with whatever results have accumulated.
    pub fn finish(&mut self) {
        let results = std::mem::take(&mut self.results);
        self.resolve(OpState::Finished, Ok(results));
    }

    /// Resolve a broadcast that hit its collection deadline: success with
    /// partial results, never a timeout failure.
    pub fn finish_partial(&mut self) {
        debug_assert!(self.request.is_broadcast);
        self.finish();
    }

    pub fn time_out(&mut self) {
        self.resolve(OpState::TimedOut, Err(SendError::ResponseTimeout));
    }

    pub fn cancelled(&mut self) {
        self.resolve(OpState::Cancelled, Err(SendError::Cancelled));
    }

    pub fn broken(&mut self) {
        self.resolve(OpState::Broken, Err(SendError::ConnectionBroken));
    }

    fn fail(&mut self, err: SendError) {
        let state = match err {
            SendError::ResponseTimeout => OpState::TimedOut,
            SendError::ConnectionBroken => OpState::Broken,
            SendError::Cancelled => OpState::Cancelled,
            SendError::Remote { .. } => OpState::Finished,
        };
        self.resolve(state, Err(err));
    }

    /// Exactly-once: the sender is taken on the first terminal transition;
    /// any later call is a no-op.
    fn resolve(&mut self, state: OpState, result: OpResult) {
        let Some(tx) = self.completion.take() else {
            return;
        };
        self.state = state;
        // The caller may have dropped the handle; that is not an error.
        let _ = tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbus_core::envelope::RemoteFault;

    fn op(is_broadcast: bool, expected: Option<usize>) -> (PendingOperation, oneshot::Receiver<OpResult>) {
        let request = Envelope {
            id: EnvelopeId(0),
            response_to: None,
            address: Some("t".into()),
            payload: Payload::text("req"),
            routing_info: None,
            sent: SystemTime::UNIX_EPOCH,
            timeout: Duration::ZERO,
            is_broadcast,
            to_global: false,
            from_global: false,
            fault: None,
        };
        let (op, rx, _) = PendingOperation::new(request, None, None, expected);
        (op, rx)
    }

    fn response(to: EnvelopeId, text: &str) -> Envelope {
        Envelope {
            id: EnvelopeId(99),
            response_to: Some(to),
            address: Some("t".into()),
            payload: Payload::text(text),
            routing_info: None,
            sent: SystemTime::now(),
            timeout: Duration::ZERO,
            is_broadcast: false,
            to_global: false,
            from_global: false,
            fault: None,
        }
    }

    #[test]
    fn promotion_applies_bus_defaults() {
        let (mut op, _rx) = op(false, None);
        let cfg = BusSection::default();
        op.promote(EnvelopeId(5), SystemTime::now(), &cfg);
        assert_eq!(op.state, OpState::Waiting);
        assert_eq!(op.request.id, EnvelopeId(5));
        assert_eq!(op.request.timeout, cfg.response_timeout());
        assert!(!op.request.to_global);
    }

    #[test]
    fn unary_finishes_on_first_response() {
        let (mut op, mut rx) = op(false, None);
        op.promote(EnvelopeId(1), SystemTime::now(), &BusSection::default());
        assert!(op.record_response(response(EnvelopeId(1), "pong")));
        assert_eq!(op.state, OpState::Finished);
        let results = rx.try_recv().unwrap().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_text(), Some("pong"));
    }

    #[test]
    fn broadcast_waits_for_expected_count() {
        let (mut op, mut rx) = op(true, Some(2));
        op.promote(EnvelopeId(1), SystemTime::now(), &BusSection::default());
        assert!(!op.record_response(response(EnvelopeId(1), "a")));
        assert!(rx.try_recv().is_err());
        assert!(op.record_response(response(EnvelopeId(1), "b")));
        let results = rx.try_recv().unwrap().unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn broadcast_with_zero_bound_is_complete_at_promotion() {
        let (mut op, mut rx) = op(true, Some(0));
        op.promote(EnvelopeId(1), SystemTime::now(), &BusSection::default());
        assert!(op.collection_complete());
        op.finish();
        assert_eq!(op.state, OpState::Finished);
        let results = rx.try_recv().unwrap().unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn resolve_is_exactly_once() {
        let (mut op, mut rx) = op(false, None);
        op.promote(EnvelopeId(1), SystemTime::now(), &BusSection::default());
        op.time_out();
        op.cancelled();
        assert_eq!(op.state, OpState::TimedOut);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(SendError::ResponseTimeout)
        ));
    }

    #[test]
    fn unary_fault_resolves_remote_error() {
        let (mut op, mut rx) = op(false, None);
        op.promote(EnvelopeId(1), SystemTime::now(), &BusSection::default());
        let mut resp = response(EnvelopeId(1), "");
        resp.fault = Some(RemoteFault {
            display: "boom".into(),
            tag: None,
        });
        assert!(op.record_response(resp));
        assert!(matches!(rx.try_recv().unwrap(), Err(SendError::Remote { .. })));
    }
}
