//! Routing strategy: decides local/global forwarding and receiver/connection
//! filtering. Pluggable; stateful across calls (loop prevention).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crossbus_core::envelope::{Envelope, EnvelopeId};

use crate::connection::{Connection, ConnectionId};
use crate::receiver::ReceiverRegistration;

/// Forwarding and filtering decisions for one bus instance. All methods are
/// called from inside the pipeline tick; implementations keep their own
/// state behind interior mutability.
pub trait Router: Send + Sync {
    /// Should `envelope` be offered to local receiver registrations?
    fn forward_to_local(&self, envelope: &Envelope) -> bool;

    /// Should `envelope` be offered to remote connections?
    fn forward_to_global(&self, envelope: &Envelope) -> bool;

    /// Does `registration` receive `envelope`?
    fn should_receive(&self, envelope: &Envelope, registration: &ReceiverRegistration) -> bool;

    /// Does `connection` get `envelope`?
    fn should_send(&self, envelope: &Envelope, connection: &dyn Connection) -> bool;

    /// Bookkeeping hook: `envelope` was drained from `connection` this tick.
    fn received_from_remote(&self, envelope: &Envelope, connection: &dyn Connection);

    /// Bookkeeping hook: `envelope` was built from a local send this tick.
    fn received_from_local(&self, envelope: &Envelope);
}

/// Default policy:
/// - requests forward locally at most once per envelope id; a replayed id
///   (mesh loop, duplicate delivery) is dropped;
/// - global forwarding iff `to_global && !from_global`, at most once per id;
/// - receiver filter is address equality (an address-less registration
///   matches every request);
/// - an envelope is never sent back to the connection it arrived from.
pub struct DefaultRouter {
    state: Mutex<RouterState>,
}

struct RouterState {
    seen: HashSet<EnvelopeId>,
    seen_order: VecDeque<EnvelopeId>,
    origins: HashMap<EnvelopeId, ConnectionId>,
    delivered: HashSet<EnvelopeId>,
    sent: HashSet<EnvelopeId>,
}

/// Bound on remembered ids; old entries fall out FIFO.
const SEEN_CAPACITY: usize = 4096;

impl DefaultRouter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RouterState {
                seen: HashSet::new(),
                seen_order: VecDeque::new(),
                origins: HashMap::new(),
                delivered: HashSet::new(),
                sent: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        // A poisoned router lock means a panic inside this module; routing
        // state stays usable either way.
        match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }
}

impl Default for DefaultRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterState {
    /// Remember an id; returns `false` when it was already known.
    fn note(&mut self, id: EnvelopeId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.seen_order.push_back(id);
        while self.seen_order.len() > SEEN_CAPACITY {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
                self.origins.remove(&old);
                self.delivered.remove(&old);
                self.sent.remove(&old);
            }
        }
        true
    }

    /// First local delivery for `id` claims it; replays return `false`.
    fn deliver_once(&mut self, id: EnvelopeId) -> bool {
        self.note(id);
        self.delivered.insert(id)
    }

    /// First outbound forwarding for `id` claims it; replays return `false`.
    fn send_once(&mut self, id: EnvelopeId) -> bool {
        self.note(id);
        self.sent.insert(id)
    }
}

impl Router for DefaultRouter {
    fn forward_to_local(&self, envelope: &Envelope) -> bool {
        envelope.is_request() && self.lock().deliver_once(envelope.id)
    }

    fn forward_to_global(&self, envelope: &Envelope) -> bool {
        envelope.to_global && !envelope.from_global && self.lock().send_once(envelope.id)
    }

    fn should_receive(&self, envelope: &Envelope, registration: &ReceiverRegistration) -> bool {
        match (&registration.address, &envelope.address) {
            (None, _) => true,
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
        }
    }

    fn should_send(&self, envelope: &Envelope, connection: &dyn Connection) -> bool {
        let state = self.lock();
        state.origins.get(&envelope.id) != Some(&connection.id())
    }

    fn received_from_remote(&self, envelope: &Envelope, connection: &dyn Connection) {
        let mut state = self.lock();
        if !state.note(envelope.id) {
            tracing::debug!(id = %envelope.id, "envelope seen again; routing loop suspected");
        }
        state.origins.insert(envelope.id, connection.id());
    }

    fn received_from_local(&self, envelope: &Envelope) {
        self.lock().note(envelope.id);
    }
}
