//! Transport boundary: zero or more connections to remote bus instances.
//!
//! The wire format and serialization live behind these traits. The channel
//! implementation here is an in-memory queue pair used by tests and as a
//! loopback reference transport.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use crossbus_core::envelope::Envelope;
use crossbus_core::error::{BusError, Result};

/// Connection identifier, unique per connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// One transport link to a remote bus.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;
    /// A broken connection fails every outstanding global send bus-wide.
    fn is_broken(&self) -> bool;
}

/// Owns the connection set. The set is read under the manager's own lock,
/// never the bus lock.
pub trait ConnectionManager: Send + Sync {
    /// Drain all inbound `(envelope, connection)` pairs since the last call.
    fn dequeue_messages(&self, out: &mut Vec<(Envelope, ConnectionId)>);

    /// Snapshot of the current connection set.
    fn connections(&self) -> Vec<Arc<dyn Connection>>;

    /// Hand an envelope to a connection for outbound transmission.
    fn send_message(&self, envelope: &Envelope, connection: &dyn Connection) -> Result<()>;
}

/// In-memory connection: an inbound queue fed by the remote side and an
/// outbound queue the remote side (or a test) drains.
pub struct ChannelConnection {
    id: ConnectionId,
    inbound: Mutex<VecDeque<Envelope>>,
    outbound: Mutex<VecDeque<Envelope>>,
    broken: AtomicBool,
}

impl ChannelConnection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
            broken: AtomicBool::new(false),
        }
    }

    fn lock<'a, T>(m: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match m.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    /// Feed an envelope in from the remote side. Direction flags are
    /// stamped here: it now comes from a connection.
    pub fn push_inbound(&self, mut envelope: Envelope) {
        envelope.from_global = true;
        envelope.to_global = false;
        Self::lock(&self.inbound).push_back(envelope);
    }

    /// Drain everything the bus has sent out on this connection.
    pub fn take_outbound(&self) -> Vec<Envelope> {
        Self::lock(&self.outbound).drain(..).collect()
    }

    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }

    fn drain_inbound_into(&self, out: &mut Vec<(Envelope, ConnectionId)>) {
        let mut q = Self::lock(&self.inbound);
        out.extend(q.drain(..).map(|env| (env, self.id)));
    }

    fn push_outbound(&self, envelope: Envelope) -> Result<()> {
        if self.is_broken() {
            return Err(BusError::Transport(format!("{} is broken", self.id)));
        }
        Self::lock(&self.outbound).push_back(envelope);
        Ok(())
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

/// Manager over [`ChannelConnection`]s.
#[derive(Default)]
pub struct ChannelConnectionManager {
    connections: DashMap<u64, Arc<ChannelConnection>>,
}

impl ChannelConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn add(&self, connection: Arc<ChannelConnection>) {
        self.connections.insert(connection.id().0, connection);
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ChannelConnection>> {
        self.connections.remove(&id.0).map(|(_, c)| c)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ChannelConnection>> {
        self.connections.get(&id.0).map(|r| Arc::clone(r.value()))
    }
}

impl ConnectionManager for ChannelConnectionManager {
    fn dequeue_messages(&self, out: &mut Vec<(Envelope, ConnectionId)>) {
        for entry in self.connections.iter() {
            entry.value().drain_inbound_into(out);
        }
    }

    fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections
            .iter()
            .map(|e| Arc::clone(e.value()) as Arc<dyn Connection>)
            .collect()
    }

    fn send_message(&self, envelope: &Envelope, connection: &dyn Connection) -> Result<()> {
        let conn = self
            .get(connection.id())
            .ok_or_else(|| BusError::Transport(format!("unknown {}", connection.id())))?;
        conn.push_outbound(envelope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use crossbus_core::envelope::EnvelopeId;
    use crossbus_core::payload::Payload;

    fn envelope(id: u64) -> Envelope {
        Envelope {
            id: EnvelopeId(id),
            response_to: None,
            address: None,
            payload: Payload::text("x"),
            routing_info: None,
            sent: SystemTime::now(),
            timeout: Duration::from_millis(100),
            is_broadcast: false,
            to_global: true,
            from_global: false,
            fault: None,
        }
    }

    #[test]
    fn inbound_envelopes_are_stamped_from_global() {
        let mgr = ChannelConnectionManager::new();
        let conn = Arc::new(ChannelConnection::new(ConnectionId(1)));
        mgr.add(Arc::clone(&conn));

        conn.push_inbound(envelope(1));

        let mut out = Vec::new();
        mgr.dequeue_messages(&mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].0.from_global);
        assert!(!out[0].0.to_global);
        assert_eq!(out[0].1, ConnectionId(1));

        // Drained once.
        let mut again = Vec::new();
        mgr.dequeue_messages(&mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn broken_connection_rejects_sends() {
        let mgr = ChannelConnectionManager::new();
        let conn = Arc::new(ChannelConnection::new(ConnectionId(1)));
        mgr.add(Arc::clone(&conn));

        conn.mark_broken();
        let err = mgr.send_message(&envelope(1), conn.as_ref());
        assert!(matches!(err, Err(BusError::Transport(_))));
    }
}
