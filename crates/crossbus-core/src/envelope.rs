//! The envelope: one message instance, request or response, exchanged inside
//! and optionally across the bus.
//!
//! Envelopes are immutable after construction. All behavior (promotion,
//! correlation, forwarding) lives in the runtime; this is pure data.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::payload::{Payload, TypeTag};

/// Envelope identifier, unique within one bus instance's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvelopeId(pub u64);

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Diagnostic record of a remote receiver failure, carried on a response
/// envelope when exception forwarding is enabled. Display-only; not intended
/// for programmatic reconstruction of the original error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub display: String,
    pub tag: Option<TypeTag>,
}

/// One message instance.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique id, assigned when the envelope becomes a request.
    pub id: EnvelopeId,
    /// Id of the request this envelope answers; `None` ⇒ this is a request.
    pub response_to: Option<EnvelopeId>,
    /// Routing key used by receivers and connections to filter.
    pub address: Option<String>,
    /// Opaque payload plus its serialization descriptor.
    pub payload: Payload,
    /// Router-defined auxiliary data exchanged between router instances.
    pub routing_info: Option<serde_json::Value>,
    /// UTC instant the envelope was created as a request.
    pub sent: SystemTime,
    /// Deadline for the owning pending operation.
    pub timeout: Duration,
    /// Whether multiple responses are expected.
    pub is_broadcast: bool,
    /// Intended for a remote connection.
    pub to_global: bool,
    /// Arrived from a remote connection.
    pub from_global: bool,
    /// Remote receiver failure, when exception forwarding is enabled.
    pub fault: Option<RemoteFault>,
}

impl Envelope {
    pub fn is_request(&self) -> bool {
        self.response_to.is_none()
    }

    /// Whether the owning operation's deadline has passed at `now`.
    /// Granularity is the caller's tick interval; this only guarantees
    /// "no earlier than".
    pub fn expired(&self, now: SystemTime) -> bool {
        match now.duration_since(self.sent) {
            Ok(elapsed) => elapsed > self.timeout,
            // Clock went backwards; treat as not yet expired.
            Err(_) => false,
        }
    }

    /// Synthesize the response to `request`, produced by a local receiver.
    /// Direction flips: a request that came from a connection is answered
    /// back toward it.
    pub fn response(request: &Envelope, id: EnvelopeId, payload: Payload, now: SystemTime) -> Self {
        Self {
            id,
            response_to: Some(request.id),
            address: request.address.clone(),
            payload,
            routing_info: None,
            sent: now,
            timeout: request.timeout,
            is_broadcast: false,
            to_global: request.from_global,
            from_global: false,
            fault: None,
        }
    }

    /// Same as [`Envelope::response`], carrying a fault instead of a result.
    pub fn fault_response(
        request: &Envelope,
        id: EnvelopeId,
        fault: RemoteFault,
        now: SystemTime,
    ) -> Self {
        let mut env = Self::response(request, id, Payload::json(serde_json::Value::Null), now);
        env.fault = Some(fault);
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;

    fn request(from_global: bool) -> Envelope {
        Envelope {
            id: EnvelopeId(7),
            response_to: None,
            address: Some("ping".into()),
            payload: Payload::text("hello"),
            routing_info: None,
            sent: SystemTime::UNIX_EPOCH,
            timeout: Duration::from_millis(100),
            is_broadcast: false,
            to_global: false,
            from_global,
            fault: None,
        }
    }

    #[test]
    fn response_correlates_and_flips_direction() {
        let req = request(true);
        let resp = Envelope::response(&req, EnvelopeId(8), Payload::text("pong"), SystemTime::now());
        assert_eq!(resp.response_to, Some(EnvelopeId(7)));
        assert_eq!(resp.address.as_deref(), Some("ping"));
        assert!(resp.to_global, "answer goes back toward the connection");
        assert!(!resp.from_global);
        assert!(!resp.is_request());
    }

    #[test]
    fn expiry_is_no_earlier_than_deadline() {
        let req = request(false);
        let just_before = req.sent + Duration::from_millis(100);
        let after = req.sent + Duration::from_millis(101);
        assert!(!req.expired(just_before));
        assert!(req.expired(after));
    }

    #[test]
    fn clock_skew_does_not_expire() {
        let mut req = request(false);
        req.sent = SystemTime::now() + Duration::from_secs(60);
        assert!(!req.expired(SystemTime::now()));
    }
}
