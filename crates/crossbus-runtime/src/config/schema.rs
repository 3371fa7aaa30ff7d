use std::time::Duration;

use serde::Deserialize;

use crossbus_core::error::{BusError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub version: u32,

    #[serde(default)]
    pub bus: BusSection,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            version: 1,
            bus: BusSection::default(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(BusError::BadConfig(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        self.bus.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusSection {
    /// Sends go to remote connections unless the caller says otherwise.
    #[serde(default)]
    pub default_to_global: bool,

    /// Default deadline for unary sends.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Default deadline for broadcast collection.
    #[serde(default = "default_collect_timeout_ms")]
    pub collect_timeout_ms: u64,

    /// Pipeline poll interval; also the timeout granularity.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Turn receiver failures into fault-carrying response envelopes.
    #[serde(default)]
    pub forward_exceptions: bool,

    /// Bound of the deferred local-response mailbox.
    #[serde(default = "default_response_queue_capacity")]
    pub response_queue_capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            default_to_global: false,
            response_timeout_ms: default_response_timeout_ms(),
            collect_timeout_ms: default_collect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            forward_exceptions: false,
            response_queue_capacity: default_response_queue_capacity(),
        }
    }
}

impl BusSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=600_000).contains(&self.response_timeout_ms) {
            return Err(BusError::BadConfig(
                "bus.response_timeout_ms must be between 1 and 600000".into(),
            ));
        }
        if !(1..=600_000).contains(&self.collect_timeout_ms) {
            return Err(BusError::BadConfig(
                "bus.collect_timeout_ms must be between 1 and 600000".into(),
            ));
        }
        if !(1..=60_000).contains(&self.poll_interval_ms) {
            return Err(BusError::BadConfig(
                "bus.poll_interval_ms must be between 1 and 60000".into(),
            ));
        }
        if self.response_queue_capacity == 0 {
            return Err(BusError::BadConfig(
                "bus.response_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_response_timeout_ms() -> u64 {
    5000
}
fn default_collect_timeout_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_response_queue_capacity() -> usize {
    1024
}
