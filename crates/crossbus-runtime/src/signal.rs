//! Work signaler: lets a productive tick wake the scheduler early instead of
//! waiting for the next poll interval. Fire-and-forget; no guarantee of
//! immediate re-scheduling.

use std::sync::Arc;

use tokio::sync::Notify;

pub trait WorkSignaler: Send + Sync {
    fn signal_work_available(&self);
}

/// Signaler over [`tokio::sync::Notify`]; the scheduler awaits the same
/// notify handle.
#[derive(Default)]
pub struct NotifySignaler {
    notify: Arc<Notify>,
}

impl NotifySignaler {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// The notify handle a scheduler should await.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

impl WorkSignaler for NotifySignaler {
    fn signal_work_available(&self) {
        self.notify.notify_one();
    }
}

/// Does nothing; for buses driven purely by the poll interval or manual
/// ticks (tests).
#[derive(Default)]
pub struct NoopSignaler;

impl WorkSignaler for NoopSignaler {
    fn signal_work_available(&self) {}
}
