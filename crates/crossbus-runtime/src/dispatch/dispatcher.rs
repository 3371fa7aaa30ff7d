//! Dispatcher contract and the two built-in policies.
//!
//! The pipeline never blocks on a receiver callback; it hands the whole
//! invocation (callback plus response-synthesis continuation) to a
//! dispatcher as one opaque task. The contract is eventual execution, not
//! immediacy.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

/// Schedules asynchronous, non-blocking execution of receiver invocations.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: BoxFuture<'static, ()>);
}

/// Parallel policy: every task gets its own tokio task.
#[derive(Default)]
pub struct SpawnDispatcher;

impl SpawnDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Dispatcher for SpawnDispatcher {
    fn dispatch(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// Serialized policy: one worker drains a FIFO queue, so at most one
/// receiver callback runs at a time. Stands in for thread-affinitized
/// dispatch (e.g. a UI thread) in this runtime.
pub struct SerialDispatcher {
    queue: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl SerialDispatcher {
    /// Must be called from within a tokio runtime; spawns the worker.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
        });
        Self { queue: tx }
    }
}

impl Dispatcher for SerialDispatcher {
    fn dispatch(&self, task: BoxFuture<'static, ()>) {
        // Worker gone means the runtime is shutting down; drop the task.
        let _ = self.queue.send(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_dispatcher_runs_tasks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let d = SpawnDispatcher::new();
        for _ in 0..4 {
            let hits = Arc::clone(&hits);
            d.dispatch(Box::pin(async move {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn serial_dispatcher_preserves_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let d = SerialDispatcher::new();
        for i in 0..8u32 {
            let log = Arc::clone(&log);
            d.dispatch(Box::pin(async move {
                // Later tasks finish faster; order must still hold.
                tokio::time::sleep(Duration::from_millis(u64::from(8 - i))).await;
                log.lock().unwrap().push(i);
            }));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }
}
