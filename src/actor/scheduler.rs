//! Throttled invocation of an actor's queue drain.
//!
//! Any number of [`ThrottledInvoker::trigger`] calls made before the drain runs
//! collapse into one deferred invocation. The invocation is pushed to the next
//! scheduler tick, so envelopes already waiting on the listener (cancels in
//! particular) are received before the next queued task starts.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub(crate) struct ThrottledInvoker {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ThrottledInvoker {
    /// Spawn the drain loop on `runtime`. The loop ends when `callback` returns false.
    pub(crate) fn new<F>(runtime: &Handle, mut callback: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let waiter = Arc::clone(&notify);
        let task = runtime.spawn(async move {
            loop {
                // notify_one stores at most one permit, which is what coalesces triggers.
                waiter.notified().await;
                tokio::task::yield_now().await;
                if !callback() {
                    break;
                }
            }
        });
        Self { notify, task }
    }

    pub(crate) fn trigger(&self) {
        self.notify.notify_one();
    }

    pub(crate) fn remove(&self) {
        self.task.abort();
    }
}

impl Drop for ThrottledInvoker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
