//! Cooperative shutdown: a cancellation token polled once per period and a
//! blocking join on the worker thread.

use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::debug;

use crate::error::HarnessError;
use crate::worker::WorkerReport;

/// Single-writer "keep running" flag.
///
/// Starts `true`; [`cancel`](Self::cancel) moves it to `false` for good.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    keep_running: Arc<AtomicBool>,
}

assert_impl_all!(CancellationToken: Send, Sync);

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self {
            keep_running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Worker side: whether another iteration should run.
    #[inline]
    pub fn should_continue(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }

    /// Whether the token has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        !self.should_continue()
    }

    /// Clear the flag.
    ///
    /// Returns `true` only for the call that performed the `true → false`
    /// transition.
    pub fn cancel(&self) -> bool {
        self.keep_running.swap(false, Ordering::AcqRel)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the spawned worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    thread: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    pub(crate) fn new(thread: JoinHandle<WorkerReport>) -> Self {
        Self { thread }
    }

    /// Block until the worker thread exits. No timeout.
    pub fn join(self) -> Result<WorkerReport, HarnessError> {
        self.thread.join().map_err(|_| HarnessError::WorkerPanicked)
    }
}

/// Signal the worker and wait for it to exit.
///
/// Worst-case latency is one period plus the worker's demotion.
pub fn signal_and_join(
    token: &CancellationToken,
    worker: WorkerHandle,
) -> Result<WorkerReport, HarnessError> {
    if !token.cancel() {
        debug!("Cancellation token already cleared");
    }
    worker.join()
}
