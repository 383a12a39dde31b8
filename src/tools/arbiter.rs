//! Completion arbitration
//!
//! Natural exit and deadline expiry are observed on different tasks and can
//! fire at nearly the same time. `CompletionArbiter` is a single-assignment
//! cell: the first `settle` wins and is delivered to the waiting invocation,
//! every later `settle` is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Single-assignment completion cell
#[derive(Debug)]
pub struct CompletionArbiter<T> {
    settled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionArbiter<T> {
    /// Create an arbiter and the receiver that observes the winning value
    pub fn new() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let arbiter = Arc::new(Self {
            settled: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
        });
        (arbiter, rx)
    }

    /// Offer a completion
    ///
    /// Returns `true` if this call won. The compare-and-set guarantees exactly
    /// one winner across any number of concurrent callers.
    pub fn settle(&self, value: T) -> bool {
        if self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(sender) = sender {
            // Receiver may be gone if the caller was cancelled; the
            // completion is still consumed
            let _ = sender.send(value);
        }
        true
    }

    /// Whether a completion has been accepted
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}
