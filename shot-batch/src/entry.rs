use std::fmt;
use std::panic;
use std::panic::AssertUnwindSafe;

use tracing::warn;

use crate::BatchedCallback;

/// The part of a per-key entry that every strategy shares: how many calls have been
/// absorbed since the last invocation and the callback that should receive them.
pub(crate) struct Pending {
    count: usize,
    callback: BatchedCallback,
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl Pending {
    pub(crate) fn new(callback: BatchedCallback) -> Self {
        Self { count: 0, callback }
    }

    /// Records one more call. The latest callback always replaces the previous one.
    pub(crate) fn record(&mut self, callback: BatchedCallback) {
        self.callback = callback;
        self.count += 1;
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Hands every absorbed call to a single invocation.
    pub(crate) fn take(&mut self) -> Option<Invocation> {
        if self.count == 0 {
            return None;
        }
        let count = std::mem::take(&mut self.count);
        Some(Invocation {
            callback: self.callback.clone(),
            count,
        })
    }
}

/// A callback that has been granted an invocation, carrying the size of its batch.
///
/// Strategies collect these under their map lock and run them after releasing it, so a
/// callback is free to schedule on the same batcher.
#[must_use]
pub(crate) struct Invocation {
    callback: BatchedCallback,
    count: usize,
}

impl Invocation {
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn invoke(self) {
        (self.callback)(self.count);
    }
}

/// Runs every invocation in turn. A callback that panics is logged and skipped, so
/// the batches queued behind it are still delivered.
pub(crate) fn invoke_all(invocations: Vec<Invocation>) {
    for invocation in invocations {
        let count = invocation.count();
        if panic::catch_unwind(AssertUnwindSafe(move || invocation.invoke())).is_err() {
            warn!(count, "batched callback panicked");
        }
    }
}
