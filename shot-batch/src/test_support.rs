use std::sync::Arc;

use parking_lot::Mutex;

use crate::BatchedCallback;

/// Records the batch size of every invocation of the callbacks it hands out.
#[derive(Clone, Debug, Default)]
pub(crate) struct Recorder {
    counts: Arc<Mutex<Vec<usize>>>,
}

impl Recorder {
    pub(crate) fn closure(&self) -> impl Fn(usize) + Send + Sync + use<> {
        let counts = Arc::clone(&self.counts);
        move |count: usize| counts.lock().push(count)
    }

    pub(crate) fn callback(&self) -> BatchedCallback {
        Arc::new(self.closure())
    }

    pub(crate) fn all(&self) -> Vec<usize> {
        self.counts.lock().clone()
    }

    pub(crate) fn times(&self) -> usize {
        self.counts.lock().len()
    }

    pub(crate) fn last(&self) -> Option<usize> {
        self.counts.lock().last().copied()
    }

    pub(crate) fn total(&self) -> usize {
        self.counts.lock().iter().sum()
    }
}
