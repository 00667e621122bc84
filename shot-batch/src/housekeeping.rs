//! The periodic tick every strategy relies on.
//!
//! Each strategy hands its shared state to a [`Housekeeper`], which owns the only
//! background task the strategy ever starts. The task holds a weak reference to the
//! state, so it can never keep a dropped strategy alive.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::interval_at;
use tracing::debug;

use crate::BatchError;
use crate::entry::Invocation;
use crate::entry::invoke_all;

/// State that can be swept on a timer and drained on shutdown.
pub(crate) trait Housekeeping: Debug + Send + Sync + 'static {
    /// Runs one periodic pass, evicting idle keys and returning the callbacks that
    /// became due.
    fn sweep(&self) -> Vec<Invocation>;

    /// Discards every key, returning one invocation for each key with absorbed calls.
    fn drain(&self) -> Vec<Invocation>;
}

/// Serializes callback dispatch between the ticker and shutdown.
#[derive(Debug, Default)]
struct Gate {
    closed: AtomicBool,
    // Held while callbacks from a sweep or the final drain run.
    dispatch: Mutex<()>,
}

#[derive(Debug)]
pub(crate) struct Housekeeper<T: Housekeeping> {
    target: Arc<T>,
    gate: Arc<Gate>,
    ticker: Option<JoinHandle<()>>,
}

impl<T: Housekeeping> Housekeeper<T> {
    /// Starts sweeping `target` every `period`, beginning one period from now.
    pub(crate) fn start(target: T, period: Duration) -> Result<Self, BatchError> {
        let runtime = Handle::try_current().map_err(|_| BatchError::NoRuntime)?;
        let target = Arc::new(target);
        let gate = Arc::new(Gate::default());
        let first_tick = Instant::now() + period;
        let ticker = runtime.spawn(run(
            Arc::downgrade(&target),
            Arc::clone(&gate),
            first_tick,
            period,
        ));

        Ok(Self {
            target,
            gate,
            ticker: Some(ticker),
        })
    }

    pub(crate) fn target(&self) -> &T {
        &self.target
    }

    /// Stops the ticker and flushes everything still pending.
    ///
    /// Waits for a sweep that is already running, so once this returns no callback
    /// will be invoked by this housekeeper again. When called from a callback the
    /// ticker itself is delivering, the rest of that sweep is still delivered after
    /// this returns. Later calls do nothing.
    pub(crate) fn shutdown(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        ticker.abort();

        // The ticker already holds the dispatch lock while its callbacks run.
        let in_ticker = task::try_id() == Some(ticker.id());
        let _dispatch = (!in_ticker).then(|| self.gate.dispatch.lock());
        self.gate.closed.store(true, Ordering::Release);

        let flushed = self.target.drain();
        debug!(flushed = flushed.len(), in_ticker, "housekeeping stopped");
        invoke_all(flushed);
    }
}

impl<T: Housekeeping> Drop for Housekeeper<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run<T: Housekeeping>(
    target: Weak<T>,
    gate: Arc<Gate>,
    first_tick: Instant,
    period: Duration,
) {
    let mut interval = interval_at(first_tick, period);
    loop {
        interval.tick().await;
        let Some(target) = target.upgrade() else {
            break;
        };
        let _dispatch = gate.dispatch.lock();
        if gate.closed.load(Ordering::Acquire) {
            break;
        }
        invoke_all(target.sweep());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Debug, Default)]
    struct Counting {
        sweeps: AtomicUsize,
        drains: AtomicUsize,
    }

    impl Housekeeping for Counting {
        fn sweep(&self) -> Vec<Invocation> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }

        fn drain(&self) -> Vec<Invocation> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    #[test]
    fn it_requires_a_runtime() {
        let err = Housekeeper::start(Counting::default(), Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, BatchError::NoRuntime);
    }

    #[tokio::test(start_paused = true)]
    async fn it_ticks_once_per_period_starting_one_period_late() {
        let mut keeper =
            Housekeeper::start(Counting::default(), Duration::from_millis(100)).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(keeper.target().sweeps.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(keeper.target().sweeps.load(Ordering::SeqCst), 3);

        keeper.shutdown();
        keeper.shutdown();
        assert_eq!(keeper.target().drains.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(keeper.target().sweeps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_housekeeper_drains_once() {
        let keeper = Housekeeper::start(Counting::default(), Duration::from_millis(100)).unwrap();
        let target = Arc::clone(&keeper.target);

        drop(keeper);
        assert_eq!(target.drains.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(target.sweeps.load(Ordering::SeqCst), 0);
    }
}
