use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;
use tracing::debug;
use tracing::trace;

use super::BatchError;
use super::BatchStrategy;
use super::BatchedCallback;
use super::StrategyKind;
use super::WindowedConfig;
use super::entry::Invocation;
use super::entry::Pending;
use super::housekeeping::Housekeeper;
use super::housekeeping::Housekeeping;
use super::metrics::BatchMetrics;

#[derive(Debug)]
struct Entry {
    pending: Pending,
    /// Invocation times inside the trailing window, oldest first.
    timestamps: VecDeque<Instant>,
}

impl Entry {
    /// Drops every timestamp that has left the window. A timestamp exactly
    /// `window_size` old is already outside it.
    fn purge(&mut self, now: Instant, window_size: Duration) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) < window_size {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    fn try_admit(&mut self, now: Instant, calls_per_window: usize) -> Option<Invocation> {
        if self.timestamps.len() >= calls_per_window {
            return None;
        }
        let invocation = self.pending.take()?;
        self.timestamps.push_back(now);
        Some(invocation)
    }

    /// Delivers pending calls whether or not the window has room. Only admitted
    /// invocations are recorded, so the window never holds more than
    /// `calls_per_window` timestamps.
    fn flush(&mut self, now: Instant, calls_per_window: usize) -> Option<Invocation> {
        self.try_admit(now, calls_per_window)
            .or_else(|| self.pending.take())
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.timestamps.is_empty()
    }
}

#[derive(Debug)]
struct Windows {
    window_size: Duration,
    calls_per_window: usize,
    clock: Clock,
    entries: Mutex<HashMap<String, Entry>>,
    metrics: BatchMetrics,
}

impl Windows {
    fn schedule(&self, key: &str, callback: BatchedCallback) -> Option<Invocation> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            pending: Pending::new(callback.clone()),
            timestamps: VecDeque::new(),
        });
        entry.pending.record(callback);
        entry.purge(now, self.window_size);

        let invocation = entry.try_admit(now, self.calls_per_window);
        match &invocation {
            Some(invocation) => self.metrics.invoked(invocation),
            None => {
                trace!(key, pending = entry.pending.count(), "window full");
                self.metrics.suppressed();
            }
        }
        invocation
    }
}

impl Housekeeping for Windows {
    fn sweep(&self) -> Vec<Invocation> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        let mut due = Vec::new();

        entries.retain(|_, entry| {
            entry.purge(now, self.window_size);
            due.extend(entry.flush(now, self.calls_per_window));
            !entry.is_idle()
        });

        let evicted = before - entries.len();
        debug!(
            flushed = due.len(),
            evicted,
            tracked = entries.len(),
            "windowed tick"
        );
        self.metrics.invoked_all(&due);
        self.metrics.evicted(evicted);
        due
    }

    fn drain(&self) -> Vec<Invocation> {
        let due: Vec<_> = self
            .entries
            .lock()
            .drain()
            .filter_map(|(_, mut entry)| entry.pending.take())
            .collect();
        self.metrics.invoked_all(&due);
        due
    }
}

/// A per-key sliding window limiter that batches the calls it cannot admit.
///
/// At most `calls_per_window` callbacks run for a key within any trailing
/// `window_size`. Unlike fixed windows there is no boundary burst: capacity returns one
/// slot at a time as each past invocation ages out of the window.
///
/// Every `window_size` a tick delivers whatever is still pending, even when the window
/// is full. This trades strict adherence for liveness: no caller waits longer than one
/// tick for its batch.
#[derive(Debug)]
pub struct WindowedRateLimiter {
    housekeeper: Housekeeper<Windows>,
}

impl WindowedRateLimiter {
    /// Creates a new `WindowedRateLimiter` and starts its tick on the current tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NoRuntime`] when called outside a tokio runtime.
    pub fn new(config: WindowedConfig) -> Result<Self, BatchError> {
        Self::with_clock(config, Clock::new())
    }

    /// Like [`WindowedRateLimiter::new`], but reads invocation times from `clock`.
    pub fn with_clock(config: WindowedConfig, clock: Clock) -> Result<Self, BatchError> {
        let windows = Windows {
            window_size: config.window_size(),
            calls_per_window: config.calls_per_window(),
            clock,
            entries: Mutex::new(HashMap::new()),
            metrics: BatchMetrics::new(StrategyKind::Windowed),
        };
        Ok(Self {
            housekeeper: Housekeeper::start(windows, config.window_size())?,
        })
    }

    /// The number of keys currently holding state.
    pub fn tracked_keys(&self) -> usize {
        self.housekeeper.target().entries.lock().len()
    }
}

impl BatchStrategy for WindowedRateLimiter {
    fn schedule(&self, key: &str, callback: BatchedCallback) {
        if let Some(invocation) = self.housekeeper.target().schedule(key, callback) {
            invocation.invoke();
        }
    }

    fn dispose(mut self) {
        self.housekeeper.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    use more_asserts::assert_le;
    use quanta::Mock;
    use tokio::time::sleep;

    use super::*;
    use crate::test_support::Recorder;

    const WINDOW: Duration = Duration::from_millis(1000);

    // Ticks only fire when a test sleeps on the paused tokio clock; the mock clock
    // decides which invocations are still inside the window.
    fn limiter() -> (WindowedRateLimiter, Arc<Mock>) {
        let (clock, mock) = Clock::mock();
        let config = WindowedConfig::new(WINDOW, NonZeroUsize::new(5).unwrap()).unwrap();
        (WindowedRateLimiter::with_clock(config, clock).unwrap(), mock)
    }

    fn window_len(rl: &WindowedRateLimiter, key: &str) -> Option<usize> {
        let entries = rl.housekeeper.target().entries.lock();
        entries.get(key).map(|entry| entry.timestamps.len())
    }

    #[tokio::test(start_paused = true)]
    async fn it_invokes_immediately_when_not_limited() {
        let (rl, _mock) = limiter();
        let calls = Recorder::default();

        rl.schedule("example", calls.callback());

        assert_eq!(calls.all(), vec![1]);
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn it_enforces_the_calls_per_window() {
        let (rl, _mock) = limiter();
        let calls = Recorder::default();

        for _ in 0..30 {
            rl.schedule("example", calls.callback());
        }

        assert_eq!(calls.times(), 5);
        assert_eq!(calls.last(), Some(1));
        assert_eq!(window_len(&rl, "example"), Some(5));
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn it_admits_again_once_the_window_has_passed() {
        let (rl, mock) = limiter();
        let calls = Recorder::default();

        // 30 calls at t=10, only 5 go through and 25 are stored
        mock.increment(Duration::from_millis(10));
        for _ in 0..30 {
            rl.schedule("example", calls.callback());
        }
        assert_eq!(calls.times(), 5);

        // t=1010
        mock.increment(WINDOW);
        rl.schedule("example", calls.callback());

        assert_eq!(calls.times(), 6);
        assert_eq!(calls.last(), Some(26));
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn it_limits_on_a_rolling_basis() {
        let (rl, mock) = limiter();
        let calls = Recorder::default();

        // t=0,100,200,300,400
        for _ in 0..5 {
            rl.schedule("example", calls.callback());
            mock.increment(Duration::from_millis(100));
        }
        assert_eq!(calls.all(), vec![1; 5]);

        // t=600 is still inside the window of the call at t=0
        mock.increment(Duration::from_millis(100));
        rl.schedule("example", calls.callback());
        assert_eq!(calls.times(), 5);

        // t=1000 pushes the call at t=0 out of the window
        mock.increment(Duration::from_millis(400));
        rl.schedule("example", calls.callback());
        assert_eq!(calls.times(), 6);
        assert_eq!(calls.last(), Some(2));

        rl.schedule("example", calls.callback());
        assert_eq!(calls.times(), 6);

        // t=1100
        mock.increment(Duration::from_millis(100));
        rl.schedule("example", calls.callback());
        assert_eq!(calls.times(), 7);
        assert_eq!(calls.last(), Some(2));
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn it_keeps_separate_windows_per_key() {
        let (rl, _mock) = limiter();
        let (one, two) = (Recorder::default(), Recorder::default());

        for _ in 0..30 {
            rl.schedule("one", one.callback());
        }
        rl.schedule("two", two.callback());

        assert_eq!(one.times(), 5);
        assert_eq!(two.times(), 1);
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn it_invokes_only_the_latest_callback() {
        let (rl, _mock) = limiter();
        let (one, two) = (Recorder::default(), Recorder::default());

        for _ in 0..3 {
            rl.schedule("example", one.callback());
        }
        rl.schedule("example", two.callback());

        assert_eq!(one.times(), 3);
        assert_eq!(two.times(), 1);
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn the_tick_delivers_pending_calls_even_when_the_window_is_full() {
        let (rl, _mock) = limiter();
        let calls = Recorder::default();

        for _ in 0..30 {
            rl.schedule("example", calls.callback());
        }
        sleep(WINDOW + Duration::from_millis(1)).await;

        assert_eq!(calls.times(), 6);
        assert_eq!(calls.last(), Some(25));
        assert_le!(window_len(&rl, "example").unwrap(), 5);
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn a_tick_flush_with_room_counts_against_the_window() {
        let (rl, mock) = limiter();
        let calls = Recorder::default();

        for _ in 0..6 {
            rl.schedule("example", calls.callback());
        }
        mock.increment(WINDOW);
        sleep(WINDOW + Duration::from_millis(1)).await;

        assert_eq!(calls.all(), vec![1, 1, 1, 1, 1, 1]);
        assert_eq!(window_len(&rl, "example"), Some(1));
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn it_forgets_keys_once_idle() {
        let (rl, mock) = limiter();
        let calls = Recorder::default();

        rl.schedule("stale", calls.callback());
        mock.increment(Duration::from_millis(500));
        rl.schedule("fresh", calls.callback());
        mock.increment(Duration::from_millis(500));

        // At t=1000 only the call at t=0 has left its window.
        sleep(WINDOW + Duration::from_millis(1)).await;
        assert_eq!(rl.tracked_keys(), 1);
        assert_eq!(window_len(&rl, "fresh"), Some(1));

        mock.increment(WINDOW);
        sleep(WINDOW).await;
        assert_eq!(rl.tracked_keys(), 0);
        assert_eq!(calls.times(), 2);
        rl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_flushes_pending_calls_once() {
        let (rl, _mock) = limiter();
        let calls = Recorder::default();

        for _ in 0..30 {
            rl.schedule("example", calls.callback());
        }
        rl.dispose();

        assert_eq!(calls.times(), 6);
        assert_eq!(calls.last(), Some(25));

        sleep(WINDOW * 3).await;
        assert_eq!(calls.times(), 6);
    }
}
