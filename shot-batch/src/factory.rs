use std::sync::Arc;

use quanta::Clock;

use crate::BatchError;
use crate::BatchStrategy;
use crate::BatchedCallback;
use crate::BatcherConfig;
use crate::LeakyBucket;
use crate::StrategyKind;
use crate::WindowedRateLimiter;

/// The key used when a caller schedules without one.
pub const DEFAULT_KEY: &str = "DEFAULT_KEY";

#[derive(Debug)]
enum Engine {
    LeakyBucket(LeakyBucket),
    Windowed(WindowedRateLimiter),
}

/// A configured batcher, hiding which strategy it runs.
///
/// ```rust
/// use std::time::Duration;
///
/// use shot_batch::BatcherConfig;
/// use shot_batch::make_batcher;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), shot_batch::BatchError> {
/// let batcher = make_batcher(BatcherConfig::leaky_bucket(5, Duration::from_secs(1))?)?;
///
/// batcher.schedule(|count| println!("rendering {count} updates"), None);
/// batcher.schedule(|count| println!("saving {count} edits"), Some("document-42"));
///
/// batcher.dispose();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CallbackBatcher {
    engine: Engine,
}

/// Builds a [`CallbackBatcher`] running the strategy selected by `config`.
///
/// # Errors
///
/// Returns [`BatchError::NoRuntime`] when called outside a tokio runtime.
pub fn make_batcher(config: BatcherConfig) -> Result<CallbackBatcher, BatchError> {
    CallbackBatcher::new(config)
}

impl CallbackBatcher {
    /// Same as [`make_batcher`].
    pub fn new(config: BatcherConfig) -> Result<Self, BatchError> {
        Self::with_clock(config, Clock::new())
    }

    /// Builds a batcher whose time-window bookkeeping reads from `clock`.
    ///
    /// The leaky bucket only counts ticks, so it ignores the clock.
    pub fn with_clock(config: BatcherConfig, clock: Clock) -> Result<Self, BatchError> {
        let engine = match config {
            BatcherConfig::LeakyBucket(config) => Engine::LeakyBucket(LeakyBucket::new(config)?),
            BatcherConfig::Windowed(config) => {
                Engine::Windowed(WindowedRateLimiter::with_clock(config, clock)?)
            }
        };
        Ok(Self { engine })
    }

    /// Requests an invocation of `callback`.
    ///
    /// The callback runs before this returns when the strategy admits the call, and
    /// otherwise later with the number of calls batched into that invocation. Calls
    /// without a key, or with an empty one, share [`DEFAULT_KEY`].
    pub fn schedule<F>(&self, callback: F, key: Option<&str>)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let key = key.filter(|key| !key.is_empty()).unwrap_or(DEFAULT_KEY);
        let callback: BatchedCallback = Arc::new(callback);
        match &self.engine {
            Engine::LeakyBucket(strategy) => strategy.schedule(key, callback),
            Engine::Windowed(strategy) => strategy.schedule(key, callback),
        }
    }

    /// The strategy this batcher was built with.
    pub fn strategy(&self) -> StrategyKind {
        match self.engine {
            Engine::LeakyBucket(_) => StrategyKind::LeakyBucket,
            Engine::Windowed(_) => StrategyKind::Windowed,
        }
    }

    /// The number of keys currently holding state.
    pub fn tracked_keys(&self) -> usize {
        match &self.engine {
            Engine::LeakyBucket(strategy) => strategy.tracked_keys(),
            Engine::Windowed(strategy) => strategy.tracked_keys(),
        }
    }

    /// Stops housekeeping and delivers every pending batch.
    pub fn dispose(self) {
        match self.engine {
            Engine::LeakyBucket(strategy) => strategy.dispose(),
            Engine::Windowed(strategy) => strategy.dispose(),
        }
    }
}
