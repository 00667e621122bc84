//! # shot-batch
//!
//! `shot-batch` governs how often a callback may run. Callers ask for an invocation
//! with [`CallbackBatcher::schedule`]; the configured strategy either runs the callback
//! straight away or absorbs the request and delivers it later, together with every
//! other request absorbed for the same key, as a single invocation that reports how
//! many calls it stands for.
//!
//! ## Key Concepts
//!
//! * **Keys**: Each key is an independent stream with its own budget. Callers that never
//!   pass a key all share [`DEFAULT_KEY`].
//! * **Latest Callback Wins**: A batch is delivered to the most recently scheduled
//!   callback for its key.
//! * **Housekeeping**: Each strategy owns one periodic tokio task that refills budgets,
//!   flushes batches that became due and forgets idle keys, so memory stays bounded
//!   by the number of active keys.
//! * **No Lost Calls**: Disposing (or dropping) a batcher delivers every pending batch.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use shot_batch::BatcherConfig;
//! use shot_batch::make_batcher;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = BatcherConfig::windowed(Duration::from_millis(1000), 5).unwrap();
//! let batcher = make_batcher(config).unwrap();
//!
//! for _ in 0..30 {
//!     batcher.schedule(|count| println!("flushing {count} log lines"), Some("audit"));
//! }
//!
//! // Five calls ran immediately, the remaining 25 are delivered as one batch.
//! batcher.dispose();
//! # }
//! ```

use std::fmt::Debug;
use std::sync::Arc;

mod config;
mod entry;
mod error;
mod factory;
mod housekeeping;
mod leaky_bucket;
mod metrics;
mod windowed;

#[cfg(test)]
mod test_support;

pub use config::BatcherConfig;
pub use config::LeakyBucketConfig;
pub use config::StrategyKind;
pub use config::WindowedConfig;
pub use error::BatchError;
pub use factory::CallbackBatcher;
pub use factory::DEFAULT_KEY;
pub use factory::make_batcher;
pub use leaky_bucket::LeakyBucket;
pub use windowed::WindowedRateLimiter;

/// A callback that receives the number of calls batched into its invocation.
pub type BatchedCallback = Arc<dyn Fn(usize) + Send + Sync + 'static>;

/// The contract shared by all batching strategies.
///
/// Strategies are `Send` and `Sync`, so one instance can be shared across tasks via
/// `Arc` while its housekeeping runs in the background.
pub trait BatchStrategy: Debug + Send + Sync {
    /// Requests an invocation of `callback` for `key`.
    ///
    /// Never fails. If the strategy admits the call, `callback` runs before this
    /// returns with the number of calls it covers (1 unless earlier calls were
    /// absorbed). Otherwise the call is absorbed and `callback` replaces any earlier
    /// callback for `key`.
    fn schedule(&self, key: &str, callback: BatchedCallback);

    /// Stops housekeeping and invokes every key with absorbed calls exactly once,
    /// regardless of its remaining budget. All state is then discarded.
    fn dispose(self)
    where
        Self: Sized;
}
