use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use super::BatchError;
use super::BatchStrategy;
use super::BatchedCallback;
use super::LeakyBucketConfig;
use super::StrategyKind;
use super::entry::Invocation;
use super::entry::Pending;
use super::housekeeping::Housekeeper;
use super::housekeeping::Housekeeping;
use super::metrics::BatchMetrics;

#[derive(Debug)]
struct Entry {
    pending: Pending,
    tokens: usize,
}

impl Entry {
    fn try_spend(&mut self) -> Option<Invocation> {
        if self.tokens == 0 {
            return None;
        }
        let invocation = self.pending.take()?;
        self.tokens -= 1;
        Some(invocation)
    }

    fn refill(&mut self, max_tokens: usize) {
        self.tokens = usize::min(self.tokens.saturating_add(1), max_tokens);
    }

    fn is_idle(&self, max_tokens: usize) -> bool {
        self.pending.is_empty() && self.tokens == max_tokens
    }
}

#[derive(Debug)]
struct Buckets {
    max_tokens: usize,
    entries: Mutex<HashMap<String, Entry>>,
    metrics: BatchMetrics,
}

impl Buckets {
    fn schedule(&self, key: &str, callback: BatchedCallback) -> Option<Invocation> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            pending: Pending::new(callback.clone()),
            tokens: self.max_tokens,
        });
        entry.pending.record(callback);

        let invocation = entry.try_spend();
        match &invocation {
            Some(invocation) => self.metrics.invoked(invocation),
            None => {
                trace!(key, pending = entry.pending.count(), "out of tokens");
                self.metrics.suppressed();
            }
        }
        invocation
    }
}

impl Housekeeping for Buckets {
    fn sweep(&self) -> Vec<Invocation> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let mut due = Vec::new();

        entries.retain(|_, entry| {
            // A tick may refill and spend the same token when calls are waiting.
            entry.refill(self.max_tokens);
            due.extend(entry.try_spend());
            !entry.is_idle(self.max_tokens)
        });

        let evicted = before - entries.len();
        debug!(
            flushed = due.len(),
            evicted,
            tracked = entries.len(),
            "leaky bucket tick"
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

/// A per-key token bucket that batches the calls it cannot admit.
///
/// Every key starts with `max_tokens` tokens. A scheduled call spends one token and runs
/// its callback immediately; once a key is out of tokens, further calls are absorbed and
/// delivered as a single batch when a token comes back. Tokens are returned one per key
/// on every tick of `token_rate`, never beyond `max_tokens`, so a long quiet period does
/// not buy a larger burst.
///
/// Keys that are fully refilled with nothing pending are forgotten on the next tick.
#[derive(Debug)]
pub struct LeakyBucket {
    housekeeper: Housekeeper<Buckets>,
}

impl LeakyBucket {
    /// Creates a new `LeakyBucket` and starts its refill timer on the current tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NoRuntime`] when called outside a tokio runtime.
    pub fn new(config: LeakyBucketConfig) -> Result<Self, BatchError> {
        let buckets = Buckets {
            max_tokens: config.max_tokens(),
            entries: Mutex::new(HashMap::new()),
            metrics: BatchMetrics::new(StrategyKind::LeakyBucket),
        };
        Ok(Self {
            housekeeper: Housekeeper::start(buckets, config.token_rate())?,
        })
    }

    /// The number of keys currently holding state.
    pub fn tracked_keys(&self) -> usize {
        self.housekeeper.target().entries.lock().len()
    }
}

impl BatchStrategy for LeakyBucket {
    fn schedule(&self, key: &str, callback: BatchedCallback) {
        if let Some(invocation) = self.housekeeper.target().schedule(key, callback) {
            invocation.invoke();
        }
    }

    fn dispose(mut self) {
        self.housekeeper.shutdown();
    }
}
