use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::BatchError;

/// The timing strategies a [`CallbackBatcher`](crate::CallbackBatcher) can be built with.
///
/// Deserializes from its wire name, ignoring ASCII case.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum StrategyKind {
    /// Token refill limiter, see [`LeakyBucket`](crate::LeakyBucket).
    #[default]
    LeakyBucket,
    /// Trailing window limiter, see [`WindowedRateLimiter`](crate::WindowedRateLimiter).
    Windowed,
}

impl StrategyKind {
    /// The wire name of the strategy, as accepted in configuration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::LeakyBucket => "LEAKY_BUCKET",
            StrategyKind::Windowed => "WINDOWED_RATE_LIMITER",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [StrategyKind::LeakyBucket, StrategyKind::Windowed]
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BatchError::UnknownStrategy(s.to_string()))
    }
}

impl TryFrom<String> for StrategyKind {
    type Error = BatchError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Settings for the [`LeakyBucket`](crate::LeakyBucket) strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeakyBucketConfig {
    max_tokens: NonZeroUsize,
    token_rate: Duration,
}

impl LeakyBucketConfig {
    /// Creates a new `LeakyBucketConfig`.
    ///
    /// # Arguments
    ///
    /// * `max_tokens` - How many calls per key may pass immediately in a burst.
    /// * `token_rate` - How often a key regains one token.
    pub fn new(max_tokens: NonZeroUsize, token_rate: Duration) -> Result<Self, BatchError> {
        if token_rate.is_zero() {
            return Err(BatchError::ZeroValue { field: "tokenRate" });
        }
        Ok(Self {
            max_tokens,
            token_rate,
        })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens.get()
    }

    pub fn token_rate(&self) -> Duration {
        self.token_rate
    }
}

/// Settings for the [`WindowedRateLimiter`](crate::WindowedRateLimiter) strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowedConfig {
    window_size: Duration,
    calls_per_window: NonZeroUsize,
}

impl WindowedConfig {
    /// Creates a new `WindowedConfig`.
    ///
    /// # Arguments
    ///
    /// * `window_size` - The length of the trailing window.
    /// * `calls_per_window` - The maximum number of invocations per key inside any window.
    pub fn new(window_size: Duration, calls_per_window: NonZeroUsize) -> Result<Self, BatchError> {
        if window_size.is_zero() {
            return Err(BatchError::ZeroValue {
                field: "windowSize",
            });
        }
        Ok(Self {
            window_size,
            calls_per_window,
        })
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    pub fn calls_per_window(&self) -> usize {
        self.calls_per_window.get()
    }
}

/// Selects a strategy and carries its settings.
///
/// Deserializes from the camelCase shape used by embedding applications, with durations
/// in whole milliseconds. A missing `strategy` selects the leaky bucket:
///
/// ```rust
/// use shot_batch::BatcherConfig;
/// use shot_batch::StrategyKind;
///
/// let config: BatcherConfig =
///     serde_json::from_str(r#"{ "maxTokens": 5, "tokenRate": 1000 }"#).unwrap();
/// assert_eq!(config.strategy(), StrategyKind::LeakyBucket);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawBatcherConfig")]
pub enum BatcherConfig {
    LeakyBucket(LeakyBucketConfig),
    Windowed(WindowedConfig),
}

impl BatcherConfig {
    /// Validates and builds a leaky bucket configuration.
    pub fn leaky_bucket(max_tokens: usize, token_rate: Duration) -> Result<Self, BatchError> {
        let max_tokens = non_zero(max_tokens, "maxTokens")?;
        LeakyBucketConfig::new(max_tokens, token_rate).map(Self::LeakyBucket)
    }

    /// Validates and builds a windowed configuration.
    pub fn windowed(window_size: Duration, calls_per_window: usize) -> Result<Self, BatchError> {
        let calls_per_window = non_zero(calls_per_window, "callsPerWindow")?;
        WindowedConfig::new(window_size, calls_per_window).map(Self::Windowed)
    }

    pub fn strategy(&self) -> StrategyKind {
        match self {
            BatcherConfig::LeakyBucket(_) => StrategyKind::LeakyBucket,
            BatcherConfig::Windowed(_) => StrategyKind::Windowed,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatcherConfig {
    strategy: Option<StrategyKind>,
    max_tokens: Option<usize>,
    token_rate: Option<u64>,
    window_size: Option<u64>,
    calls_per_window: Option<usize>,
}

impl TryFrom<RawBatcherConfig> for BatcherConfig {
    type Error = BatchError;

    fn try_from(raw: RawBatcherConfig) -> Result<Self, Self::Error> {
        let strategy = raw.strategy.unwrap_or_default();
        match strategy {
            StrategyKind::LeakyBucket => {
                let max_tokens = required(raw.max_tokens, strategy, "maxTokens")?;
                let token_rate = required(raw.token_rate, strategy, "tokenRate")?;
                Self::leaky_bucket(max_tokens, Duration::from_millis(token_rate))
            }
            StrategyKind::Windowed => {
                let window_size = required(raw.window_size, strategy, "windowSize")?;
                let calls_per_window = required(raw.calls_per_window, strategy, "callsPerWindow")?;
                Self::windowed(Duration::from_millis(window_size), calls_per_window)
            }
        }
    }
}

fn required<T>(
    value: Option<T>,
    strategy: StrategyKind,
    field: &'static str,
) -> Result<T, BatchError> {
    value.ok_or(BatchError::MissingField { strategy, field })
}

fn non_zero(value: usize, field: &'static str) -> Result<NonZeroUsize, BatchError> {
    NonZeroUsize::new(value).ok_or(BatchError::ZeroValue { field })
}
