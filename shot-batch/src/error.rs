use crate::StrategyKind;

/// Errors produced while building a batcher.
///
/// Scheduling itself never fails; every variant here describes a configuration or
/// environment problem detected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// A count or duration that must be positive was zero.
    #[error("`{field}` must be greater than zero")]
    ZeroValue {
        /// The offending configuration field.
        field: &'static str,
    },

    /// A configuration was missing a field required by its strategy.
    #[error("`{field}` is required by the {strategy} strategy")]
    MissingField {
        /// The strategy the configuration selected.
        strategy: StrategyKind,
        /// The missing configuration field.
        field: &'static str,
    },

    /// An unrecognised strategy name.
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),

    /// The batcher was built outside a tokio runtime, so housekeeping could not be
    /// scheduled.
    #[error("a tokio runtime is required to drive housekeeping")]
    NoRuntime,
}
