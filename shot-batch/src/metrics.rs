use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

use crate::StrategyKind;
use crate::entry::Invocation;

/// Counters shared by every strategy, tagged with the strategy that produced them.
///
/// Nothing is exported unless the embedding application installs a global meter
/// provider.
#[derive(Clone, Debug)]
pub(crate) struct BatchMetrics {
    invocations: Counter<u64>,
    coalesced: Counter<u64>,
    suppressed: Counter<u64>,
    evicted: Counter<u64>,
    attributes: [KeyValue; 1],
}

impl BatchMetrics {
    pub(crate) fn new(strategy: StrategyKind) -> Self {
        let meter = global::meter("shot_batch");
        Self {
            invocations: meter.u64_counter("shot_batch.invocations").build(),
            coalesced: meter.u64_counter("shot_batch.coalesced").build(),
            suppressed: meter.u64_counter("shot_batch.suppressed").build(),
            evicted: meter.u64_counter("shot_batch.evicted").build(),
            attributes: [KeyValue::new("strategy", strategy.as_str())],
        }
    }

    pub(crate) fn invoked(&self, invocation: &Invocation) {
        self.invocations.add(1, &self.attributes);
        self.coalesced.add(invocation.count() as u64, &self.attributes);
    }

    pub(crate) fn invoked_all(&self, invocations: &[Invocation]) {
        for invocation in invocations {
            self.invoked(invocation);
        }
    }

    pub(crate) fn suppressed(&self) {
        self.suppressed.add(1, &self.attributes);
    }

    pub(crate) fn evicted(&self, keys: usize) {
        if keys > 0 {
            self.evicted.add(keys as u64, &self.attributes);
        }
    }
}
