use std::fmt::Write;
use std::time::Duration;

/// One callback invocation observed during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub key: usize,
    pub at: Duration,
    pub count: usize,
}

/// Collected invocations, rendered as one row of cells per key.
#[derive(Debug)]
pub(crate) struct Timeline {
    names: Vec<String>,
    resolution: Duration,
    invocations: Vec<Invocation>,
}

impl Timeline {
    pub(crate) fn new(names: Vec<String>, resolution: Duration) -> Self {
        Self {
            names,
            resolution,
            invocations: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, invocation: Invocation) {
        self.invocations.push(invocation);
    }

    pub(crate) fn invocations(&self) -> &[Invocation] {
        &self.invocations
    }

    /// Calls delivered to `key` across all of its invocations.
    pub(crate) fn delivered(&self, key: usize) -> usize {
        self.invocations
            .iter()
            .filter(|invocation| invocation.key == key)
            .map(|invocation| invocation.count)
            .sum()
    }

    fn column(&self, at: Duration) -> usize {
        (at.as_nanos() / self.resolution.as_nanos().max(1)) as usize
    }

    /// Renders each key as a row of cells, one per `resolution`.
    ///
    /// A cell shows `·` when nothing ran, the number of calls delivered when that is a
    /// single digit and `#` otherwise.
    pub(crate) fn render(&self) -> String {
        let columns = self
            .invocations
            .iter()
            .map(|invocation| self.column(invocation.at) + 1)
            .max()
            .unwrap_or(0);
        let width = self.names.iter().map(String::len).max().unwrap_or(0);

        let mut out = String::new();
        for (key, name) in self.names.iter().enumerate() {
            let mut cells = vec![0usize; columns];
            for invocation in self.invocations.iter().filter(|i| i.key == key) {
                cells[self.column(invocation.at)] += invocation.count;
            }
            let row: String = cells
                .into_iter()
                .map(|delivered| match delivered {
                    0 => '·',
                    1..=9 => char::from(b'0' + delivered as u8),
                    _ => '#',
                })
                .collect();
            let _ = writeln!(out, "{name:>width$} |{row}|");
        }
        out
    }
}
