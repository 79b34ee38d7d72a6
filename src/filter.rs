use crate::types::AddressTransaction;
use chrono::{DateTime, Utc};

/// Inclusive UTC time window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    /// `ts` is Unix seconds. Both bounds are inclusive.
    pub fn contains(&self, ts: i64) -> bool {
        self.from.timestamp() <= ts && ts <= self.to.timestamp()
    }
}

///
/// EdgeFilter
///
/// Decides whether a transaction from an address's history is reported as an edge:
/// its net outflow must reach `min_amount` and it must fall inside `window`.
///
#[derive(Clone, Copy, Debug)]
pub struct EdgeFilter {
    pub min_amount: f64,
    pub window: TimeWindow,
}

impl EdgeFilter {
    pub fn new(min_amount: f64, window: TimeWindow) -> Self {
        Self { min_amount, window }
    }

    pub fn qualifies(&self, tx: &AddressTransaction) -> bool {
        tx.net_amount() >= self.min_amount && self.window.contains(tx.time)
    }
}
