use crate::{
    error::CrawlError,
    filter::{EdgeFilter, TimeWindow},
    pruning::PruningPolicy,
    retry::RetryPolicy,
    types::Address,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::path::PathBuf;

pub const DEFAULT_SEEDS: [&str; 3] = [
    "13AM4VW2dhxYgXeQepoHkHSQuy6NgaEb94",
    "12t9YDPgwueZ9NyMgw519p7AA8isjr6SMw",
    "115p7UMMngoj1pMvkpHijcRdfJNXj6LrLn",
];
pub const DEFAULT_MIN_AMOUNT: f64 = 0.2;
pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const DEFAULT_MAX_OUTGOING: usize = 50;
pub const DEFAULT_MAX_TRANSACTIONS: usize = 100;
pub const DEFAULT_DATE_FROM: &str = "2017-08-03";
pub const DEFAULT_DATE_TO: &str = "2017-08-10";
pub const DEFAULT_SAVE_EVERY: usize = 10;
pub const DEFAULT_OUTPUT: &str = "btc_crawl_final.json";

///
/// CrawlConfig
///
/// All the knobs of one crawl run.
///
#[derive(Clone, Debug)]
pub struct CrawlConfig {
    pub seeds: Vec<Address>,
    /// Minimum net outflow (sent - received) for a transaction to be recorded.
    pub min_amount: f64,
    pub max_depth: usize,
    /// A transaction with more outputs than this is recorded but not followed.
    pub max_outgoing: usize,
    /// A non-seed address with more transactions than this is not enumerated.
    pub max_transactions: usize,
    pub window: TimeWindow,
    /// Checkpoint after every `save_every` recorded edges.
    pub save_every: usize,
    pub output: PathBuf,
    pub persist_retry: RetryPolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let from = Utc.from_utc_datetime(&midnight(2017, 8, 3));
        let to = Utc.from_utc_datetime(&midnight(2017, 8, 10));
        Self {
            seeds: DEFAULT_SEEDS
                .iter()
                .filter_map(|s| Address::new(*s).ok())
                .collect(),
            min_amount: DEFAULT_MIN_AMOUNT,
            max_depth: DEFAULT_MAX_DEPTH,
            max_outgoing: DEFAULT_MAX_OUTGOING,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            window: TimeWindow::new(from, to),
            save_every: DEFAULT_SAVE_EVERY,
            output: PathBuf::from(DEFAULT_OUTPUT),
            persist_retry: RetryPolicy::default(),
        }
    }
}

fn midnight(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.seeds.is_empty() {
            return Err(CrawlError::InvalidConfig(
                "at least one seed address is required".to_string(),
            ));
        }
        if !self.window.is_valid() {
            return Err(CrawlError::InvalidConfig(format!(
                "date window is empty: {} is after {}",
                self.window.from, self.window.to
            )));
        }
        if self.save_every == 0 {
            return Err(CrawlError::InvalidConfig(
                "save_every must be at least 1".to_string(),
            ));
        }
        if !self.min_amount.is_finite() || self.min_amount < 0.0 {
            return Err(CrawlError::InvalidConfig(format!(
                "min_amount must be a non-negative number, got {}",
                self.min_amount
            )));
        }
        Ok(())
    }

    pub fn edge_filter(&self) -> EdgeFilter {
        EdgeFilter::new(self.min_amount, self.window)
    }

    pub fn pruning_policy(&self) -> PruningPolicy {
        PruningPolicy::new(self.max_depth, self.max_transactions, self.max_outgoing)
    }
}

/// Parse a UTC point in time.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare `YYYY-MM-DD`
/// (midnight). Naive values are taken as UTC.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CrawlError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(CrawlError::InvalidConfig(format!(
        "cannot parse '{}' as a date or datetime",
        s
    )))
}
