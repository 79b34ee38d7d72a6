use std::collections::HashSet;

/// Transaction ids already examined during this run.
///
/// There is no eviction; the set lives as long as the crawl.
#[derive(Debug, Default)]
pub struct VisitedSet {
    txids: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_visited(&self, txid: &str) -> bool {
        self.txids.contains(txid)
    }

    pub fn mark_visited(&mut self, txid: &str) {
        self.txids.insert(txid.to_string());
    }

    /// Check and mark in one step. Returns `true` the first time `txid` is seen.
    pub fn first_visit(&mut self, txid: &str) -> bool {
        if self.txids.contains(txid) {
            return false;
        }
        self.txids.insert(txid.to_string())
    }
}
