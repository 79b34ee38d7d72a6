///
/// PruningPolicy
///
/// Structural heuristics that keep the crawl from wandering into exchanges and
/// other high-volume services.
///
/// - nodes deeper than `max_depth` hops from a seed are never visited;
/// - a non-seed address with more than `max_transactions` transactions is not
///   enumerated at all;
/// - a transaction with more than `max_outgoing` outputs is recorded but its
///   outputs are not followed;
/// - a labeled address is a known endpoint: after its first recorded edge the
///   rest of its history is dropped.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PruningPolicy {
    pub max_depth: usize,
    pub max_transactions: usize,
    pub max_outgoing: usize,
}

impl PruningPolicy {
    pub fn new(max_depth: usize, max_transactions: usize, max_outgoing: usize) -> Self {
        Self {
            max_depth,
            max_transactions,
            max_outgoing,
        }
    }

    /// Depth 0 is a seed.
    pub fn within_depth(&self, depth: usize) -> bool {
        depth <= self.max_depth
    }

    /// Whether an address at `depth` with `tx_count` transactions gets its history enumerated.
    /// Seeds are always enumerated regardless of volume.
    pub fn should_expand(&self, depth: usize, tx_count: usize) -> bool {
        self.within_depth(depth) && (depth == 0 || tx_count <= self.max_transactions)
    }

    /// Whether the outputs of a recorded transaction are followed.
    pub fn should_recurse(&self, outgoing_count: usize) -> bool {
        outgoing_count <= self.max_outgoing
    }

    pub fn should_stop_sibling_expansion(&self, label: Option<&str>) -> bool {
        label.is_some_and(|l| !l.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_ignore_transaction_ceiling() {
        let policy = PruningPolicy::new(10, 100, 50);
        assert!(policy.should_expand(0, 5_000));
        assert!(!policy.should_expand(1, 101));
        assert!(policy.should_expand(1, 100));
    }

    #[test]
    fn depth_limit_is_inclusive() {
        let policy = PruningPolicy::new(2, 100, 50);
        assert!(policy.within_depth(2));
        assert!(!policy.within_depth(3));
        assert!(!policy.should_expand(3, 1));
    }

    #[test]
    fn fan_out_and_labels() {
        let policy = PruningPolicy::new(10, 100, 50);
        assert!(policy.should_recurse(50));
        assert!(!policy.should_recurse(51));

        assert!(policy.should_stop_sibling_expansion(Some("BigExchange")));
        assert!(!policy.should_stop_sibling_expansion(Some("")));
        assert!(!policy.should_stop_sibling_expansion(None));
    }
}
