//! Property-based tests for the traverser using proptest.
//!
//! Random transaction graphs are crawled and every emitted edge is checked against the
//! filtering and pruning rules.

use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use txcrawl::{
    data_sources::InMemoryDataSource,
    filter::{EdgeFilter, TimeWindow},
    pruning::PruningPolicy,
    traversal::Traverser,
    types::{Address, AddressTransaction, CrawlEdge},
};

const NODES: usize = 7;
const IN_WINDOW: i64 = 1_501_900_000;
const OUT_OF_WINDOW: i64 = 1_400_000_000;

const MIN_AMOUNT: f64 = 0.2;
const MAX_DEPTH: usize = 3;
const MAX_TRANSACTIONS: usize = 4;
const MAX_OUTGOING: usize = 2;

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct GenTx {
    sender: usize,
    sent: f64,
    in_window: bool,
    outputs: Vec<usize>,
}

fn arb_tx() -> impl Strategy<Value = GenTx> {
    (
        0..NODES,
        0.0..1.0f64,
        prop::bool::weighted(0.8),
        prop::collection::vec(0..NODES, 0..4),
    )
        .prop_map(|(sender, sent, in_window, outputs)| GenTx {
            sender,
            sent,
            in_window,
            outputs,
        })
}

fn arb_graph() -> impl Strategy<Value = (Vec<GenTx>, Vec<bool>)> {
    (
        prop::collection::vec(arb_tx(), 1..25),
        prop::collection::vec(prop::bool::weighted(0.2), NODES),
    )
}

fn node(i: usize) -> Address {
    Address::new(format!("a{i}")).unwrap()
}

struct World {
    source: InMemoryDataSource,
    history_len: HashMap<Address, usize>,
    outputs: HashMap<String, Vec<Address>>,
    labels: HashMap<Address, String>,
}

/// Every transaction shows up as an outflow for its sender and as an inflow for each
/// distinct receiver, like a real address history would.
fn build_world(txs: &[GenTx], labeled: &[bool]) -> World {
    let mut histories: HashMap<usize, Vec<AddressTransaction>> = HashMap::new();
    let mut outputs = HashMap::new();

    for (i, t) in txs.iter().enumerate() {
        let txid = format!("t{i}");
        let time = if t.in_window { IN_WINDOW } else { OUT_OF_WINDOW };
        histories
            .entry(t.sender)
            .or_default()
            .push(AddressTransaction::new(&txid, t.sent, 0.0, time));

        let receivers: HashSet<usize> = t.outputs.iter().copied().collect();
        for r in receivers.into_iter().filter(|r| *r != t.sender) {
            histories
                .entry(r)
                .or_default()
                .push(AddressTransaction::new(&txid, 0.0, t.sent, time));
        }
        outputs.insert(txid, t.outputs.iter().map(|o| node(*o)).collect::<Vec<_>>());
    }

    let mut source = InMemoryDataSource::new();
    let mut history_len = HashMap::new();
    let mut labels = HashMap::new();
    for i in 0..NODES {
        let history = histories.remove(&i).unwrap_or_default();
        history_len.insert(node(i), history.len());
        source = source.with_address(node(i), history);
        if labeled[i] {
            source = source.with_label(node(i), format!("Service{i}"));
            labels.insert(node(i), format!("Service{i}"));
        }
    }
    for (txid, outs) in &outputs {
        source = source.with_outputs(txid.clone(), outs.clone());
    }

    World {
        source,
        history_len,
        outputs,
        labels,
    }
}

fn crawl_world(world: &World) -> Vec<CrawlEdge> {
    let filter = EdgeFilter::new(
        MIN_AMOUNT,
        TimeWindow::new(
            Utc.with_ymd_and_hms(2017, 8, 3, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2017, 8, 10, 0, 0, 0).unwrap(),
        ),
    );
    let policy = PruningPolicy::new(MAX_DEPTH, MAX_TRANSACTIONS, MAX_OUTGOING);
    Traverser::new(&world.source, &[node(0)], filter, policy).collect()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn each_transaction_is_emitted_at_most_once((txs, labeled) in arb_graph()) {
        let world = build_world(&txs, &labeled);
        let edges = crawl_world(&world);

        let mut seen = HashSet::new();
        for edge in &edges {
            prop_assert!(seen.insert(edge.txid.clone()), "duplicate edge for {}", edge.txid);
        }
    }

    #[test]
    fn emitted_edges_pass_the_filter((txs, labeled) in arb_graph()) {
        let world = build_world(&txs, &labeled);
        for edge in crawl_world(&world) {
            prop_assert!(edge.net_amount >= MIN_AMOUNT);
            prop_assert_eq!(edge.time, IN_WINDOW);
            prop_assert!(edge.depth <= MAX_DEPTH);
        }
    }

    #[test]
    fn edge_content_comes_from_the_source((txs, labeled) in arb_graph()) {
        let world = build_world(&txs, &labeled);
        for edge in crawl_world(&world) {
            prop_assert_eq!(&edge.outgoing_addresses, &world.outputs[&edge.txid]);
            prop_assert_eq!(edge.label.as_ref(), world.labels.get(&edge.from_address));
        }
    }

    #[test]
    fn busy_addresses_only_emit_as_seeds((txs, labeled) in arb_graph()) {
        let world = build_world(&txs, &labeled);
        for edge in crawl_world(&world) {
            if edge.depth == 0 {
                prop_assert_eq!(&edge.from_address, &node(0));
            } else {
                prop_assert!(world.history_len[&edge.from_address] <= MAX_TRANSACTIONS);
            }
        }
    }

    #[test]
    fn every_edge_is_reachable_through_followed_outputs((txs, labeled) in arb_graph()) {
        let world = build_world(&txs, &labeled);
        let edges = crawl_world(&world);

        // Outputs that were actually followed, keyed by the depth they were reached at.
        let mut followed: HashSet<(Address, usize)> = HashSet::new();
        for edge in &edges {
            if edge.outgoing_addresses.len() <= MAX_OUTGOING && edge.label.is_none() {
                for out in &edge.outgoing_addresses {
                    followed.insert((out.clone(), edge.depth + 1));
                }
            }
        }

        for edge in edges.iter().filter(|e| e.depth > 0) {
            prop_assert!(
                followed.contains(&(edge.from_address.clone(), edge.depth)),
                "{} at depth {} was never followed into", edge.from_address, edge.depth
            );
        }
    }
}
