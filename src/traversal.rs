use crate::{
    config::CrawlConfig,
    data_sources::CrawlDataSource,
    error::CrawlError,
    filter::EdgeFilter,
    pruning::PruningPolicy,
    sink::{EdgeStore, ResultSink},
    types::{Address, AddressTransaction, CrawlEdge},
    visited::VisitedSet,
};
use std::{
    fmt::Display,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    vec,
};
use tracing::{debug, info, warn};

/// Cooperative stop signal, checked each time the traverser is about to visit an address.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Turn interrupts into cancellation.
///
/// The first interrupt cancels `token` so the crawl can wind down and save. Returns
/// `true` once a second interrupt arrives, at which point the caller should exit
/// without waiting. Returns `false` if listening for interrupts fails.
pub async fn watch_interrupts<F, Fut>(token: CancelToken, mut interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = interrupt().await {
        warn!("Could not listen for interrupts: {}", e);
        return false;
    }
    warn!("Interrupt received, finishing current address and saving (interrupt again to exit now)");
    token.cancel();

    match interrupt().await {
        Ok(()) => {
            warn!("Second interrupt received, exiting without a final save");
            true
        }
        Err(e) => {
            warn!("Could not listen for interrupts: {}", e);
            false
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub addresses_visited: usize,
    pub addresses_unresolved: usize,
    pub addresses_pruned: usize,
    pub transactions_examined: usize,
    pub duplicates_skipped: usize,
    pub outputs_unresolved: usize,
    pub edges_emitted: usize,
    pub fan_out_pruned: usize,
    pub labeled_endpoints: usize,
    pub cancelled: bool,
}

impl Display for CrawlStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "addresses visited:      {}", self.addresses_visited)?;
        writeln!(f, "addresses unresolved:   {}", self.addresses_unresolved)?;
        writeln!(f, "addresses pruned:       {}", self.addresses_pruned)?;
        writeln!(f, "transactions examined:  {}", self.transactions_examined)?;
        writeln!(f, "duplicates skipped:     {}", self.duplicates_skipped)?;
        writeln!(f, "outputs unresolved:     {}", self.outputs_unresolved)?;
        writeln!(f, "edges emitted:          {}", self.edges_emitted)?;
        writeln!(f, "fan-out pruned:         {}", self.fan_out_pruned)?;
        writeln!(f, "labeled endpoints:      {}", self.labeled_endpoints)?;
        if self.cancelled {
            writeln!(f, "(cancelled before completion)")?;
        }
        Ok(())
    }
}

/// Everything the traverser mutates during a run.
#[derive(Debug, Default)]
pub struct CrawlState {
    pub visited: VisitedSet,
    pub stats: CrawlStats,
}

/// An address whose history is being walked.
struct Frame {
    address: Address,
    depth: usize,
    label: Option<String>,
    transactions: vec::IntoIter<AddressTransaction>,
}

enum Task {
    Visit { address: Address, depth: usize },
    Resume(Frame),
}

///
/// Traverser
///
/// Depth-first crawl from a set of seed addresses, yielding each qualifying transaction as a
/// `CrawlEdge` as soon as it is found.
///
/// The stack holds either addresses still to be visited or partially walked histories. When a
/// transaction's outputs are followed, the current history is pushed back first and the outputs
/// on top of it in reverse, so each output subtree is finished, in output order, before the
/// next transaction of the parent is looked at.
///
pub struct Traverser<'a, D: CrawlDataSource + ?Sized> {
    source: &'a D,
    filter: EdgeFilter,
    policy: PruningPolicy,
    state: CrawlState,
    stack: Vec<Task>,
    cancel: CancelToken,
}

impl<'a, D: CrawlDataSource + ?Sized> Traverser<'a, D> {
    pub fn new(
        source: &'a D,
        seeds: &[Address],
        filter: EdgeFilter,
        policy: PruningPolicy,
    ) -> Self {
        let stack = seeds
            .iter()
            .rev()
            .map(|seed| Task::Visit {
                address: seed.clone(),
                depth: 0,
            })
            .collect();

        Self {
            source,
            filter,
            policy,
            state: CrawlState::default(),
            stack,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.state.stats
    }

    pub fn into_state(self) -> CrawlState {
        self.state
    }

    /// Resolve an address and decide whether its history gets walked.
    fn open(&mut self, address: Address, depth: usize) -> Option<Frame> {
        if !self.policy.within_depth(depth) {
            return None;
        }

        let transactions = match self.source.get_transactions(&address) {
            Ok(Some(transactions)) => transactions,
            Ok(None) => {
                debug!("Address {} not found", address);
                self.state.stats.addresses_unresolved += 1;
                return None;
            }
            Err(e) => {
                warn!("Could not resolve address {}: {:#}", address, e);
                self.state.stats.addresses_unresolved += 1;
                return None;
            }
        };
        self.state.stats.addresses_visited += 1;

        if !self.policy.should_expand(depth, transactions.len()) {
            info!(
                "Skipping address {} (too many transactions: {}), possibly an exchange",
                address,
                transactions.len()
            );
            self.state.stats.addresses_pruned += 1;
            return None;
        }

        let label = match self.source.get_label(&address) {
            Ok(label) => label.filter(|l| !l.is_empty()),
            Err(e) => {
                warn!("Could not look up label of {}: {:#}", address, e);
                None
            }
        };

        Some(Frame {
            address,
            depth,
            label,
            transactions: transactions.into_iter(),
        })
    }

    /// Walk `frame`'s history until one edge is produced or the history runs out.
    fn advance(&mut self, mut frame: Frame) -> Option<CrawlEdge> {
        while let Some(tx) = frame.transactions.next() {
            self.state.stats.transactions_examined += 1;

            // Marked before filtering so a non-qualifying transaction is never examined again.
            if !self.state.visited.first_visit(&tx.txid) {
                debug!("Skipping transaction {} (already parsed)", tx.txid);
                self.state.stats.duplicates_skipped += 1;
                continue;
            }

            if !self.filter.qualifies(&tx) {
                continue;
            }

            let outputs = match self.source.get_outputs(&tx.txid) {
                Ok(Some(outputs)) => outputs,
                Ok(None) => {
                    debug!("Transaction {} not found", tx.txid);
                    self.state.stats.outputs_unresolved += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Could not resolve transaction {}: {:#}", tx.txid, e);
                    self.state.stats.outputs_unresolved += 1;
                    continue;
                }
            };

            let edge = CrawlEdge::new(
                frame.address.clone(),
                &tx,
                outputs,
                frame.label.clone(),
                frame.depth,
            );
            self.state.stats.edges_emitted += 1;
            info!(
                "Crawled {} -> {} (depth {})",
                edge.from_address, edge.txid, frame.depth
            );

            if !self.policy.should_recurse(edge.outgoing_addresses.len()) {
                info!(
                    "Skipping deeper crawl for {} (too many outgoing addresses: {})",
                    edge.txid,
                    edge.outgoing_addresses.len()
                );
                self.state.stats.fan_out_pruned += 1;
                self.stack.push(Task::Resume(frame));
                return Some(edge);
            }

            if self
                .policy
                .should_stop_sibling_expansion(frame.label.as_deref())
            {
                info!(
                    "Transaction from exchange: {}, stopping crawl of {}",
                    frame.label.as_deref().unwrap_or_default(),
                    frame.address
                );
                self.state.stats.labeled_endpoints += 1;
                // The frame is dropped: nothing else of this address is examined.
                return Some(edge);
            }

            let depth = frame.depth + 1;
            self.stack.push(Task::Resume(frame));
            self.stack
                .extend(edge.outgoing_addresses.iter().rev().map(|address| Task::Visit {
                    address: address.clone(),
                    depth,
                }));
            return Some(edge);
        }
        None
    }
}

impl<D: CrawlDataSource + ?Sized> Iterator for Traverser<'_, D> {
    type Item = CrawlEdge;

    fn next(&mut self) -> Option<CrawlEdge> {
        while let Some(task) = self.stack.pop() {
            let frame = match task {
                Task::Visit { address, depth } => {
                    if self.cancel.is_cancelled() {
                        info!("Crawl cancelled, {} pending tasks dropped", self.stack.len() + 1);
                        self.state.stats.cancelled = true;
                        self.stack.clear();
                        return None;
                    }
                    match self.open(address, depth) {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
                Task::Resume(frame) => frame,
            };

            if let Some(edge) = self.advance(frame) {
                return Some(edge);
            }
        }
        None
    }
}

/// Outcome of `crawl`.
#[derive(Debug)]
pub struct CrawlReport {
    pub stats: CrawlStats,
    pub edges: Vec<CrawlEdge>,
    pub checkpoints: usize,
}

/// Run a full crawl for `config` over `source`, checkpointing into `store`.
///
/// The sink is always finalized, also when the crawl is cancelled or a checkpoint fails.
/// Resolution failures never abort the run; persistence failures that survive the sink's
/// retries do.
pub fn crawl<D, S>(
    source: &D,
    config: &CrawlConfig,
    store: S,
    cancel: CancelToken,
) -> Result<CrawlReport, CrawlError>
where
    D: CrawlDataSource + ?Sized,
    S: EdgeStore,
{
    config.validate()?;

    let mut sink = ResultSink::new(store, config.save_every, config.persist_retry);
    let mut traverser = Traverser::new(
        source,
        &config.seeds,
        config.edge_filter(),
        config.pruning_policy(),
    )
    .with_cancel_token(cancel);

    info!("Crawling from {} seed addresses", config.seeds.len());
    let outcome = traverser.by_ref().try_for_each(|edge| sink.append(edge));
    let finalized = sink.finalize();
    outcome?;
    finalized?;

    let stats = traverser.into_state().stats;
    info!("Crawl finished. {} edges saved.", sink.edges().len());

    Ok(CrawlReport {
        stats,
        checkpoints: sink.checkpoints(),
        edges: sink.into_edges(),
    })
}
