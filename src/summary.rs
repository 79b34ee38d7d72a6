use crate::types::{Address, TransferGraph};
use petgraph::{Directed, Graph, graph::NodeIndex, visit::EdgeRef};
use std::{collections::HashMap, fmt::Display};

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEdge {
    pub no_transfers: usize,
    pub sum_amount: f64,
}

impl Display for SummaryEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.8})", self.no_transfers, self.sum_amount)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTransfer {
    pub from: Address,
    pub to: Address,
    pub no_transfers: usize,
    pub sum_amount: f64,
}

/// TransferSummary
///
/// A TransferSummary is primarily a graph that aggregates many TransferEdges between nodes:
/// one edge per (from, to) pair, with the number of transfers and the summed amounts
/// received on those legs.
///
/// It optionally has a tabular representation, a Vec<AggregatedTransfer>.
pub struct TransferSummary {
    pub summary_graph: Graph<Address, SummaryEdge, Directed>,
    pub summary_table: Option<Vec<AggregatedTransfer>>,
}

impl TransferSummary {
    pub fn from_transfer_graph(graph: &TransferGraph) -> Self {
        let mut acc: HashMap<(NodeIndex, NodeIndex), SummaryEdge> = HashMap::new();

        for edge in graph.edge_references() {
            let entry = acc
                .entry((edge.source(), edge.target()))
                .or_insert(SummaryEdge {
                    no_transfers: 0,
                    sum_amount: 0.0,
                });
            entry.no_transfers += 1;
            entry.sum_amount += edge.weight().amount;
        }

        let mut summary_graph = Graph::<Address, SummaryEdge, Directed>::new();
        let mut node_map = HashMap::<NodeIndex, NodeIndex>::new();

        for ((from, to), summary) in acc {
            let from_index = *node_map
                .entry(from)
                .or_insert_with(|| summary_graph.add_node(graph[from].clone()));
            let to_index = *node_map
                .entry(to)
                .or_insert_with(|| summary_graph.add_node(graph[to].clone()));

            summary_graph.add_edge(from_index, to_index, summary);
        }

        TransferSummary {
            summary_graph,
            summary_table: None,
        }
    }

    pub fn with_summary_table(self) -> Self {
        let aggregated_transfers = self
            .summary_graph
            .edge_references()
            .map(|edge| AggregatedTransfer {
                from: self.summary_graph[edge.source()].clone(),
                to: self.summary_graph[edge.target()].clone(),
                no_transfers: edge.weight().no_transfers,
                sum_amount: edge.weight().sum_amount,
            })
            .collect();

        Self {
            summary_graph: self.summary_graph,
            summary_table: Some(aggregated_transfers),
        }
    }

    pub fn has_summary_table(&self) -> bool {
        self.summary_table.is_some()
    }
}

impl Display for TransferSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(table) = &self.summary_table {
            let mut sorted_table = table.clone();

            sorted_table.sort_by(|a, b| {
                a.from
                    .cmp(&b.from)
                    .then_with(|| b.no_transfers.cmp(&a.no_transfers))
                    .then_with(|| a.to.cmp(&b.to))
            });

            for transfer in sorted_table {
                writeln!(
                    f,
                    "{:.36} -> {:.36} for {} transfers, {:.8} total",
                    transfer.from.as_str(),
                    transfer.to.as_str(),
                    transfer.no_transfers,
                    transfer.sum_amount
                )?;
            }
        } else {
            writeln!(f, "Transfer Summary:")?;
            for edge in self.summary_graph.edge_references() {
                writeln!(
                    f,
                    "{:.36} -> {:.36} for {}",
                    self.summary_graph[edge.source()].as_str(),
                    self.summary_graph[edge.target()].as_str(),
                    edge.weight()
                )?;
            }
        }
        Ok(())
    }
}
