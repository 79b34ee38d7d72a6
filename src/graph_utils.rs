use crate::types::{Address, CrawlEdge, TransferEdge, TransferGraph};
use anyhow::{Context, Result};
use petgraph::graph::NodeIndex;
use std::{
    collections::HashMap,
    fmt::{self, Write},
    fs,
    path::Path,
};

/// Assemble the crawled edges into a `TransferGraph`.
///
/// Every (from, output) pair of a `CrawlEdge` becomes one graph edge carrying the
/// amount that output received; an address appearing in several edges maps to a
/// single node.
pub fn build_transfer_graph(edges: &[CrawlEdge]) -> TransferGraph {
    let mut graph = TransferGraph::new();
    // addr_idx_map maps addresses to their node index in the graph so that I can insert edges
    let mut addr_idx_map: HashMap<Address, NodeIndex> = HashMap::new();

    for edge in edges {
        let from_idx = *addr_idx_map
            .entry(edge.from_address.clone())
            .or_insert_with(|| graph.add_node(edge.from_address.clone()));

        for (to, amount) in edge.legs() {
            let to_idx = *addr_idx_map
                .entry(to.clone())
                .or_insert_with(|| graph.add_node(to.clone()));

            graph.add_edge(
                from_idx,
                to_idx,
                TransferEdge {
                    txid: edge.txid.clone(),
                    amount,
                    time: edge.time,
                },
            );
        }
    }

    graph
}

/// Write a TransferGraph into a DOT string for visualization
///
/// Useful for small to medium sized graphs with `https://dreampuf.github.io/GraphvizOnline/?engine=dot`
pub fn write_graph_to_dot(graph: &TransferGraph) -> Result<String, fmt::Error> {
    let mut dot = String::new();
    writeln!(dot, "digraph TransferGraph {{")?;
    writeln!(dot, "  node [shape=ellipse];")?;
    writeln!(dot, "  edge [dir=forward];")?;
    writeln!(dot)?;

    for node_idx in graph.node_indices() {
        let address = &graph[node_idx];
        writeln!(dot, "  \"{}\" [label=\"{:.12}...\"];", address, address.as_str())?;
    }

    writeln!(dot)?;

    for edge_idx in graph.edge_indices() {
        let Some((from_idx, to_idx)) = graph.edge_endpoints(edge_idx) else {
            continue;
        };
        let transfer = &graph[edge_idx];

        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [label=\"{:.8}\\nTime {}\" tooltip=\"Tx: {}\"];",
            graph[from_idx], graph[to_idx], transfer.amount, transfer.time, transfer.txid
        )?;
    }

    writeln!(dot, "}}")?;
    Ok(dot)
}

/// Call write_graph_to_dot() and save the result to `path`.
pub fn save_graph_as_dot(graph: &TransferGraph, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let dot = write_graph_to_dot(graph).context("Failed to render DOT")?;
    fs::write(path, dot).with_context(|| format!("Failed to write DOT to {}", path.display()))
}
