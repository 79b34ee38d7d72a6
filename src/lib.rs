// Basic types used throughout txcrawl
pub mod types;
// Error taxonomy of a crawl run
pub mod error;
// Runtime configuration of a crawl
pub mod config;

// Which transactions are worth recording, and which addresses are worth expanding
pub mod filter;
pub mod pruning;
pub mod visited;

// Backoff used around data source lookups and checkpoint writes
pub mod retry;

// Data source traits with in-memory and CSV (polars) connectors
pub mod data_sources;
// The walletexplorer.com API is the primary source, so its connector lives in a separate module
pub mod walletexplorer;

// Accumulating and checkpointing the crawl result
pub mod sink;
// Module for crawling the transaction graph from a CrawlDataSource
pub mod traversal;

// Module with utility functions for building and exporting a transfer graph
pub mod graph_utils;
// Types and functions for summarizing a transfer graph
pub mod summary;
