use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use std::{path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;
use txcrawl::{
    config::*,
    data_sources::*,
    error::CrawlError,
    filter::TimeWindow,
    graph_utils::*,
    retry::RetryPolicy,
    sink::JsonFileStore,
    summary::TransferSummary,
    traversal::{CancelToken, crawl, watch_interrupts},
    types::Address,
    walletexplorer::{DEFAULT_API_URL, WalletExplorerDataSource},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    Walletexplorer,
    Csv,
}

#[derive(Parser, Debug)]
#[command(about = "Crawl outgoing Bitcoin flows from a set of seed addresses")]
struct Args {
    #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_SEEDS.map(String::from))]
    seed: Vec<String>,
    #[arg(short, long, default_value_t = DEFAULT_MIN_AMOUNT)]
    min_amount: f64,
    #[arg(short = 'd', long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_OUTGOING)]
    max_outgoing: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_TRANSACTIONS)]
    max_transactions: usize,
    #[arg(short = 'f', long, default_value = DEFAULT_DATE_FROM, value_parser = parse_date_arg)]
    date_from: DateTime<Utc>,
    #[arg(short = 't', long, default_value = DEFAULT_DATE_TO, value_parser = parse_date_arg)]
    date_to: DateTime<Utc>,
    #[arg(long, default_value_t = DEFAULT_SAVE_EVERY)]
    save_every: usize,
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    #[arg(long, value_enum, default_value_t = SourceKind::Walletexplorer)]
    source: SourceKind,
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,
    /// Directory with transactions.csv, outputs.csv and optionally labels.csv
    #[arg(long, required_if_eq("source", "csv"))]
    csv_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// Retries per lookup or checkpoint write before giving up on it
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Also write the discovered graph as Graphviz DOT
    #[arg(long)]
    dot: Option<PathBuf>,
}

fn parse_date_arg(s: &str) -> Result<DateTime<Utc>, String> {
    parse_datetime(s).map_err(|e| e.to_string())
}

impl Args {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            ..RetryPolicy::default()
        }
    }

    fn crawl_config(&self) -> Result<CrawlConfig, CrawlError> {
        let seeds = self
            .seed
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<Address>())
            .collect::<Result<Vec<_>, _>>()?;

        let config = CrawlConfig {
            seeds,
            min_amount: self.min_amount,
            max_depth: self.max_depth,
            max_outgoing: self.max_outgoing,
            max_transactions: self.max_transactions,
            window: TimeWindow::new(self.date_from, self.date_to),
            save_every: self.save_every,
            output: self.output.clone(),
            persist_retry: self.retry_policy(),
        };
        config.validate()?;
        Ok(config)
    }

    fn data_source(&self) -> Result<Box<dyn CrawlDataSource>, CrawlError> {
        let source: Box<dyn CrawlDataSource> = match self.source {
            SourceKind::Walletexplorer => {
                let source = WalletExplorerDataSource::new(
                    self.api_url.clone(),
                    Duration::from_secs(self.timeout_secs),
                )
                .map_err(CrawlError::Setup)?;
                info!("Initialized {}", source);
                Box::new(source)
            }
            SourceKind::Csv => {
                let dir = self.csv_dir.clone().ok_or_else(|| {
                    CrawlError::InvalidConfig("--csv-dir is required with --source csv".into())
                })?;
                Box::new(CsvDataSource::from_dir(dir).map_err(CrawlError::Setup)?)
            }
        };
        Ok(Box::new(RetryingSource::new(source, self.retry_policy())))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting txcrawl");
    let args = Args::parse();
    let config = args.crawl_config()?;
    info!("Seeds: {:?}", config.seeds);
    info!(
        "Window: {} to {}, min amount {}, max depth {}",
        config.window.from, config.window.to, config.min_amount, config.max_depth
    );

    let source = args.data_source()?;

    // Ctrl-C asks the traverser to stop at the next address; the sink is still finalized.
    // A second Ctrl-C exits right away.
    let cancel = CancelToken::new();
    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;
    let handler_token = cancel.clone();
    let _signal_thread = std::thread::spawn(move || {
        if signals.block_on(watch_interrupts(handler_token, tokio::signal::ctrl_c)) {
            std::process::exit(130);
        }
    });

    let report = crawl(
        source.as_ref(),
        &config,
        JsonFileStore::new(&config.output),
        cancel,
    )?;

    info!(
        "{} edges written to {} ({} checkpoints).",
        report.edges.len(),
        config.output.display(),
        report.checkpoints
    );
    print!("{}", report.stats);

    let graph = build_transfer_graph(&report.edges);
    info!(
        "Graph has {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    let summary = TransferSummary::from_transfer_graph(&graph).with_summary_table();
    print!("{}", summary);

    if let Some(dot_path) = &args.dot {
        save_graph_as_dot(&graph, dot_path)?;
        info!("Graph written to {}", dot_path.display());
    }

    Ok(())
}
