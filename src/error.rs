use thiserror::Error;

/// Errors a crawl run can surface.
///
/// Only configuration, setup and persistence errors ever abort a run.
/// `Resolution` is what a data source reports once its retries are exhausted;
/// the traverser logs it and treats the node or transaction as empty.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to resolve {what} after {attempts} attempts")]
    Resolution {
        what: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to persist {edges} edges to {location} after {attempts} attempts")]
    Persistence {
        location: String,
        edges: usize,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to set up data source: {0}")]
    Setup(#[source] anyhow::Error),
}
