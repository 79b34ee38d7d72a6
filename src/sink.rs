use crate::{
    error::CrawlError,
    retry::{RetryPolicy, retry_with_backoff},
    types::CrawlEdge,
};
use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};
use tracing::info;

/// EdgeStore
///
/// Durable storage for the crawl result. Every call replaces whatever was stored before
/// with the full `edges` slice.
pub trait EdgeStore {
    fn persist(&mut self, edges: &[CrawlEdge]) -> Result<()>;

    /// Human readable location, for logs and errors.
    fn location(&self) -> String;
}

/// JsonFileStore
///
/// Stores the edges as a pretty-printed JSON array at a fixed path.
///
/// The array is written to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl EdgeStore for JsonFileStore {
    fn persist(&mut self, edges: &[CrawlEdge]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = self.temp_path();
        let file =
            File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, edges)
            .with_context(|| format!("Failed to serialize edges to {}", tmp.display()))?;
        writer.flush()?;
        writer
            .get_ref()
            .sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;

        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to move {} to {}", tmp.display(), self.path.display())
        })?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// ResultSink
///
/// Accumulates emitted edges and checkpoints the whole collection to an `EdgeStore`
/// every `save_every` edges, plus once more on `finalize`.
///
/// A checkpoint that keeps failing after `retry` is exhausted is escalated as
/// `CrawlError::Persistence`.
pub struct ResultSink<S: EdgeStore> {
    store: S,
    edges: Vec<CrawlEdge>,
    save_every: usize,
    retry: RetryPolicy,
    checkpoints: usize,
}

impl<S: EdgeStore> ResultSink<S> {
    pub fn new(store: S, save_every: usize, retry: RetryPolicy) -> Self {
        Self {
            store,
            edges: Vec::new(),
            save_every: save_every.max(1),
            retry,
            checkpoints: 0,
        }
    }

    pub fn append(&mut self, edge: CrawlEdge) -> Result<(), CrawlError> {
        self.edges.push(edge);
        if self.edges.len() % self.save_every == 0 {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Write the full current collection. Safe to call any number of times.
    pub fn checkpoint(&mut self) -> Result<(), CrawlError> {
        let location = self.store.location();
        let what = format!("checkpoint to {}", location);
        retry_with_backoff(&self.retry, &what, || self.store.persist(&self.edges)).map_err(
            |(source, attempts)| CrawlError::Persistence {
                location,
                edges: self.edges.len(),
                attempts,
                source,
            },
        )?;
        self.checkpoints += 1;
        info!("Saved {} edges so far.", self.edges.len());
        Ok(())
    }

    /// Final checkpoint of the run.
    pub fn finalize(&mut self) -> Result<(), CrawlError> {
        self.checkpoint()
    }

    pub fn edges(&self) -> &[CrawlEdge] {
        &self.edges
    }

    pub fn into_edges(self) -> Vec<CrawlEdge> {
        self.edges
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
