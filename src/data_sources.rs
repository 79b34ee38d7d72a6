use crate::{
    error::CrawlError,
    retry::{RetryPolicy, retry_with_backoff},
    types::{Address, AddressTransaction, TxOutput},
};
use anyhow::{Context, Result};
use polars::prelude::*;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

/// AddressSource
///
/// Resolves an address to its transaction history and its ownership label.
///
/// `Ok(None)` from `get_transactions` means the source does not know the address.
/// `Err` means the lookup itself failed.
pub trait AddressSource {
    fn get_transactions(&self, address: &Address) -> Result<Option<Vec<AddressTransaction>>>;

    fn get_label(&self, address: &Address) -> Result<Option<String>>;
}

/// TransactionSource
///
/// Resolves a transaction id to its ordered outputs.
pub trait TransactionSource {
    fn get_outputs(&self, txid: &str) -> Result<Option<Vec<TxOutput>>>;
}

/// Everything the traverser needs from a data source.
pub trait CrawlDataSource: AddressSource + TransactionSource {}

impl<T: AddressSource + TransactionSource + ?Sized> CrawlDataSource for T {}

impl<T: AddressSource + ?Sized> AddressSource for Box<T> {
    fn get_transactions(&self, address: &Address) -> Result<Option<Vec<AddressTransaction>>> {
        (**self).get_transactions(address)
    }

    fn get_label(&self, address: &Address) -> Result<Option<String>> {
        (**self).get_label(address)
    }
}

impl<T: TransactionSource + ?Sized> TransactionSource for Box<T> {
    fn get_outputs(&self, txid: &str) -> Result<Option<Vec<TxOutput>>> {
        (**self).get_outputs(txid)
    }
}

/// RetryingSource
///
/// Wraps another source and retries failed lookups with exponential backoff.
/// "Not found" answers are final and returned as-is. Once retries are exhausted the
/// failure is returned as a `CrawlError::Resolution`.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn call<T>(&self, what: String, op: impl FnMut() -> Result<T>) -> Result<T> {
        retry_with_backoff(&self.policy, &what, op).map_err(|(source, attempts)| {
            anyhow::Error::from(CrawlError::Resolution {
                what,
                attempts,
                source,
            })
        })
    }
}

impl<S: AddressSource> AddressSource for RetryingSource<S> {
    fn get_transactions(&self, address: &Address) -> Result<Option<Vec<AddressTransaction>>> {
        self.call(format!("transactions of {address}"), || {
            self.inner.get_transactions(address)
        })
    }

    fn get_label(&self, address: &Address) -> Result<Option<String>> {
        self.call(format!("label of {address}"), || self.inner.get_label(address))
    }
}

impl<S: TransactionSource> TransactionSource for RetryingSource<S> {
    fn get_outputs(&self, txid: &str) -> Result<Option<Vec<TxOutput>>> {
        self.call(format!("outputs of {txid}"), || self.inner.get_outputs(txid))
    }
}

/// InMemoryDataSource
///
/// A data source backed by hash maps. Handy for embedding a known graph and for tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDataSource {
    transactions: HashMap<Address, Vec<AddressTransaction>>,
    labels: HashMap<Address, String>,
    outputs: HashMap<String, Vec<TxOutput>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: Address, transactions: Vec<AddressTransaction>) -> Self {
        self.transactions.insert(address, transactions);
        self
    }

    pub fn with_label(mut self, address: Address, label: impl Into<String>) -> Self {
        self.labels.insert(address, label.into());
        self
    }

    /// Outputs whose amounts don't matter; each one is recorded as receiving 0.0.
    pub fn with_outputs(self, txid: impl Into<String>, outputs: Vec<Address>) -> Self {
        let outputs = outputs.into_iter().map(|a| (a, 0.0)).collect();
        self.with_output_amounts(txid, outputs)
    }

    pub fn with_output_amounts(
        mut self,
        txid: impl Into<String>,
        outputs: Vec<(Address, f64)>,
    ) -> Self {
        let outputs = outputs
            .into_iter()
            .map(|(address, amount)| TxOutput::new(address, amount))
            .collect();
        self.outputs.insert(txid.into(), outputs);
        self
    }
}

impl AddressSource for InMemoryDataSource {
    fn get_transactions(&self, address: &Address) -> Result<Option<Vec<AddressTransaction>>> {
        Ok(self.transactions.get(address).cloned())
    }

    fn get_label(&self, address: &Address) -> Result<Option<String>> {
        Ok(self.labels.get(address).cloned())
    }
}

impl TransactionSource for InMemoryDataSource {
    fn get_outputs(&self, txid: &str) -> Result<Option<Vec<TxOutput>>> {
        Ok(self.outputs.get(txid).cloned())
    }
}

/// CsvDataSource
///
/// An offline data source built from CSV exports, held as polars DataFrames.
///
/// The directory should contain:
/// - `transactions.csv` with columns `address`, `txid`, `amount_sent`, `amount_received`, `time`
///   (one row per entry of an address's history, in history order)
/// - `outputs.csv` with columns `txid`, `address`, `amount` (one row per output, in output order)
/// - optionally `labels.csv` with columns `address`, `label`
///
/// An address without rows in `transactions.csv` is unknown, as is a txid without rows in
/// `outputs.csv`.
pub struct CsvDataSource {
    pub transactions: DataFrame,
    pub outputs: DataFrame,
    pub labels: Option<DataFrame>,
}

impl CsvDataSource {
    pub fn new(transactions: DataFrame, outputs: DataFrame, labels: Option<DataFrame>) -> Self {
        Self {
            transactions,
            outputs,
            labels,
        }
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        // Amounts must stay floats and timestamps integers even if a column happens to
        // look like something else in the first rows.
        let transactions = read_csv(
            dir.join("transactions.csv"),
            vec![
                Field::new("address".into(), DataType::String),
                Field::new("txid".into(), DataType::String),
                Field::new("amount_sent".into(), DataType::Float64),
                Field::new("amount_received".into(), DataType::Float64),
                Field::new("time".into(), DataType::Int64),
            ],
        )?;
        let outputs = read_csv(
            dir.join("outputs.csv"),
            vec![
                Field::new("txid".into(), DataType::String),
                Field::new("address".into(), DataType::String),
                Field::new("amount".into(), DataType::Float64),
            ],
        )?;

        let labels_path = dir.join("labels.csv");
        let labels = if labels_path.exists() {
            Some(read_csv(
                labels_path,
                vec![
                    Field::new("address".into(), DataType::String),
                    Field::new("label".into(), DataType::String),
                ],
            )?)
        } else {
            None
        };

        info!(
            "Loaded {} transaction rows and {} output rows from {}",
            transactions.height(),
            outputs.height(),
            dir.display()
        );

        Ok(Self::new(transactions, outputs, labels))
    }
}

fn read_csv(path: PathBuf, fields: Vec<Field>) -> Result<DataFrame> {
    let schema = Schema::from_iter(fields);
    CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(Arc::new(schema)))
        .try_into_reader_with_file_path(Some(path.clone()))
        .with_context(|| format!("Failed to open {}", path.display()))?
        .finish()
        .with_context(|| format!("Failed to read {}", path.display()))
}

impl AddressSource for CsvDataSource {
    fn get_transactions(&self, address: &Address) -> Result<Option<Vec<AddressTransaction>>> {
        let rows = self
            .transactions
            .clone()
            .lazy()
            .filter(col("address").eq(lit(address.as_str())))
            .collect()?;

        if rows.height() == 0 {
            return Ok(None);
        }

        let col_txid = rows.column("txid")?.str()?;
        let col_sent = rows.column("amount_sent")?.f64()?;
        let col_received = rows.column("amount_received")?.f64()?;
        let col_time = rows.column("time")?.i64()?;

        let mut transactions = Vec::with_capacity(rows.height());
        for row in 0..rows.height() {
            transactions.push(AddressTransaction::new(
                col_txid
                    .get(row)
                    .with_context(|| format!("Failed to get txid for {} row {}", address, row))?,
                col_sent.get(row).unwrap_or(0.0),
                col_received.get(row).unwrap_or(0.0),
                col_time
                    .get(row)
                    .with_context(|| format!("Failed to get time for {} row {}", address, row))?,
            ));
        }

        Ok(Some(transactions))
    }

    fn get_label(&self, address: &Address) -> Result<Option<String>> {
        let Some(labels) = &self.labels else {
            return Ok(None);
        };

        let rows = labels
            .clone()
            .lazy()
            .filter(col("address").eq(lit(address.as_str())))
            .collect()?;

        let col_label = rows.column("label")?.str()?;
        Ok((0..rows.height())
            .filter_map(|row| col_label.get(row))
            .find(|label| !label.is_empty())
            .map(str::to_string))
    }
}

impl TransactionSource for CsvDataSource {
    fn get_outputs(&self, txid: &str) -> Result<Option<Vec<TxOutput>>> {
        let rows = self
            .outputs
            .clone()
            .lazy()
            .filter(col("txid").eq(lit(txid)))
            .collect()?;

        if rows.height() == 0 {
            return Ok(None);
        }

        let col_address = rows.column("address")?.str()?;
        let col_amount = rows.column("amount")?.f64()?;

        let mut outputs = Vec::with_capacity(rows.height());
        for row in 0..rows.height() {
            let Some(address) = col_address.get(row).filter(|a| !a.trim().is_empty()) else {
                continue;
            };
            outputs.push(TxOutput::new(
                Address::new(address)?,
                col_amount.get(row).unwrap_or(0.0),
            ));
        }

        Ok(Some(outputs))
    }
}
