use crate::error::CrawlError;
use petgraph::{Directed, graph::Graph};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

///
/// Address
///
/// An opaque address identifier. Surrounding whitespace is stripped and the rest must
/// be non-empty; whether the address exists is up to the data source.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Result<Self, CrawlError> {
        let address = address.into();
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(CrawlError::InvalidConfig(
                "address must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::new(s)
    }
}

impl TryFrom<String> for Address {
    type Error = CrawlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::new(value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

///
/// AddressTransaction
///
/// One entry of an address's transaction history, as reported by the data source.
///
/// `amount_sent` and `amount_received` are both from the point of view of the
/// address whose history this is. `time` is in Unix seconds (UTC).
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddressTransaction {
    pub txid: String,
    pub amount_sent: f64,
    pub amount_received: f64,
    pub time: i64,
}

impl AddressTransaction {
    pub fn new(txid: impl Into<String>, amount_sent: f64, amount_received: f64, time: i64) -> Self {
        Self {
            txid: txid.into(),
            amount_sent,
            amount_received,
            time,
        }
    }

    /// Net outflow; negative for a net inflow.
    pub fn net_amount(&self) -> f64 {
        self.amount_sent - self.amount_received
    }
}

///
/// TxOutput
///
/// One output of a transaction: the receiving address and the amount it received.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: f64,
}

impl TxOutput {
    pub fn new(address: Address, amount: f64) -> Self {
        Self { address, amount }
    }
}

///
/// CrawlEdge
///
/// The persisted record of one qualifying transaction: funds leaving
/// `from_address` towards `outgoing_addresses`.
///
/// `outgoing_amounts[i]` is what `outgoing_addresses[i]` received. Records written
/// without amounts read back with an empty list.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrawlEdge {
    pub from_address: Address,
    pub txid: String,
    pub amount_sent: f64,
    pub net_amount: f64,
    pub time: i64,
    pub depth: usize,
    pub outgoing_addresses: Vec<Address>,
    #[serde(default)]
    pub outgoing_amounts: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CrawlEdge {
    pub fn new(
        from_address: Address,
        tx: &AddressTransaction,
        outputs: Vec<TxOutput>,
        label: Option<String>,
        depth: usize,
    ) -> Self {
        let (outgoing_addresses, outgoing_amounts) = outputs
            .into_iter()
            .map(|output| (output.address, output.amount))
            .unzip();
        Self {
            from_address,
            txid: tx.txid.clone(),
            amount_sent: tx.amount_sent,
            net_amount: tx.net_amount(),
            time: tx.time,
            depth,
            outgoing_addresses,
            outgoing_amounts,
            label,
        }
    }

    /// Each output leg with the amount it received; 0.0 where no amount was recorded.
    pub fn legs(&self) -> impl Iterator<Item = (&Address, f64)> {
        self.outgoing_addresses
            .iter()
            .enumerate()
            .map(move |(i, address)| {
                (address, self.outgoing_amounts.get(i).copied().unwrap_or(0.0))
            })
    }
}

impl Display for CrawlEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CrawlEdge {{ from: {}, txid: {}, net_amount: {}, time: {}, outputs: {}, label: {} }}",
            self.from_address,
            self.txid,
            self.net_amount,
            self.time,
            self.outgoing_addresses.len(),
            self.label.as_deref().unwrap_or("-")
        )
    }
}

///
/// TransferGraph
///
/// The graph is a directed graph where the nodes are addresses and the edges are
/// single (from, output) legs of a crawled transaction. See `TransferEdge`.
pub type TransferGraph = Graph<Address, TransferEdge, Directed>;

///
/// TransferEdge
///
/// One leg of a `CrawlEdge`. A transaction with three outputs becomes three
/// `TransferEdge`s sharing the same `txid`, each carrying its own output amount.
///
#[derive(Clone, Debug, PartialEq)]
pub struct TransferEdge {
    pub txid: String,
    pub amount: f64,
    pub time: i64,
}

impl Display for TransferEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TransferEdge {{ txid: {}, amount: {}, time: {} }}",
            self.txid, self.amount, self.time
        )
    }
}
