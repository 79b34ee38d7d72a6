use crate::{
    data_sources::{AddressSource, TransactionSource},
    types::{Address, AddressTransaction, TxOutput},
};
use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use serde::Deserialize;
use std::{fmt::Display, time::Duration};
use tokio::runtime::Runtime;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://www.walletexplorer.com/api/1";

/// Number of history entries requested per address.
const HISTORY_PAGE_SIZE: u32 = 1000;

/// WalletExplorerDataSource
///
/// Resolves Bitcoin addresses and transactions through the walletexplorer.com JSON API.
///
/// The traversal is synchronous, so the source owns a tokio runtime and blocks on each
/// request. Every request carries `timeout`; an expired request is an error, which a
/// `RetryingSource` can retry before the traverser gives up on it.
#[derive(Debug)]
pub struct WalletExplorerDataSource {
    runtime: Runtime,
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Display for WalletExplorerDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalletExplorerDataSource({})", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    txs: Vec<AddressTx>,
}

#[derive(Debug, Deserialize)]
struct AddressTx {
    txid: String,
    #[serde(default)]
    amount_sent: f64,
    #[serde(default)]
    amount_received: f64,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    out: Vec<OutputEntry>,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    amount: f64,
}

impl AddressResponse {
    fn into_transactions(self) -> Option<Vec<AddressTransaction>> {
        if !self.found {
            return None;
        }
        Some(
            self.txs
                .into_iter()
                .map(|tx| AddressTransaction::new(tx.txid, tx.amount_sent, tx.amount_received, tx.time))
                .collect(),
        )
    }
}

impl LabelResponse {
    fn into_label(self) -> Option<String> {
        self.label.filter(|label| !label.is_empty())
    }
}

impl TxResponse {
    fn into_outputs(self) -> Option<Vec<TxOutput>> {
        if !self.found {
            return None;
        }
        // Outputs without an address (e.g. OP_RETURN) cannot be followed.
        Some(
            self.out
                .into_iter()
                .filter_map(|output| {
                    let address = Address::new(output.address?).ok()?;
                    Some(TxOutput::new(address, output.amount))
                })
                .collect(),
        )
    }
}

impl WalletExplorerDataSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let runtime = Runtime::new().context("Failed to start tokio runtime")?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("txcrawl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            runtime,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// GET `{base_url}/{endpoint}` and decode the JSON body.
    ///
    /// Returns `Ok(None)` when the API says the resource does not exist. Throttling and
    /// server errors are returned as errors so they can be retried.
    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}/{}", self.base_url, endpoint);

        self.runtime.block_on(async {
            let response = self
                .client
                .get(&url)
                .query(query)
                .timeout(self.timeout)
                .send()
                .await
                .with_context(|| format!("Request to {} failed", url))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                bail!("{} returned {}", url, status);
            }
            if !status.is_success() {
                debug!("{} returned {}, treating as not found", url, status);
                return Ok(None);
            }

            let body = response
                .json::<T>()
                .await
                .with_context(|| format!("Failed to decode response from {}", url))?;
            Ok::<_, anyhow::Error>(Some(body))
        })
    }
}

impl AddressSource for WalletExplorerDataSource {
    fn get_transactions(&self, address: &Address) -> Result<Option<Vec<AddressTransaction>>> {
        let response: Option<AddressResponse> = self.get_json(
            "address",
            &[
                ("address", address.to_string()),
                ("from", "0".to_string()),
                ("count", HISTORY_PAGE_SIZE.to_string()),
            ],
        )?;
        Ok(response.and_then(AddressResponse::into_transactions))
    }

    fn get_label(&self, address: &Address) -> Result<Option<String>> {
        let response: Option<LabelResponse> =
            self.get_json("address-lookup", &[("address", address.to_string())])?;
        Ok(response.and_then(LabelResponse::into_label))
    }
}

impl TransactionSource for WalletExplorerDataSource {
    fn get_outputs(&self, txid: &str) -> Result<Option<Vec<TxOutput>>> {
        let response: Option<TxResponse> = self.get_json("tx", &[("txid", txid.to_string())])?;
        Ok(response.and_then(TxResponse::into_outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, thread, time::Instant};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    /// Starts a local API stand-in and returns its base URL. The first path segment
    /// picks the canned answer, so `{base}/missing/address` gets a 404.
    fn spawn_api() -> String {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let runtime = Runtime::new().unwrap();
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                loop {
                    let (stream, _) = listener.accept().await.unwrap();
                    tokio::spawn(answer(stream));
                }
            });
        });
        format!("http://{}", rx.recv().unwrap())
    }

    async fn answer(mut stream: TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let request = String::from_utf8_lossy(&request);
        let path = request.split_whitespace().nth(1).unwrap_or("/");
        let scenario = path.trim_start_matches('/').split('/').next().unwrap_or_default();
        let (status, body) = match scenario {
            "ok" => (
                "200 OK",
                r#"{"found": true, "txs": [{"txid": "aa", "amount_sent": 0.5, "time": 1501800000}]}"#,
            ),
            "garbled" => ("200 OK", "<html>down for maintenance</html>"),
            "forbidden" => ("403 Forbidden", ""),
            "throttled" => ("429 Too Many Requests", ""),
            "broken" => ("500 Internal Server Error", ""),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                ("200 OK", r#"{"found": false}"#)
            }
            _ => ("404 Not Found", ""),
        };

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    fn source_at(base: &str, scenario: &str) -> WalletExplorerDataSource {
        WalletExplorerDataSource::new(format!("{base}/{scenario}"), Duration::from_millis(300))
            .unwrap()
    }

    #[test]
    fn client_errors_are_not_found() {
        let base = spawn_api();
        let address = Address::new("1A").unwrap();

        assert!(source_at(&base, "missing").get_transactions(&address).unwrap().is_none());
        assert!(source_at(&base, "missing").get_outputs("aa").unwrap().is_none());
        assert!(source_at(&base, "forbidden").get_label(&address).unwrap().is_none());

        let txs = source_at(&base, "ok").get_transactions(&address).unwrap().unwrap();
        assert_eq!(txs[0].txid, "aa");
    }

    #[test]
    fn throttling_and_server_errors_are_errors() {
        let base = spawn_api();
        let address = Address::new("1A").unwrap();

        let err = source_at(&base, "throttled").get_transactions(&address).unwrap_err();
        assert!(err.to_string().contains("429"), "{err:#}");
        let err = source_at(&base, "broken").get_outputs("aa").unwrap_err();
        assert!(err.to_string().contains("500"), "{err:#}");
    }

    #[test]
    fn undecodable_body_is_an_error() {
        let base = spawn_api();
        let err = source_at(&base, "garbled")
            .get_transactions(&Address::new("1A").unwrap())
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to decode"), "{err:#}");
    }

    #[test]
    fn expired_request_is_an_error() {
        let base = spawn_api();
        let started = Instant::now();
        let result = source_at(&base, "slow").get_label(&Address::new("1A").unwrap());
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn address_response_keeps_history_order() {
        let body = r#"{
            "found": true,
            "label": "ignored",
            "txs": [
                {"txid": "aa", "amount_sent": 0.5, "amount_received": 0.0, "time": 1501800000},
                {"txid": "bb", "amount_received": 2.0, "time": 1501800500}
            ]
        }"#;
        let parsed: AddressResponse = serde_json::from_str(body).unwrap();
        let txs = parsed.into_transactions().unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].txid, "aa");
        assert_eq!(txs[1].amount_sent, 0.0);
        assert_eq!(txs[1].net_amount(), -2.0);
    }

    #[test]
    fn unknown_address_is_not_found() {
        let parsed: AddressResponse = serde_json::from_str(r#"{"found": false}"#).unwrap();
        assert!(parsed.into_transactions().is_none());
    }

    #[test]
    fn label_lookup_without_label() {
        let parsed: LabelResponse = serde_json::from_str(r#"{"found": true}"#).unwrap();
        assert!(parsed.into_label().is_none());

        let parsed: LabelResponse =
            serde_json::from_str(r#"{"found": true, "label": "Bitstamp.net"}"#).unwrap();
        assert_eq!(parsed.into_label().as_deref(), Some("Bitstamp.net"));
    }

    #[test]
    fn tx_outputs_skip_entries_without_address() {
        let body = r#"{
            "found": true,
            "out": [
                {"address": "1A", "amount": 0.3},
                {"amount": 0.0},
                {"address": "1B", "amount": 0.1},
                {"address": "1A", "amount": 0.1}
            ]
        }"#;
        let parsed: TxResponse = serde_json::from_str(body).unwrap();
        let outputs = parsed.into_outputs().unwrap();
        let outputs: Vec<(&str, f64)> = outputs
            .iter()
            .map(|o| (o.address.as_str(), o.amount))
            .collect();
        assert_eq!(outputs, vec![("1A", 0.3), ("1B", 0.1), ("1A", 0.1)]);
    }
}
