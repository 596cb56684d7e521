// src/rpc.rs
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ContributionError;
use crate::ledger::LedgerClient;
use crate::models::{BlockWindow, ParticipantAddress, TransferRecord};
use crate::parser;

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,

    #[serde(rename = "blockNumber")]
    pub block_number_hex: String,

    #[serde(rename = "transactionHash")]
    pub tx_hash: String,

    /// Set by the node when the log was dropped in a reorg.
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    Success { result: T },
    Error { error: RpcError },
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// ERC20 Transfer event topic keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

const BLOCK_NUMBER_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Ledger client speaking Ethereum JSON-RPC over HTTP, scoped to one token contract.
pub struct JsonRpcLedger {
    client: Client,
    rpc_url: String,
    token_address: ParticipantAddress,
    log_chunk_blocks: Option<u64>,
}

impl JsonRpcLedger {
    pub fn new(
        rpc_url: &str,
        token_address: ParticipantAddress,
        timeout: Duration,
        log_chunk_blocks: Option<u64>,
    ) -> Result<Self, ContributionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            token_address,
            log_chunk_blocks,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ContributionError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let resp = self.client.post(&self.rpc_url).json(&payload).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(ContributionError::UpstreamUnavailable(format!(
                "{} returned HTTP {}",
                method,
                resp.status()
            )));
        }
        let text = resp.text().await?;
        debug!("📩 Raw {} response: {}", method, text);

        let parsed: RpcResponse<T> = serde_json::from_str(&text).map_err(|e| {
            ContributionError::UpstreamUnavailable(format!("undecodable {} response: {}", method, e))
        })?;
        match parsed {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => Err(ContributionError::UpstreamUnavailable(format!(
                "{} error {}: {}",
                method, error.code, error.message
            ))),
        }
    }

    async fn get_transfer_logs(
        &self,
        from_block: u64,
        to_block: u64,
        sender: &ParticipantAddress,
        recipient: &ParticipantAddress,
    ) -> Result<Vec<Log>, ContributionError> {
        info!(
            "📡 Sending eth_getLogs → {} (range {} → {}, {} → {})",
            self.rpc_url, from_block, to_block, sender, recipient
        );

        let raw: Vec<Value> = self
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{:x}", from_block),
                    "toBlock": format!("0x{:x}", to_block),
                    "address": self.token_address.to_string(),
                    "topics": [TRANSFER_TOPIC, sender.as_topic(), recipient.as_topic()]
                }]),
            )
            .await?;

        // Decode entries one by one so a bad record is reported as such,
        // not as an unreadable response.
        raw.into_iter()
            .map(|v| {
                serde_json::from_value::<Log>(v)
                    .map_err(|e| ContributionError::MalformedRecord(format!("undecodable log: {}", e)))
            })
            .collect()
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    /// Latest block number, retried on transport errors.
    async fn block_number(&self) -> Result<u64, ContributionError> {
        let mut attempt = 1;
        loop {
            info!("📡 Sending eth_blockNumber → {}", self.rpc_url);
            match self.call::<String>("eth_blockNumber", json!([])).await {
                Ok(hex_height) => {
                    return u64::from_str_radix(hex_height.trim_start_matches("0x"), 16).map_err(
                        |e| {
                            ContributionError::UpstreamUnavailable(format!(
                                "bad block number {}: {}",
                                hex_height, e
                            ))
                        },
                    );
                }
                Err(e) if attempt < BLOCK_NUMBER_ATTEMPTS => {
                    warn!(
                        "⚠️ eth_blockNumber failed (attempt {}): {}. Retrying...",
                        attempt, e
                    );
                    attempt += 1;
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_transfers(
        &self,
        window: BlockWindow,
        sender: &ParticipantAddress,
        recipient: &ParticipantAddress,
    ) -> Result<Vec<TransferRecord>, ContributionError> {
        let mut records = Vec::new();

        for (from_block, to_block) in chunk_ranges(window, self.log_chunk_blocks) {
            let logs = self
                .get_transfer_logs(from_block, to_block, sender, recipient)
                .await?;

            for log in logs {
                if log.removed {
                    debug!("Skipping removed log {}", log.tx_hash);
                    continue;
                }
                let record = parser::decode_transfer(&log)?;
                if record.sender != *sender || record.recipient != *recipient {
                    warn!(
                        "Node returned non-matching transfer {} ({} → {}), ignoring",
                        record.tx_hash, record.sender, record.recipient
                    );
                    continue;
                }
                records.push(record);
            }
        }

        Ok(records)
    }
}

/// Split a window into inclusive sub-ranges of at most `chunk` blocks.
fn chunk_ranges(window: BlockWindow, chunk: Option<u64>) -> Vec<(u64, u64)> {
    let Some(size) = chunk.filter(|s| *s > 0) else {
        return vec![(window.from_block, window.to_block)];
    };

    let mut ranges = Vec::new();
    let mut start = window.from_block;
    loop {
        let end = start.saturating_add(size - 1).min(window.to_block);
        ranges.push((start, end));
        if end >= window.to_block {
            break;
        }
        start = end + 1;
    }
    ranges
}
