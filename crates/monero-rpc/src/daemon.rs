//! Daemon RPC client.
//!
//! Typed async methods for the daemon endpoints a wallet needs: chain height,
//! blocks, transactions, the transaction pool and relaying.

use crate::client::{RpcClient, RpcConfig};
use crate::connection::RpcConnection;
use crate::error::RpcError;
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Code used when a bare-path endpoint answers with a non-OK `status`.
pub const STATUS_ERROR_CODE: i64 = -1;

// =============================================================================
// Response Types
// =============================================================================

/// Block header from RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub major_version: u8,
    #[serde(default)]
    pub minor_version: u8,
    #[serde(default)]
    pub nonce: u32,
    #[serde(default)]
    pub orphan_status: bool,
    #[serde(default)]
    pub depth: u64,
    #[serde(default)]
    pub reward: u64,
    #[serde(default)]
    pub num_txes: u64,
    #[serde(default)]
    pub miner_tx_hash: Option<String>,
    /// Catch-all for additional fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Full block response from `get_block`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResult {
    #[serde(default)]
    pub blob: String,
    pub block_header: BlockHeader,
    #[serde(default)]
    pub miner_tx_hash: String,
    #[serde(default)]
    pub tx_hashes: Vec<String>,
    #[serde(default)]
    pub json: String,
    #[serde(default)]
    pub status: String,
}

/// Transaction entry from `/get_transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEntry {
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub as_hex: String,
    #[serde(default)]
    pub as_json: Option<String>,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub block_timestamp: u64,
    #[serde(default)]
    pub in_pool: bool,
    #[serde(default)]
    pub double_spend_seen: bool,
    #[serde(default)]
    pub output_indices: Vec<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Transaction pool entry from `/get_transaction_pool`.
#[derive(Debug, Clone, Deserialize)]
pub struct TxPoolEntry {
    #[serde(default)]
    pub id_hash: String,
    #[serde(default)]
    pub tx_json: String,
    #[serde(default)]
    pub tx_blob: String,
    #[serde(default)]
    pub blob_size: u64,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub kept_by_block: bool,
    #[serde(default)]
    pub receive_time: u64,
    #[serde(default)]
    pub relayed: bool,
    #[serde(default)]
    pub do_not_relay: bool,
    #[serde(default)]
    pub double_spend_seen: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Send raw transaction response.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRawTxResult {
    pub status: String,
    #[serde(default)]
    pub double_spend: bool,
    #[serde(default)]
    pub fee_too_low: bool,
    #[serde(default)]
    pub invalid_input: bool,
    #[serde(default)]
    pub invalid_output: bool,
    #[serde(default)]
    pub too_big: bool,
    #[serde(default)]
    pub overspend: bool,
    #[serde(default)]
    pub not_relayed: bool,
    #[serde(default)]
    pub sanity_check_failed: bool,
    #[serde(default)]
    pub reason: String,
}

impl SendRawTxResult {
    /// Human readable rejection reason, `None` when accepted.
    pub fn failure_reason(&self) -> Option<String> {
        if self.status == "OK" {
            return None;
        }
        let flags = [
            (self.double_spend, "double spend"),
            (self.fee_too_low, "fee too low"),
            (self.invalid_input, "invalid input"),
            (self.invalid_output, "invalid output"),
            (self.too_big, "too big"),
            (self.overspend, "overspend"),
            (self.sanity_check_failed, "sanity check failed"),
        ];
        let mut parts: Vec<&str> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        if !self.reason.is_empty() {
            parts.push(&self.reason);
        }
        if parts.is_empty() {
            Some(self.status.clone())
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Response from `get_version` JSON-RPC method.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub version: u32,
    #[serde(default)]
    pub release: bool,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// =============================================================================
// DaemonRpc
// =============================================================================

/// Async RPC client for the daemon.
///
/// Cloning shares the underlying transport. Two clients are equal when they
/// point at the same node with the same credentials.
#[derive(Clone)]
pub struct DaemonRpc {
    transport: Arc<dyn Transport>,
}

impl DaemonRpc {
    /// Create a daemon client over HTTP for the given connection.
    pub fn new(connection: RpcConnection) -> Result<Self, RpcError> {
        Ok(Self::from_transport(Arc::new(RpcClient::new(connection)?)))
    }

    /// Create with full configuration.
    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self::from_transport(Arc::new(RpcClient::with_config(config)?)))
    }

    /// Wrap an existing transport.
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Get the underlying transport for custom calls.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn connection(&self) -> &RpcConnection {
        self.transport.connection()
    }

    async fn call_path_checked(&self, path: &str, params: Value) -> Result<Value, RpcError> {
        let val = self.transport.call_path(path, Some(params.clone())).await?;
        check_status(path, &val, params)?;
        Ok(val)
    }

    // =========================================================================
    // Network Information
    // =========================================================================

    /// Get current blockchain height (number of blocks).
    pub async fn get_height(&self) -> Result<u64, RpcError> {
        let val = self.call_path_checked("/get_height", json!({})).await?;
        val.get("height")
            .and_then(|v| v.as_u64())
            .ok_or(RpcError::NoResult { context: "get_height".into() })
    }

    /// Get daemon version information.
    pub async fn get_version(&self) -> Result<VersionInfo, RpcError> {
        let val = self.transport.call("get_version", None).await?;
        Ok(serde_json::from_value(val)?)
    }

    // =========================================================================
    // Block Operations
    // =========================================================================

    /// Get a full block by height (header + miner tx hash + tx hashes).
    pub async fn get_block(&self, height: u64) -> Result<BlockResult, RpcError> {
        let val = self
            .transport
            .call("get_block", Some(json!({ "height": height })))
            .await?;
        Ok(serde_json::from_value(val)?)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get transactions by hash. Hashes the node does not know are skipped.
    pub async fn get_transactions(
        &self,
        tx_hashes: &[String],
        decode_as_json: bool,
    ) -> Result<Vec<TransactionEntry>, RpcError> {
        if tx_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let val = self
            .call_path_checked(
                "/get_transactions",
                json!({
                    "txs_hashes": tx_hashes,
                    "decode_as_json": decode_as_json,
                }),
            )
            .await?;
        match val.get("txs") {
            Some(txs) => Ok(serde_json::from_value(txs.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Get the full transaction pool.
    pub async fn get_transaction_pool(&self) -> Result<Vec<TxPoolEntry>, RpcError> {
        let val = self.call_path_checked("/get_transaction_pool", json!({})).await?;
        match val.get("transactions") {
            Some(txs) => Ok(serde_json::from_value(txs.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Submit a raw transaction. A rejection by the node is an RPC error.
    pub async fn send_raw_transaction(
        &self,
        tx_as_hex: &str,
        do_not_relay: bool,
    ) -> Result<SendRawTxResult, RpcError> {
        let params = json!({
            "tx_as_hex": tx_as_hex,
            "do_not_relay": do_not_relay,
        });
        let val = self
            .transport
            .call_path("/send_raw_transaction", Some(params.clone()))
            .await?;
        let result: SendRawTxResult = serde_json::from_value(val)?;
        if let Some(reason) = result.failure_reason() {
            return Err(RpcError::Rpc {
                code: STATUS_ERROR_CODE,
                message: reason,
                method: "send_raw_transaction".into(),
                params: Some(params),
            });
        }
        Ok(result)
    }

}

impl PartialEq for DaemonRpc {
    fn eq(&self, other: &Self) -> bool {
        self.connection() == other.connection()
    }
}

impl std::fmt::Debug for DaemonRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonRpc")
            .field("connection", self.connection())
            .finish()
    }
}

fn check_status(path: &str, val: &Value, params: Value) -> Result<(), RpcError> {
    match val.get("status").and_then(|s| s.as_str()) {
        None | Some("OK") => Ok(()),
        Some(status) => Err(RpcError::Rpc {
            code: STATUS_ERROR_CODE,
            message: status.to_string(),
            method: path.trim_start_matches('/').to_string(),
            params: Some(params),
        }),
    }
}
