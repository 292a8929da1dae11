//! The seam between the wallet and a node.
//!
//! Implementations issue calls and translate failures into [`RpcError`]; they
//! never interpret what a response means and never retry.

use crate::connection::RpcConnection;
use crate::error::RpcError;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Endpoint and credentials this transport talks to.
    fn connection(&self) -> &RpcConnection;

    /// JSON-RPC 2.0 method call (POST to `/json_rpc`). Returns `result`.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError>;

    /// Plain JSON POST to a bare path such as `/get_height`.
    async fn call_path(&self, path: &str, params: Option<Value>) -> Result<Value, RpcError>;

    /// POST `params` in portable storage encoding to a `.bin` path and return
    /// the raw response bytes.
    async fn call_binary(&self, path: &str, params: &Value) -> Result<Vec<u8>, RpcError>;
}
