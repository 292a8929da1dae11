//! HTTP transport over reqwest.
//!
//! `call()` posts JSON-RPC 2.0 envelopes to `/json_rpc`, `call_path()` posts
//! plain JSON to bare endpoints and `call_binary()` posts portable storage
//! payloads to `.bin` endpoints. Supports Basic auth and a request timeout.
//! Retries are left to callers.

use crate::connection::RpcConnection;
use crate::error::RpcError;
use crate::portable_storage;
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Longest body excerpt carried by an HTTP status error.
const MAX_ERROR_BODY: usize = 500;

/// JSON-RPC 2.0 request envelope.
#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Configuration for an RPC client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Node endpoint and credentials.
    pub connection: RpcConnection,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connection: RpcConnection::new("http://localhost:18081"),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Async RPC client for a node's JSON-RPC and raw HTTP endpoints.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcConfig,
    request_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for the given connection with default settings.
    pub fn new(connection: RpcConnection) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig {
            connection,
            ..Default::default()
        })
    }

    /// Create a client with full configuration.
    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RpcError::connection(config.connection.uri(), e))?;

        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(0),
        })
    }

    /// Get the configured base URL.
    pub fn url(&self) -> &str {
        self.config.connection.uri()
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn build_headers(&self, content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if let Some(auth) = self
            .config
            .connection
            .basic_auth()
            .and_then(|a| HeaderValue::from_str(&a).ok())
        {
            headers.insert(AUTHORIZATION, auth);
        }
        headers
    }

    async fn send(
        &self,
        url: &str,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RpcError> {
        let resp = request
            .send()
            .await
            .map_err(|e| RpcError::connection(url, e))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            log::debug!("{} {} -> HTTP {}", method, url, status);
            return Err(RpcError::HttpStatus {
                method: method.to_string(),
                url: url.to_string(),
                status,
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
        Ok(resp)
    }

    async fn read_json(url: &str, resp: reqwest::Response) -> Result<Value, RpcError> {
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RpcError::connection(url, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Transport for RpcClient {
    fn connection(&self) -> &RpcConnection {
        &self.config.connection
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let url = self.config.connection.url_for("/json_rpc");
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method,
            params: params.as_ref(),
        };

        let request = self
            .client
            .post(&url)
            .headers(self.build_headers("application/json"))
            .json(&req);
        let resp = self.send(&url, method, request).await?;
        let body: JsonRpcResponse = serde_json::from_value(Self::read_json(&url, resp).await?)?;

        if let Some(err) = body.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
                method: method.to_string(),
                params,
            });
        }

        body.result.ok_or(RpcError::NoResult {
            context: method.to_string(),
        })
    }

    async fn call_path(&self, path: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let url = self.config.connection.url_for(path);
        let body = params.unwrap_or_else(|| Value::Object(Default::default()));
        let request = self
            .client
            .post(&url)
            .headers(self.build_headers("application/json"))
            .json(&body);
        let resp = self.send(&url, path, request).await?;
        Self::read_json(&url, resp).await
    }

    async fn call_binary(&self, path: &str, params: &Value) -> Result<Vec<u8>, RpcError> {
        let url = self.config.connection.url_for(path);
        let payload = portable_storage::encode_json(params)?;
        let request = self
            .client
            .post(&url)
            .headers(self.build_headers("application/octet-stream"))
            .body(payload);
        let resp = self.send(&url, path, request).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RpcError::connection(&url, e))?;
        Ok(bytes.to_vec())
    }
}

impl PartialEq for RpcClient {
    fn eq(&self, other: &Self) -> bool {
        self.config.connection == other.config.connection
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("connection", &self.config.connection)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RpcConfig::default();
        assert_eq!(config.connection.uri(), "http://localhost:18081");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_client_url() {
        let client = RpcClient::new(RpcConnection::new("http://example.com:18081/")).unwrap();
        assert_eq!(client.url(), "http://example.com:18081");
    }

    #[test]
    fn test_request_ids_increment() {
        let client = RpcClient::new(RpcConnection::new("http://localhost:18081")).unwrap();
        let id1 = client.next_id();
        let id2 = client.next_id();
        assert_eq!(id2, id1 + 1);
    }

    #[test]
    fn test_clients_equal_by_connection() {
        let a = RpcClient::new(RpcConnection::new("http://node:18081")).unwrap();
        let b = RpcClient::new(RpcConnection::new("http://node:18081/")).unwrap();
        let c = RpcClient::new(RpcConnection::new("http://other:18081")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_request_envelope_shape() {
        let params = serde_json::json!({ "height": 5 });
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "get_block",
            params: Some(&params),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["method"], "get_block");
        assert_eq!(v["params"]["height"], 5);

        let bare = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 8,
            method: "get_version",
            params: None,
        };
        assert!(serde_json::to_value(&bare).unwrap().get("params").is_none());
    }
}
