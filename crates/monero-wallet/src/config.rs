//! Wallet and sync configuration.
//!
//! Both structs deserialize from JSON with every field optional, falling back
//! to [`Default`].

use crate::error::WalletError;
use monero_rpc::RpcConnection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Stagenet,
}

/// Sync engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Background sync period in milliseconds.
    pub period_ms: u64,
    /// Retry attempts for a block fetch that failed to reach the node.
    pub retries: u32,
    /// Initial delay between retries in milliseconds (doubles each attempt).
    pub retry_delay_ms: u64,
    /// Confirmations before a received output is spendable.
    pub unlock_confirmations: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period_ms: 10_000,
            retries: 2,
            retry_delay_ms: 500,
            unlock_confirmations: 10,
        }
    }
}

impl SyncConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// First height to scan on a fresh wallet.
    pub restore_height: u64,
    /// Node to connect to on open.
    pub daemon: Option<RpcConnection>,
    /// Request timeout for the node connection in milliseconds. 0 keeps the
    /// transport default.
    pub rpc_timeout_ms: u64,
    pub sync: SyncConfig,
}

impl WalletConfig {
    /// Parse a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, WalletError> {
        let config: WalletConfig =
            serde_json::from_str(json).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.sync.period_ms == 0 {
            return Err(WalletError::Config("sync.period_ms must be positive".into()));
        }
        if let Some(daemon) = &self.daemon {
            RpcConnection::with_credentials(daemon.uri(), daemon.username(), daemon.password())
                .map_err(|e| WalletError::Config(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.network, Network::Stagenet);
        assert_eq!(config.restore_height, 0);
        assert!(config.daemon.is_none());
        assert_eq!(config.sync.unlock_confirmations, 10);
        assert_eq!(config.sync.period(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_json_partial() {
        let config = WalletConfig::from_json_str(
            r#"{
                "network": "testnet",
                "restore_height": 1500,
                "daemon": { "uri": "http://localhost:28081", "username": "u", "password": "p" },
                "sync": { "period_ms": 250 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.restore_height, 1500);
        let daemon = config.daemon.unwrap();
        assert_eq!(daemon.uri(), "http://localhost:28081");
        assert_eq!(daemon.username(), Some("u"));
        assert_eq!(config.sync.period_ms, 250);
        assert_eq!(config.sync.retries, 2);
    }

    #[test]
    fn test_from_json_rejects_zero_period() {
        let err = WalletConfig::from_json_str(r#"{ "sync": { "period_ms": 0 } }"#).unwrap_err();
        assert!(matches!(err, WalletError::Config(_)));
    }

    #[test]
    fn test_from_json_rejects_half_credentials() {
        let err = WalletConfig::from_json_str(
            r#"{ "daemon": { "uri": "http://localhost:28081", "username": "u" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::Config(_)));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(WalletConfig::from_json_str("not json").is_err());
    }
}
