//! Wallet error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    /// Transport or node failure, passed through unchanged.
    #[error("RPC error: {0}")]
    Rpc(#[from] monero_rpc::RpcError),

    #[error("Wallet is not connected to daemon")]
    NotConnected,

    #[error("merge conflict on field `{field}`")]
    MergeConflict { field: &'static str },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("Wallet is closed")]
    ClosedResource,

    #[error("wallet core error: {0}")]
    Core(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        WalletError::InvalidConfig(msg.into())
    }

    /// Whether the underlying cause is an unreachable node.
    pub fn is_connection(&self) -> bool {
        matches!(self, WalletError::Rpc(e) if e.is_connection())
    }
}

impl<T> From<std::sync::PoisonError<T>> for WalletError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        WalletError::Internal(format!("lock poisoned: {}", e))
    }
}
