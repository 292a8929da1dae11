//! Boundary to the cryptographic wallet core.
//!
//! Key handling, output scanning, address derivation, transaction building
//! and signing all happen behind [`WalletCore`]. The wallet layer only feeds
//! it node data and wallet state, then reconciles what comes back.

use crate::error::WalletError;
use crate::model::{OutputWallet, TxConfig, TxSet, TxWallet};
use monero_rpc::daemon::{TransactionEntry, TxPoolEntry};

/// Block being scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: u64,
    pub miner_tx_hash: String,
}

/// What the orchestrator asks the core to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructionKind {
    /// Pay the config's destinations.
    Transfer,
    /// Move all of `inputs` to the config's single destination.
    Sweep {
        account_index: u32,
        subaddress_indices: Vec<u32>,
    },
    /// Move one output, named by the config's key image.
    SweepOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructionRequest {
    pub kind: ConstructionKind,
    /// Config with relaying suppressed. The core never relays.
    pub config: TxConfig,
    /// Unlocked, unspent outputs in scope that the core may spend.
    pub inputs: Vec<OutputWallet>,
    /// Wallet sync height at the time of the request.
    pub height: u64,
}

pub trait WalletCore: Send + Sync {
    /// Address of `(account_index, subaddress_index)`.
    fn derive_address(&self, account_index: u32, subaddress_index: u32) -> Result<String, WalletError>;

    /// Wallet-relevant fragments of a block's transactions. Fragments carry
    /// received outputs and, for spends, the wallet outputs consumed as
    /// `inputs` with their key images.
    fn scan_block(
        &self,
        block: &BlockContext,
        txs: &[TransactionEntry],
    ) -> Result<Vec<TxWallet>, WalletError>;

    /// Wallet-relevant fragments of pool transactions.
    fn scan_pool(&self, txs: &[TxPoolEntry]) -> Result<Vec<TxWallet>, WalletError>;

    /// Build transactions. Each returned tx must carry `full_hex` so it can
    /// be relayed.
    fn construct(&self, request: &ConstructionRequest) -> Result<Vec<TxSet>, WalletError>;

    /// Sign an unsigned transaction set, returning the signed hex.
    fn sign(&self, unsigned_tx_hex: &str) -> Result<String, WalletError>;
}
