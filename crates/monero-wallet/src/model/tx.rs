use crate::model::output::OutputWallet;
use crate::model::transfer::Transfer;
use crate::model::tx_set::TxSetId;
use serde::{Deserialize, Serialize};

/// Length of a transaction hash in hex characters.
pub const TX_HASH_HEX_LEN: usize = 64;

/// A transaction as seen by the wallet.
///
/// Every field except `hash` is optional because fragments arrive from
/// different sources with different knowledge. Fragments for the same hash
/// are combined by [`crate::reconcile::merge_tx`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxWallet {
    pub hash: String,
    pub height: Option<u64>,
    pub block_hash: Option<String>,
    pub timestamp: Option<u64>,
    pub is_confirmed: Option<bool>,
    pub in_pool: Option<bool>,
    pub is_failed: Option<bool>,
    pub is_relayed: Option<bool>,
    pub is_double_spend_seen: Option<bool>,
    pub do_not_relay: Option<bool>,
    pub fee: Option<u64>,
    pub unlock_time: Option<u64>,
    pub payment_id: Option<String>,
    pub note: Option<String>,
    pub full_hex: Option<String>,
    pub metadata: Option<String>,
    pub key: Option<String>,
    /// Filled in on read from the wallet's sync height.
    pub num_confirmations: Option<u64>,
    pub transfers: Vec<Transfer>,
    /// Wallet outputs this transaction spends.
    pub inputs: Vec<OutputWallet>,
    /// Wallet outputs this transaction creates.
    pub outputs: Vec<OutputWallet>,
    pub tx_set: Option<TxSetId>,
}

impl TxWallet {
    pub fn new(hash: &str) -> Self {
        Self {
            hash: hash.to_string(),
            ..Default::default()
        }
    }

    /// Mark as included in a block.
    pub fn confirmed_at(mut self, height: u64, block_hash: &str, timestamp: u64) -> Self {
        self.height = Some(height);
        self.block_hash = Some(block_hash.to_string());
        self.timestamp = Some(timestamp);
        self.is_confirmed = Some(true);
        self.in_pool = Some(false);
        self.is_failed = Some(false);
        self
    }

    /// Mark as seen in the pool only.
    pub fn pooled(mut self) -> Self {
        self.is_confirmed = Some(false);
        self.in_pool = Some(true);
        self.is_failed = Some(false);
        self
    }

    pub fn with_transfer(mut self, transfer: Transfer) -> Self {
        self.transfers.push(transfer);
        self
    }

    pub fn with_input(mut self, input: OutputWallet) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: OutputWallet) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.is_confirmed == Some(true)
    }

    pub fn in_pool(&self) -> bool {
        self.in_pool == Some(true)
    }

    pub fn is_failed(&self) -> bool {
        self.is_failed == Some(true)
    }

    pub fn is_relayed(&self) -> bool {
        self.is_relayed == Some(true)
    }

    pub fn is_incoming(&self) -> bool {
        self.transfers.iter().any(Transfer::is_incoming)
    }

    pub fn is_outgoing(&self) -> bool {
        self.transfers.iter().any(Transfer::is_outgoing)
    }

    pub fn incoming_amount(&self) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.is_incoming())
            .map(|t| t.amount)
            .sum()
    }

    pub fn outgoing_amount(&self) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.is_outgoing())
            .map(|t| t.amount)
            .sum()
    }

    /// Whether the hash is a well-formed 32-byte hex digest.
    pub fn has_valid_hash(&self) -> bool {
        self.hash.len() == TX_HASH_HEX_LEN && hex::decode(&self.hash).is_ok()
    }

    /// Point owned transfers and outputs back at this transaction.
    pub fn link_children(&mut self) {
        let hash = Some(self.hash.clone());
        for t in &mut self.transfers {
            t.tx_hash = hash.clone();
        }
        for o in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            o.tx_hash = hash.clone();
        }
    }

    /// Whether outputs created by this tx are spendable at `chain_height`.
    ///
    /// `chain_height` is the number of blocks processed. Without an explicit
    /// unlock time an output needs `confirmations` blocks on top of its own.
    pub fn is_unlocked(&self, chain_height: u64, confirmations: u64) -> bool {
        let Some(height) = self.height.filter(|_| self.is_confirmed()) else {
            return false;
        };
        if chain_height < height + confirmations {
            return false;
        }
        let unlock_time = self.unlock_time.unwrap_or(0);
        if unlock_time == 0 {
            return true;
        }

        // Unlock time < 500_000_000 is a block height, otherwise a Unix
        // timestamp.
        if unlock_time < 500_000_000 {
            chain_height >= unlock_time
        } else {
            // Approximate the chain clock at 120s per block.
            let now = self.timestamp.unwrap_or(0) + (chain_height - height) * 120;
            now >= unlock_time
        }
    }

    /// Blocks remaining until [`Self::is_unlocked`] holds, 0 if unlocked.
    pub fn blocks_to_unlock(&self, chain_height: u64, confirmations: u64) -> u64 {
        let Some(height) = self.height.filter(|_| self.is_confirmed()) else {
            return confirmations;
        };
        let mut target = height + confirmations;
        if let Some(unlock_time) = self.unlock_time.filter(|t| *t > 0) {
            if unlock_time < 500_000_000 {
                target = target.max(unlock_time);
            } else {
                let base = self.timestamp.unwrap_or(0);
                let blocks = unlock_time.saturating_sub(base).div_ceil(120);
                target = target.max(height + blocks);
            }
        }
        target.saturating_sub(chain_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> String {
        hex::encode([n; 32])
    }

    #[test]
    fn test_ten_confirmation_rule() {
        let tx = TxWallet::new(&hash(1)).confirmed_at(100, "b", 0);
        assert!(!tx.is_unlocked(109, 10));
        assert!(tx.is_unlocked(110, 10));
        assert_eq!(tx.blocks_to_unlock(105, 10), 5);
        assert_eq!(tx.blocks_to_unlock(200, 10), 0);
    }

    #[test]
    fn test_unlock_time_as_height() {
        let mut tx = TxWallet::new(&hash(1)).confirmed_at(100, "b", 0);
        tx.unlock_time = Some(150);
        assert!(!tx.is_unlocked(120, 10));
        assert!(tx.is_unlocked(150, 10));
        assert_eq!(tx.blocks_to_unlock(120, 10), 30);
    }

    #[test]
    fn test_unlock_time_as_timestamp() {
        let mut tx = TxWallet::new(&hash(1)).confirmed_at(100, "b", 1_600_000_000);
        tx.unlock_time = Some(1_600_000_000 + 120 * 20);
        assert!(!tx.is_unlocked(119, 10));
        assert!(tx.is_unlocked(120, 10));
    }

    #[test]
    fn test_unconfirmed_is_locked() {
        let tx = TxWallet::new(&hash(1)).pooled();
        assert!(!tx.is_unlocked(1_000_000, 10));
    }

    #[test]
    fn test_hash_validation() {
        assert!(TxWallet::new(&hash(7)).has_valid_hash());
        assert!(!TxWallet::new("abc").has_valid_hash());
        assert!(!TxWallet::new(&"zz".repeat(32)).has_valid_hash());
    }

    #[test]
    fn test_link_children() {
        let mut tx = TxWallet::new(&hash(3))
            .with_transfer(Transfer::incoming(0, 1, 5))
            .with_output(OutputWallet::new(0, 1, 5));
        tx.link_children();
        assert_eq!(tx.transfers[0].tx_hash.as_deref(), Some(hash(3).as_str()));
        assert_eq!(tx.outputs[0].tx_hash.as_deref(), Some(hash(3).as_str()));
    }
}
