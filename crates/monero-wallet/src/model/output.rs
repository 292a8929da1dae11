use serde::{Deserialize, Serialize};

/// An output owned by the wallet.
///
/// Appears in a transaction's `outputs` when received and in its `inputs`
/// when the transaction spends it. `tx_hash` names the owning transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputWallet {
    pub tx_hash: Option<String>,
    pub account_index: u32,
    pub subaddress_index: u32,
    pub amount: u64,
    pub key_image: Option<String>,
    /// Once `Some(true)` this never reverts within one wallet state.
    pub is_spent: Option<bool>,
    /// Position among the transaction's outputs.
    pub output_index: Option<u64>,
    /// Global index on chain.
    pub global_index: Option<u64>,
}

impl OutputWallet {
    pub fn new(account_index: u32, subaddress_index: u32, amount: u64) -> Self {
        Self {
            account_index,
            subaddress_index,
            amount,
            ..Default::default()
        }
    }

    pub fn with_key_image(mut self, key_image: &str) -> Self {
        self.key_image = Some(key_image.to_string());
        self
    }

    pub fn with_output_index(mut self, index: u64) -> Self {
        self.output_index = Some(index);
        self
    }

    pub fn is_spent(&self) -> bool {
        self.is_spent == Some(true)
    }

    /// Whether two observations can describe the same output.
    ///
    /// Key images decide when both sides have one. Otherwise the location
    /// and amount must agree and no known identifier may differ.
    pub fn same_output(&self, other: &OutputWallet) -> bool {
        if let (Some(a), Some(b)) = (&self.key_image, &other.key_image) {
            return a == b;
        }
        if self.account_index != other.account_index
            || self.subaddress_index != other.subaddress_index
            || self.amount != other.amount
        {
            return false;
        }
        compatible(&self.output_index, &other.output_index)
            && compatible(&self.global_index, &other.global_index)
    }
}

fn compatible<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}
