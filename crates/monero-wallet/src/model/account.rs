//! Account and subaddress views.
//!
//! These are snapshots computed from wallet state. Balances are derived from
//! outputs, never stored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub index: u32,
    pub primary_address: String,
    pub balance: u64,
    pub unlocked_balance: u64,
    pub tag: Option<String>,
    pub label: Option<String>,
    /// Populated only when requested.
    pub subaddresses: Option<Vec<Subaddress>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subaddress {
    pub account_index: u32,
    pub index: u32,
    pub address: String,
    pub label: Option<String>,
    pub balance: u64,
    pub unlocked_balance: u64,
    pub num_unspent_outputs: u64,
    /// Blocks until every balance output of this subaddress unlocks.
    pub num_blocks_to_unlock: u64,
    pub is_used: bool,
}
