//! Send and sweep configuration.
//!
//! `TxConfig` is a value: every `with_*` call returns a new config, so a
//! config handed to the wallet can be reused by the caller unchanged.

use crate::error::WalletError;
use crate::model::transfer::Destination;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxPriority {
    #[default]
    Default,
    Unimportant,
    Normal,
    Elevated,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxConfig {
    destinations: Vec<Destination>,
    payment_id: Option<String>,
    priority: TxPriority,
    fee: Option<u64>,
    account_index: Option<u32>,
    subaddress_indices: Vec<u32>,
    unlock_time: Option<u64>,
    can_split: Option<bool>,
    do_not_relay: Option<bool>,
    note: Option<String>,
    recipient_name: Option<String>,
    below_amount: Option<u64>,
    sweep_each_subaddress: Option<bool>,
    key_image: Option<String>,
}

impl TxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config paying `amount` to `address` from account 0.
    pub fn to(address: &str, amount: u64) -> Self {
        Self::default()
            .with_account_index(0)
            .with_destination(Destination::new(address, amount))
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn priority(&self) -> TxPriority {
        self.priority
    }

    pub fn fee(&self) -> Option<u64> {
        self.fee
    }

    pub fn account_index(&self) -> Option<u32> {
        self.account_index
    }

    pub fn subaddress_indices(&self) -> &[u32] {
        &self.subaddress_indices
    }

    pub fn unlock_time(&self) -> Option<u64> {
        self.unlock_time
    }

    pub fn can_split(&self) -> Option<bool> {
        self.can_split
    }

    pub fn do_not_relay(&self) -> bool {
        self.do_not_relay == Some(true)
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn recipient_name(&self) -> Option<&str> {
        self.recipient_name.as_deref()
    }

    pub fn below_amount(&self) -> Option<u64> {
        self.below_amount
    }

    pub fn sweep_each_subaddress(&self) -> bool {
        self.sweep_each_subaddress == Some(true)
    }

    pub fn key_image(&self) -> Option<&str> {
        self.key_image.as_deref()
    }

    // ─── Derived configs ────────────────────────────────────────────────────

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn with_destinations(mut self, destinations: Vec<Destination>) -> Self {
        self.destinations = destinations;
        self
    }

    /// Replace destinations with a single sweep target.
    pub fn with_address(self, address: &str) -> Self {
        self.with_destinations(vec![Destination::sweep_to(address)])
    }

    pub fn with_payment_id(mut self, payment_id: &str) -> Self {
        self.payment_id = Some(payment_id.to_string());
        self
    }

    pub fn with_priority(mut self, priority: TxPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn with_account_index(mut self, account_index: u32) -> Self {
        self.account_index = Some(account_index);
        self
    }

    pub fn with_subaddress_indices(mut self, indices: Vec<u32>) -> Self {
        self.subaddress_indices = indices;
        self
    }

    pub fn with_unlock_time(mut self, unlock_time: u64) -> Self {
        self.unlock_time = Some(unlock_time);
        self
    }

    pub fn with_can_split(mut self, can_split: bool) -> Self {
        self.can_split = Some(can_split);
        self
    }

    pub fn with_do_not_relay(mut self, do_not_relay: bool) -> Self {
        self.do_not_relay = Some(do_not_relay);
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn with_recipient_name(mut self, name: &str) -> Self {
        self.recipient_name = Some(name.to_string());
        self
    }

    pub fn with_below_amount(mut self, amount: u64) -> Self {
        self.below_amount = Some(amount);
        self
    }

    pub fn with_sweep_each_subaddress(mut self, each: bool) -> Self {
        self.sweep_each_subaddress = Some(each);
        self
    }

    pub fn with_key_image(mut self, key_image: &str) -> Self {
        self.key_image = Some(key_image.to_string());
        self
    }

    // ─── Validation ─────────────────────────────────────────────────────────

    /// Checks shared by every send.
    pub fn validate_send(&self) -> Result<(), WalletError> {
        if self.destinations.is_empty() {
            return Err(WalletError::invalid("Must provide at least one destination"));
        }
        for dest in &self.destinations {
            if dest.address.is_empty() {
                return Err(WalletError::invalid("Destination address is empty"));
            }
            match dest.amount {
                Some(amount) if amount > 0 => {}
                _ => return Err(WalletError::invalid("Destination amount must be positive")),
            }
        }
        if self.key_image.is_some() {
            return Err(WalletError::invalid("Key image is only valid when sweeping an output"));
        }
        if self.below_amount.is_some() || self.sweep_each_subaddress.is_some() {
            return Err(WalletError::invalid("Sweep options are not valid when sending"));
        }
        self.validate_scope()
    }

    /// Checks shared by sweeps of unlocked funds.
    pub fn validate_sweep(&self) -> Result<(), WalletError> {
        self.validate_sweep_destination()?;
        if self.key_image.is_some() {
            return Err(WalletError::invalid("Key image must be swept with sweep_output()"));
        }
        if self.can_split == Some(false) {
            return Err(WalletError::invalid("Sweeping unlocked funds must allow splitting"));
        }
        if self.below_amount == Some(0) {
            return Err(WalletError::invalid("Below amount must be positive"));
        }
        if self.sweep_each_subaddress() && self.subaddress_indices.len() == 1 {
            return Err(WalletError::invalid(
                "Cannot sweep each subaddress with a single subaddress index",
            ));
        }
        self.validate_scope()
    }

    /// Checks for sweeping one output by key image.
    pub fn validate_sweep_output(&self) -> Result<(), WalletError> {
        self.validate_sweep_destination()?;
        if self.key_image.as_deref().map_or(true, str::is_empty) {
            return Err(WalletError::invalid("Must provide key image of output to sweep"));
        }
        if self.account_index.is_some() || !self.subaddress_indices.is_empty() {
            return Err(WalletError::invalid(
                "Cannot sweep an output with account or subaddress scope",
            ));
        }
        if self.sweep_each_subaddress.is_some() || self.below_amount.is_some() {
            return Err(WalletError::invalid("Sweep options are not valid when sweeping an output"));
        }
        Ok(())
    }

    fn validate_sweep_destination(&self) -> Result<(), WalletError> {
        match self.destinations.as_slice() {
            [dest] if !dest.address.is_empty() => {
                if dest.amount.is_some() {
                    return Err(WalletError::invalid("Cannot specify amount when sweeping"));
                }
                Ok(())
            }
            _ => Err(WalletError::invalid("Must provide exactly one destination address to sweep to")),
        }
    }

    fn validate_scope(&self) -> Result<(), WalletError> {
        if !self.subaddress_indices.is_empty() && self.account_index.is_none() {
            return Err(WalletError::invalid(
                "Must provide account index when subaddress indices are given",
            ));
        }
        Ok(())
    }
}
