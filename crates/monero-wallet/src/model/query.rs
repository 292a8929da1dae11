//! Declarative criteria for reading transactions, transfers and outputs.
//!
//! `None` on any field means "don't care". Matching lives in
//! [`crate::filter`].

use crate::error::WalletError;

/// Criteria over transactions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxQuery {
    pub hashes: Option<Vec<String>>,
    pub is_confirmed: Option<bool>,
    pub in_pool: Option<bool>,
    pub is_failed: Option<bool>,
    pub is_relayed: Option<bool>,
    /// Has at least one incoming transfer.
    pub is_incoming: Option<bool>,
    /// Has at least one outgoing transfer.
    pub is_outgoing: Option<bool>,
    pub min_height: Option<u64>,
    pub max_height: Option<u64>,
    pub payment_ids: Option<Vec<String>>,
    pub has_payment_id: Option<bool>,
    /// At least one transfer must match.
    pub transfer_query: Option<Box<TransferQuery>>,
    /// At least one received output must match.
    pub output_query: Option<Box<OutputQuery>>,
}

/// Criteria over transfers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferQuery {
    pub is_incoming: Option<bool>,
    pub is_outgoing: Option<bool>,
    pub account_index: Option<u32>,
    pub subaddress_indices: Option<Vec<u32>>,
    pub min_amount: Option<u64>,
    pub max_amount: Option<u64>,
    pub has_destinations: Option<bool>,
    /// The owning transaction must match.
    pub tx_query: Option<Box<TxQuery>>,
}

/// Criteria over received outputs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputQuery {
    pub account_index: Option<u32>,
    pub subaddress_indices: Option<Vec<u32>>,
    pub is_spent: Option<bool>,
    pub key_image: Option<String>,
    pub min_amount: Option<u64>,
    pub max_amount: Option<u64>,
    /// The owning transaction must match.
    pub tx_query: Option<Box<TxQuery>>,
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    what: &str,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), WalletError> {
    match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => Err(WalletError::invalid(format!(
            "min {} ({}) exceeds max {} ({})",
            what, lo, what, hi
        ))),
        _ => Ok(()),
    }
}

// ─── TxQuery ────────────────────────────────────────────────────────────────

impl TxQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash(self, hash: &str) -> Self {
        self.with_hashes(vec![hash.to_string()])
    }

    pub fn with_hashes(mut self, hashes: Vec<String>) -> Self {
        self.hashes = Some(hashes);
        self
    }

    pub fn with_is_confirmed(mut self, v: bool) -> Self {
        self.is_confirmed = Some(v);
        self
    }

    pub fn with_in_pool(mut self, v: bool) -> Self {
        self.in_pool = Some(v);
        self
    }

    pub fn with_is_failed(mut self, v: bool) -> Self {
        self.is_failed = Some(v);
        self
    }

    pub fn with_is_relayed(mut self, v: bool) -> Self {
        self.is_relayed = Some(v);
        self
    }

    pub fn with_is_incoming(mut self, v: bool) -> Self {
        self.is_incoming = Some(v);
        self
    }

    pub fn with_is_outgoing(mut self, v: bool) -> Self {
        self.is_outgoing = Some(v);
        self
    }

    pub fn with_min_height(mut self, h: u64) -> Self {
        self.min_height = Some(h);
        self
    }

    pub fn with_max_height(mut self, h: u64) -> Self {
        self.max_height = Some(h);
        self
    }

    pub fn with_payment_ids(mut self, ids: Vec<String>) -> Self {
        self.payment_ids = Some(ids);
        self
    }

    pub fn with_transfer_query(mut self, q: TransferQuery) -> Self {
        self.transfer_query = Some(Box::new(q));
        self
    }

    pub fn with_output_query(mut self, q: OutputQuery) -> Self {
        self.output_query = Some(Box::new(q));
        self
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        check_range("height", self.min_height, self.max_height)?;
        if let Some(q) = &self.transfer_query {
            q.validate()?;
        }
        if let Some(q) = &self.output_query {
            q.validate()?;
        }
        Ok(())
    }
}

// ─── TransferQuery ──────────────────────────────────────────────────────────

impl TransferQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_is_incoming(mut self, v: bool) -> Self {
        self.is_incoming = Some(v);
        self
    }

    pub fn with_is_outgoing(mut self, v: bool) -> Self {
        self.is_outgoing = Some(v);
        self
    }

    pub fn with_account_index(mut self, index: u32) -> Self {
        self.account_index = Some(index);
        self
    }

    pub fn with_subaddress_index(self, index: u32) -> Self {
        self.with_subaddress_indices(vec![index])
    }

    pub fn with_subaddress_indices(mut self, indices: Vec<u32>) -> Self {
        self.subaddress_indices = Some(indices);
        self
    }

    pub fn with_min_amount(mut self, amount: u64) -> Self {
        self.min_amount = Some(amount);
        self
    }

    pub fn with_max_amount(mut self, amount: u64) -> Self {
        self.max_amount = Some(amount);
        self
    }

    pub fn with_has_destinations(mut self, v: bool) -> Self {
        self.has_destinations = Some(v);
        self
    }

    pub fn with_tx_query(mut self, q: TxQuery) -> Self {
        self.tx_query = Some(Box::new(q));
        self
    }

    /// Direction implied by the two flags, if any.
    ///
    /// A transfer is exactly one of incoming or outgoing, so setting both
    /// flags to the same value can never match.
    pub fn direction(&self) -> Result<Option<bool>, WalletError> {
        match (self.is_incoming, self.is_outgoing) {
            (Some(a), Some(b)) if a == b => Err(WalletError::invalid(
                "Transfer query cannot be both incoming and outgoing, or neither",
            )),
            (Some(incoming), _) => Ok(Some(incoming)),
            (None, Some(outgoing)) => Ok(Some(!outgoing)),
            (None, None) => Ok(None),
        }
    }

    /// Copy of this query restricted to incoming transfers.
    pub fn incoming_only(&self) -> Result<TransferQuery, WalletError> {
        if self.direction()? == Some(false) {
            return Err(WalletError::invalid(
                "Transfer query contradicts getting incoming transfers",
            ));
        }
        Ok(self.clone().with_is_incoming(true))
    }

    /// Copy of this query restricted to outgoing transfers.
    pub fn outgoing_only(&self) -> Result<TransferQuery, WalletError> {
        if self.direction()? == Some(true) {
            return Err(WalletError::invalid(
                "Transfer query contradicts getting outgoing transfers",
            ));
        }
        Ok(self.clone().with_is_outgoing(true))
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        self.direction()?;
        check_range("amount", self.min_amount, self.max_amount)?;
        if let Some(q) = &self.tx_query {
            check_range("height", q.min_height, q.max_height)?;
        }
        Ok(())
    }
}

// ─── OutputQuery ────────────────────────────────────────────────────────────

impl OutputQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query for unspent outputs.
    pub fn unspent() -> Self {
        Self::default().with_is_spent(false)
    }

    pub fn with_account_index(mut self, index: u32) -> Self {
        self.account_index = Some(index);
        self
    }

    pub fn with_subaddress_indices(mut self, indices: Vec<u32>) -> Self {
        self.subaddress_indices = Some(indices);
        self
    }

    pub fn with_is_spent(mut self, v: bool) -> Self {
        self.is_spent = Some(v);
        self
    }

    pub fn with_key_image(mut self, key_image: &str) -> Self {
        self.key_image = Some(key_image.to_string());
        self
    }

    pub fn with_min_amount(mut self, amount: u64) -> Self {
        self.min_amount = Some(amount);
        self
    }

    pub fn with_max_amount(mut self, amount: u64) -> Self {
        self.max_amount = Some(amount);
        self
    }

    pub fn with_tx_query(mut self, q: TxQuery) -> Self {
        self.tx_query = Some(Box::new(q));
        self
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        check_range("amount", self.min_amount, self.max_amount)?;
        if let Some(q) = &self.tx_query {
            check_range("height", q.min_height, q.max_height)?;
        }
        Ok(())
    }
}
