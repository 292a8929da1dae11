//! Query filter engine.
//!
//! Pure predicates over in-memory records. Nothing here touches the network
//! or mutates a candidate.

use crate::error::WalletError;
use crate::model::{OutputQuery, OutputWallet, Transfer, TransferQuery, TxQuery, TxWallet};

/// A criteria set that can be evaluated against records of type `T`.
///
/// `tx` is the transaction owning the candidate (the candidate itself for
/// transaction queries).
pub trait Filter<T> {
    fn matches(&self, tx: &TxWallet, candidate: &T) -> bool;
}

fn check<T: PartialEq>(want: &Option<T>, have: T) -> bool {
    want.as_ref().map_or(true, |w| *w == have)
}

fn in_list<T: PartialEq>(list: &Option<Vec<T>>, have: &T) -> bool {
    list.as_ref().map_or(true, |l| l.contains(have))
}

fn in_range(min: Option<u64>, max: Option<u64>, value: u64) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

// ─── Transactions ───────────────────────────────────────────────────────────

impl TxQuery {
    /// Evaluate against a transaction.
    pub fn matches_tx(&self, tx: &TxWallet) -> bool {
        if !in_list(&self.hashes, &tx.hash)
            || !check(&self.is_confirmed, tx.is_confirmed())
            || !check(&self.in_pool, tx.in_pool())
            || !check(&self.is_failed, tx.is_failed())
            || !check(&self.is_relayed, tx.is_relayed())
            || !check(&self.is_incoming, tx.is_incoming())
            || !check(&self.is_outgoing, tx.is_outgoing())
            || !check(&self.has_payment_id, tx.payment_id.is_some())
        {
            return false;
        }

        if let Some(ids) = &self.payment_ids {
            match &tx.payment_id {
                Some(id) if ids.contains(id) => {}
                _ => return false,
            }
        }

        if self.min_height.is_some() || self.max_height.is_some() {
            match tx.height {
                Some(h) if in_range(self.min_height, self.max_height, h) => {}
                _ => return false,
            }
        }

        // Nested criteria are evaluated without their own tx criteria to
        // avoid evaluating the same transaction twice.
        if let Some(q) = &self.transfer_query {
            if !tx.transfers.iter().any(|t| q.matches_transfer(t)) {
                return false;
            }
        }
        if let Some(q) = &self.output_query {
            if !tx.outputs.iter().any(|o| q.matches_output(o)) {
                return false;
            }
        }
        true
    }
}

impl Filter<TxWallet> for TxQuery {
    fn matches(&self, tx: &TxWallet, _candidate: &TxWallet) -> bool {
        self.matches_tx(tx)
    }
}

// ─── Transfers ──────────────────────────────────────────────────────────────

impl TransferQuery {
    /// Evaluate the transfer-level criteria only.
    pub fn matches_transfer(&self, transfer: &Transfer) -> bool {
        if !check(&self.is_incoming, transfer.is_incoming())
            || !check(&self.is_outgoing, transfer.is_outgoing())
            || !check(&self.account_index, transfer.account_index)
            || !in_range(self.min_amount, self.max_amount, transfer.amount)
            || !check(&self.has_destinations, !transfer.destinations().is_empty())
        {
            return false;
        }
        if let Some(wanted) = &self.subaddress_indices {
            let have = transfer.subaddress_indices();
            if !have.iter().any(|i| wanted.contains(i)) {
                return false;
            }
        }
        true
    }
}

impl Filter<Transfer> for TransferQuery {
    fn matches(&self, tx: &TxWallet, transfer: &Transfer) -> bool {
        self.matches_transfer(transfer) && self.tx_query.as_ref().map_or(true, |q| q.matches_tx(tx))
    }
}

// ─── Outputs ────────────────────────────────────────────────────────────────

impl OutputQuery {
    /// Evaluate the output-level criteria only.
    pub fn matches_output(&self, output: &OutputWallet) -> bool {
        check(&self.account_index, output.account_index)
            && in_list(&self.subaddress_indices, &output.subaddress_index)
            && check(&self.is_spent, output.is_spent())
            && self
                .key_image
                .as_ref()
                .map_or(true, |k| output.key_image.as_ref() == Some(k))
            && in_range(self.min_amount, self.max_amount, output.amount)
    }
}

impl Filter<OutputWallet> for OutputQuery {
    fn matches(&self, tx: &TxWallet, output: &OutputWallet) -> bool {
        self.matches_output(output) && self.tx_query.as_ref().map_or(true, |q| q.matches_tx(tx))
    }
}

// ─── Selection ──────────────────────────────────────────────────────────────

/// Transactions matching `query`, cloned.
pub fn select_txs(txs: &[TxWallet], query: &TxQuery) -> Result<Vec<TxWallet>, WalletError> {
    query.validate()?;
    Ok(txs.iter().filter(|tx| query.matches_tx(tx)).cloned().collect())
}

/// Transfers matching `query`, cloned, in transaction order.
pub fn select_transfers(txs: &[TxWallet], query: &TransferQuery) -> Result<Vec<Transfer>, WalletError> {
    query.validate()?;
    Ok(txs
        .iter()
        .flat_map(|tx| tx.transfers.iter().map(move |t| (tx, t)))
        .filter(|(tx, t)| query.matches(tx, t))
        .map(|(_, t)| t.clone())
        .collect())
}

/// Received outputs matching `query`, cloned.
pub fn select_outputs(txs: &[TxWallet], query: &OutputQuery) -> Result<Vec<OutputWallet>, WalletError> {
    query.validate()?;
    Ok(txs
        .iter()
        .flat_map(|tx| tx.outputs.iter().map(move |o| (tx, o)))
        .filter(|(tx, o)| query.matches(tx, o))
        .map(|(_, o)| o.clone())
        .collect())
}
