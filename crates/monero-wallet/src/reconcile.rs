//! Reconciliation of partial observations.
//!
//! The same transaction reaches the wallet many times: from the pool, from a
//! block, from the orchestrator that built it. Each observation knows some
//! fields. Merging keeps every known value and fails with
//! [`WalletError::MergeConflict`] when two observations disagree.
//!
//! Lifecycle flags are the exception: a pool tx legitimately becomes
//! confirmed, an output legitimately becomes spent. Those fields resolve
//! toward the later state instead of conflicting.

use crate::error::WalletError;
use crate::model::{OutputWallet, Transfer, TransferKind, TxWallet};

/// Merge two optional values of one field.
///
/// `None` yields to the other side; equal values pass through; differing
/// values conflict.
pub fn reconcile<T: PartialEq + Clone>(
    field: &'static str,
    a: &Option<T>,
    b: &Option<T>,
) -> Result<Option<T>, WalletError> {
    match (a, b) {
        (None, None) => Ok(None),
        (Some(x), None) | (None, Some(x)) => Ok(Some(x.clone())),
        (Some(x), Some(y)) if x == y => Ok(Some(x.clone())),
        _ => Err(WalletError::MergeConflict { field }),
    }
}

/// Flag that only moves from false to true (confirmed, relayed, spent).
pub fn reconcile_prefer_true(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), _) | (_, Some(false)) => Some(false),
        _ => None,
    }
}

/// Flag that only moves from true to false (in pool, do not relay).
pub fn reconcile_prefer_false(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), _) | (_, Some(true)) => Some(true),
        _ => None,
    }
}

/// Counter that only grows.
pub fn reconcile_max(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Merge `incoming` into `txs`.
///
/// Appends when no tx has the same hash, otherwise replaces the existing
/// entry with the merged record. On error `txs` is unchanged.
pub fn merge_tx(txs: &mut Vec<TxWallet>, incoming: TxWallet) -> Result<(), WalletError> {
    match txs.iter().position(|tx| tx.hash == incoming.hash) {
        None => {
            let mut tx = incoming;
            normalize(&mut tx)?;
            txs.push(tx);
        }
        Some(idx) => {
            let merged = merge_tx_pair(&txs[idx], &incoming)?;
            txs[idx] = merged;
        }
    }
    Ok(())
}

/// Merge two observations of the same transaction into a new record.
pub fn merge_tx_pair(a: &TxWallet, b: &TxWallet) -> Result<TxWallet, WalletError> {
    if a.hash != b.hash {
        return Err(WalletError::MergeConflict { field: "hash" });
    }

    let mut merged = TxWallet {
        hash: a.hash.clone(),
        height: reconcile("height", &a.height, &b.height)?,
        block_hash: reconcile("block_hash", &a.block_hash, &b.block_hash)?,
        timestamp: reconcile("timestamp", &a.timestamp, &b.timestamp)?,
        is_confirmed: reconcile_prefer_true(a.is_confirmed, b.is_confirmed),
        in_pool: reconcile_prefer_false(a.in_pool, b.in_pool),
        is_failed: reconcile_prefer_true(a.is_failed, b.is_failed),
        is_relayed: reconcile_prefer_true(a.is_relayed, b.is_relayed),
        is_double_spend_seen: reconcile_prefer_true(a.is_double_spend_seen, b.is_double_spend_seen),
        do_not_relay: reconcile_prefer_false(a.do_not_relay, b.do_not_relay),
        fee: reconcile("fee", &a.fee, &b.fee)?,
        unlock_time: reconcile("unlock_time", &a.unlock_time, &b.unlock_time)?,
        payment_id: reconcile("payment_id", &a.payment_id, &b.payment_id)?,
        note: reconcile("note", &a.note, &b.note)?,
        full_hex: reconcile("full_hex", &a.full_hex, &b.full_hex)?,
        metadata: reconcile("metadata", &a.metadata, &b.metadata)?,
        key: reconcile("key", &a.key, &b.key)?,
        num_confirmations: reconcile_max(a.num_confirmations, b.num_confirmations),
        transfers: merge_transfers(&a.transfers, &b.transfers)?,
        inputs: merge_outputs(&a.inputs, &b.inputs)?,
        outputs: merge_outputs(&a.outputs, &b.outputs)?,
        // The set reference follows the most recent owner.
        tx_set: b.tx_set.or(a.tx_set),
    };
    normalize(&mut merged)?;
    Ok(merged)
}

/// Enforce state invariants after a merge.
fn normalize(tx: &mut TxWallet) -> Result<(), WalletError> {
    if tx.height.is_some() || tx.block_hash.is_some() {
        tx.is_confirmed = Some(true);
    }
    if tx.is_confirmed() {
        if tx.height.is_none() {
            return Err(WalletError::MergeConflict { field: "height" });
        }
        if tx.block_hash.is_none() {
            return Err(WalletError::MergeConflict { field: "block_hash" });
        }
        tx.in_pool = Some(false);
        tx.is_failed = Some(false);
    }
    tx.link_children();
    Ok(())
}

fn merge_transfers(a: &[Transfer], b: &[Transfer]) -> Result<Vec<Transfer>, WalletError> {
    let mut merged = a.to_vec();
    for transfer in b {
        let key = transfer.key();
        match merged.iter().position(|t| t.key() == key) {
            Some(idx) => merged[idx] = merge_transfer(&merged[idx], transfer)?,
            None => merged.push(transfer.clone()),
        }
    }
    Ok(merged)
}

fn merge_transfer(a: &Transfer, b: &Transfer) -> Result<Transfer, WalletError> {
    let kind = match (&a.kind, &b.kind) {
        (
            TransferKind::Incoming { subaddress_index, address: addr_a },
            TransferKind::Incoming { address: addr_b, .. },
        ) => TransferKind::Incoming {
            subaddress_index: *subaddress_index,
            address: reconcile("address", addr_a, addr_b)?,
        },
        (
            TransferKind::Outgoing { subaddress_indices: subs_a, destinations: dests_a },
            TransferKind::Outgoing { subaddress_indices: subs_b, destinations: dests_b },
        ) => TransferKind::Outgoing {
            subaddress_indices: union(subs_a, subs_b),
            destinations: reconcile_list("destinations", dests_a, dests_b)?,
        },
        _ => return Err(WalletError::MergeConflict { field: "direction" }),
    };
    Ok(Transfer {
        tx_hash: reconcile("tx_hash", &a.tx_hash, &b.tx_hash)?,
        account_index: a.account_index,
        amount: a.amount,
        kind,
    })
}

fn merge_outputs(a: &[OutputWallet], b: &[OutputWallet]) -> Result<Vec<OutputWallet>, WalletError> {
    let mut merged = a.to_vec();
    for output in b {
        match merged.iter().position(|o| o.same_output(output)) {
            Some(idx) => merged[idx] = merge_output(&merged[idx], output)?,
            None => merged.push(output.clone()),
        }
    }
    Ok(merged)
}

/// Merge two observations of one output. Spent never reverts.
pub fn merge_output(a: &OutputWallet, b: &OutputWallet) -> Result<OutputWallet, WalletError> {
    if a.account_index != b.account_index {
        return Err(WalletError::MergeConflict { field: "account_index" });
    }
    if a.subaddress_index != b.subaddress_index {
        return Err(WalletError::MergeConflict { field: "subaddress_index" });
    }
    if a.amount != b.amount {
        return Err(WalletError::MergeConflict { field: "amount" });
    }
    Ok(OutputWallet {
        tx_hash: reconcile("tx_hash", &a.tx_hash, &b.tx_hash)?,
        account_index: a.account_index,
        subaddress_index: a.subaddress_index,
        amount: a.amount,
        key_image: reconcile("key_image", &a.key_image, &b.key_image)?,
        is_spent: reconcile_prefer_true(a.is_spent, b.is_spent),
        output_index: reconcile("output_index", &a.output_index, &b.output_index)?,
        global_index: reconcile("global_index", &a.global_index, &b.global_index)?,
    })
}

/// Empty lists count as unknown.
fn reconcile_list<T: PartialEq + Clone>(
    field: &'static str,
    a: &[T],
    b: &[T],
) -> Result<Vec<T>, WalletError> {
    let a = (!a.is_empty()).then(|| a.to_vec());
    let b = (!b.is_empty()).then(|| b.to_vec());
    Ok(reconcile(field, &a, &b)?.unwrap_or_default())
}

fn union(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = a.to_vec();
    for x in b {
        if !out.contains(x) {
            out.push(*x);
        }
    }
    out.sort_unstable();
    out
}
