//! In-memory wallet state.
//!
//! Holds the account table, the reconciled transaction list, the sync cursor
//! and user notes. Balances are always computed from outputs.

use crate::core::WalletCore;
use crate::error::WalletError;
use crate::model::{Account, OutputWallet, Subaddress, TxWallet};
use crate::reconcile::merge_tx;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone)]
struct SubaddressRecord {
    address: String,
    label: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct AccountRecord {
    tag: Option<String>,
    subaddresses: BTreeMap<u32, SubaddressRecord>,
}

/// Wallet-wide `(balance, unlocked_balance)`.
pub type Balances = (u64, u64);

/// What changed while applying a batch of fragments.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Outputs that became confirmed-received.
    pub received: Vec<OutputWallet>,
    /// Outputs that became confirmed-spent.
    pub spent: Vec<OutputWallet>,
}

#[derive(Debug)]
pub struct WalletState {
    accounts: BTreeMap<u32, AccountRecord>,
    txs: Vec<TxWallet>,
    /// Number of blocks processed; the next height to scan.
    sync_height: u64,
    notes: HashMap<String, String>,
    confirmations: u64,
}

impl WalletState {
    /// Fresh state with the primary address of account 0.
    pub fn new(
        restore_height: u64,
        confirmations: u64,
        core: &dyn WalletCore,
    ) -> Result<Self, WalletError> {
        let mut state = Self {
            accounts: BTreeMap::new(),
            txs: Vec::new(),
            sync_height: restore_height,
            notes: HashMap::new(),
            confirmations,
        };
        state.ensure_subaddress(0, 0, core)?;
        Ok(state)
    }

    // =========================================================================
    // Sync cursor
    // =========================================================================

    pub fn sync_height(&self) -> u64 {
        self.sync_height
    }

    /// Move the cursor forward. Never moves it back.
    pub fn advance_sync_height(&mut self, height: u64) {
        self.sync_height = self.sync_height.max(height);
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub fn num_accounts(&self) -> u32 {
        self.accounts.len() as u32
    }

    pub fn has_account(&self, account_index: u32) -> bool {
        self.accounts.contains_key(&account_index)
    }

    pub fn create_account(
        &mut self,
        label: Option<&str>,
        core: &dyn WalletCore,
    ) -> Result<u32, WalletError> {
        let index = self.num_accounts();
        self.ensure_subaddress(index, 0, core)?;
        if let Some(label) = label {
            self.set_subaddress_label(index, 0, label)?;
        }
        Ok(index)
    }

    pub fn create_subaddress(
        &mut self,
        account_index: u32,
        label: Option<&str>,
        core: &dyn WalletCore,
    ) -> Result<u32, WalletError> {
        let account = self.account_record(account_index)?;
        let index = account.subaddresses.len() as u32;
        self.ensure_subaddress(account_index, index, core)?;
        if let Some(label) = label {
            self.set_subaddress_label(account_index, index, label)?;
        }
        Ok(index)
    }

    /// Make `(account_index, subaddress_index)` exist, creating any missing
    /// lower indices so both tables stay contiguous.
    pub fn ensure_subaddress(
        &mut self,
        account_index: u32,
        subaddress_index: u32,
        core: &dyn WalletCore,
    ) -> Result<(), WalletError> {
        for a in self.num_accounts()..=account_index {
            let address = core.derive_address(a, 0)?;
            let mut record = AccountRecord::default();
            record
                .subaddresses
                .insert(0, SubaddressRecord { address, label: None });
            self.accounts.insert(a, record);
            log::debug!("added account {}", a);
        }
        let existing = self.account_record(account_index)?.subaddresses.len() as u32;
        for s in existing..=subaddress_index {
            let address = core.derive_address(account_index, s)?;
            if let Some(account) = self.accounts.get_mut(&account_index) {
                account
                    .subaddresses
                    .insert(s, SubaddressRecord { address, label: None });
            }
        }
        Ok(())
    }

    pub fn set_subaddress_label(
        &mut self,
        account_index: u32,
        subaddress_index: u32,
        label: &str,
    ) -> Result<(), WalletError> {
        let record = self
            .accounts
            .get_mut(&account_index)
            .and_then(|a| a.subaddresses.get_mut(&subaddress_index))
            .ok_or_else(|| {
                WalletError::invalid(format!(
                    "No subaddress at index ({}, {})",
                    account_index, subaddress_index
                ))
            })?;
        record.label = Some(label.to_string());
        Ok(())
    }

    pub fn set_account_tag(&mut self, account_index: u32, tag: Option<&str>) -> Result<(), WalletError> {
        let account = self
            .accounts
            .get_mut(&account_index)
            .ok_or_else(|| WalletError::invalid(format!("No account at index {}", account_index)))?;
        account.tag = tag.map(str::to_string);
        Ok(())
    }

    fn account_record(&self, account_index: u32) -> Result<&AccountRecord, WalletError> {
        self.accounts
            .get(&account_index)
            .ok_or_else(|| WalletError::invalid(format!("No account at index {}", account_index)))
    }

    pub fn address(&self, account_index: u32, subaddress_index: u32) -> Option<&str> {
        self.accounts
            .get(&account_index)?
            .subaddresses
            .get(&subaddress_index)
            .map(|s| s.address.as_str())
    }

    pub fn account(&self, account_index: u32, include_subaddresses: bool) -> Result<Account, WalletError> {
        let record = self.account_record(account_index)?;
        let (balance, unlocked_balance) = self.balances(Some(account_index), None);
        let primary = record
            .subaddresses
            .get(&0)
            .ok_or_else(|| WalletError::Internal(format!("account {} has no primary address", account_index)))?;
        let subaddresses = if include_subaddresses {
            let subs = record
                .subaddresses
                .keys()
                .map(|s| self.subaddress(account_index, *s))
                .collect::<Result<Vec<_>, _>>()?;
            Some(subs)
        } else {
            None
        };
        Ok(Account {
            index: account_index,
            primary_address: primary.address.clone(),
            balance,
            unlocked_balance,
            tag: record.tag.clone(),
            label: primary.label.clone(),
            subaddresses,
        })
    }

    pub fn accounts(&self, include_subaddresses: bool, tag: Option<&str>) -> Result<Vec<Account>, WalletError> {
        self.accounts
            .iter()
            .filter(|(_, record)| tag.map_or(true, |t| record.tag.as_deref() == Some(t)))
            .map(|(index, _)| self.account(*index, include_subaddresses))
            .collect()
    }

    pub fn subaddress(&self, account_index: u32, subaddress_index: u32) -> Result<Subaddress, WalletError> {
        let record = self
            .account_record(account_index)?
            .subaddresses
            .get(&subaddress_index)
            .ok_or_else(|| {
                WalletError::invalid(format!(
                    "No subaddress at index ({}, {})",
                    account_index, subaddress_index
                ))
            })?;

        let mut balance = 0u64;
        let mut unlocked_balance = 0u64;
        let mut num_unspent_outputs = 0u64;
        let mut num_blocks_to_unlock = 0u64;
        for (tx, output) in self.balance_outputs() {
            if output.account_index != account_index || output.subaddress_index != subaddress_index {
                continue;
            }
            balance += output.amount;
            num_unspent_outputs += 1;
            if tx.is_unlocked(self.sync_height, self.confirmations) {
                unlocked_balance += output.amount;
            } else {
                num_blocks_to_unlock =
                    num_blocks_to_unlock.max(tx.blocks_to_unlock(self.sync_height, self.confirmations));
            }
        }

        let is_used = self.txs.iter().any(|tx| {
            tx.outputs
                .iter()
                .any(|o| o.account_index == account_index && o.subaddress_index == subaddress_index)
        });

        Ok(Subaddress {
            account_index,
            index: subaddress_index,
            address: record.address.clone(),
            label: record.label.clone(),
            balance,
            unlocked_balance,
            num_unspent_outputs,
            num_blocks_to_unlock,
            is_used,
        })
    }

    pub fn subaddress_indices(&self, account_index: u32) -> Result<Vec<u32>, WalletError> {
        Ok(self.account_record(account_index)?.subaddresses.keys().copied().collect())
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Key images consumed by live, unconfirmed transactions.
    pub fn pending_key_images(&self) -> HashSet<&str> {
        self.txs
            .iter()
            .filter(|tx| !tx.is_confirmed() && !tx.is_failed())
            .flat_map(|tx| tx.inputs.iter())
            .filter_map(|o| o.key_image.as_deref())
            .collect()
    }

    /// Outputs that make up the balance, with their owning tx.
    ///
    /// Confirmed unspent outputs count unless a pending tx consumes them.
    /// Unconfirmed outputs count only as change of the wallet's own pending
    /// spends from the same account.
    pub fn balance_outputs(&self) -> impl Iterator<Item = (&TxWallet, &OutputWallet)> + '_ {
        let pending = self.pending_key_images();
        self.txs
            .iter()
            .filter(|tx| !tx.is_failed())
            .flat_map(|tx| tx.outputs.iter().map(move |o| (tx, o)))
            .filter(move |(tx, o)| {
                if o.is_spent() {
                    return false;
                }
                if o.key_image.as_deref().is_some_and(|k| pending.contains(k)) {
                    return false;
                }
                tx.is_confirmed()
                    || tx
                        .transfers
                        .iter()
                        .any(|t| t.is_outgoing() && t.account_index == o.account_index)
            })
    }

    /// Balances restricted to an account and optionally one subaddress.
    pub fn balances(&self, account_index: Option<u32>, subaddress_index: Option<u32>) -> Balances {
        let mut balance = 0u64;
        let mut unlocked = 0u64;
        for (tx, o) in self.balance_outputs() {
            if account_index.is_some_and(|a| a != o.account_index)
                || subaddress_index.is_some_and(|s| s != o.subaddress_index)
            {
                continue;
            }
            balance += o.amount;
            if tx.is_unlocked(self.sync_height, self.confirmations) {
                unlocked += o.amount;
            }
        }
        (balance, unlocked)
    }

    /// Unlocked, unspent outputs in scope that a new transaction may spend.
    pub fn spendable_outputs(&self, account_index: Option<u32>, subaddress_indices: &[u32]) -> Vec<OutputWallet> {
        self.balance_outputs()
            .filter(|(tx, o)| {
                tx.is_unlocked(self.sync_height, self.confirmations)
                    && account_index.map_or(true, |a| a == o.account_index)
                    && (subaddress_indices.is_empty() || subaddress_indices.contains(&o.subaddress_index))
            })
            .map(|(_, o)| o.clone())
            .collect()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub fn txs(&self) -> &[TxWallet] {
        &self.txs
    }

    /// Copy of `tx` as presented to callers: confirmations and notes filled in.
    pub fn present(&self, tx: &TxWallet) -> TxWallet {
        let mut out = tx.clone();
        out.num_confirmations = match tx.height.filter(|_| tx.is_confirmed()) {
            Some(h) => Some(self.sync_height.saturating_sub(h)),
            None => Some(0),
        };
        if let Some(note) = self.notes.get(&tx.hash) {
            out.note = Some(note.clone());
        }
        out
    }

    /// Merge a batch of fragments atomically and track confirmed spends.
    ///
    /// Either every fragment lands or the state is untouched.
    pub fn apply(
        &mut self,
        fragments: Vec<TxWallet>,
        core: &dyn WalletCore,
    ) -> Result<ApplyOutcome, WalletError> {
        let mut txs = self.txs.clone();
        let mut outcome = ApplyOutcome::default();

        for fragment in fragments {
            let prior = txs.iter().find(|t| t.hash == fragment.hash).cloned();
            let confirmed = fragment.is_confirmed();
            let spent_images: Vec<String> = if confirmed {
                fragment
                    .inputs
                    .iter()
                    .filter_map(|o| o.key_image.clone())
                    .collect()
            } else {
                Vec::new()
            };
            let hash = fragment.hash.clone();
            merge_tx(&mut txs, fragment)?;

            let merged = txs
                .iter()
                .find(|t| t.hash == hash)
                .ok_or_else(|| WalletError::Internal(format!("merged tx {} missing", hash)))?;
            if merged.is_confirmed() {
                let was_confirmed = prior.as_ref().is_some_and(TxWallet::is_confirmed);
                for output in &merged.outputs {
                    let known = was_confirmed
                        && prior
                            .as_ref()
                            .is_some_and(|p| p.outputs.iter().any(|o| o.same_output(output)));
                    if !known {
                        outcome.received.push(output.clone());
                    }
                }
            }

            for image in spent_images {
                if let Some(spent) = mark_spent(&mut txs, &image)? {
                    outcome.spent.push(spent);
                }
            }
        }

        // Discovery happens against the staged list so a failure above
        // leaves the account table alone too.
        let mut seen: Vec<(u32, u32)> = txs
            .iter()
            .flat_map(|tx| tx.outputs.iter().chain(tx.inputs.iter()))
            .map(|o| (o.account_index, o.subaddress_index))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        let backup = self.accounts.clone();
        for (a, s) in seen {
            if self.address(a, s).is_some() {
                continue;
            }
            if let Err(e) = self.ensure_subaddress(a, s, core) {
                self.accounts = backup;
                return Err(e);
            }
        }

        self.txs = txs;
        Ok(outcome)
    }

    /// Mark a previously pooled tx as failed.
    pub fn mark_failed(&mut self, hash: &str) -> Result<(), WalletError> {
        let mut fragment = TxWallet::new(hash);
        fragment.is_failed = Some(true);
        fragment.in_pool = Some(false);
        merge_tx(&mut self.txs, fragment)
    }

    /// Relayed, unconfirmed, live transactions.
    pub fn pool_txs(&self) -> Vec<&TxWallet> {
        self.txs
            .iter()
            .filter(|tx| tx.in_pool() && !tx.is_confirmed() && !tx.is_failed())
            .collect()
    }

    // =========================================================================
    // Notes
    // =========================================================================

    pub fn set_tx_note(&mut self, hash: &str, note: &str) {
        self.notes.insert(hash.to_string(), note.to_string());
    }

    pub fn tx_note(&self, hash: &str) -> Option<&str> {
        self.notes.get(hash).map(String::as_str)
    }
}

/// Flag the output with `key_image` as spent. Returns it when this is the
/// transition from unspent.
fn mark_spent(txs: &mut Vec<TxWallet>, key_image: &str) -> Result<Option<OutputWallet>, WalletError> {
    let owner = txs.iter().find_map(|tx| {
        tx.outputs
            .iter()
            .find(|o| o.key_image.as_deref() == Some(key_image))
            .map(|o| (tx.hash.clone(), o.clone()))
    });
    let Some((owner_hash, output)) = owner else {
        return Ok(None);
    };
    if output.is_spent() {
        return Ok(None);
    }
    let mut spent = output;
    spent.is_spent = Some(true);
    merge_tx(txs, TxWallet::new(&owner_hash).with_output(spent.clone()))?;
    Ok(Some(spent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Destination, Transfer};

    struct Addresses;

    impl WalletCore for Addresses {
        fn derive_address(&self, a: u32, s: u32) -> Result<String, WalletError> {
            Ok(format!("addr-{}-{}", a, s))
        }
        fn scan_block(
            &self,
            _: &crate::core::BlockContext,
            _: &[monero_rpc::daemon::TransactionEntry],
        ) -> Result<Vec<TxWallet>, WalletError> {
            Ok(vec![])
        }
        fn scan_pool(&self, _: &[monero_rpc::daemon::TxPoolEntry]) -> Result<Vec<TxWallet>, WalletError> {
            Ok(vec![])
        }
        fn construct(&self, _: &crate::core::ConstructionRequest) -> Result<Vec<crate::model::TxSet>, WalletError> {
            Ok(vec![])
        }
        fn sign(&self, hex: &str) -> Result<String, WalletError> {
            Ok(hex.to_string())
        }
    }

    fn hash(n: u8) -> String {
        hex::encode([n; 32])
    }

    fn receive(n: u8, height: u64, account: u32, sub: u32, amount: u64) -> TxWallet {
        TxWallet::new(&hash(n))
            .confirmed_at(height, &format!("blk{}", height), 0)
            .with_transfer(Transfer::incoming(account, sub, amount))
            .with_output(OutputWallet::new(account, sub, amount).with_key_image(&format!("ki{}", n)))
    }

    #[test]
    fn test_new_state_has_primary_address() {
        let state = WalletState::new(0, 10, &Addresses).unwrap();
        assert_eq!(state.num_accounts(), 1);
        assert_eq!(state.address(0, 0), Some("addr-0-0"));
    }

    #[test]
    fn test_discovery_fills_gaps() {
        let mut state = WalletState::new(0, 10, &Addresses).unwrap();
        state.apply(vec![receive(1, 5, 2, 3, 10)], &Addresses).unwrap();
        assert_eq!(state.num_accounts(), 3);
        assert_eq!(state.subaddress_indices(2).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(state.subaddress_indices(1).unwrap(), vec![0]);
    }

    #[test]
    fn test_balances_and_unlock() {
        let mut state = WalletState::new(0, 10, &Addresses).unwrap();
        let outcome = state
            .apply(vec![receive(1, 5, 0, 0, 100), receive(2, 8, 0, 1, 50)], &Addresses)
            .unwrap();
        assert_eq!(outcome.received.len(), 2);

        state.advance_sync_height(15);
        assert_eq!(state.balances(None, None), (150, 100));
        state.advance_sync_height(18);
        assert_eq!(state.balances(None, None), (150, 150));
        assert_eq!(state.balances(Some(0), Some(1)), (50, 50));
        // cursor never moves back
        state.advance_sync_height(3);
        assert_eq!(state.sync_height(), 18);
    }

    #[test]
    fn test_confirmed_spend_marks_output() {
        let mut state = WalletState::new(0, 10, &Addresses).unwrap();
        state.apply(vec![receive(1, 5, 0, 0, 100)], &Addresses).unwrap();
        state.advance_sync_height(20);

        let spend = TxWallet::new(&hash(9))
            .confirmed_at(20, "blk20", 0)
            .with_transfer(Transfer::outgoing(0, 60, vec![Destination::new("ext", 60)]))
            .with_input(OutputWallet::new(0, 0, 100).with_key_image("ki1"))
            .with_output(OutputWallet::new(0, 0, 39).with_key_image("change"));
        let outcome = state.apply(vec![spend], &Addresses).unwrap();
        assert_eq!(outcome.spent.len(), 1);
        assert_eq!(outcome.spent[0].amount, 100);
        assert_eq!(outcome.received.len(), 1);
        assert_eq!(state.balances(None, None).0, 39);

        // re-applying reports nothing new
        let again = state.apply(vec![receive(1, 5, 0, 0, 100)], &Addresses).unwrap();
        assert!(again.received.is_empty());
        assert!(again.spent.is_empty());
    }

    #[test]
    fn test_pending_spend_hides_inputs_and_counts_change() {
        let mut state = WalletState::new(0, 10, &Addresses).unwrap();
        state.apply(vec![receive(1, 5, 0, 0, 100)], &Addresses).unwrap();
        state.advance_sync_height(20);

        let pending = TxWallet::new(&hash(9))
            .pooled()
            .with_transfer(Transfer::outgoing(0, 60, vec![Destination::new("ext", 60)]))
            .with_input(OutputWallet::new(0, 0, 100).with_key_image("ki1"))
            .with_output(OutputWallet::new(0, 0, 39));
        let outcome = state.apply(vec![pending], &Addresses).unwrap();
        assert!(outcome.spent.is_empty());
        assert!(outcome.received.is_empty());
        assert_eq!(state.balances(None, None), (39, 0));

        state.mark_failed(&hash(9)).unwrap();
        assert_eq!(state.balances(None, None), (100, 100));
    }

    #[test]
    fn test_apply_conflict_is_atomic() {
        let mut state = WalletState::new(0, 10, &Addresses).unwrap();
        state.apply(vec![receive(1, 5, 0, 0, 100)], &Addresses).unwrap();
        let err = state
            .apply(vec![receive(2, 6, 4, 0, 1), receive(1, 7, 0, 0, 100)], &Addresses)
            .unwrap_err();
        assert!(matches!(err, WalletError::MergeConflict { .. }));
        assert_eq!(state.txs().len(), 1);
        assert_eq!(state.num_accounts(), 1);
    }

    #[test]
    fn test_present_fills_confirmations_and_notes() {
        let mut state = WalletState::new(0, 10, &Addresses).unwrap();
        state.apply(vec![receive(1, 5, 0, 0, 100)], &Addresses).unwrap();
        state.advance_sync_height(12);
        state.set_tx_note(&hash(1), "rent");
        let tx = state.present(&state.txs()[0]);
        assert_eq!(tx.num_confirmations, Some(7));
        assert_eq!(tx.note.as_deref(), Some("rent"));
    }
}
