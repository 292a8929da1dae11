//! Transaction construction orchestrator.
//!
//! Turns a [`TxConfig`] into transaction sets. Building and signing happen in
//! the [`WalletCore`](crate::core::WalletCore); this module owns the policy
//! around it: which outputs are in scope, whether splitting is allowed, and
//! whether anything is broadcast.
//!
//! The core is always asked to build with relaying suppressed. Relaying is
//! done here, with no state lock held, and only the result is merged back.

use crate::core::{ConstructionKind, ConstructionRequest};
use crate::error::WalletError;
use crate::listener::Pending;
use crate::model::{OutputWallet, TxConfig, TxSet, TxWallet};
use crate::wallet::Wallet;
use monero_rpc::DaemonRpc;

/// One sweep target: an account and optionally some of its subaddresses.
type Scope = (u32, Vec<u32>);

impl Wallet {
    // =========================================================================
    // Create
    // =========================================================================

    /// Build one transaction without relaying it. Splitting is not allowed.
    pub fn create_tx(&self, config: &TxConfig) -> Result<TxWallet, WalletError> {
        let config = no_split(config)?;
        let set = self.create_txs(&config)?;
        single_tx(set)
    }

    /// Build transactions without relaying them.
    ///
    /// The returned txs carry the caller's `do_not_relay` flag, but nothing
    /// is broadcast and wallet state is unchanged.
    pub fn create_txs(&self, config: &TxConfig) -> Result<TxSet, WalletError> {
        self.shared.check_open()?;
        config.validate_send()?;

        let account_index = config.account_index().unwrap_or(0);
        let inputs = {
            let state = self.shared.read_state()?;
            if !state.has_account(account_index) {
                return Err(WalletError::invalid(format!("No account at index {}", account_index)));
            }
            state.spendable_outputs(Some(account_index), config.subaddress_indices())
        };
        let sets = self.construct(ConstructionKind::Transfer, config, inputs)?;
        let mut set = merge_sets(sets)?;

        let requested = config.do_not_relay();
        let note = config.note().map(str::to_string);
        set.update_txs(|txs| {
            for tx in txs.iter_mut() {
                tx.do_not_relay = Some(requested);
                tx.is_relayed = Some(false);
                if note.is_some() {
                    tx.note = note.clone();
                }
            }
        });
        log::debug!("created {} tx(s) in set {:?}", set.txs().len(), set.id());
        Ok(set)
    }

    // =========================================================================
    // Send
    // =========================================================================

    /// Build and relay one transaction. Splitting is not allowed.
    pub async fn send_tx(&self, config: &TxConfig) -> Result<TxWallet, WalletError> {
        let config = no_split(config)?;
        let set = self.send_txs(&config).await?;
        single_tx(set)
    }

    /// Build transactions and relay them unless `do_not_relay` is set.
    pub async fn send_txs(&self, config: &TxConfig) -> Result<TxSet, WalletError> {
        self.shared.check_open()?;
        config.validate_send()?;
        let daemon = self.shared.daemon()?;
        let set = self.create_txs(config)?;
        if config.do_not_relay() {
            return Ok(set);
        }
        self.relay_set(&daemon, set, config.note()).await
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// Sweep unlocked funds in the config's scope to its single destination.
    ///
    /// One set per account with unlocked funds, or per subaddress when
    /// `sweep_each_subaddress` is set. Scopes with nothing unlocked are
    /// skipped.
    pub async fn sweep_unlocked(&self, config: &TxConfig) -> Result<Vec<TxSet>, WalletError> {
        self.shared.check_open()?;
        config.validate_sweep()?;
        let daemon = self.shared.daemon()?;

        let scopes = self.sweep_scopes(config)?;
        log::info!("sweeping {} scope(s)", scopes.len());
        let mut sets = Vec::with_capacity(scopes.len());
        for (account_index, subaddress_indices) in scopes {
            sets.push(self.sweep_scope(&daemon, config, account_index, subaddress_indices).await?);
        }
        Ok(sets)
    }

    /// Sweep an account's unlocked funds to `address`.
    pub async fn sweep_account(&self, account_index: u32, address: &str) -> Result<TxSet, WalletError> {
        let config = TxConfig::new().with_account_index(account_index).with_address(address);
        let sets = self.sweep_unlocked(&config).await?;
        single_set(sets, || format!("No unlocked funds in account {}", account_index))
    }

    /// Sweep one subaddress's unlocked funds to `address`.
    pub async fn sweep_subaddress(
        &self,
        account_index: u32,
        subaddress_index: u32,
        address: &str,
    ) -> Result<TxSet, WalletError> {
        let config = TxConfig::new()
            .with_account_index(account_index)
            .with_subaddress_indices(vec![subaddress_index])
            .with_address(address);
        let sets = self.sweep_unlocked(&config).await?;
        single_set(sets, || {
            format!("No unlocked funds in subaddress ({}, {})", account_index, subaddress_index)
        })
    }

    /// Sweep every account's unlocked funds to `address`.
    pub async fn sweep_wallet(&self, address: &str) -> Result<Vec<TxSet>, WalletError> {
        self.sweep_unlocked(&TxConfig::new().with_address(address)).await
    }

    /// Sweep every unlocked output worth less than `below_amount`, one set
    /// per account that has any.
    pub async fn sweep_dust(&self, address: &str, below_amount: u64) -> Result<Vec<TxSet>, WalletError> {
        self.sweep_unlocked(&TxConfig::new().with_address(address).with_below_amount(below_amount))
            .await
    }

    /// Sweep the single output identified by the config's key image.
    pub async fn sweep_output(&self, config: &TxConfig) -> Result<TxSet, WalletError> {
        self.shared.check_open()?;
        config.validate_sweep_output()?;
        let daemon = self.shared.daemon()?;

        let key_image = config.key_image().unwrap_or_default();
        let output = self
            .shared
            .read_state()?
            .spendable_outputs(None, &[])
            .into_iter()
            .find(|o| o.key_image.as_deref() == Some(key_image))
            .ok_or_else(|| WalletError::invalid(format!("No unlocked output with key image {}", key_image)))?;

        let sets = self.construct(ConstructionKind::SweepOutput, config, vec![output])?;
        let set = exactly_one(sets)?;
        self.finish_sweep(&daemon, config, set).await
    }

    fn sweep_scopes(&self, config: &TxConfig) -> Result<Vec<Scope>, WalletError> {
        let state = self.shared.read_state()?;
        let accounts: Vec<u32> = match config.account_index() {
            Some(a) if state.has_account(a) => vec![a],
            Some(a) => return Err(WalletError::invalid(format!("No account at index {}", a))),
            None => (0..state.num_accounts()).collect(),
        };

        let below = config.below_amount();
        let unlocked = |a: u32, subs: &[u32]| -> u64 {
            state
                .spendable_outputs(Some(a), subs)
                .iter()
                .filter(|o| sweepable(o, below))
                .map(|o| o.amount)
                .sum()
        };

        let mut scopes = Vec::new();
        for a in accounts {
            let subs = config.subaddress_indices().to_vec();
            for s in &subs {
                if state.address(a, *s).is_none() {
                    return Err(WalletError::invalid(format!("No subaddress at index ({}, {})", a, s)));
                }
            }
            if config.sweep_each_subaddress() {
                let candidates = if subs.is_empty() { state.subaddress_indices(a)? } else { subs };
                scopes.extend(
                    candidates
                        .into_iter()
                        .filter(|s| unlocked(a, &[*s]) > 0)
                        .map(|s| (a, vec![s])),
                );
            } else if unlocked(a, &subs) > 0 {
                scopes.push((a, subs));
            }
        }
        Ok(scopes)
    }

    async fn sweep_scope(
        &self,
        daemon: &DaemonRpc,
        config: &TxConfig,
        account_index: u32,
        subaddress_indices: Vec<u32>,
    ) -> Result<TxSet, WalletError> {
        let below = config.below_amount();
        let inputs: Vec<_> = self
            .shared
            .read_state()?
            .spendable_outputs(Some(account_index), &subaddress_indices)
            .into_iter()
            .filter(|o| sweepable(o, below))
            .collect();
        let scoped = config
            .clone()
            .with_account_index(account_index)
            .with_subaddress_indices(subaddress_indices.clone());
        let kind = ConstructionKind::Sweep {
            account_index,
            subaddress_indices,
        };
        let sets = self.construct(kind, &scoped, inputs)?;
        let set = exactly_one(sets)?;
        self.finish_sweep(daemon, config, set).await
    }

    async fn finish_sweep(&self, daemon: &DaemonRpc, config: &TxConfig, mut set: TxSet) -> Result<TxSet, WalletError> {
        let requested = config.do_not_relay();
        set.update_txs(|txs| {
            for tx in txs.iter_mut() {
                tx.do_not_relay = Some(requested);
                tx.is_relayed = Some(false);
            }
        });
        if requested {
            return Ok(set);
        }
        self.relay_set(daemon, set, config.note()).await
    }

    // =========================================================================
    // Relay and sign
    // =========================================================================

    /// Relay previously created transactions. Returns their hashes.
    pub async fn relay_txs(&self, txs: &[TxWallet]) -> Result<Vec<String>, WalletError> {
        self.shared.check_open()?;
        if txs.is_empty() {
            return Err(WalletError::invalid("Must provide at least one transaction to relay"));
        }
        for tx in txs {
            if tx.full_hex.as_deref().map_or(true, str::is_empty) {
                return Err(WalletError::invalid(format!("Transaction {} has no hex to relay", tx.hash)));
            }
        }
        let daemon = self.shared.daemon()?;
        let relayed = self.relay(&daemon, txs.to_vec(), None).await?;
        Ok(relayed.into_iter().map(|tx| tx.hash).collect())
    }

    pub async fn relay_tx(&self, tx: &TxWallet) -> Result<String, WalletError> {
        let mut hashes = self.relay_txs(std::slice::from_ref(tx)).await?;
        hashes
            .pop()
            .ok_or_else(|| WalletError::Internal("relay returned no hash".into()))
    }

    /// Sign a set's unsigned transactions through the core.
    pub fn sign_tx_set(&self, set: &TxSet) -> Result<TxSet, WalletError> {
        self.shared.check_open()?;
        let unsigned = set
            .unsigned_tx_hex
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| WalletError::invalid("Transaction set has no unsigned hex"))?;
        let mut signed = TxSet::new(Vec::new());
        signed.signed_tx_hex = Some(self.shared.core.sign(unsigned)?);
        let mut out = set.clone();
        out.merge(signed)?;
        Ok(out)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn construct(
        &self,
        kind: ConstructionKind,
        config: &TxConfig,
        inputs: Vec<OutputWallet>,
    ) -> Result<Vec<TxSet>, WalletError> {
        let height = self.shared.read_state()?.sync_height();
        let request = ConstructionRequest {
            kind,
            config: config.clone().with_do_not_relay(true),
            inputs,
            height,
        };
        let sets = self.shared.core.construct(&request)?;
        for tx in sets.iter().flat_map(|s| s.txs()) {
            if !tx.has_valid_hash() {
                return Err(WalletError::Internal(format!("core built tx with invalid hash {:?}", tx.hash)));
            }
        }
        Ok(sets)
    }

    async fn relay_set(&self, daemon: &DaemonRpc, mut set: TxSet, note: Option<&str>) -> Result<TxSet, WalletError> {
        let relayed = self.relay(daemon, set.txs().to_vec(), note).await?;
        set.update_txs(|txs| *txs = relayed);
        Ok(set)
    }

    /// Broadcast `txs` in order and merge the ones that went out into state
    /// as pool transactions. Stops at the first rejection.
    async fn relay(
        &self,
        daemon: &DaemonRpc,
        txs: Vec<TxWallet>,
        note: Option<&str>,
    ) -> Result<Vec<TxWallet>, WalletError> {
        let mut relayed = Vec::with_capacity(txs.len());
        let mut failure = None;
        for mut tx in txs {
            let Some(hex) = tx.full_hex.clone() else {
                failure = Some(WalletError::Internal(format!("tx {} has no hex to relay", tx.hash)));
                break;
            };
            match daemon.send_raw_transaction(&hex, false).await {
                Ok(_) => {
                    log::info!("relayed tx {}", tx.hash);
                    tx.is_relayed = Some(true);
                    tx.in_pool = Some(true);
                    tx.is_confirmed = Some(false);
                    tx.do_not_relay = Some(false);
                    relayed.push(tx);
                }
                Err(e) => {
                    log::warn!("relay of tx {} failed: {}", tx.hash, e);
                    failure = Some(e.into());
                    break;
                }
            }
        }

        if !relayed.is_empty() {
            self.record_relayed(&relayed, note)?;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(relayed),
        }
    }

    fn record_relayed(&self, relayed: &[TxWallet], note: Option<&str>) -> Result<(), WalletError> {
        let pending = {
            let mut state = self.shared.write_state()?;
            let before = state.balances(None, None);
            state.apply(relayed.to_vec(), self.shared.core.as_ref())?;
            if let Some(note) = note {
                for tx in relayed {
                    state.set_tx_note(&tx.hash, note);
                }
            }
            let after = state.balances(None, None);
            Pending {
                balances: (after != before).then_some(after),
                ..Default::default()
            }
        };
        pending.deliver(&self.shared.listeners.snapshot());
        Ok(())
    }
}

/// Whether `output` is in a sweep limited to amounts below `below`.
fn sweepable(output: &OutputWallet, below: Option<u64>) -> bool {
    below.map_or(true, |b| output.amount < b)
}

fn no_split(config: &TxConfig) -> Result<TxConfig, WalletError> {
    if config.can_split() == Some(true) {
        return Err(WalletError::invalid(
            "Cannot request split transactions with create_tx() which prevents splitting; use create_txs() instead",
        ));
    }
    Ok(config.clone().with_can_split(false))
}

fn single_tx(set: TxSet) -> Result<TxWallet, WalletError> {
    let mut txs = set.into_txs();
    if txs.len() != 1 {
        return Err(WalletError::Internal(format!(
            "expected exactly one transaction, core built {}",
            txs.len()
        )));
    }
    txs.pop()
        .ok_or_else(|| WalletError::Internal("expected exactly one transaction".into()))
}

/// A scope must produce exactly one set.
fn exactly_one(mut sets: Vec<TxSet>) -> Result<TxSet, WalletError> {
    if sets.len() != 1 {
        return Err(WalletError::Internal(format!(
            "expected exactly one transaction set per sweep, core built {}",
            sets.len()
        )));
    }
    sets.pop()
        .ok_or_else(|| WalletError::Internal("expected exactly one transaction set".into()))
}

fn single_set(mut sets: Vec<TxSet>, empty: impl FnOnce() -> String) -> Result<TxSet, WalletError> {
    match sets.len() {
        0 => Err(WalletError::invalid(empty())),
        1 => sets
            .pop()
            .ok_or_else(|| WalletError::Internal("expected exactly one transaction set".into())),
        n => Err(WalletError::Internal(format!("expected one transaction set, got {}", n))),
    }
}

/// Fold the sets of one construction into the first.
fn merge_sets(sets: Vec<TxSet>) -> Result<TxSet, WalletError> {
    let mut iter = sets.into_iter();
    let mut first = iter
        .next()
        .ok_or_else(|| WalletError::Internal("core built no transactions".into()))?;
    for set in iter {
        first.merge(set)?;
    }
    if first.txs().is_empty() {
        return Err(WalletError::Internal("core built no transactions".into()));
    }
    Ok(first)
}
