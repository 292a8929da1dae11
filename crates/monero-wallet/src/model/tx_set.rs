//! Transaction sets.
//!
//! A set groups transactions built together and carries the material needed
//! to finish them: unsigned, signed or multisig hex.

use crate::error::WalletError;
use crate::model::tx::TxWallet;
use crate::reconcile::{merge_tx, reconcile};
use serde::{Deserialize, Serialize};

/// Identifier transactions use to name their set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxSetId(u64);

impl TxSetId {
    pub fn random() -> Self {
        TxSetId(rand::random())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSet {
    id: TxSetId,
    txs: Vec<TxWallet>,
    pub signed_tx_hex: Option<String>,
    pub unsigned_tx_hex: Option<String>,
    pub multisig_tx_hex: Option<String>,
}

impl Default for TxSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TxSet {
    /// New set owning `txs`. Each tx is re-pointed at the set.
    pub fn new(txs: Vec<TxWallet>) -> Self {
        let id = TxSetId::random();
        let txs = txs
            .into_iter()
            .map(|mut tx| {
                tx.tx_set = Some(id);
                tx
            })
            .collect();
        Self {
            id,
            txs,
            signed_tx_hex: None,
            unsigned_tx_hex: None,
            multisig_tx_hex: None,
        }
    }

    pub fn id(&self) -> TxSetId {
        self.id
    }

    pub fn txs(&self) -> &[TxWallet] {
        &self.txs
    }

    pub fn into_txs(self) -> Vec<TxWallet> {
        self.txs
    }

    /// Mutable access for callers that adjust per-tx flags. Set membership
    /// is restored after the closure runs.
    pub fn update_txs<F: FnOnce(&mut Vec<TxWallet>)>(&mut self, f: F) {
        f(&mut self.txs);
        for tx in &mut self.txs {
            tx.tx_set = Some(self.id);
        }
    }

    /// Merge `other` into this set.
    ///
    /// Hex blobs reconcile like any other field. Transactions merge by hash
    /// and end up pointing at this set. On conflict `self` is unchanged.
    pub fn merge(&mut self, other: TxSet) -> Result<(), WalletError> {
        let signed = reconcile("signed_tx_hex", &self.signed_tx_hex, &other.signed_tx_hex)?;
        let unsigned = reconcile("unsigned_tx_hex", &self.unsigned_tx_hex, &other.unsigned_tx_hex)?;
        let multisig = reconcile("multisig_tx_hex", &self.multisig_tx_hex, &other.multisig_tx_hex)?;

        let mut txs = self.txs.clone();
        for mut tx in other.txs {
            tx.tx_set = Some(self.id);
            merge_tx(&mut txs, tx)?;
        }

        self.signed_tx_hex = signed;
        self.unsigned_tx_hex = unsigned;
        self.multisig_tx_hex = multisig;
        self.txs = txs;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutputWallet;

    fn hash(n: u8) -> String {
        hex::encode([n; 32])
    }

    #[test]
    fn test_new_points_txs_at_set() {
        let set = TxSet::new(vec![TxWallet::new(&hash(1)), TxWallet::new(&hash(2))]);
        assert!(set.txs().iter().all(|tx| tx.tx_set == Some(set.id())));
    }

    #[test]
    fn test_merge_repoints_and_unions() {
        let mut a = TxSet::new(vec![TxWallet::new(&hash(1))]);
        a.unsigned_tx_hex = Some("u".into());
        let mut b = TxSet::new(vec![
            TxWallet::new(&hash(1)).with_input(OutputWallet::new(0, 0, 5).with_key_image("k")),
            TxWallet::new(&hash(2)),
        ]);
        b.signed_tx_hex = Some("s".into());
        let other_id = b.id();

        a.merge(b).unwrap();
        assert_eq!(a.txs().len(), 2);
        assert_eq!(a.unsigned_tx_hex.as_deref(), Some("u"));
        assert_eq!(a.signed_tx_hex.as_deref(), Some("s"));
        assert_eq!(a.txs()[0].inputs.len(), 1);
        for tx in a.txs() {
            assert_eq!(tx.tx_set, Some(a.id()));
            assert_ne!(tx.tx_set, Some(other_id));
        }
    }

    #[test]
    fn test_merge_conflicting_hex_leaves_set_untouched() {
        let mut a = TxSet::new(vec![TxWallet::new(&hash(1))]);
        a.signed_tx_hex = Some("aa".into());
        let mut b = TxSet::new(vec![TxWallet::new(&hash(2))]);
        b.signed_tx_hex = Some("bb".into());

        let before = a.clone();
        let err = a.merge(b).unwrap_err();
        assert!(matches!(err, WalletError::MergeConflict { field: "signed_tx_hex" }));
        assert_eq!(a, before);
    }

    #[test]
    fn test_update_txs_keeps_membership() {
        let mut set = TxSet::new(vec![TxWallet::new(&hash(1))]);
        set.update_txs(|txs| {
            txs[0].tx_set = None;
            txs[0].do_not_relay = Some(false);
        });
        assert_eq!(set.txs()[0].tx_set, Some(set.id()));
        assert_eq!(set.txs()[0].do_not_relay, Some(false));
    }
}
