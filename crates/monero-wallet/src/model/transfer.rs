use serde::{Deserialize, Serialize};

/// Payment target. `amount` is `None` for sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub address: String,
    pub amount: Option<u64>,
}

impl Destination {
    pub fn new(address: &str, amount: u64) -> Self {
        Self {
            address: address.to_string(),
            amount: Some(amount),
        }
    }

    /// Destination that receives everything swept.
    pub fn sweep_to(address: &str) -> Self {
        Self {
            address: address.to_string(),
            amount: None,
        }
    }
}

/// Direction-specific transfer data. A transfer is one or the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum TransferKind {
    Incoming {
        subaddress_index: u32,
        address: Option<String>,
    },
    Outgoing {
        subaddress_indices: Vec<u32>,
        destinations: Vec<Destination>,
    },
}

/// Movement of funds into or out of one account within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub tx_hash: Option<String>,
    pub account_index: u32,
    pub amount: u64,
    pub kind: TransferKind,
}

/// Identity of a transfer within its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub account_index: u32,
    pub subaddress_index: Option<u32>,
    pub amount: u64,
    pub incoming: bool,
}

impl Transfer {
    pub fn incoming(account_index: u32, subaddress_index: u32, amount: u64) -> Self {
        Self {
            tx_hash: None,
            account_index,
            amount,
            kind: TransferKind::Incoming {
                subaddress_index,
                address: None,
            },
        }
    }

    pub fn outgoing(account_index: u32, amount: u64, destinations: Vec<Destination>) -> Self {
        Self {
            tx_hash: None,
            account_index,
            amount,
            kind: TransferKind::Outgoing {
                subaddress_indices: Vec::new(),
                destinations,
            },
        }
    }

    pub fn is_incoming(&self) -> bool {
        matches!(self.kind, TransferKind::Incoming { .. })
    }

    pub fn is_outgoing(&self) -> bool {
        !self.is_incoming()
    }

    /// Receiving subaddress of an incoming transfer.
    pub fn subaddress_index(&self) -> Option<u32> {
        match &self.kind {
            TransferKind::Incoming { subaddress_index, .. } => Some(*subaddress_index),
            TransferKind::Outgoing { .. } => None,
        }
    }

    /// Subaddresses an outgoing transfer spent from, or the receiving one.
    pub fn subaddress_indices(&self) -> Vec<u32> {
        match &self.kind {
            TransferKind::Incoming { subaddress_index, .. } => vec![*subaddress_index],
            TransferKind::Outgoing { subaddress_indices, .. } => subaddress_indices.clone(),
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        match &self.kind {
            TransferKind::Outgoing { destinations, .. } => destinations,
            TransferKind::Incoming { .. } => &[],
        }
    }

    pub fn key(&self) -> TransferKey {
        TransferKey {
            account_index: self.account_index,
            subaddress_index: self.subaddress_index(),
            amount: self.amount,
            incoming: self.is_incoming(),
        }
    }
}
