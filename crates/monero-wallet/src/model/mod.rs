//! Wallet data model.
//!
//! Transactions own their transfers and outputs. Transfers and outputs point
//! back at their transaction by hash, and transactions point at their set by
//! [`TxSetId`], so the graph has no ownership cycles.

pub mod account;
pub mod output;
pub mod query;
pub mod transfer;
pub mod tx;
pub mod tx_config;
pub mod tx_set;

pub use account::{Account, Subaddress};
pub use output::OutputWallet;
pub use query::{OutputQuery, TransferQuery, TxQuery};
pub use transfer::{Destination, Transfer, TransferKind};
pub use tx::TxWallet;
pub use tx_config::{TxConfig, TxPriority};
pub use tx_set::{TxSet, TxSetId};
