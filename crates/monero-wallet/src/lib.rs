//! Monero wallet layer.
//!
//! Keeps a reconciled view of the wallet's transactions, transfers and
//! outputs, synchronizes it against a node, answers queries over it and
//! orchestrates transaction construction. Cryptography lives behind the
//! [`WalletCore`] trait; node access goes through `monero-rpc`.
//!
//! # Example
//!
//! ```ignore
//! use monero_wallet::{Wallet, WalletConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = WalletConfig::from_json_str(r#"{"daemon": {"uri": "http://localhost:38081"}}"#).unwrap();
//!     let wallet = Wallet::new(config, Arc::new(my_core())).unwrap();
//!     let result = wallet.sync(None, None).await.unwrap();
//!     println!("fetched {} blocks", result.num_blocks_fetched);
//! }
//! ```

pub mod error;
pub mod config;
pub mod model;
pub mod reconcile;
pub mod filter;
pub mod core;
pub mod state;
pub mod listener;
pub mod sync;
pub mod wallet;
pub mod send;

pub use config::{Network, SyncConfig, WalletConfig};
pub use core::{BlockContext, ConstructionKind, ConstructionRequest, WalletCore};
pub use error::WalletError;
pub use filter::Filter;
pub use listener::{EventForwarder, ListenerRegistry, SyncEvent, WalletListener};
pub use model::{
    Account, Destination, OutputQuery, OutputWallet, Subaddress, Transfer, TransferKind,
    TransferQuery, TxConfig, TxPriority, TxQuery, TxSet, TxSetId, TxWallet,
};
pub use sync::{SyncEngine, SyncResult, SyncStatus};
pub use wallet::Wallet;

pub use monero_rpc::{DaemonRpc, RpcConnection, RpcError};
