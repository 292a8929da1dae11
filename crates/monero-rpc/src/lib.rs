//! Monero node RPC transport.
//!
//! Provides a [`Transport`] abstraction with an HTTP implementation for the
//! daemon's JSON-RPC, plain JSON and portable storage binary endpoints, plus a
//! typed [`DaemonRpc`] client on top of it.
//!
//! # Example
//!
//! ```ignore
//! use monero_rpc::{DaemonRpc, RpcConnection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let daemon = DaemonRpc::new(RpcConnection::new("http://localhost:38081")).unwrap();
//!     let height = daemon.get_height().await.unwrap();
//!     println!("Height: {}", height);
//! }
//! ```

pub mod error;
pub mod connection;
pub mod transport;
pub mod client;
pub mod daemon;
pub mod portable_storage;

pub use client::{RpcClient, RpcConfig};
pub use connection::RpcConnection;
pub use daemon::DaemonRpc;
pub use error::RpcError;
pub use transport::Transport;

