//! Main Wallet struct.
//!
//! Ties together the node connection, wallet state, the sync engine and the
//! listener registry behind a single high-level API. Transaction
//! construction lives in [`crate::send`].

use crate::config::WalletConfig;
use crate::core::WalletCore;
use crate::error::WalletError;
use crate::filter::{select_outputs, select_transfers, select_txs};
use crate::listener::{ListenerRegistry, WalletListener};
use crate::model::{Account, OutputQuery, OutputWallet, Subaddress, Transfer, TransferQuery, TxQuery, TxWallet};
use crate::state::WalletState;
use crate::sync::{BackgroundSync, SyncEngine, SyncResult, SyncStatus};
use monero_rpc::{DaemonRpc, RpcConfig, RpcConnection};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// State shared between the wallet handle and its background sync task.
pub(crate) struct Shared {
    pub config: WalletConfig,
    pub core: Arc<dyn WalletCore>,
    state: RwLock<WalletState>,
    daemon: RwLock<Option<DaemonRpc>>,
    pub listeners: ListenerRegistry,
    /// Serializes sync sessions of this wallet.
    pub sync_lock: tokio::sync::Mutex<()>,
    status: RwLock<SyncStatus>,
    /// Bumped to interrupt the running session at its next block.
    interrupt: AtomicU64,
    closed: AtomicBool,
    background: Mutex<Option<BackgroundSync>>,
}

impl Shared {
    pub fn check_open(&self) -> Result<(), WalletError> {
        if self.is_closed() {
            return Err(WalletError::ClosedResource);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn daemon(&self) -> Result<DaemonRpc, WalletError> {
        self.daemon.read()?.clone().ok_or(WalletError::NotConnected)
    }

    pub fn read_state(&self) -> Result<RwLockReadGuard<'_, WalletState>, WalletError> {
        Ok(self.state.read()?)
    }

    pub fn write_state(&self) -> Result<RwLockWriteGuard<'_, WalletState>, WalletError> {
        Ok(self.state.write()?)
    }

    pub fn status(&self) -> SyncStatus {
        self.status.read().map(|s| *s).unwrap_or_default()
    }

    pub fn set_status(&self, status: SyncStatus) {
        if let Ok(mut s) = self.status.write() {
            if *s != status {
                log::debug!("sync status {:?} -> {:?}", *s, status);
                *s = status;
            }
        }
    }

    pub fn interrupt_generation(&self) -> u64 {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn interrupt(&self) {
        self.interrupt.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_background(&self) -> Result<bool, WalletError> {
        let running = self.background.lock()?.take();
        match running {
            Some(bg) => {
                bg.stop();
                self.interrupt();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// High-level wallet.
///
/// Every method fails with [`WalletError::ClosedResource`] once the wallet
/// has been closed.
pub struct Wallet {
    pub(crate) shared: Arc<Shared>,
}

impl Wallet {
    /// Create a wallet over `core`, connecting to `config.daemon` if set.
    pub fn new(config: WalletConfig, core: Arc<dyn WalletCore>) -> Result<Self, WalletError> {
        config.validate()?;
        let state = WalletState::new(
            config.restore_height,
            config.sync.unlock_confirmations,
            core.as_ref(),
        )?;
        let daemon = match &config.daemon {
            Some(conn) => Some(connect(&config, conn.clone())?),
            None => None,
        };
        log::info!(
            "opened {:?} wallet at height {}",
            config.network,
            config.restore_height
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                core,
                state: RwLock::new(state),
                daemon: RwLock::new(daemon),
                listeners: ListenerRegistry::default(),
                sync_lock: tokio::sync::Mutex::new(()),
                status: RwLock::new(SyncStatus::Unsynced),
                interrupt: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                background: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.shared.config
    }

    // =========================================================================
    // Daemon connection
    // =========================================================================

    /// Point the wallet at a node, or disconnect with `None`.
    pub fn set_daemon_connection(&self, connection: Option<RpcConnection>) -> Result<(), WalletError> {
        self.shared.check_open()?;
        let daemon = match connection {
            Some(conn) => Some(connect(&self.shared.config, conn)?),
            None => None,
        };
        self.set_daemon(daemon)
    }

    /// Use an already built client, e.g. one over a custom transport.
    pub fn set_daemon(&self, daemon: Option<DaemonRpc>) -> Result<(), WalletError> {
        self.shared.check_open()?;
        let connected = daemon.is_some();
        match &daemon {
            Some(d) => log::info!("using daemon {}", d.connection()),
            None => log::info!("disconnected from daemon"),
        }
        *self.shared.daemon.write()? = daemon;
        if !connected {
            self.shared.set_status(SyncStatus::Unsynced);
        }
        Ok(())
    }

    pub fn daemon_connection(&self) -> Result<Option<RpcConnection>, WalletError> {
        self.shared.check_open()?;
        Ok(self.shared.daemon.read()?.as_ref().map(|d| d.connection().clone()))
    }

    /// Whether a node is set and answers.
    pub async fn is_connected_to_daemon(&self) -> Result<bool, WalletError> {
        self.shared.check_open()?;
        let daemon = match self.shared.daemon() {
            Ok(d) => d,
            Err(WalletError::NotConnected) => return Ok(false),
            Err(e) => return Err(e),
        };
        match daemon.get_version().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_connection() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_daemon_height(&self) -> Result<u64, WalletError> {
        self.shared.check_open()?;
        Ok(self.shared.daemon()?.get_height().await?)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Number of blocks processed; the next height to scan.
    pub fn get_height(&self) -> Result<u64, WalletError> {
        self.shared.check_open()?;
        Ok(self.shared.read_state()?.sync_height())
    }

    pub fn sync_status(&self) -> Result<SyncStatus, WalletError> {
        self.shared.check_open()?;
        Ok(self.shared.status())
    }

    /// Sync to the node's tip once. `listener` gets progress for this call
    /// only; registered listeners get every notification.
    pub async fn sync(
        &self,
        start_height: Option<u64>,
        listener: Option<Arc<dyn WalletListener>>,
    ) -> Result<SyncResult, WalletError> {
        SyncEngine::sync(&self.shared, start_height, listener.as_ref()).await
    }

    /// Sync in the background every `period` (default from config). Calling
    /// again while running triggers an immediate session.
    pub fn start_syncing(&self, period: Option<Duration>) -> Result<(), WalletError> {
        self.shared.check_open()?;
        self.shared.daemon()?;
        let period = period.unwrap_or_else(|| self.shared.config.sync.period());
        if period.is_zero() {
            return Err(WalletError::invalid("Sync period must be positive"));
        }

        let mut background = self.shared.background.lock()?;
        if let Some(bg) = background.as_ref().filter(|bg| bg.is_running()) {
            bg.wake();
            return Ok(());
        }
        *background = Some(SyncEngine::spawn_background(&self.shared, period)?);
        Ok(())
    }

    /// Stop the background loop. A no-op when it is not running.
    pub fn stop_syncing(&self) -> Result<(), WalletError> {
        self.shared.check_open()?;
        if self.shared.stop_background()? {
            log::info!("stopping background sync");
        }
        Ok(())
    }

    pub fn is_syncing(&self) -> bool {
        self.shared
            .background
            .lock()
            .map(|bg| bg.as_ref().is_some_and(BackgroundSync::is_running))
            .unwrap_or(false)
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn add_listener(&self, listener: Arc<dyn WalletListener>) -> Result<(), WalletError> {
        self.shared.check_open()?;
        self.shared.listeners.add(listener)
    }

    /// Returns whether `listener` was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn WalletListener>) -> Result<bool, WalletError> {
        self.shared.check_open()?;
        self.shared.listeners.remove(listener)
    }

    pub fn get_listeners(&self) -> Result<Vec<Arc<dyn WalletListener>>, WalletError> {
        self.shared.check_open()?;
        Ok(self.shared.listeners.snapshot())
    }

    // =========================================================================
    // Accounts and addresses
    // =========================================================================

    pub fn get_primary_address(&self) -> Result<String, WalletError> {
        self.get_address(0, 0)
    }

    pub fn get_address(&self, account_index: u32, subaddress_index: u32) -> Result<String, WalletError> {
        self.shared.check_open()?;
        let state = self.shared.read_state()?;
        state
            .address(account_index, subaddress_index)
            .map(str::to_string)
            .ok_or_else(|| {
                WalletError::invalid(format!(
                    "No subaddress at index ({}, {})",
                    account_index, subaddress_index
                ))
            })
    }

    pub fn create_account(&self, label: Option<&str>) -> Result<Account, WalletError> {
        self.shared.check_open()?;
        let mut state = self.shared.write_state()?;
        let index = state.create_account(label, self.shared.core.as_ref())?;
        state.account(index, false)
    }

    pub fn create_subaddress(&self, account_index: u32, label: Option<&str>) -> Result<Subaddress, WalletError> {
        self.shared.check_open()?;
        let mut state = self.shared.write_state()?;
        let index = state.create_subaddress(account_index, label, self.shared.core.as_ref())?;
        state.subaddress(account_index, index)
    }

    pub fn get_accounts(&self, include_subaddresses: bool, tag: Option<&str>) -> Result<Vec<Account>, WalletError> {
        self.shared.check_open()?;
        self.shared.read_state()?.accounts(include_subaddresses, tag)
    }

    pub fn get_account(&self, account_index: u32, include_subaddresses: bool) -> Result<Account, WalletError> {
        self.shared.check_open()?;
        self.shared.read_state()?.account(account_index, include_subaddresses)
    }

    /// Subaddresses of an account, all of them when `indices` is empty.
    pub fn get_subaddresses(&self, account_index: u32, indices: &[u32]) -> Result<Vec<Subaddress>, WalletError> {
        self.shared.check_open()?;
        let state = self.shared.read_state()?;
        let all = state.subaddress_indices(account_index)?;
        let wanted = if indices.is_empty() { all } else { indices.to_vec() };
        wanted
            .into_iter()
            .map(|s| state.subaddress(account_index, s))
            .collect()
    }

    pub fn get_subaddress(&self, account_index: u32, subaddress_index: u32) -> Result<Subaddress, WalletError> {
        self.shared.check_open()?;
        self.shared.read_state()?.subaddress(account_index, subaddress_index)
    }

    pub fn set_subaddress_label(&self, account_index: u32, subaddress_index: u32, label: &str) -> Result<(), WalletError> {
        self.shared.check_open()?;
        self.shared
            .write_state()?
            .set_subaddress_label(account_index, subaddress_index, label)
    }

    pub fn set_account_tag(&self, account_index: u32, tag: Option<&str>) -> Result<(), WalletError> {
        self.shared.check_open()?;
        self.shared.write_state()?.set_account_tag(account_index, tag)
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Balance of the wallet, an account, or one subaddress of an account.
    pub fn get_balance(&self, account_index: Option<u32>, subaddress_index: Option<u32>) -> Result<u64, WalletError> {
        Ok(self.balances(account_index, subaddress_index)?.0)
    }

    pub fn get_unlocked_balance(
        &self,
        account_index: Option<u32>,
        subaddress_index: Option<u32>,
    ) -> Result<u64, WalletError> {
        Ok(self.balances(account_index, subaddress_index)?.1)
    }

    fn balances(&self, account_index: Option<u32>, subaddress_index: Option<u32>) -> Result<(u64, u64), WalletError> {
        self.shared.check_open()?;
        if subaddress_index.is_some() && account_index.is_none() {
            return Err(WalletError::invalid("Must provide account index with subaddress index"));
        }
        let state = self.shared.read_state()?;
        if let Some(a) = account_index {
            if !state.has_account(a) {
                return Err(WalletError::invalid(format!("No account at index {}", a)));
            }
        }
        Ok(state.balances(account_index, subaddress_index))
    }

    // =========================================================================
    // Transactions, transfers and outputs
    // =========================================================================

    pub fn get_txs(&self, query: Option<&TxQuery>) -> Result<Vec<TxWallet>, WalletError> {
        self.shared.check_open()?;
        let default = TxQuery::new();
        let query = query.unwrap_or(&default);
        let state = self.shared.read_state()?;
        let found = select_txs(state.txs(), query)?;
        Ok(found.iter().map(|tx| state.present(tx)).collect())
    }

    pub fn get_tx(&self, hash: &str) -> Result<Option<TxWallet>, WalletError> {
        let mut txs = self.get_txs(Some(&TxQuery::new().with_hash(hash)))?;
        Ok(txs.pop())
    }

    pub fn get_transfers(&self, query: Option<&TransferQuery>) -> Result<Vec<Transfer>, WalletError> {
        self.shared.check_open()?;
        let default = TransferQuery::new();
        let query = query.unwrap_or(&default);
        select_transfers(self.shared.read_state()?.txs(), query)
    }

    /// Incoming transfers. Fails before reading state when `query` excludes
    /// incoming transfers.
    pub fn get_incoming_transfers(&self, query: Option<&TransferQuery>) -> Result<Vec<Transfer>, WalletError> {
        self.shared.check_open()?;
        let query = query.cloned().unwrap_or_default().incoming_only()?;
        self.get_transfers(Some(&query))
    }

    /// Outgoing transfers. Fails before reading state when `query` excludes
    /// outgoing transfers.
    pub fn get_outgoing_transfers(&self, query: Option<&TransferQuery>) -> Result<Vec<Transfer>, WalletError> {
        self.shared.check_open()?;
        let query = query.cloned().unwrap_or_default().outgoing_only()?;
        self.get_transfers(Some(&query))
    }

    pub fn get_outputs(&self, query: Option<&OutputQuery>) -> Result<Vec<OutputWallet>, WalletError> {
        self.shared.check_open()?;
        let default = OutputQuery::new();
        let query = query.unwrap_or(&default);
        select_outputs(self.shared.read_state()?.txs(), query)
    }

    // =========================================================================
    // Notes
    // =========================================================================

    pub fn set_tx_note(&self, hash: &str, note: &str) -> Result<(), WalletError> {
        self.shared.check_open()?;
        self.shared.write_state()?.set_tx_note(hash, note);
        Ok(())
    }

    pub fn get_tx_note(&self, hash: &str) -> Result<Option<String>, WalletError> {
        self.shared.check_open()?;
        Ok(self.shared.read_state()?.tx_note(hash).map(str::to_string))
    }

    pub fn get_tx_notes(&self, hashes: &[String]) -> Result<Vec<Option<String>>, WalletError> {
        self.shared.check_open()?;
        let state = self.shared.read_state()?;
        Ok(hashes.iter().map(|h| state.tx_note(h).map(str::to_string)).collect())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop syncing and release the wallet. Waits for an in-flight session
    /// to reach a block boundary. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), WalletError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.stop_background()?;
        self.shared.interrupt();
        let _session = self.shared.sync_lock.lock().await;
        log::info!("wallet closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.shared.config.network)
            .field("status", &self.shared.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn connect(config: &WalletConfig, connection: RpcConnection) -> Result<DaemonRpc, WalletError> {
    let mut rpc = RpcConfig {
        connection,
        ..Default::default()
    };
    if config.rpc_timeout_ms > 0 {
        rpc.timeout = Duration::from_millis(config.rpc_timeout_ms);
    }
    Ok(DaemonRpc::with_config(rpc)?)
}
