//! Wallet notifications.
//!
//! Listeners are called synchronously from the sync task, outside any state
//! lock. A listener that needs to do slow work should hand events off, for
//! example through [`EventForwarder`].

use crate::error::WalletError;
use crate::model::OutputWallet;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Observer of wallet activity. Every method defaults to a no-op.
pub trait WalletListener: Send + Sync {
    /// One block processed. `start_height <= height < end_height`.
    fn on_sync_progress(
        &self,
        _height: u64,
        _start_height: u64,
        _end_height: u64,
        _percent_done: f64,
        _message: &str,
    ) {
    }

    fn on_new_block(&self, _height: u64) {}

    fn on_balances_changed(&self, _balance: u64, _unlocked_balance: u64) {}

    /// A received output was confirmed.
    fn on_output_received(&self, _output: &OutputWallet) {}

    /// A spend of a wallet output was confirmed. Pool spends are not
    /// reported, so totals built from these callbacks lag the wallet balance
    /// while an outgoing transaction is unconfirmed.
    fn on_output_spent(&self, _output: &OutputWallet) {}

    /// A background sync session failed.
    fn on_sync_error(&self, _message: &str) {}
}

/// Sync notifications as values.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Progress {
        height: u64,
        start_height: u64,
        end_height: u64,
        percent_done: f64,
        message: String,
    },
    NewBlock { height: u64 },
    BalancesChanged { balance: u64, unlocked_balance: u64 },
    OutputReceived(OutputWallet),
    OutputSpent(OutputWallet),
    Error(String),
}

/// Listener that queues every notification on an unbounded channel.
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl EventForwarder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SyncEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl WalletListener for EventForwarder {
    fn on_sync_progress(&self, height: u64, start_height: u64, end_height: u64, percent_done: f64, message: &str) {
        self.send(SyncEvent::Progress {
            height,
            start_height,
            end_height,
            percent_done,
            message: message.to_string(),
        });
    }

    fn on_new_block(&self, height: u64) {
        self.send(SyncEvent::NewBlock { height });
    }

    fn on_balances_changed(&self, balance: u64, unlocked_balance: u64) {
        self.send(SyncEvent::BalancesChanged { balance, unlocked_balance });
    }

    fn on_output_received(&self, output: &OutputWallet) {
        self.send(SyncEvent::OutputReceived(output.clone()));
    }

    fn on_output_spent(&self, output: &OutputWallet) {
        self.send(SyncEvent::OutputSpent(output.clone()));
    }

    fn on_sync_error(&self, message: &str) {
        self.send(SyncEvent::Error(message.to_string()));
    }
}

/// Persistent per-wallet listeners. Survives sync sessions.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn WalletListener>>>,
}

impl ListenerRegistry {
    pub fn add(&self, listener: Arc<dyn WalletListener>) -> Result<(), WalletError> {
        self.listeners.write()?.push(listener);
        Ok(())
    }

    /// Remove by identity. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn WalletListener>) -> Result<bool, WalletError> {
        let mut l = self.listeners.write()?;
        let before = l.len();
        l.retain(|x| !Arc::ptr_eq(x, listener));
        Ok(l.len() != before)
    }

    /// Copy of the current list so callbacks run without the lock.
    pub fn snapshot(&self) -> Vec<Arc<dyn WalletListener>> {
        self.listeners.read().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Notifications gathered while the state lock was held, delivered after.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    pub received: Vec<OutputWallet>,
    pub spent: Vec<OutputWallet>,
    pub new_block: Option<u64>,
    pub balances: Option<(u64, u64)>,
}

impl Pending {
    /// Deliver in order: outputs, new block, balances.
    pub fn deliver(&self, listeners: &[Arc<dyn WalletListener>]) {
        for l in listeners {
            for o in &self.received {
                l.on_output_received(o);
            }
            for o in &self.spent {
                l.on_output_spent(o);
            }
            if let Some(h) = self.new_block {
                l.on_new_block(h);
            }
            if let Some((balance, unlocked)) = self.balances {
                l.on_balances_changed(balance, unlocked);
            }
        }
    }
}
