//! Blockchain synchronization engine.
//!
//! Fetches blocks from the daemon one height at a time, hands their
//! transactions to the wallet core for scanning, reconciles the resulting
//! fragments into wallet state and notifies listeners.
//!
//! Network I/O happens with no state lock held. Each block is merged under a
//! single write lock, so a block is either fully applied or not at all, and
//! listeners run after the lock is released.

use crate::core::BlockContext;
use crate::error::WalletError;
use crate::listener::{Pending, WalletListener};
use crate::wallet::Shared;
use monero_rpc::{DaemonRpc, RpcError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const PROGRESS_MESSAGE: &str = "Synchronizing";

/// Upper bound on the wait between retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Per-wallet sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Unsynced,
    Syncing,
    Synced,
}

/// Outcome of one sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncResult {
    pub num_blocks_fetched: u64,
    /// Whether any output was confirmed as received.
    pub received_money: bool,
    /// False when the session was interrupted before reaching the tip.
    pub completed: bool,
}

/// Handle to a running background loop.
pub(crate) struct BackgroundSync {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl BackgroundSync {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Ask the loop to run a session now.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Ask the loop to exit. Takes effect at the next block boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// Percent of a session done after `height` was processed.
pub fn percent_done(height: u64, start_height: u64, end_height: u64) -> f64 {
    (height - start_height + 1) as f64 / (end_height - start_height) as f64
}

/// Blockchain sync engine.
pub struct SyncEngine;

impl SyncEngine {
    /// Sync the wallet from `start_height` (default: the sync height) to the
    /// daemon's tip, then reconcile the pool.
    ///
    /// Sessions of one wallet are serialized. `listener` receives progress
    /// for this session only. A session interrupted at a block boundary
    /// returns with `completed == false`; a failed one leaves the wallet
    /// `Unsynced`.
    pub(crate) async fn sync(
        shared: &Shared,
        start_height: Option<u64>,
        listener: Option<&Arc<dyn WalletListener>>,
    ) -> Result<SyncResult, WalletError> {
        shared.check_open()?;
        let daemon = shared.daemon()?;
        let _session = shared.sync_lock.lock().await;
        shared.check_open()?;
        let generation = shared.interrupt_generation();

        let result = Self::run(shared, &daemon, start_height, listener, generation).await;
        if let Err(e) = &result {
            log::debug!("sync session failed: {}", e);
            shared.set_status(SyncStatus::Unsynced);
        }
        result
    }

    async fn run(
        shared: &Shared,
        daemon: &DaemonRpc,
        start_height: Option<u64>,
        listener: Option<&Arc<dyn WalletListener>>,
        generation: u64,
    ) -> Result<SyncResult, WalletError> {
        let sync_config = &shared.config.sync;
        let start = match start_height {
            Some(h) => h,
            None => shared.read_state()?.sync_height(),
        };
        let mut end = with_retry(sync_config, "get_height", || daemon.get_height()).await?;
        let mut result = SyncResult::default();

        if start < end {
            shared.set_status(SyncStatus::Syncing);
            log::info!("syncing blocks {}..{}", start, end);
        }

        let mut height = start;
        while height < end {
            if shared.interrupt_generation() != generation || shared.is_closed() {
                log::info!("sync interrupted before block {}", height);
                let reached = shared.read_state()?.sync_height() >= end;
                shared.set_status(if reached { SyncStatus::Synced } else { SyncStatus::Unsynced });
                return Ok(result);
            }

            let block = with_retry(sync_config, "get_block", || daemon.get_block(height)).await?;
            let mut hashes = Vec::with_capacity(block.tx_hashes.len() + 1);
            if !block.miner_tx_hash.is_empty() {
                hashes.push(block.miner_tx_hash.clone());
            }
            hashes.extend(block.tx_hashes.iter().cloned());
            let entries = with_retry(sync_config, "get_transactions", || {
                daemon.get_transactions(&hashes, true)
            })
            .await?;

            let ctx = BlockContext {
                height,
                hash: block.block_header.hash.clone(),
                prev_hash: block.block_header.prev_hash.clone(),
                timestamp: block.block_header.timestamp,
                miner_tx_hash: block.miner_tx_hash.clone(),
            };
            let fragments: Vec<_> = shared
                .core
                .scan_block(&ctx, &entries)?
                .into_iter()
                .map(|f| f.confirmed_at(ctx.height, &ctx.hash, ctx.timestamp))
                .collect();
            log::debug!("block {}: {} txs, {} wallet fragments", height, entries.len(), fragments.len());

            let pending = {
                let mut state = shared.write_state()?;
                let before = state.balances(None, None);
                let outcome = state.apply(fragments, shared.core.as_ref())?;
                state.advance_sync_height(height + 1);
                let after = state.balances(None, None);
                Pending {
                    received: outcome.received,
                    spent: outcome.spent,
                    new_block: Some(height),
                    balances: (after != before).then_some(after),
                }
            };

            result.num_blocks_fetched += 1;
            result.received_money |= !pending.received.is_empty();

            let listeners = shared.listeners.snapshot();
            pending.deliver(&listeners);
            let percent = percent_done(height, start, end);
            for l in listeners.iter().chain(listener) {
                l.on_sync_progress(height, start, end, percent, PROGRESS_MESSAGE);
            }

            height += 1;
            if height == end {
                // The chain may have grown while we were syncing.
                let latest = with_retry(sync_config, "get_height", || daemon.get_height()).await?;
                end = end.max(latest);
            }
        }

        Self::sync_pool(shared, daemon).await?;
        shared.set_status(SyncStatus::Synced);
        result.completed = true;
        if result.num_blocks_fetched > 0 {
            log::info!(
                "synced {} blocks to height {}",
                result.num_blocks_fetched,
                end
            );
        }
        Ok(result)
    }

    /// Merge pool transactions as unconfirmed and fail pooled txs that
    /// vanished without confirming.
    async fn sync_pool(shared: &Shared, daemon: &DaemonRpc) -> Result<(), WalletError> {
        let sync_config = &shared.config.sync;
        let pool = with_retry(sync_config, "get_transaction_pool", || daemon.get_transaction_pool()).await?;
        let fragments: Vec<_> = shared
            .core
            .scan_pool(&pool)?
            .into_iter()
            .map(|f| {
                let mut f = f.pooled();
                f.is_relayed = Some(true);
                f
            })
            .collect();

        let in_pool: HashSet<&str> = pool.iter().map(|e| e.id_hash.as_str()).collect();
        let missing: Vec<String> = {
            let state = shared.read_state()?;
            state
                .pool_txs()
                .into_iter()
                .filter(|tx| tx.is_relayed() && !in_pool.contains(tx.hash.as_str()))
                .map(|tx| tx.hash.clone())
                .collect()
        };

        // Anything the node still knows is either back in the pool or mined
        // after our block pass; the next session picks it up.
        let failed: Vec<String> = if missing.is_empty() {
            Vec::new()
        } else {
            let known: HashSet<String> = with_retry(sync_config, "get_transactions", || {
                daemon.get_transactions(&missing, false)
            })
            .await?
            .into_iter()
            .map(|e| e.tx_hash)
            .collect();
            missing.into_iter().filter(|h| !known.contains(h)).collect()
        };

        let pending = {
            let mut state = shared.write_state()?;
            let before = state.balances(None, None);
            state.apply(fragments, shared.core.as_ref())?;
            for hash in &failed {
                log::warn!("pool tx {} dropped without confirming, marking failed", hash);
                state.mark_failed(hash)?;
            }
            let after = state.balances(None, None);
            Pending {
                balances: (after != before).then_some(after),
                ..Default::default()
            }
        };
        pending.deliver(&shared.listeners.snapshot());
        Ok(())
    }

    /// Start the background loop for `shared`.
    pub(crate) fn spawn_background(shared: &Arc<Shared>, period: Duration) -> Result<BackgroundSync, WalletError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WalletError::Internal(format!("background sync needs a tokio runtime: {}", e)))?;
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let handle = runtime.spawn(background_loop(
            Arc::downgrade(shared),
            period,
            stop.clone(),
            wake.clone(),
        ));
        Ok(BackgroundSync { stop, wake, handle })
    }
}

async fn background_loop(shared: Weak<Shared>, period: Duration, stop: Arc<AtomicBool>, wake: Arc<Notify>) {
    log::info!("background sync started, period {:?}", period);
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let Some(wallet) = shared.upgrade() else {
            break;
        };
        match SyncEngine::sync(&wallet, None, None).await {
            Ok(_) => {}
            Err(WalletError::ClosedResource) => break,
            Err(e @ WalletError::MergeConflict { .. }) => {
                log::error!("background sync aborted: {}", e);
                notify_error(&wallet, &e);
                break;
            }
            Err(e) => {
                log::warn!("background sync failed: {}", e);
                notify_error(&wallet, &e);
            }
        }
        drop(wallet);

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = wake.notified() => {}
        }
    }
    log::info!("background sync stopped");
}

fn notify_error(shared: &Shared, err: &WalletError) {
    let message = err.to_string();
    for l in shared.listeners.snapshot() {
        l.on_sync_error(&message);
    }
}

/// Run a daemon call, retrying connection failures with exponential backoff.
async fn with_retry<T, F, Fut>(
    config: &crate::config::SyncConfig,
    what: &str,
    mut call: F,
) -> Result<T, WalletError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_connection() && attempt < config.retries => {
                let delay = backoff_delay(config.retry_delay(), attempt);
                attempt += 1;
                log::warn!("{} failed ({}), retry {} in {:?}", what, e, attempt, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// `base * 2^attempt`, capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}
