//! Shared fixtures: an in-memory node and a deterministic wallet core.
//!
//! `FakeChain` answers the daemon calls the wallet makes over a chain that
//! tests grow by hand. `MockCore` recognizes transactions that tests register
//! with it and builds spends from whatever inputs the wallet offers.
//!
//! Transaction hex produced here starts with the 64-char hash, which is how
//! the fake node learns the hash of a relayed transaction.

#![allow(dead_code)]

use async_trait::async_trait;
use monero_rpc::daemon::{TransactionEntry, TxPoolEntry};
use monero_rpc::{DaemonRpc, RpcConnection, RpcError, Transport};
use monero_wallet::{
    BlockContext, ConstructionKind, ConstructionRequest, Destination, OutputWallet, Transfer,
    TxSet, TxWallet, Wallet, WalletConfig, WalletCore, WalletError, WalletListener,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

pub const FEE: u64 = 10;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn tx_hash(n: u64) -> String {
    format!("{:064x}", n)
}

// =============================================================================
// FakeChain
// =============================================================================

#[derive(Debug, Clone)]
struct FakeBlock {
    hash: String,
    miner_tx: String,
    txs: Vec<String>,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<FakeBlock>,
    pool: Vec<String>,
    hex: HashMap<String, String>,
    relayed: Vec<String>,
    /// `(blocks, times)`: after answering `/get_height`, mine this many
    /// empty blocks, this many more times.
    growth: (u64, u32),
    /// Fail this many upcoming calls with a connection error.
    outages: u32,
}

/// In-memory node.
pub struct FakeChain {
    connection: RpcConnection,
    state: Mutex<ChainState>,
    calls: AtomicUsize,
}

impl FakeChain {
    /// Chain with `height` empty blocks.
    pub fn new(height: u64) -> Arc<Self> {
        let chain = Arc::new(Self {
            connection: RpcConnection::new("http://fake-node:38081"),
            state: Mutex::new(ChainState::default()),
            calls: AtomicUsize::new(0),
        });
        chain.mine_empty(height);
        chain
    }

    pub fn daemon(self: &Arc<Self>) -> DaemonRpc {
        DaemonRpc::from_transport(self.clone())
    }

    pub fn height(&self) -> u64 {
        self.state.lock().unwrap().blocks.len() as u64
    }

    /// Number of requests served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hex of every transaction submitted through `send_raw_transaction`.
    pub fn relayed(&self) -> Vec<String> {
        self.state.lock().unwrap().relayed.clone()
    }

    pub fn pool(&self) -> Vec<String> {
        self.state.lock().unwrap().pool.clone()
    }

    pub fn mine_empty(&self, n: u64) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..n {
            push_block(&mut state, Vec::new());
        }
    }

    /// Mine one block holding `txs`, taking them out of the pool.
    pub fn mine(&self, txs: Vec<String>) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.pool.retain(|h| !txs.contains(h));
        for h in &txs {
            state.hex.entry(h.clone()).or_insert_with(|| h.clone());
        }
        push_block(&mut state, txs)
    }

    /// Mine one block holding the whole pool.
    pub fn mine_pool(&self) -> u64 {
        let txs = std::mem::take(&mut self.state.lock().unwrap().pool);
        self.mine(txs)
    }

    /// Put a transaction into the pool.
    pub fn add_to_pool(&self, hash: &str) {
        let mut state = self.state.lock().unwrap();
        state.hex.entry(hash.to_string()).or_insert_with(|| hash.to_string());
        state.pool.push(hash.to_string());
    }

    /// Forget a pool transaction without mining it.
    pub fn drop_from_pool(&self, hash: &str) {
        let mut state = self.state.lock().unwrap();
        state.pool.retain(|h| h != hash);
        state.hex.remove(hash);
    }

    /// Grow the chain by `blocks` after each of the next `times` height
    /// queries.
    pub fn grow_on_height_query(&self, blocks: u64, times: u32) {
        self.state.lock().unwrap().growth = (blocks, times);
    }

    /// Fail the next `calls` requests as if the node were unreachable.
    pub fn fail_next(&self, calls: u32) {
        self.state.lock().unwrap().outages = calls;
    }

    fn check_outage(&self) -> Result<(), RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.outages > 0 {
            state.outages -= 1;
            return Err(RpcError::Connection {
                url: self.connection.uri().to_string(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn tx_entries(&self, hashes: &[String]) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for hash in hashes {
            let Some(hex) = state.hex.get(hash) else {
                continue;
            };
            let mined = state
                .blocks
                .iter()
                .position(|b| &b.miner_tx == hash || b.txs.contains(hash));
            out.push(json!({
                "tx_hash": hash,
                "as_hex": hex,
                "block_height": mined.unwrap_or(0),
                "block_timestamp": mined.map_or(0, |h| 1_600_000_000 + h as u64 * 120),
                "in_pool": mined.is_none(),
            }));
        }
        out
    }
}

fn push_block(state: &mut ChainState, txs: Vec<String>) -> u64 {
    let height = state.blocks.len() as u64;
    let miner_tx = tx_hash(0xA000_0000 + height);
    state.hex.insert(miner_tx.clone(), miner_tx.clone());
    state.blocks.push(FakeBlock {
        hash: format!("{:064x}", 0xB000_0000 + height),
        miner_tx,
        txs,
    });
    height
}

#[async_trait]
impl Transport for FakeChain {
    fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.check_outage()?;
        let params = params.unwrap_or(Value::Null);
        match method {
            "get_version" => Ok(json!({ "version": 0x30000, "release": true, "status": "OK" })),
            "get_block" => {
                let height = params["height"].as_u64().unwrap_or(0);
                let state = self.state.lock().unwrap();
                let block = state.blocks.get(height as usize).cloned().ok_or_else(|| RpcError::Rpc {
                    code: -2,
                    message: format!("height {} too big", height),
                    method: method.into(),
                    params: Some(params.clone()),
                })?;
                let prev_hash = height
                    .checked_sub(1)
                    .and_then(|h| state.blocks.get(h as usize))
                    .map(|b| b.hash.clone())
                    .unwrap_or_default();
                Ok(json!({
                    "block_header": {
                        "height": height,
                        "hash": block.hash,
                        "prev_hash": prev_hash,
                        "timestamp": 1_600_000_000 + height * 120,
                    },
                    "miner_tx_hash": block.miner_tx,
                    "tx_hashes": block.txs,
                    "status": "OK",
                }))
            }
            other => Err(RpcError::Rpc {
                code: -32601,
                message: "Method not found".into(),
                method: other.into(),
                params: Some(params),
            }),
        }
    }

    async fn call_path(&self, path: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.check_outage()?;
        let params = params.unwrap_or(Value::Null);
        match path {
            "/get_height" => {
                let mut state = self.state.lock().unwrap();
                let height = state.blocks.len() as u64;
                let (blocks, times) = state.growth;
                if times > 0 {
                    state.growth.1 -= 1;
                    for _ in 0..blocks {
                        push_block(&mut state, Vec::new());
                    }
                }
                Ok(json!({ "height": height, "status": "OK" }))
            }
            "/get_transactions" => {
                let hashes: Vec<String> =
                    serde_json::from_value(params["txs_hashes"].clone()).unwrap_or_default();
                Ok(json!({ "txs": self.tx_entries(&hashes), "status": "OK" }))
            }
            "/get_transaction_pool" => {
                let state = self.state.lock().unwrap();
                let txs: Vec<Value> = state
                    .pool
                    .iter()
                    .map(|h| json!({ "id_hash": h, "tx_blob": state.hex.get(h).cloned().unwrap_or_default(), "relayed": true }))
                    .collect();
                Ok(json!({ "transactions": txs, "status": "OK" }))
            }
            "/send_raw_transaction" => {
                let hex = params["tx_as_hex"].as_str().unwrap_or_default().to_string();
                let hash: String = hex.chars().take(64).collect();
                let mut state = self.state.lock().unwrap();
                state.relayed.push(hex.clone());
                state.hex.insert(hash.clone(), hex);
                if !state.pool.contains(&hash) {
                    state.pool.push(hash);
                }
                Ok(json!({ "status": "OK" }))
            }
            other => Err(RpcError::HttpStatus {
                method: other.trim_start_matches('/').into(),
                url: format!("{}{}", self.connection.uri(), other),
                status: 404,
                body: "not found".into(),
            }),
        }
    }

    async fn call_binary(&self, path: &str, _params: &Value) -> Result<Vec<u8>, RpcError> {
        self.check_outage()?;
        Err(RpcError::HttpStatus {
            method: path.trim_start_matches('/').into(),
            url: format!("{}{}", self.connection.uri(), path),
            status: 404,
            body: "not found".into(),
        })
    }
}

// =============================================================================
// MockCore
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Known {
    outputs: Vec<OutputWallet>,
    inputs: Vec<OutputWallet>,
    outgoing: Option<Transfer>,
    fee: u64,
    payment_id: Option<String>,
}

#[derive(Default)]
struct CoreState {
    known: HashMap<String, Known>,
    next: u64,
    /// Sets returned per sweep scope.
    sets_per_sweep: usize,
    /// Transactions per set for transfers that may split.
    split_into: usize,
}

/// Wallet core that recognizes transactions registered with it.
pub struct MockCore {
    state: Mutex<CoreState>,
}

impl MockCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CoreState {
                next: 0xC000_0000,
                sets_per_sweep: 1,
                split_into: 1,
                ..Default::default()
            }),
        })
    }

    /// Register an incoming payment and return its tx hash.
    pub fn expect_payment(&self, account: u32, subaddress: u32, amount: u64) -> String {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let hash = tx_hash(state.next);
        let output = OutputWallet::new(account, subaddress, amount)
            .with_key_image(&format!("ki-{}", &hash[56..]))
            .with_output_index(0);
        state.known.insert(
            hash.clone(),
            Known {
                outputs: vec![output],
                ..Default::default()
            },
        );
        hash
    }

    /// Report `payment_id` for `hash` from now on.
    pub fn set_payment_id(&self, hash: &str, payment_id: &str) {
        if let Some(known) = self.state.lock().unwrap().known.get_mut(hash) {
            known.payment_id = Some(payment_id.to_string());
        }
    }

    /// Make every sweep scope produce `n` sets.
    pub fn set_sets_per_sweep(&self, n: usize) {
        self.state.lock().unwrap().sets_per_sweep = n;
    }

    /// Split splittable transfers into `n` transactions.
    pub fn set_split_into(&self, n: usize) {
        self.state.lock().unwrap().split_into = n;
    }

    fn fragment(known: &Known, hash: &str) -> TxWallet {
        let mut tx = TxWallet::new(hash);
        tx.fee = (known.fee > 0).then_some(known.fee);
        tx.payment_id = known.payment_id.clone();
        tx.inputs = known.inputs.clone();
        tx.outputs = known.outputs.clone();
        if let Some(out) = &known.outgoing {
            tx.transfers.push(out.clone());
        }
        for o in &known.outputs {
            tx.transfers
                .push(Transfer::incoming(o.account_index, o.subaddress_index, o.amount));
        }
        tx.link_children();
        tx
    }

    fn build(
        state: &mut CoreState,
        account: u32,
        inputs: Vec<OutputWallet>,
        destinations: Vec<Destination>,
        pay: u64,
    ) -> TxWallet {
        state.next += 1;
        let hash = tx_hash(state.next);
        let total: u64 = inputs.iter().map(|o| o.amount).sum();
        let change = total.saturating_sub(pay + FEE);
        let outputs = if change > 0 {
            vec![OutputWallet::new(account, 0, change)
                .with_key_image(&format!("ki-{}", &hash[56..]))
                .with_output_index(1)]
        } else {
            Vec::new()
        };
        let known = Known {
            outputs,
            inputs,
            outgoing: Some(Transfer::outgoing(account, pay, destinations)),
            fee: FEE,
            payment_id: None,
        };
        let mut tx = Self::fragment(&known, &hash);
        tx.full_hex = Some(format!("{}{}", hash, "00"));
        state.known.insert(hash, known);
        tx
    }
}

fn select(inputs: &[OutputWallet], target: u64) -> Result<Vec<OutputWallet>, WalletError> {
    let mut picked = Vec::new();
    let mut sum = 0;
    for o in inputs {
        if sum >= target {
            break;
        }
        sum += o.amount;
        picked.push(o.clone());
    }
    if sum < target {
        return Err(WalletError::Core(format!("not enough money: have {}, need {}", sum, target)));
    }
    Ok(picked)
}

impl WalletCore for MockCore {
    fn derive_address(&self, account_index: u32, subaddress_index: u32) -> Result<String, WalletError> {
        Ok(format!("5addr-{}-{}", account_index, subaddress_index))
    }

    fn scan_block(&self, _block: &BlockContext, txs: &[TransactionEntry]) -> Result<Vec<TxWallet>, WalletError> {
        let state = self.state.lock().unwrap();
        Ok(txs
            .iter()
            .filter_map(|e| state.known.get(&e.tx_hash).map(|k| Self::fragment(k, &e.tx_hash)))
            .collect())
    }

    fn scan_pool(&self, txs: &[TxPoolEntry]) -> Result<Vec<TxWallet>, WalletError> {
        let state = self.state.lock().unwrap();
        Ok(txs
            .iter()
            .filter_map(|e| state.known.get(&e.id_hash).map(|k| Self::fragment(k, &e.id_hash)))
            .collect())
    }

    fn construct(&self, request: &ConstructionRequest) -> Result<Vec<TxSet>, WalletError> {
        let mut state = self.state.lock().unwrap();
        let config = &request.config;
        assert!(config.do_not_relay(), "core must be asked to build without relaying");
        let account = config.account_index().unwrap_or(0);

        match &request.kind {
            ConstructionKind::Transfer => {
                let pay: u64 = config.destinations().iter().filter_map(|d| d.amount).sum();
                let pieces = if config.can_split() == Some(false) { 1 } else { state.split_into.max(1) };
                let mut remaining = request.inputs.clone();
                let mut txs = Vec::new();
                let share = pay / pieces as u64;
                for i in 0..pieces {
                    let amount = if i + 1 == pieces { pay - share * (pieces as u64 - 1) } else { share };
                    let picked = select(&remaining, amount + FEE)?;
                    remaining.retain(|o| !picked.contains(o));
                    let dests = vec![Destination::new(&config.destinations()[0].address, amount)];
                    txs.push(Self::build(&mut state, account, picked, dests, amount));
                }
                Ok(vec![TxSet::new(txs)])
            }
            ConstructionKind::Sweep { .. } | ConstructionKind::SweepOutput => {
                if request.inputs.is_empty() {
                    return Err(WalletError::Core("nothing to sweep".into()));
                }
                let account = match &request.kind {
                    ConstructionKind::Sweep { account_index, .. } => *account_index,
                    _ => request.inputs[0].account_index,
                };
                let total: u64 = request.inputs.iter().map(|o| o.amount).sum();
                let amount = total.saturating_sub(FEE);
                let address = config.destinations()[0].address.clone();
                let n = state.sets_per_sweep.max(1);
                let mut sets = Vec::new();
                for _ in 0..n {
                    let tx = Self::build(
                        &mut state,
                        account,
                        request.inputs.clone(),
                        vec![Destination::new(&address, amount)],
                        amount,
                    );
                    sets.push(TxSet::new(vec![tx]));
                }
                Ok(sets)
            }
        }
    }

    fn sign(&self, unsigned_tx_hex: &str) -> Result<String, WalletError> {
        Ok(format!("signed:{}", unsigned_tx_hex))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub core: Arc<MockCore>,
    pub wallet: Wallet,
}

impl Harness {
    /// Wallet from height 0 over a chain of `height` blocks.
    pub fn new(height: u64) -> Self {
        init_logging();
        let chain = FakeChain::new(height);
        let core = MockCore::new();
        let wallet = Self::wallet_on(&chain, &core);
        Self { chain, core, wallet }
    }

    /// Another wallet over the same chain and core.
    pub fn wallet_on(chain: &Arc<FakeChain>, core: &Arc<MockCore>) -> Wallet {
        let mut config = WalletConfig::default();
        config.sync.retry_delay_ms = 1;
        let wallet = Wallet::new(config, core.clone()).expect("wallet");
        wallet.set_daemon(Some(chain.daemon())).expect("set daemon");
        wallet
    }

    /// Mine a block paying `amount` to `(account, subaddress)`.
    pub fn fund(&self, account: u32, subaddress: u32, amount: u64) -> String {
        let hash = self.core.expect_payment(account, subaddress, amount);
        self.chain.mine(vec![hash.clone()]);
        hash
    }

    /// Mine enough empty blocks for everything so far to unlock.
    pub fn unlock(&self) {
        self.chain.mine_empty(10);
    }
}

// =============================================================================
// Recording listener
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub height: u64,
    pub start: u64,
    pub end: u64,
    pub percent: f64,
}

/// Listener that records everything it is told.
#[derive(Default)]
pub struct Recorder {
    pub progress: Mutex<Vec<Progress>>,
    pub blocks: Mutex<Vec<u64>>,
    pub balances: Mutex<Vec<(u64, u64)>>,
    pub received: Mutex<Vec<OutputWallet>>,
    pub spent: Mutex<Vec<OutputWallet>>,
    pub errors: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress(&self) -> Vec<Progress> {
        self.progress.lock().unwrap().clone()
    }

    pub fn blocks(&self) -> Vec<u64> {
        self.blocks.lock().unwrap().clone()
    }

    pub fn balances(&self) -> Vec<(u64, u64)> {
        self.balances.lock().unwrap().clone()
    }

    pub fn received_total(&self) -> u64 {
        self.received.lock().unwrap().iter().map(|o| o.amount).sum()
    }

    pub fn spent_total(&self) -> u64 {
        self.spent.lock().unwrap().iter().map(|o| o.amount).sum()
    }

    pub fn received_key_images(&self) -> HashSet<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| o.key_image.clone())
            .collect()
    }

    pub fn total_callbacks(&self) -> usize {
        self.progress.lock().unwrap().len()
            + self.blocks.lock().unwrap().len()
            + self.balances.lock().unwrap().len()
            + self.received.lock().unwrap().len()
            + self.spent.lock().unwrap().len()
            + self.errors.lock().unwrap().len()
    }
}

impl WalletListener for Recorder {
    fn on_sync_progress(&self, height: u64, start: u64, end: u64, percent: f64, _message: &str) {
        self.progress.lock().unwrap().push(Progress { height, start, end, percent });
    }

    fn on_new_block(&self, height: u64) {
        self.blocks.lock().unwrap().push(height);
    }

    fn on_balances_changed(&self, balance: u64, unlocked_balance: u64) {
        self.balances.lock().unwrap().push((balance, unlocked_balance));
    }

    fn on_output_received(&self, output: &OutputWallet) {
        self.received.lock().unwrap().push(output.clone());
    }

    fn on_output_spent(&self, output: &OutputWallet) {
        self.spent.lock().unwrap().push(output.clone());
    }

    fn on_sync_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

/// Listener that calls `stop_syncing()` on its wallet once progress reaches
/// `height`.
pub struct StopAt {
    pub wallet: Weak<Wallet>,
    pub height: u64,
}

impl StopAt {
    pub fn new(wallet: &Arc<Wallet>, height: u64) -> Arc<Self> {
        Arc::new(Self { wallet: Arc::downgrade(wallet), height })
    }
}

impl WalletListener for StopAt {
    fn on_sync_progress(&self, height: u64, _start: u64, _end: u64, _percent: f64, _message: &str) {
        if height == self.height {
            if let Some(wallet) = self.wallet.upgrade() {
                wallet.stop_syncing().expect("stop syncing");
            }
        }
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Check every progress invariant over one session's callbacks.
pub fn assert_progress_contract(progress: &[Progress]) {
    assert!(!progress.is_empty(), "no progress callbacks");
    for (i, p) in progress.iter().enumerate() {
        assert!(p.start <= p.height && p.height < p.end, "bounds at {:?}", p);
        let expected = (p.height - p.start + 1) as f64 / (p.end - p.start) as f64;
        assert_eq!(p.percent, expected, "percent at {:?}", p);
        if i > 0 {
            let prev = &progress[i - 1];
            assert_eq!(p.height, prev.height + 1, "heights must step by one");
            assert!(p.end >= prev.end, "end must not decrease");
        }
    }
    let last = progress.last().unwrap();
    assert_eq!(last.percent, 1.0);
    assert_eq!(last.height, last.end - 1);
}
