//! In-process ledger used for dry runs and tests.
//!
//! Each endpoint name maps to an independent simulated chain that accepts
//! writes, includes them after a configurable delay, reports mempool depth
//! and fans inclusion events out to subscribers. Fault injection hooks
//! cover rejected submissions, unreachable status interfaces and dropped
//! subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;

use chainstore_core::{Endpoint, LedgerError};

use crate::ledger::{
    Gas, LedgerReader, LedgerWriter, TxEvent, TxEventStream, TxRef, TxStatus, WriteMessage,
};

const BASE_GAS: Gas = 50_000;
const GAS_PER_BYTE: Gas = 10;

/// One `submit` call as observed by the chain.
#[derive(Debug, Clone, Copy)]
pub struct SubmitInterval {
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct ChainState {
    chunks: HashMap<String, Bytes>,
    manifests: HashMap<String, String>,
    txs: HashMap<String, TxStatus>,
    /// Keys in inclusion order.
    included_keys: Vec<String>,
    height: u64,
    nonce: u64,
    pending: u64,
    max_pending: u64,
    in_flight: u32,
    max_in_flight: u32,
    submits: Vec<SubmitInterval>,
    estimate_calls: u64,
    extra_gas: Gas,
    pinned_pending: Option<u64>,
    status_down: bool,
    subscribe_down: bool,
    fail_next_submits: u32,
    inclusion_delay: Option<Duration>,
    subscribers: Vec<mpsc::UnboundedSender<TxEvent>>,
}

#[derive(Default)]
struct Chain {
    state: Mutex<ChainState>,
}

impl Chain {
    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    inclusion_delay: Duration,
    submit_delay: Duration,
}

/// Simulated multi-chain ledger.
#[derive(Clone)]
pub struct MemoryLedger {
    chains: Arc<DashMap<String, Arc<Chain>>>,
    /// Keys whose next N submissions are rejected, on any chain.
    failing_keys: Arc<DashMap<String, u32>>,
    timing: Timing,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            chains: Arc::new(DashMap::new()),
            failing_keys: Arc::new(DashMap::new()),
            timing: Timing {
                inclusion_delay: Duration::from_millis(5),
                submit_delay: Duration::ZERO,
            },
        }
    }

    /// Time between acceptance and inclusion for every chain.
    pub fn with_inclusion_delay(mut self, delay: Duration) -> Self {
        self.timing.inclusion_delay = delay;
        self
    }

    /// Time spent inside `submit`, to widen race windows.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.timing.submit_delay = delay;
        self
    }

    fn chain(&self, name: &str) -> Arc<Chain> {
        self.chains
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Chain::default()))
            .clone()
    }

    // ── Fault injection ──────────────────────────────────────────────────────

    pub fn set_inclusion_delay(&self, endpoint: &str, delay: Duration) {
        self.chain(endpoint).state().inclusion_delay = Some(delay);
    }

    pub fn fail_next_submits(&self, endpoint: &str, count: u32) {
        self.chain(endpoint).state().fail_next_submits = count;
    }

    pub fn fail_submits_for_key(&self, key: &str, count: u32) {
        self.failing_keys.insert(key.to_string(), count);
    }

    /// Report a fixed mempool depth regardless of real load.
    pub fn pin_pending(&self, endpoint: &str, count: u64) {
        self.chain(endpoint).state().pinned_pending = Some(count);
    }

    pub fn set_status_down(&self, endpoint: &str, down: bool) {
        self.chain(endpoint).state().status_down = down;
    }

    pub fn set_subscribe_down(&self, endpoint: &str, down: bool) {
        self.chain(endpoint).state().subscribe_down = down;
    }

    /// Close every open event subscription on an endpoint.
    pub fn drop_subscriptions(&self, endpoint: &str) {
        self.chain(endpoint).state().subscribers.clear();
    }

    /// Raise the gas floor so previously estimated costs are rejected.
    pub fn raise_gas_floor(&self, endpoint: &str, extra: Gas) {
        self.chain(endpoint).state().extra_gas += extra;
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Keys stored on an endpoint, in inclusion order.
    pub fn included_keys(&self, endpoint: &str) -> Vec<String> {
        self.chain(endpoint).state().included_keys.clone()
    }

    pub fn stored_chunk(&self, endpoint: &str, key: &str) -> Option<Bytes> {
        self.chain(endpoint).state().chunks.get(key).cloned()
    }

    pub fn stored_manifest(&self, endpoint: &str, key: &str) -> Option<String> {
        self.chain(endpoint).state().manifests.get(key).cloned()
    }

    /// Overwrite stored chunk bytes, simulating corruption.
    pub fn corrupt_chunk(&self, endpoint: &str, key: &str, data: Bytes) {
        self.chain(endpoint).state().chunks.insert(key.to_string(), data);
    }

    pub fn submit_intervals(&self, endpoint: &str) -> Vec<SubmitInterval> {
        self.chain(endpoint).state().submits.clone()
    }

    /// Most `submit` calls ever running at once on an endpoint.
    pub fn max_in_flight(&self, endpoint: &str) -> u32 {
        self.chain(endpoint).state().max_in_flight
    }

    /// Most accepted-but-not-included transactions ever seen at once.
    pub fn max_pending(&self, endpoint: &str) -> u64 {
        self.chain(endpoint).state().max_pending
    }

    pub fn estimate_calls(&self, endpoint: &str) -> u64 {
        self.chain(endpoint).state().estimate_calls
    }

    fn required_gas(state: &ChainState, message: &WriteMessage) -> Gas {
        BASE_GAS + GAS_PER_BYTE * message.shape().payload_len as Gas + state.extra_gas
    }

    fn include(chain: &Chain, tx_hash: String, message: WriteMessage, gas: Gas) {
        let mut state = chain.state();
        state.height += 1;
        let height = state.height;
        state.pending = state.pending.saturating_sub(1);

        let key = message.key().to_string();
        match message {
            WriteMessage::StoreChunk { key, data } => {
                state.chunks.insert(key, data);
            }
            WriteMessage::StoreManifest { key, body } => {
                state.manifests.insert(key, body);
            }
        }
        state.included_keys.push(key);
        state.txs.insert(
            tx_hash.clone(),
            TxStatus::Included {
                height,
                gas_used: gas,
            },
        );

        let event = TxEvent {
            tx_hash,
            height,
            code: 0,
            gas_used: gas,
            log: String::new(),
        };
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn estimate_cost(
        &self,
        endpoint: &Endpoint,
        message: &WriteMessage,
    ) -> Result<Gas, LedgerError> {
        let chain = self.chain(&endpoint.name);
        let mut state = chain.state();
        state.estimate_calls += 1;
        Ok(Self::required_gas(&state, message))
    }

    async fn submit(
        &self,
        endpoint: &Endpoint,
        message: &WriteMessage,
        gas: Gas,
    ) -> Result<TxRef, LedgerError> {
        let chain = self.chain(&endpoint.name);

        let started = {
            let mut state = chain.state();
            if state.fail_next_submits > 0 {
                state.fail_next_submits -= 1;
                return Err(LedgerError::Rejected("injected submission failure".into()));
            }
            if let Some(mut remaining) = self.failing_keys.get_mut(message.key()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(LedgerError::Rejected(format!(
                        "injected failure for {}",
                        message.key()
                    )));
                }
            }
            let required = Self::required_gas(&state, message);
            if gas < required {
                return Err(LedgerError::Rejected(format!(
                    "out of gas: wanted {required}, got {gas}"
                )));
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            Instant::now()
        };

        if !self.timing.submit_delay.is_zero() {
            tokio::time::sleep(self.timing.submit_delay).await;
        }

        let (tx_hash, delay) = {
            let mut state = chain.state();
            state.in_flight -= 1;
            state.submits.push(SubmitInterval {
                started,
                finished: Instant::now(),
            });
            state.nonce += 1;
            let seed = format!("{}/{}/{}", endpoint.name, state.nonce, message.key());
            let tx_hash = hex::encode_upper(chainstore_core::hash(seed.as_bytes()));
            state.txs.insert(tx_hash.clone(), TxStatus::Pending);
            state.pending += 1;
            state.max_pending = state.max_pending.max(state.pending);
            let delay = state.inclusion_delay.unwrap_or(self.timing.inclusion_delay);
            (tx_hash, delay)
        };

        let included = chain.clone();
        let included_hash = tx_hash.clone();
        let message = message.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            MemoryLedger::include(&included, included_hash, message, gas);
        });

        Ok(TxRef(tx_hash))
    }
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn pending_tx_count(&self, endpoint: &Endpoint) -> Result<u64, LedgerError> {
        let chain = self.chain(&endpoint.name);
        let state = chain.state();
        if state.status_down {
            return Err(LedgerError::Transport(format!(
                "{} status interface unreachable",
                endpoint.name
            )));
        }
        Ok(state.pinned_pending.unwrap_or(state.pending))
    }

    async fn tx_status(&self, endpoint: &Endpoint, tx: &TxRef) -> Result<TxStatus, LedgerError> {
        self.chain(&endpoint.name)
            .state()
            .txs
            .get(&tx.0)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(tx.0.clone()))
    }

    async fn subscribe_txs(&self, endpoint: &Endpoint) -> Result<TxEventStream, LedgerError> {
        let chain = self.chain(&endpoint.name);
        let mut state = chain.state();
        if state.subscribe_down {
            return Err(LedgerError::Transport(format!(
                "{} event interface unreachable",
                endpoint.name
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (Ok(event), rx))
        });
        Ok(stream.boxed())
    }

    async fn chunk_by_key(&self, endpoint: &Endpoint, key: &str) -> Result<Bytes, LedgerError> {
        self.stored_chunk(&endpoint.name, key)
            .ok_or_else(|| LedgerError::NotFound(format!("{}: {key}", endpoint.name)))
    }

    async fn manifest_by_key(&self, endpoint: &Endpoint, key: &str) -> Result<String, LedgerError> {
        self.stored_manifest(&endpoint.name, key)
            .ok_or_else(|| LedgerError::NotFound(format!("{}: {key}", endpoint.name)))
    }
}
