//! Transmitter — serialized submission per endpoint, parallel across them.
//!
//! Every endpoint gets one `tokio::sync::Mutex<()>`. A write holds it from
//! before the confirmation listener is armed until the write is confirmed
//! or has failed, so an endpoint never has two of our writes pending at
//! once. The ledger orders writes from one signing identity and would
//! reject the second with a sequence mismatch otherwise.
//!
//! Gas estimates are cached per (endpoint, message shape) and refreshed
//! only when the entry is missing. A rejected submission drops every
//! cached estimate for that endpoint.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use chainstore_core::{Endpoint, Error, LedgerError, Result};

use crate::confirmation::Confirmation;
use crate::ledger::{Gas, Ledger, MessageShape, TxRef, WriteMessage};
use crate::stats::UploadStats;

/// A confirmed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub endpoint: String,
    pub tx_ref: TxRef,
    pub height: u64,
    pub gas_used: Gas,
}

pub struct Transmitter {
    ledger: Arc<dyn Ledger>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    gas_cache: DashMap<(String, MessageShape), Gas>,
    stats: UploadStats,
}

impl Transmitter {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self::with_stats(ledger, UploadStats::new())
    }

    pub fn with_stats(ledger: Arc<dyn Ledger>, stats: UploadStats) -> Self {
        Self {
            ledger,
            locks: DashMap::new(),
            gas_cache: DashMap::new(),
            stats,
        }
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    pub fn stats(&self) -> &UploadStats {
        &self.stats
    }

    fn lock_for(&self, endpoint: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn cached_gas(&self, endpoint: &str, shape: MessageShape) -> Option<Gas> {
        self.gas_cache
            .get(&(endpoint.to_string(), shape))
            .map(|g| *g)
    }

    /// Drop every cached estimate for an endpoint.
    pub fn invalidate(&self, endpoint: &str) {
        self.gas_cache.retain(|(name, _), _| name != endpoint);
    }

    /// Gas for `message` on `endpoint`, from cache when present.
    pub async fn estimate(&self, endpoint: &Endpoint, message: &WriteMessage) -> Result<Gas> {
        let shape = message.shape();
        if let Some(gas) = self.cached_gas(&endpoint.name, shape) {
            return Ok(gas);
        }
        let gas = self
            .ledger
            .estimate_cost(endpoint, message)
            .await
            .map_err(|e| submission_error(endpoint, &e))?;
        self.gas_cache.insert((endpoint.name.clone(), shape), gas);
        tracing::debug!(endpoint = %endpoint.name, ?shape, gas, "gas estimate cached");
        Ok(gas)
    }

    /// Submit one write without waiting for confirmation.
    pub async fn submit(&self, endpoint: &Endpoint, message: &WriteMessage) -> Result<TxRef> {
        let lock = self.lock_for(&endpoint.name);
        let _guard = lock.lock().await;
        self.submit_locked(endpoint, message).await
    }

    async fn submit_locked(&self, endpoint: &Endpoint, message: &WriteMessage) -> Result<TxRef> {
        let gas = self.estimate(endpoint, message).await?;
        self.stats.record_submitted(&endpoint.name);
        match self.ledger.submit(endpoint, message, gas).await {
            Ok(tx) => {
                tracing::debug!(endpoint = %endpoint.name, key = message.key(), tx = %tx, gas, "write broadcast");
                Ok(tx)
            }
            Err(e) => {
                if matches!(e, LedgerError::Rejected(_)) {
                    self.invalidate(&endpoint.name);
                }
                self.stats.record_failed(&endpoint.name);
                tracing::warn!(endpoint = %endpoint.name, key = message.key(), error = %e, "submission failed");
                Err(submission_error(endpoint, &e))
            }
        }
    }

    /// Submit and wait for confirmation while holding the endpoint lock.
    ///
    /// `timeout` bounds arming the listener and the wait together, so the
    /// lock is released within it even when the event endpoint stalls.
    pub async fn transmit(
        &self,
        endpoint: &Endpoint,
        message: &WriteMessage,
        confirmation: &Confirmation,
        timeout: Duration,
    ) -> Result<Receipt> {
        let lock = self.lock_for(&endpoint.name);
        let _guard = lock.lock().await;
        let deadline = Instant::now() + timeout;

        let armed = confirmation.arm(self.ledger(), endpoint, deadline).await?;
        let tx_ref = self.submit_locked(endpoint, message).await?;

        match armed.wait(self.ledger(), endpoint, &tx_ref, deadline).await {
            Ok(confirmed) => {
                self.stats
                    .record_confirmed(&endpoint.name, confirmed.gas_used);
                Ok(Receipt {
                    endpoint: endpoint.name.clone(),
                    tx_ref,
                    height: confirmed.height,
                    gas_used: confirmed.gas_used,
                })
            }
            Err(e) => {
                match &e {
                    Error::TimedOut { .. } => self.stats.record_timed_out(&endpoint.name),
                    _ => self.stats.record_failed(&endpoint.name),
                }
                Err(e)
            }
        }
    }
}

fn submission_error(endpoint: &Endpoint, e: &LedgerError) -> Error {
    Error::Submission {
        endpoint: endpoint.name.clone(),
        reason: e.to_string(),
    }
}
