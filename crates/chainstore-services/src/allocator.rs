//! Allocator — decides which endpoint receives each chunk.
//!
//!   Sequential       — every chunk to one named endpoint
//!   RoundRobin       — chunk i to pool[i mod len]
//!   BurstDistribute  — walks a load ranking refreshed once per burst
//!   AutoDistribute   — queries every endpoint before each decision
//!
//! Load-aware variants break ties uniformly at random so equally loaded
//! endpoints are not picked in a fixed order.

use futures::future::join_all;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use chainstore_core::config::{AllocatorKind, UploadConfig};
use chainstore_core::{Chunk, Endpoint, Error, Result};

use crate::ledger::Ledger;

pub enum Allocator {
    Sequential { endpoint: String },
    RoundRobin,
    BurstDistribute(BurstState),
    AutoDistribute,
}

/// Re-ranking cursor owned by the Burst-Distribute variant.
pub struct BurstState {
    burst_size: usize,
    cursor: Mutex<BurstCursor>,
}

#[derive(Default)]
struct BurstCursor {
    /// Pool positions, least loaded first.
    ranking: Vec<usize>,
    position: usize,
}

impl BurstState {
    /// `burst_size` decisions share one ranking. 0 = one decision per endpoint.
    pub fn new(burst_size: usize) -> Self {
        Self {
            burst_size,
            cursor: Mutex::new(BurstCursor::default()),
        }
    }
}

impl Allocator {
    pub fn sequential(endpoint: impl Into<String>) -> Self {
        Allocator::Sequential {
            endpoint: endpoint.into(),
        }
    }

    pub fn burst(burst_size: usize) -> Self {
        Allocator::BurstDistribute(BurstState::new(burst_size))
    }

    /// Build from config. `pool` supplies the Sequential default target.
    pub fn from_config(config: &UploadConfig, pool: &[Endpoint]) -> Result<Self> {
        Ok(match config.allocator {
            AllocatorKind::Sequential => {
                let endpoint = if config.sequential_endpoint.is_empty() {
                    pool.first()
                        .map(|e| e.name.clone())
                        .ok_or(Error::EmptyEndpointPool)?
                } else {
                    config.sequential_endpoint.clone()
                };
                Allocator::sequential(endpoint)
            }
            AllocatorKind::RoundRobin => Allocator::RoundRobin,
            AllocatorKind::BurstDistribute => Allocator::burst(config.burst_size),
            AllocatorKind::AutoDistribute => Allocator::AutoDistribute,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Allocator::Sequential { .. } => "sequential",
            Allocator::RoundRobin => "round_robin",
            Allocator::BurstDistribute(_) => "burst_distribute",
            Allocator::AutoDistribute => "auto_distribute",
        }
    }

    /// Structural checks that must fail the run before any chunk is sent.
    pub fn check(&self, pool: &[Endpoint]) -> Result<()> {
        if pool.is_empty() {
            return Err(Error::EmptyEndpointPool);
        }
        if let Allocator::Sequential { endpoint } = self {
            if !pool.iter().any(|e| &e.name == endpoint) {
                return Err(Error::MissingEndpoint(endpoint.clone()));
            }
        }
        Ok(())
    }

    /// Pick the endpoint for `chunk`. `ledger` supplies live load.
    pub async fn allocate(
        &self,
        chunk: &Chunk,
        pool: &[Endpoint],
        ledger: &dyn Ledger,
    ) -> Result<Endpoint> {
        if pool.is_empty() {
            return Err(Error::EmptyEndpointPool);
        }

        match self {
            Allocator::Sequential { endpoint } => pool
                .iter()
                .find(|e| &e.name == endpoint)
                .cloned()
                .ok_or_else(|| Error::MissingEndpoint(endpoint.clone())),

            Allocator::RoundRobin => Ok(round_robin(chunk.index, pool).clone()),

            Allocator::BurstDistribute(state) => {
                let mut cursor = state.cursor.lock().await;
                let burst = if state.burst_size == 0 {
                    pool.len()
                } else {
                    state.burst_size
                };
                if cursor.ranking.len() != pool.len() || cursor.position >= burst {
                    let counts = pending_counts(pool, ledger).await;
                    cursor.ranking = rank(&counts);
                    cursor.position = 0;
                    tracing::debug!(ranking = ?cursor.ranking, ?counts, "burst re-ranked endpoints");
                }
                let slot = cursor.ranking[cursor.position % cursor.ranking.len()];
                cursor.position += 1;
                Ok(pool[slot].clone())
            }

            Allocator::AutoDistribute => {
                let counts = pending_counts(pool, ledger).await;
                let slot = least_loaded(&counts).ok_or(Error::NoEndpointAvailable)?;
                tracing::trace!(chunk = chunk.index, endpoint = %pool[slot].name, ?counts, "auto-distribute pick");
                Ok(pool[slot].clone())
            }
        }
    }
}

pub fn round_robin(index: u64, pool: &[Endpoint]) -> &Endpoint {
    &pool[(index % pool.len() as u64) as usize]
}

/// Query every endpoint's mempool depth concurrently. Failures are `None`.
async fn pending_counts(pool: &[Endpoint], ledger: &dyn Ledger) -> Vec<Option<u64>> {
    join_all(pool.iter().map(|endpoint| async move {
        match ledger.pending_tx_count(endpoint).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::debug!(endpoint = %endpoint.name, error = %e, "load query failed");
                None
            }
        }
    }))
    .await
}

/// Position of the minimum count, ties broken uniformly at random.
/// Failed queries count as infinitely busy. `None` if every query failed.
fn least_loaded(counts: &[Option<u64>]) -> Option<usize> {
    let min = counts.iter().flatten().min()?;
    let candidates: Vec<usize> = counts
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_ref() == Some(min))
        .map(|(i, _)| i)
        .collect();
    candidates.choose(&mut rand::thread_rng()).copied()
}

/// All positions ordered by count. Equal counts keep a random relative
/// order; failed queries sort last.
fn rank(counts: &[Option<u64>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.shuffle(&mut rand::thread_rng());
    order.sort_by_key(|&i| counts[i].unwrap_or(u64::MAX));
    order
}
