//! Upload engine — drives chunks from the pending queue through allocation,
//! transmission and confirmation, then commits the manifest.
//!
//! Worker tasks run in a `JoinSet` and share one `PendingQueue`. Each
//! worker loops: take a chunk, ask the allocator for an endpoint, transmit
//! under that endpoint's lock, record the confirmation. A retryable failure
//! puts the chunk back at the front of the queue until its attempts run
//! out. Workers never wait on each other except through endpoint locks.
//!
//! A timed-out write may still be included later. The chunk is re-queued
//! anyway; if it lands on the same endpoint again the second write stores
//! identical bytes under the same key, and if it lands elsewhere the late
//! write is an orphan the manifest never references. Both cases are logged
//! with the original tx ref.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use chainstore_core::config::ChainstoreConfig;
use chainstore_core::endpoint::{data_endpoints, index_endpoint};
use chainstore_core::{chunk_key, file_key, split_file, Chunk, Endpoint, Error, Manifest, Result};

use crate::allocator::{round_robin, Allocator};
use crate::confirmation::Confirmation;
use crate::ledger::{Gas, Ledger, TxRef, WriteMessage};
use crate::manifest_builder::ManifestBuilder;
use crate::queue::PendingQueue;
use crate::stats::UploadStats;
use crate::transmitter::Transmitter;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chunk_size_bytes: usize,
    /// 0 = one worker per data endpoint.
    pub workers: usize,
    pub max_retries: u32,
    pub run_timeout: Option<Duration>,
    pub confirmation_timeout: Duration,
    pub fallback_round_robin: bool,
}

impl EngineSettings {
    pub fn from_config(config: &ChainstoreConfig) -> Self {
        Self {
            chunk_size_bytes: config.upload.chunk_size_bytes,
            workers: config.upload.workers,
            max_retries: config.upload.max_retries,
            run_timeout: config.upload.run_timeout(),
            confirmation_timeout: config.confirmation.timeout(),
            fallback_round_robin: config.upload.fallback_round_robin,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ChainstoreConfig::default())
    }
}

/// A chunk whose write was confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub chunk_index: u64,
    pub endpoint: String,
    pub tx_ref: TxRef,
    pub gas_used: Gas,
}

/// What the worker pool achieved for one file.
#[derive(Debug, Clone)]
pub struct Distribution {
    /// Sorted by chunk index.
    pub results: Vec<SubmissionResult>,
    /// Chunks never confirmed: retries exhausted or the run deadline
    /// passed.
    pub failed: Vec<u64>,
    /// Transmission attempts across all chunks.
    pub attempts: u64,
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub manifest: Manifest,
    pub manifest_tx: TxRef,
    pub results: Vec<SubmissionResult>,
    pub attempts: u64,
    pub elapsed: Duration,
}

pub struct UploadEngine {
    transmitter: Arc<Transmitter>,
    allocator: Arc<Allocator>,
    confirmation: Confirmation,
    pool: Vec<Endpoint>,
    index: Endpoint,
    settings: EngineSettings,
}

impl UploadEngine {
    /// Fails before any write if the pool is empty, the index endpoint is
    /// missing, or the Sequential target is not a data endpoint.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        snapshot: &[Endpoint],
        allocator: Allocator,
        confirmation: Confirmation,
        settings: EngineSettings,
    ) -> Result<Self> {
        let pool = data_endpoints(snapshot);
        allocator.check(&pool)?;
        let index = index_endpoint(snapshot)?.clone();

        Ok(Self {
            transmitter: Arc::new(Transmitter::with_stats(ledger, UploadStats::new())),
            allocator: Arc::new(allocator),
            confirmation,
            pool,
            index,
            settings,
        })
    }

    pub fn from_config(
        ledger: Arc<dyn Ledger>,
        snapshot: &[Endpoint],
        config: &ChainstoreConfig,
    ) -> Result<Self> {
        let pool = data_endpoints(snapshot);
        let allocator = Allocator::from_config(&config.upload, &pool)?;
        Self::new(
            ledger,
            snapshot,
            allocator,
            Confirmation::from_config(&config.confirmation),
            EngineSettings::from_config(config),
        )
    }

    pub fn stats(&self) -> &UploadStats {
        self.transmitter.stats()
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn worker_count(&self) -> usize {
        if matches!(*self.allocator, Allocator::Sequential { .. }) {
            return 1;
        }
        match self.settings.workers {
            0 => self.pool.len(),
            n => n,
        }
    }

    /// Split a file from disk and upload it.
    pub async fn upload_file(&self, path: &Path) -> Result<UploadReport> {
        let chunks = split_file(path, self.settings.chunk_size_bytes)?;
        self.upload(&path.to_string_lossy(), chunks).await
    }

    /// Distribute every chunk, then commit the manifest to the index
    /// endpoint. `IncompleteUpload` lists chunks that never confirmed; a
    /// non-retryable error such as `NoEndpointAvailable` is returned as is.
    pub async fn upload(&self, file_path: &str, chunks: Vec<Chunk>) -> Result<UploadReport> {
        let started = Instant::now();
        let builder = Arc::new(ManifestBuilder::new(file_path, chunks.len() as u64));

        let distribution = self.distribute(builder.clone(), chunks).await?;
        self.stats().log_summary();
        if !distribution.failed.is_empty() {
            tracing::error!(
                file = %file_path,
                failed = ?distribution.failed,
                timed_out = distribution.timed_out,
                "upload incomplete, manifest not committed"
            );
            return Err(Error::IncompleteUpload {
                missing: distribution.failed,
            });
        }

        let (manifest, receipt) = builder
            .commit(
                &self.transmitter,
                &self.index,
                &self.confirmation,
                self.settings.confirmation_timeout,
            )
            .await?;

        let elapsed = started.elapsed();
        tracing::info!(
            file = %file_path,
            chunks = manifest.len(),
            attempts = distribution.attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "upload complete"
        );
        Ok(UploadReport {
            manifest,
            manifest_tx: receipt.tx_ref,
            results: distribution.results,
            attempts: distribution.attempts,
            elapsed,
        })
    }

    /// Run the worker pool over `chunks`, recording confirmations in
    /// `builder`. Never commits. The first non-retryable error stops every
    /// worker and is returned.
    pub async fn distribute(
        &self,
        builder: Arc<ManifestBuilder>,
        chunks: Vec<Chunk>,
    ) -> Result<Distribution> {
        let workers = self.worker_count().min(chunks.len()).max(1);
        let ctx = Arc::new(RunContext {
            transmitter: self.transmitter.clone(),
            allocator: self.allocator.clone(),
            confirmation: self.confirmation,
            pool: self.pool.clone(),
            settings: self.settings.clone(),
            file_key: file_key(builder.file_path()),
            queue: PendingQueue::new(chunks),
            builder: builder.clone(),
            results: Mutex::new(Vec::new()),
            attempts: AtomicU64::new(0),
        });

        tracing::info!(
            file = %builder.file_path(),
            chunks = ctx.queue.outstanding(),
            workers,
            allocator = self.allocator.name(),
            confirmation = self.confirmation.name(),
            "distribution starting"
        );

        let mut set = JoinSet::new();
        for id in 0..workers {
            set.spawn(worker(ctx.clone(), id));
        }

        let drain = async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Some(e),
                    Err(e) => tracing::error!(error = %e, "upload worker failed"),
                }
            }
            None
        };
        let (fatal, timed_out) = match self.settings.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, drain).await {
                Ok(fatal) => (fatal, false),
                Err(_) => (None, true),
            },
            None => (drain.await, false),
        };
        if let Some(e) = fatal {
            tracing::error!(file = %builder.file_path(), error = %e, "distribution aborted");
            set.shutdown().await;
            return Err(e);
        }
        if timed_out {
            tracing::warn!(file = %builder.file_path(), "run deadline passed, aborting workers");
            set.shutdown().await;
        }

        let mut results = std::mem::take(&mut *ctx.results.lock().unwrap_or_else(|e| e.into_inner()));
        results.sort_by_key(|r| r.chunk_index);
        Ok(Distribution {
            results,
            failed: builder.missing(),
            attempts: ctx.attempts.load(Ordering::Relaxed),
            timed_out,
        })
    }
}

struct RunContext {
    transmitter: Arc<Transmitter>,
    allocator: Arc<Allocator>,
    confirmation: Confirmation,
    pool: Vec<Endpoint>,
    settings: EngineSettings,
    file_key: String,
    queue: PendingQueue,
    builder: Arc<ManifestBuilder>,
    results: Mutex<Vec<SubmissionResult>>,
    attempts: AtomicU64,
}

impl RunContext {
    async fn send(&self, chunk: &Chunk) -> Result<SubmissionResult> {
        let endpoint = match self
            .allocator
            .allocate(chunk, &self.pool, self.transmitter.ledger())
            .await
        {
            Ok(endpoint) => endpoint,
            Err(Error::NoEndpointAvailable) if self.settings.fallback_round_robin => {
                let endpoint = round_robin(chunk.index, &self.pool).clone();
                tracing::warn!(
                    chunk = chunk.index,
                    endpoint = %endpoint.name,
                    "every load query failed, falling back to round robin"
                );
                endpoint
            }
            Err(e) => return Err(e),
        };

        let message = WriteMessage::StoreChunk {
            key: chunk_key(&self.file_key, chunk.index),
            data: chunk.data.clone(),
        };
        let receipt = self
            .transmitter
            .transmit(
                &endpoint,
                &message,
                &self.confirmation,
                self.settings.confirmation_timeout,
            )
            .await?;

        Ok(SubmissionResult {
            chunk_index: chunk.index,
            endpoint: receipt.endpoint,
            tx_ref: receipt.tx_ref,
            gas_used: receipt.gas_used,
        })
    }
}

async fn worker(ctx: Arc<RunContext>, id: usize) -> Result<()> {
    while let Some(mut item) = ctx.queue.next().await {
        let index = item.chunk.index;
        ctx.attempts.fetch_add(1, Ordering::Relaxed);

        match ctx.send(&item.chunk).await {
            Ok(result) => {
                if ctx.builder.record(index, &result.endpoint) {
                    tracing::info!(
                        worker = id,
                        chunk = index,
                        endpoint = %result.endpoint,
                        tx = %result.tx_ref,
                        "chunk confirmed"
                    );
                    ctx.results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(result);
                }
                ctx.queue.complete();
            }
            Err(e) if e.is_retryable() && item.attempts < ctx.settings.max_retries => {
                item.attempts += 1;
                if let Error::TimedOut { endpoint, tx_ref } = &e {
                    tracing::warn!(
                        worker = id,
                        chunk = index,
                        endpoint = %endpoint,
                        tx = %tx_ref,
                        attempt = item.attempts,
                        "confirmation timed out, re-queueing; the earlier write may still land"
                    );
                } else {
                    tracing::warn!(worker = id, chunk = index, attempt = item.attempts, error = %e, "chunk re-queued");
                }
                ctx.queue.requeue(item);
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    worker = id,
                    chunk = index,
                    attempts = item.attempts + 1,
                    error = %e,
                    "chunk abandoned"
                );
                ctx.queue.complete();
            }
            Err(e) => {
                tracing::error!(worker = id, chunk = index, error = %e, "upload cannot continue");
                return Err(e);
            }
        }
    }
    tracing::debug!(worker = id, "upload worker finished");
    Ok(())
}
