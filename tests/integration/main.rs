//! chainstore integration test harness.
//!
//! Every scenario runs the full pipeline (chunk, allocate, transmit,
//! confirm, commit, verify) against an in-memory ledger, or against the
//! same ledger served over HTTP by a local axum gateway.
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use chainstore_core::{split, Chunk, Endpoint, EndpointDescriptor, EndpointRole, SigningIdentity};
use chainstore_services::{
    Allocator, Confirmation, EngineSettings, Ledger, MemoryLedger, UploadEngine,
};

mod failures;
mod http;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const INDEX: &str = "index";

pub fn endpoint(name: &str, role: EndpointRole, base: &str) -> Endpoint {
    Endpoint::new(
        EndpointDescriptor {
            name: name.into(),
            role,
            rpc_address: format!("{base}/{name}/rpc"),
            rest_address: format!("{base}/{name}/rest"),
        },
        SigningIdentity {
            key_name: format!("{name}-key"),
            account: format!("acct-{name}"),
        },
    )
}

/// `data` data endpoints named `chain-0..` plus one index endpoint.
pub fn pool_at(data: usize, base: &str) -> Vec<Endpoint> {
    let mut pool: Vec<Endpoint> = (0..data)
        .map(|i| endpoint(&format!("chain-{i}"), EndpointRole::Data, base))
        .collect();
    pool.push(endpoint(INDEX, EndpointRole::Index, base));
    pool
}

pub fn pool(data: usize) -> Vec<Endpoint> {
    pool_at(data, "memory://")
}

/// Deterministic, non-repeating test payload.
pub fn payload(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

pub fn chunked(data: &[u8], chunk_size: usize) -> Vec<Chunk> {
    split(data, chunk_size).unwrap()
}

pub fn settings(chunk_size: usize) -> EngineSettings {
    EngineSettings {
        chunk_size_bytes: chunk_size,
        workers: 0,
        max_retries: 5,
        run_timeout: None,
        confirmation_timeout: Duration::from_secs(10),
        fallback_round_robin: true,
    }
}

pub const POLL: Confirmation = Confirmation::Polling {
    interval: Duration::from_millis(2),
};

pub const EVENTS: Confirmation = Confirmation::TxEvent {
    fallback_poll: Some(Duration::from_millis(2)),
};

pub fn engine(
    ledger: &MemoryLedger,
    pool: &[Endpoint],
    allocator: Allocator,
    confirmation: Confirmation,
    settings: EngineSettings,
) -> UploadEngine {
    let ledger: Arc<dyn Ledger> = Arc::new(ledger.clone());
    UploadEngine::new(ledger, pool, allocator, confirmation, settings).unwrap()
}
