use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use tokio::net::TcpListener;

use chainstore_core::{Endpoint, EndpointRole, Error, LedgerError};
use chainstore_services::http::{
    BroadcastResponse, ChunkResponse, EstimateResponse, ManifestResponse, PendingResponse,
    TxResponse, WireTx,
};
use chainstore_services::{
    Allocator, Confirmation, HttpLedger, Ledger, LedgerReader, LedgerWriter, MemoryLedger, TxRef,
    UploadEngine, Verifier, WriteMessage,
};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Mock REST gateway
// ══════════════════════════════════════════════════════════════════════════════

/// Serves a `MemoryLedger` over the gateway routes `HttpLedger` speaks.
#[derive(Clone)]
struct Gateway {
    ledger: MemoryLedger,
}

/// Endpoint handle for the in-memory chain behind a route.
fn chain(name: &str) -> Endpoint {
    endpoint(name, EndpointRole::Data, "")
}

fn ledger_error(e: LedgerError) -> Response {
    let status = match e {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Rejected(_) | LedgerError::Decode(_) => StatusCode::BAD_REQUEST,
        LedgerError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string()).into_response()
}

async fn handle_estimate(
    State(gw): State<Gateway>,
    Path(name): Path<String>,
    Json(tx): Json<WireTx>,
) -> Response {
    let message = match tx.write.into_message() {
        Ok(m) => m,
        Err(e) => return ledger_error(e),
    };
    match gw.ledger.estimate_cost(&chain(&name), &message).await {
        Ok(gas) => Json(EstimateResponse { gas }).into_response(),
        Err(e) => ledger_error(e),
    }
}

async fn handle_broadcast(
    State(gw): State<Gateway>,
    Path(name): Path<String>,
    Json(tx): Json<WireTx>,
) -> Response {
    let gas = tx.gas;
    let message = match tx.write.into_message() {
        Ok(m) => m,
        Err(e) => return ledger_error(e),
    };
    match gw.ledger.submit(&chain(&name), &message, gas).await {
        Ok(tx) => Json(BroadcastResponse { tx_hash: tx.0 }).into_response(),
        Err(e) => ledger_error(e),
    }
}

async fn handle_pending(State(gw): State<Gateway>, Path(name): Path<String>) -> Response {
    match gw.ledger.pending_tx_count(&chain(&name)).await {
        Ok(n) => Json(PendingResponse {
            n_txs: n.to_string(),
        })
        .into_response(),
        Err(e) => ledger_error(e),
    }
}

async fn handle_tx(
    State(gw): State<Gateway>,
    Path((name, hash)): Path<(String, String)>,
) -> Response {
    match gw.ledger.tx_status(&chain(&name), &TxRef(hash)).await {
        Ok(status) => Json(TxResponse::from_status(&status)).into_response(),
        Err(e) => ledger_error(e),
    }
}

async fn handle_events(State(gw): State<Gateway>, Path(name): Path<String>) -> Response {
    let events = match gw.ledger.subscribe_txs(&chain(&name)).await {
        Ok(events) => events,
        Err(e) => return ledger_error(e),
    };
    let lines = events.filter_map(|event| async move {
        let event = event.ok()?;
        let mut line = serde_json::to_vec(&event).ok()?;
        line.push(b'\n');
        Some(Ok::<_, Infallible>(Bytes::from(line)))
    });
    // a leading keepalive gets the headers onto the wire immediately
    let keepalive = futures::stream::once(async { Ok::<_, Infallible>(Bytes::from_static(b"\n")) });
    Body::from_stream(keepalive.chain(lines)).into_response()
}

async fn handle_chunk(
    State(gw): State<Gateway>,
    Path((name, key)): Path<(String, String)>,
) -> Response {
    match gw.ledger.chunk_by_key(&chain(&name), &key).await {
        Ok(data) => Json(ChunkResponse {
            data: hex::encode(&data),
        })
        .into_response(),
        Err(e) => ledger_error(e),
    }
}

async fn handle_manifest(
    State(gw): State<Gateway>,
    Path((name, key)): Path<(String, String)>,
) -> Response {
    match gw.ledger.manifest_by_key(&chain(&name), &key).await {
        Ok(manifest) => Json(ManifestResponse { manifest }).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// Start a gateway on an ephemeral port. Returns its base URL.
async fn spawn_gateway(ledger: MemoryLedger) -> Result<String> {
    let app = Router::new()
        .route("/{chain}/rpc/estimate", post(handle_estimate))
        .route("/{chain}/rpc/broadcast", post(handle_broadcast))
        .route("/{chain}/rpc/num_unconfirmed_txs", get(handle_pending))
        .route("/{chain}/rpc/tx/{hash}", get(handle_tx))
        .route("/{chain}/rpc/events/tx", get(handle_events))
        .route("/{chain}/rest/chunks/{key}", get(handle_chunk))
        .route("/{chain}/rest/manifests/{key}", get(handle_manifest))
        .with_state(Gateway { ledger });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(format!("http://{addr}"))
}

fn http_engine(
    pool: &[Endpoint],
    allocator: Allocator,
    confirmation: Confirmation,
    chunk_size: usize,
) -> UploadEngine {
    let ledger: Arc<dyn Ledger> = Arc::new(HttpLedger::new());
    UploadEngine::new(ledger, pool, allocator, confirmation, settings(chunk_size)).unwrap()
}

// ══════════════════════════════════════════════════════════════════════════════
//  HTTP ledger end-to-end
// ══════════════════════════════════════════════════════════════════════════════

/// Upload over HTTP with event confirmation, then verify over HTTP.
#[tokio::test]
async fn http_upload_with_tx_events_and_verify() -> Result<()> {
    const CHUNK: usize = 4096;
    let ledger = MemoryLedger::new();
    let base = spawn_gateway(ledger.clone()).await?;
    let pool = pool_at(3, &base);
    let data = payload(50_000);

    let strict_events = Confirmation::TxEvent {
        fallback_poll: None,
    };
    let engine = http_engine(&pool, Allocator::AutoDistribute, strict_events, CHUNK);
    let report = engine.upload("remote.bin", chunked(&data, CHUNK)).await?;
    assert_eq!(report.manifest.len(), 13);
    assert!(ledger.stored_manifest(INDEX, "remote.bin").is_some());

    let verifier = Verifier::new(Arc::new(HttpLedger::new()), pool);
    let verified = verifier.verify("remote.bin", &data).await?;
    assert_eq!(verified.bytes, 50_000);
    Ok(())
}

/// Same pipeline with polling confirmation and round robin.
#[tokio::test]
async fn http_upload_with_polling() -> Result<()> {
    const CHUNK: usize = 1024;
    let ledger = MemoryLedger::new();
    let base = spawn_gateway(ledger.clone()).await?;
    let pool = pool_at(2, &base);
    let data = payload(5_000);

    let engine = http_engine(&pool, Allocator::RoundRobin, POLL, CHUNK);
    let report = engine.upload("poll.bin", chunked(&data, CHUNK)).await?;
    for entry in &report.manifest.entries {
        assert_eq!(entry.endpoint_name, format!("chain-{}", entry.chunk_index % 2));
    }
    assert_eq!(ledger.included_keys("chain-1"), vec!["poll.bin_1", "poll.bin_3"]);
    Ok(())
}

/// Keys with URL metacharacters reach the gateway intact.
#[tokio::test]
async fn http_keys_with_reserved_characters_round_trip() -> Result<()> {
    const CHUNK: usize = 512;
    let ledger = MemoryLedger::new();
    let base = spawn_gateway(ledger.clone()).await?;
    let pool = pool_at(2, &base);
    let data = payload(1_500);

    let engine = http_engine(&pool, Allocator::RoundRobin, POLL, CHUNK);
    let report = engine
        .upload("dir/notes#v2?.txt", chunked(&data, CHUNK))
        .await?;
    assert_eq!(report.manifest.key(), "notes#v2?.txt");
    assert!(ledger.stored_manifest(INDEX, "notes#v2?.txt").is_some());
    assert!(ledger.stored_chunk("chain-1", "notes#v2?.txt_1").is_some());

    let verifier = Verifier::new(Arc::new(HttpLedger::new()), pool);
    let verified = verifier.verify("notes#v2?.txt", &data).await?;
    assert_eq!(verified.chunks, 3);
    Ok(())
}

/// Gateway status codes surface as the matching ledger errors.
#[tokio::test]
async fn http_status_codes_map_to_ledger_errors() -> Result<()> {
    let ledger = MemoryLedger::new();
    ledger.set_status_down("chain-0", true);
    let base = spawn_gateway(ledger.clone()).await?;
    let pool = pool_at(1, &base);
    let client = HttpLedger::new();

    assert!(matches!(
        client.pending_tx_count(&pool[0]).await,
        Err(LedgerError::Transport(_))
    ));
    assert!(matches!(
        client.chunk_by_key(&pool[0], "absent_0").await,
        Err(LedgerError::NotFound(_))
    ));

    let underpriced = WriteMessage::StoreChunk {
        key: "cheap_0".into(),
        data: bytes::Bytes::from_static(b"payload"),
    };
    assert!(matches!(
        client.submit(&pool[0], &underpriced, 1).await,
        Err(LedgerError::Rejected(_))
    ));

    let gas = client.estimate_cost(&pool[0], &underpriced).await?;
    let tx = client.submit(&pool[0], &underpriced, gas).await?;
    assert!(!tx.0.is_empty());
    Ok(())
}

/// A gateway nobody listens on is a transport error, which the engine
/// treats as retryable.
#[tokio::test]
async fn unreachable_gateway_is_transport_error() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    drop(listener);

    let pool = pool_at(1, &base);
    let err = HttpLedger::new()
        .pending_tx_count(&pool[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Transport(_)));
    assert!(Error::from(err).is_retryable());
    Ok(())
}
