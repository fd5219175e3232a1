use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;

use chainstore_core::{Error, Manifest};
use chainstore_services::{Allocator, Confirmation, MemoryLedger, Verifier};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Submission failures
// ══════════════════════════════════════════════════════════════════════════════

/// One rejected submission is retried and the file still rebuilds exactly.
#[tokio::test]
async fn single_forced_failure_recovers_without_corruption() -> Result<()> {
    const CHUNK: usize = 4096;
    let data = payload(40_000);
    let pool = pool(3);
    let ledger = MemoryLedger::new();
    ledger.fail_submits_for_key("report.pdf_3", 1);

    let engine = engine(&ledger, &pool, Allocator::RoundRobin, POLL, settings(CHUNK));
    let report = engine.upload("report.pdf", chunked(&data, CHUNK)).await?;

    assert_eq!(report.manifest.len(), 10);
    assert_eq!(report.attempts, 11);
    assert_eq!(engine.stats().get("chain-0").failed, 1);

    Verifier::new(Arc::new(ledger.clone()), pool)
        .verify("report.pdf", &data)
        .await
        .context("rebuild after retry should match")?;
    Ok(())
}

/// A chunk that never gets through is abandoned and the manifest is not
/// committed.
#[tokio::test]
async fn persistent_failure_leaves_manifest_uncommitted() -> Result<()> {
    let data = payload(8_000);
    let pool = pool(2);
    let ledger = MemoryLedger::new();
    ledger.fail_submits_for_key("stuck.bin_2", u32::MAX);

    let mut settings = settings(1000);
    settings.max_retries = 2;
    let engine = engine(&ledger, &pool, Allocator::AutoDistribute, POLL, settings);

    match engine.upload("stuck.bin", chunked(&data, 1000)).await {
        Err(Error::IncompleteUpload { missing }) => assert_eq!(missing, vec![2]),
        other => panic!("expected IncompleteUpload, got {other:?}"),
    }
    assert!(ledger.stored_manifest(INDEX, "stuck.bin").is_none());
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Confirmation timeouts
// ══════════════════════════════════════════════════════════════════════════════

/// Confirmation timeout shorter than inclusion: recorded as failure, the
/// run finishes without panicking and reports the chunks.
#[tokio::test]
async fn timeout_shorter_than_inclusion_is_reported() -> Result<()> {
    let data = payload(4_000);
    let pool = pool(2);
    let ledger = MemoryLedger::new();
    ledger.set_inclusion_delay("chain-0", Duration::from_secs(10));

    let mut settings = settings(1000);
    settings.confirmation_timeout = Duration::from_millis(40);
    settings.max_retries = 1;
    let engine = engine(&ledger, &pool, Allocator::RoundRobin, POLL, settings);

    match engine.upload("slow.bin", chunked(&data, 1000)).await {
        Err(Error::IncompleteUpload { missing }) => assert_eq!(missing, vec![0, 2]),
        other => panic!("expected IncompleteUpload, got {other:?}"),
    }
    let stats = engine.stats().get("chain-0");
    assert_eq!(stats.timed_out, 4);
    assert_eq!(stats.confirmed, 0);
    assert_eq!(engine.stats().get("chain-1").confirmed, 2);
    Ok(())
}

/// Timed-out writes that land later never produce duplicate manifest
/// entries, and the committed manifest still rebuilds the file.
#[tokio::test]
async fn late_inclusion_after_timeout_does_not_duplicate_entries() -> Result<()> {
    const CHUNK: usize = 500;
    let data = payload(6_000);
    let pool = pool(2);
    let ledger = MemoryLedger::new();
    ledger.set_inclusion_delay("chain-0", Duration::from_millis(150));

    let mut settings = settings(CHUNK);
    settings.confirmation_timeout = Duration::from_millis(50);
    settings.max_retries = 50;
    let engine = engine(&ledger, &pool, Allocator::AutoDistribute, POLL, settings);

    let report = engine.upload("late.bin", chunked(&data, CHUNK)).await?;

    // let every late write land
    tokio::time::sleep(Duration::from_millis(400)).await;

    let committed = Manifest::from_wire(
        &ledger
            .stored_manifest(INDEX, "late.bin")
            .context("manifest missing")?,
    )?;
    assert_eq!(committed, report.manifest);
    let indices: Vec<u64> = committed.entries.iter().map(|e| e.chunk_index).collect();
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    assert_eq!(ledger.included_keys(INDEX).len(), 1);

    Verifier::new(Arc::new(ledger.clone()), pool)
        .verify("late.bin", &data)
        .await?;
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Serialization and load balancing
// ══════════════════════════════════════════════════════════════════════════════

/// Many workers, slow submissions: per endpoint, submissions never overlap
/// and at most one write is ever pending.
#[tokio::test]
async fn submissions_never_overlap_per_endpoint() -> Result<()> {
    let data = payload(16 * 256);
    let pool = pool(2);
    let ledger = MemoryLedger::new()
        .with_submit_delay(Duration::from_millis(8))
        .with_inclusion_delay(Duration::from_millis(4));

    let mut settings = settings(256);
    settings.workers = 6;
    let engine = engine(&ledger, &pool, Allocator::AutoDistribute, EVENTS, settings);
    engine.upload("serial.bin", chunked(&data, 256)).await?;

    for endpoint in ["chain-0", "chain-1"] {
        assert_eq!(ledger.max_in_flight(endpoint), 1, "{endpoint}");
        assert_eq!(ledger.max_pending(endpoint), 1, "{endpoint}");

        let mut intervals = ledger.submit_intervals(endpoint);
        intervals.sort_by_key(|i| i.started);
        for pair in intervals.windows(2) {
            assert!(
                pair[0].finished <= pair[1].started,
                "{endpoint}: overlapping submissions {pair:?}"
            );
        }
    }
    Ok(())
}

/// Equal reported load spreads chunks roughly uniformly.
#[tokio::test]
async fn auto_distribute_spreads_evenly_under_equal_load() -> Result<()> {
    let data = payload(400 * 8);
    let pool = pool(4);
    let ledger = MemoryLedger::new().with_inclusion_delay(Duration::from_millis(1));
    for i in 0..4 {
        ledger.pin_pending(&format!("chain-{i}"), 3);
    }

    let engine = engine(&ledger, &pool, Allocator::AutoDistribute, POLL, settings(8));
    let report = engine.upload("spread.bin", chunked(&data, 8)).await?;

    let mut per_endpoint: HashMap<String, usize> = HashMap::new();
    for entry in &report.manifest.entries {
        *per_endpoint.entry(entry.endpoint_name.clone()).or_default() += 1;
    }
    assert_eq!(per_endpoint.len(), 4);
    // 100 expected each; sd ≈ 8.7
    for (endpoint, count) in per_endpoint {
        assert!((55..=145).contains(&count), "{endpoint} got {count}");
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Subscription loss
// ══════════════════════════════════════════════════════════════════════════════

/// An endpoint whose event interface is down is confirmed by polling.
#[tokio::test]
async fn unavailable_subscription_falls_back_to_polling() -> Result<()> {
    let data = payload(6_000);
    let pool = pool(2);
    let ledger = MemoryLedger::new();
    ledger.set_subscribe_down("chain-1", true);

    let engine = engine(&ledger, &pool, Allocator::RoundRobin, EVENTS, settings(1000));
    let report = engine.upload("fallback.bin", chunked(&data, 1000)).await?;
    assert_eq!(engine.stats().get("chain-1").confirmed, 3);
    assert_eq!(report.manifest.len(), 6);
    Ok(())
}

/// Without the polling fallback, lost subscriptions exhaust the retries.
#[tokio::test]
async fn unavailable_subscription_without_fallback_fails_chunks() -> Result<()> {
    let data = payload(4_000);
    let pool = pool(2);
    let ledger = MemoryLedger::new();
    ledger.set_subscribe_down("chain-1", true);

    let mut settings = settings(1000);
    settings.max_retries = 1;
    let strict = Confirmation::TxEvent {
        fallback_poll: None,
    };
    let engine = engine(&ledger, &pool, Allocator::RoundRobin, strict, settings);

    match engine.upload("strict.bin", chunked(&data, 1000)).await {
        Err(Error::IncompleteUpload { missing }) => assert_eq!(missing, vec![1, 3]),
        other => panic!("expected IncompleteUpload, got {other:?}"),
    }
    // nothing was submitted to the endpoint that could not be observed
    assert!(ledger.included_keys("chain-1").is_empty());
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Verification
// ══════════════════════════════════════════════════════════════════════════════

/// A corrupted chunk is caught with the offset of the first bad byte.
#[tokio::test]
async fn corrupted_chunk_fails_verification_at_offset() -> Result<()> {
    const CHUNK: usize = 1000;
    let data = payload(5_500);
    let pool = pool(2);
    let ledger = MemoryLedger::new();
    let engine = engine(&ledger, &pool, Allocator::RoundRobin, POLL, settings(CHUNK));
    engine.upload("photo.raw", chunked(&data, CHUNK)).await?;

    // chunk 3 sits on chain-1; flip its 11th byte
    let mut tampered = data[3000..4000].to_vec();
    tampered[10] ^= 0xff;
    ledger.corrupt_chunk("chain-1", "photo.raw_3", Bytes::from(tampered));

    let verifier = Verifier::new(Arc::new(ledger.clone()), pool);
    match verifier.verify("photo.raw", &data).await {
        Err(Error::VerificationMismatch {
            offset,
            expected_len,
            actual_len,
        }) => {
            assert_eq!(offset, Some(3010));
            assert_eq!(expected_len, 5_500);
            assert_eq!(actual_len, 5_500);
        }
        other => panic!("expected VerificationMismatch, got {other:?}"),
    }
    Ok(())
}
