//! chainstored — runs an upload or a verification against the configured
//! endpoint pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use chainstore_core::config::ChainstoreConfig;
use chainstore_core::{file_key, split_file, Endpoint, EndpointDescriptor, EndpointRole, SigningIdentity};
use chainstore_services::{
    resolve_endpoints, ConfiguredSigners, HttpLedger, Ledger, MemoryLedger, StaticDiscovery,
    UploadEngine, UploadReport, Verifier,
};

/// Data endpoints simulated by `dry-run` when the config lists none.
const DRY_RUN_ENDPOINTS: usize = 4;

fn print_usage() {
    println!("Usage: chainstored <command> <file>");
    println!();
    println!("Commands:");
    println!("  upload <file>    Distribute a file across the endpoint pool and commit its manifest");
    println!("  verify <file>    Rebuild a stored file from its manifest and compare with <file>");
    println!("  dry-run <file>   Upload and verify against an in-memory ledger");
    println!();
    println!("Config: $CHAINSTORE_CONFIG or ~/.config/chainstore/config.toml");
    println!("Logging: RUST_LOG=chainstore_services=debug");
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn snapshot(config: &ChainstoreConfig) -> Result<Vec<Endpoint>> {
    let discovery = StaticDiscovery::from_config(config);
    let signers = ConfiguredSigners::from_config(config);
    resolve_endpoints(&discovery, &signers)
        .await
        .context("failed to resolve endpoint pool")
}

fn print_report(report: &UploadReport) {
    println!(
        "Uploaded {} ({} chunks, {} attempts) in {:.2}s",
        report.manifest.file_path,
        report.manifest.len(),
        report.attempts,
        report.elapsed.as_secs_f64()
    );
    println!("Manifest tx: {}", report.manifest_tx);
    for entry in &report.manifest.entries {
        println!("  {:>6}  {}", entry.chunk_index, entry.endpoint_name);
    }
}

async fn cmd_upload(config: &ChainstoreConfig, path: &Path) -> Result<()> {
    let endpoints = snapshot(config).await?;
    let ledger: Arc<dyn Ledger> = Arc::new(HttpLedger::new());
    let engine = UploadEngine::from_config(ledger, &endpoints, config)?;
    let report = engine
        .upload_file(path)
        .await
        .with_context(|| format!("upload of {} failed", path.display()))?;
    print_report(&report);
    Ok(())
}

async fn cmd_verify(config: &ChainstoreConfig, path: &Path) -> Result<()> {
    let endpoints = snapshot(config).await?;
    let source = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let verifier = Verifier::new(Arc::new(HttpLedger::new()), endpoints);
    let key = file_key(&path.to_string_lossy());
    let report = verifier
        .verify(&key, &source)
        .await
        .with_context(|| format!("verification of {key} failed"))?;
    println!(
        "Verified {key}: {} chunks, {} bytes, blake3 {}",
        report.chunks,
        report.bytes,
        hex::encode(report.reconstructed_digest)
    );
    Ok(())
}

fn simulated_pool() -> Vec<Endpoint> {
    let identity = |name: &str| SigningIdentity {
        key_name: format!("{name}-key"),
        account: String::new(),
    };
    let mut pool: Vec<Endpoint> = (0..DRY_RUN_ENDPOINTS)
        .map(|i| {
            let name = format!("chain-{i}");
            Endpoint::new(
                EndpointDescriptor {
                    name: name.clone(),
                    role: EndpointRole::Data,
                    rpc_address: format!("memory://{name}"),
                    rest_address: format!("memory://{name}"),
                },
                identity(&name),
            )
        })
        .collect();
    pool.push(Endpoint::new(
        EndpointDescriptor {
            name: "index".into(),
            role: EndpointRole::Index,
            rpc_address: "memory://index".into(),
            rest_address: "memory://index".into(),
        },
        identity("index"),
    ));
    pool
}

async fn cmd_dry_run(config: &ChainstoreConfig, path: &Path) -> Result<()> {
    let endpoints = if config.endpoints.is_empty() {
        simulated_pool()
    } else {
        snapshot(config).await?
    };
    let ledger = MemoryLedger::new();
    let engine = UploadEngine::from_config(Arc::new(ledger.clone()), &endpoints, config)?;

    let chunks = split_file(path, config.upload.chunk_size_bytes)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let report = engine.upload(&path.to_string_lossy(), chunks).await?;
    print_report(&report);

    let source = std::fs::read(path)?;
    let verifier = Verifier::new(Arc::new(ledger), endpoints);
    let verified = verifier.verify(&report.manifest.key(), &source).await?;
    println!("Verified: {} bytes match", verified.bytes);
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ChainstoreConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ChainstoreConfig::load().context("failed to load config")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let run = async {
        match args.as_slice() {
            ["upload", file] => cmd_upload(&config, &PathBuf::from(file)).await,
            ["verify", file] => cmd_verify(&config, &PathBuf::from(file)).await,
            ["dry-run", file] => cmd_dry_run(&config, &PathBuf::from(file)).await,
            ["help"] | ["--help"] | ["-h"] | [] => {
                print_usage();
                Ok(())
            }
            other => {
                eprintln!("Unknown command: {}", other.join(" "));
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    };

    tokio::select! {
        r = run => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, in-flight writes may still be included");
            std::process::exit(130);
        }
    }
}
