//! Verifier — fetch a committed manifest, download every chunk it names
//! in parallel and compare the reconstruction with the source bytes.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;

use chainstore_core::endpoint::{find, index_endpoint};
use chainstore_core::{Endpoint, Error, Manifest, Result};

use crate::ledger::Ledger;

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub chunks: usize,
    pub bytes: u64,
    pub source_digest: [u8; 32],
    pub reconstructed_digest: [u8; 32],
}

impl VerificationReport {
    pub fn source_hex(&self) -> String {
        hex::encode(self.source_digest)
    }
}

pub struct Verifier {
    ledger: Arc<dyn Ledger>,
    endpoints: Vec<Endpoint>,
}

impl Verifier {
    pub fn new(ledger: Arc<dyn Ledger>, endpoints: Vec<Endpoint>) -> Self {
        Self { ledger, endpoints }
    }

    /// Read and parse the manifest stored under `key`.
    pub async fn fetch_manifest(&self, key: &str) -> Result<Manifest> {
        let index = index_endpoint(&self.endpoints)?;
        let body = self.ledger.manifest_by_key(index, key).await?;
        let manifest = Manifest::from_wire(&body)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Download every chunk concurrently and concatenate in manifest order.
    pub async fn reconstruct(&self, manifest: &Manifest) -> Result<Vec<u8>> {
        let key = manifest.key();
        let fetches = manifest.entries.iter().map(|entry| {
            let chunk_key = entry.chunk_key.as_str();
            let endpoint = find(&self.endpoints, &entry.endpoint_name);
            async move {
                let endpoint = endpoint?;
                let data: Bytes = self.ledger.chunk_by_key(endpoint, chunk_key).await?;
                Ok::<_, Error>(data)
            }
        });
        let parts = try_join_all(fetches).await?;

        let total: usize = parts.iter().map(|p| p.len()).sum();
        let mut out = Vec::with_capacity(total);
        for part in &parts {
            out.extend_from_slice(part);
        }
        tracing::debug!(file = %key, chunks = parts.len(), bytes = total, "reconstructed");
        Ok(out)
    }

    /// Fetch, reconstruct and byte-compare against `source`.
    pub async fn verify(&self, key: &str, source: &[u8]) -> Result<VerificationReport> {
        let manifest = self.fetch_manifest(key).await?;
        let rebuilt = self.reconstruct(&manifest).await?;
        compare(source, &rebuilt)?;

        let report = VerificationReport {
            chunks: manifest.len(),
            bytes: rebuilt.len() as u64,
            source_digest: chainstore_core::hash(source),
            reconstructed_digest: chainstore_core::hash(&rebuilt),
        };
        tracing::info!(
            file = %key,
            chunks = report.chunks,
            bytes = report.bytes,
            blake3 = %report.source_hex(),
            "verification passed"
        );
        Ok(report)
    }
}

/// `VerificationMismatch` at the first differing offset, or at the shorter
/// length when one side is a prefix of the other.
pub fn compare(expected: &[u8], actual: &[u8]) -> Result<()> {
    let offset = expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .or_else(|| (expected.len() != actual.len()).then(|| expected.len().min(actual.len())));

    match offset {
        None => Ok(()),
        Some(offset) => Err(Error::VerificationMismatch {
            offset: Some(offset as u64),
            expected_len: expected.len() as u64,
            actual_len: actual.len() as u64,
        }),
    }
}
