//! Manifest builder — collects confirmed (chunk, endpoint) pairs in any
//! completion order and commits the ordered manifest once.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chainstore_core::{file_key, Endpoint, Error, Manifest, ManifestEntry, Result};

use crate::confirmation::Confirmation;
use crate::ledger::WriteMessage;
use crate::transmitter::{Receipt, Transmitter};

pub struct ManifestBuilder {
    file_path: String,
    total: u64,
    confirmed: Mutex<BTreeMap<u64, String>>,
    committed: tokio::sync::Mutex<bool>,
}

impl ManifestBuilder {
    pub fn new(file_path: impl Into<String>, total: u64) -> Self {
        Self {
            file_path: file_path.into(),
            total,
            confirmed: Mutex::new(BTreeMap::new()),
            committed: tokio::sync::Mutex::new(false),
        }
    }

    fn confirmed(&self) -> MutexGuard<'_, BTreeMap<u64, String>> {
        self.confirmed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Record a confirmed chunk. Returns false if the index was already
    /// recorded or is out of range; the first confirmation wins.
    pub fn record(&self, index: u64, endpoint: &str) -> bool {
        if index >= self.total {
            tracing::warn!(chunk = index, total = self.total, "confirmation for unknown chunk ignored");
            return false;
        }
        let mut confirmed = self.confirmed();
        if let Some(existing) = confirmed.get(&index) {
            tracing::warn!(
                chunk = index,
                recorded = %existing,
                late = %endpoint,
                "duplicate confirmation ignored"
            );
            return false;
        }
        confirmed.insert(index, endpoint.to_string());
        true
    }

    pub fn is_recorded(&self, index: u64) -> bool {
        self.confirmed().contains_key(&index)
    }

    pub fn recorded(&self) -> usize {
        self.confirmed().len()
    }

    /// Indices not yet confirmed, ascending.
    pub fn missing(&self) -> Vec<u64> {
        let confirmed = self.confirmed();
        (0..self.total)
            .filter(|i| !confirmed.contains_key(i))
            .collect()
    }

    /// The ordered manifest, or `IncompleteUpload` if any chunk is missing.
    pub fn build(&self) -> Result<Manifest> {
        let confirmed = self.confirmed();
        if (confirmed.len() as u64) < self.total {
            let missing = (0..self.total)
                .filter(|i| !confirmed.contains_key(i))
                .collect();
            return Err(Error::IncompleteUpload { missing });
        }
        let key = file_key(&self.file_path);
        let entries = confirmed
            .iter()
            .map(|(&chunk_index, endpoint)| ManifestEntry::new(&key, chunk_index, endpoint.clone()))
            .collect();
        Ok(Manifest::new(self.file_path.clone(), entries))
    }

    /// Write the manifest to the index endpoint. Only one commit succeeds;
    /// a failed commit may be retried.
    pub async fn commit(
        &self,
        transmitter: &Transmitter,
        index_endpoint: &Endpoint,
        confirmation: &Confirmation,
        timeout: Duration,
    ) -> Result<(Manifest, Receipt)> {
        let mut committed = self.committed.lock().await;
        if *committed {
            return Err(Error::ManifestAlreadyCommitted);
        }

        let manifest = self.build()?;
        let message = WriteMessage::StoreManifest {
            key: manifest.key(),
            body: manifest.to_wire()?,
        };
        let receipt = transmitter
            .transmit(index_endpoint, &message, confirmation, timeout)
            .await?;
        *committed = true;

        tracing::info!(
            file = %self.file_path,
            chunks = manifest.len(),
            endpoint = %index_endpoint.name,
            tx = %receipt.tx_ref,
            "manifest committed"
        );
        Ok((manifest, receipt))
    }
}
