//! Manifest — ordered mapping from chunk position to the endpoint holding it.
//!
//! Wire format (UTF-8 JSON):
//!
//! ```text
//! { "filepath": "data/video.mp4",
//!   "chunks": [ { "index": "video.mp4_0", "chain": "chain-2" }, ... ] }
//! ```
//!
//! `index` is the on-ledger chunk key; its numeric suffix is the chunk
//! position and entries are always sorted ascending by it. The key is kept
//! as written, since a manifest read back may name keys that differ from
//! the ones `chunk_key` would derive from its file path.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Key prefix identifying a file on the ledger: its file name.
pub fn file_key(file_path: &str) -> String {
    Path::new(file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// On-ledger key of chunk `index` of a file.
pub fn chunk_key(file_key: &str, index: u64) -> String {
    format!("{file_key}_{index}")
}

/// Parse the numeric suffix of a chunk key.
fn index_of(key: &str) -> Result<u64> {
    key.rsplit_once('_')
        .and_then(|(_, suffix)| suffix.parse().ok())
        .ok_or_else(|| Error::Manifest(format!("chunk key without numeric suffix: {key}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub chunk_index: u64,
    /// Key the chunk is stored under on `endpoint_name`.
    pub chunk_key: String,
    pub endpoint_name: String,
}

impl ManifestEntry {
    pub fn new(file_key: &str, chunk_index: u64, endpoint_name: impl Into<String>) -> Self {
        Self {
            chunk_index,
            chunk_key: chunk_key(file_key, chunk_index),
            endpoint_name: endpoint_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub file_path: String,
    /// Sorted by `chunk_index`.
    pub entries: Vec<ManifestEntry>,
}

#[derive(Serialize, Deserialize)]
struct WireManifest {
    filepath: String,
    chunks: Vec<WireEntry>,
}

#[derive(Serialize, Deserialize)]
struct WireEntry {
    index: String,
    chain: String,
}

impl Manifest {
    /// Build a manifest, sorting entries by chunk index.
    pub fn new(file_path: impl Into<String>, mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by_key(|e| e.chunk_index);
        Self {
            file_path: file_path.into(),
            entries,
        }
    }

    /// Key the manifest is stored under on the index endpoint.
    pub fn key(&self) -> String {
        file_key(&self.file_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that indices are exactly `0..len` with no gaps or duplicates.
    pub fn validate(&self) -> Result<()> {
        for (expected, entry) in self.entries.iter().enumerate() {
            if entry.chunk_index != expected as u64 {
                return Err(Error::Manifest(format!(
                    "expected chunk {expected}, found {}",
                    entry.chunk_index
                )));
            }
        }
        Ok(())
    }

    pub fn to_wire(&self) -> Result<String> {
        let wire = WireManifest {
            filepath: self.file_path.clone(),
            chunks: self
                .entries
                .iter()
                .map(|e| WireEntry {
                    index: e.chunk_key.clone(),
                    chain: e.endpoint_name.clone(),
                })
                .collect(),
        };
        serde_json::to_string(&wire).map_err(|e| Error::Manifest(e.to_string()))
    }

    pub fn from_wire(text: &str) -> Result<Self> {
        let wire: WireManifest =
            serde_json::from_str(text).map_err(|e| Error::Manifest(e.to_string()))?;
        let entries = wire
            .chunks
            .into_iter()
            .map(|c| {
                Ok(ManifestEntry {
                    chunk_index: index_of(&c.index)?,
                    chunk_key: c.index,
                    endpoint_name: c.chain,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Manifest::new(wire.filepath, entries))
    }
}
