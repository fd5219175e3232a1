//! chainstore-core — shared types, manifest wire format, chunking and
//! run configuration. All other chainstore crates depend on this one.

pub mod chunk;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod manifest;

pub use chunk::{reassemble, split, split_file, Chunk};
pub use config::{AllocatorKind, ChainstoreConfig, ConfirmationKind};
pub use endpoint::{Endpoint, EndpointDescriptor, EndpointRole, SigningIdentity};
pub use error::{Error, LedgerError, Result};
pub use manifest::{chunk_key, file_key, Manifest, ManifestEntry};

/// Content hash used in verification reports.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
