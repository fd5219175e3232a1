//! Error taxonomy for upload, confirmation and verification.
//!
//! Transient transport problems are recovered locally (the chunk goes back
//! to the pending queue). Structural problems propagate straight to the
//! caller. `Error::is_retryable` encodes that split.

use thiserror::Error;

/// Failures reported by a ledger collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("no endpoint available: every load query failed")]
    NoEndpointAvailable,

    #[error("endpoint pool is empty")]
    EmptyEndpointPool,

    #[error("endpoint not found: {0}")]
    MissingEndpoint(String),

    #[error("no index endpoint configured")]
    MissingIndexEndpoint,

    #[error("submission to {endpoint} failed: {reason}")]
    Submission { endpoint: String, reason: String },

    #[error("event subscription to {endpoint} lost")]
    SubscriptionLost { endpoint: String },

    /// The write may still land later; the tx ref is kept so callers can
    /// reconcile instead of assuming it was lost.
    #[error("confirmation of {tx_ref} on {endpoint} timed out (write may still be included)")]
    TimedOut { endpoint: String, tx_ref: String },

    #[error("transaction {tx_ref} on {endpoint} failed with code {code}: {log}")]
    ConfirmationFailed {
        endpoint: String,
        tx_ref: String,
        code: u32,
        log: String,
    },

    #[error("upload incomplete: {} chunk(s) unconfirmed", missing.len())]
    IncompleteUpload { missing: Vec<u64> },

    #[error("manifest already committed")]
    ManifestAlreadyCommitted,

    #[error("verification mismatch at offset {offset:?} (expected {expected_len} bytes, got {actual_len})")]
    VerificationMismatch {
        offset: Option<u64>,
        expected_len: u64,
        actual_len: u64,
    },

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl Error {
    /// True for errors the upload engine handles by re-queueing the chunk.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Submission { .. }
            | Error::SubscriptionLost { .. }
            | Error::TimedOut { .. }
            | Error::ConfirmationFailed { .. } => true,
            Error::Ledger(LedgerError::Transport(_)) | Error::Ledger(LedgerError::Rejected(_)) => {
                true
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
