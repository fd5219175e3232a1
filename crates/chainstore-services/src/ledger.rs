//! Ledger collaborator traits.
//!
//! The pipeline never encodes or signs transactions itself. It asks a
//! `LedgerWriter` to estimate and submit a write and a `LedgerReader` to
//! report load, transaction status, inclusion events and stored content.
//! Both are addressed per endpoint.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use chainstore_core::{Endpoint, LedgerError};

/// Gas units attached to a write.
pub type Gas = u64;

/// Transaction hash returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    StoreChunk,
    StoreManifest,
}

/// Cost-relevant shape of a write. Two writes with the same shape are
/// assumed to cost the same gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageShape {
    pub kind: MessageKind,
    pub payload_len: usize,
}

/// An abstract ledger write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMessage {
    StoreChunk { key: String, data: Bytes },
    StoreManifest { key: String, body: String },
}

impl WriteMessage {
    pub fn key(&self) -> &str {
        match self {
            WriteMessage::StoreChunk { key, .. } | WriteMessage::StoreManifest { key, .. } => key,
        }
    }

    pub fn shape(&self) -> MessageShape {
        match self {
            WriteMessage::StoreChunk { data, .. } => MessageShape {
                kind: MessageKind::StoreChunk,
                payload_len: data.len(),
            },
            WriteMessage::StoreManifest { body, .. } => MessageShape {
                kind: MessageKind::StoreManifest,
                payload_len: body.len(),
            },
        }
    }
}

/// Where a submitted transaction stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Included { height: u64, gas_used: Gas },
    /// Included in a block but execution failed.
    Failed { code: u32, log: String },
}

/// Inclusion event delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    pub tx_hash: String,
    pub height: u64,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub gas_used: Gas,
    #[serde(default)]
    pub log: String,
}

/// Live stream of inclusion events from one endpoint. Ends (or yields an
/// error) when the underlying channel drops.
pub type TxEventStream = BoxStream<'static, Result<TxEvent, LedgerError>>;

#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Estimate the gas a write will consume.
    async fn estimate_cost(&self, endpoint: &Endpoint, message: &WriteMessage)
        -> Result<Gas, LedgerError>;

    /// Sign with the endpoint's identity and broadcast.
    async fn submit(
        &self,
        endpoint: &Endpoint,
        message: &WriteMessage,
        gas: Gas,
    ) -> Result<TxRef, LedgerError>;
}

#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Mempool depth.
    async fn pending_tx_count(&self, endpoint: &Endpoint) -> Result<u64, LedgerError>;

    async fn tx_status(&self, endpoint: &Endpoint, tx: &TxRef) -> Result<TxStatus, LedgerError>;

    async fn subscribe_txs(&self, endpoint: &Endpoint) -> Result<TxEventStream, LedgerError>;

    async fn chunk_by_key(&self, endpoint: &Endpoint, key: &str) -> Result<Bytes, LedgerError>;

    async fn manifest_by_key(&self, endpoint: &Endpoint, key: &str)
        -> Result<String, LedgerError>;
}

/// Full read/write access to a set of endpoints.
pub trait Ledger: LedgerWriter + LedgerReader {}

impl<T: LedgerWriter + LedgerReader> Ledger for T {}
