//! HTTP ledger — talks to endpoints over their REST gateways.
//!
//! RPC side (`endpoint.rpc_address`):
//!
//!   POST /estimate               body WireTx            → {"gas": u64}
//!   POST /broadcast              body WireTx with gas   → {"tx_hash": str}
//!   GET  /num_unconfirmed_txs                           → {"n_txs": str}
//!   GET  /tx/{hash}                                     → TxResponse
//!   GET  /events/tx              newline-delimited TxEvent JSON, kept open
//!
//! REST side (`endpoint.rest_address`):
//!
//!   GET  /chunks/{key}                                  → {"data": hex}
//!   GET  /manifests/{key}                               → {"manifest": str}
//!
//! Path parameters are percent-encoded, so keys may carry `#`, `?` or `/`.
//! 404 maps to `NotFound`, any other 4xx to `Rejected`, everything else
//! that is not a success to `Transport`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use chainstore_core::{Endpoint, LedgerError};

use crate::ledger::{
    Gas, LedgerReader, LedgerWriter, TxEvent, TxEventStream, TxRef, TxStatus, WriteMessage,
};

/// A write as it travels to the gateway. Chunk payloads are hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireWrite {
    StoreChunk { key: String, data: String },
    StoreManifest { key: String, body: String },
}

impl WireWrite {
    pub fn from_message(message: &WriteMessage) -> Self {
        match message {
            WriteMessage::StoreChunk { key, data } => WireWrite::StoreChunk {
                key: key.clone(),
                data: hex::encode(data),
            },
            WriteMessage::StoreManifest { key, body } => WireWrite::StoreManifest {
                key: key.clone(),
                body: body.clone(),
            },
        }
    }

    pub fn into_message(self) -> Result<WriteMessage, LedgerError> {
        Ok(match self {
            WireWrite::StoreChunk { key, data } => WriteMessage::StoreChunk {
                key,
                data: Bytes::from(hex::decode(&data).map_err(|e| LedgerError::Decode(e.to_string()))?),
            },
            WireWrite::StoreManifest { key, body } => WriteMessage::StoreManifest { key, body },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTx {
    #[serde(flatten)]
    pub write: WireWrite,
    /// Key name of the signing identity.
    pub signer: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub gas: Gas,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EstimateResponse {
    pub gas: Gas,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub tx_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub n_txs: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TxResponse {
    pub status: String,
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub gas_used: Gas,
    #[serde(default)]
    pub log: String,
}

impl TxResponse {
    pub fn from_status(status: &TxStatus) -> Self {
        match status {
            TxStatus::Pending => Self {
                status: "pending".into(),
                ..Default::default()
            },
            TxStatus::Included { height, gas_used } => Self {
                status: "included".into(),
                height: *height,
                gas_used: *gas_used,
                ..Default::default()
            },
            TxStatus::Failed { code, log } => Self {
                status: "failed".into(),
                code: *code,
                log: log.clone(),
                ..Default::default()
            },
        }
    }

    fn into_status(self) -> Result<TxStatus, LedgerError> {
        match self.status.as_str() {
            "pending" => Ok(TxStatus::Pending),
            "included" => Ok(TxStatus::Included {
                height: self.height,
                gas_used: self.gas_used,
            }),
            "failed" => Ok(TxStatus::Failed {
                code: self.code,
                log: self.log,
            }),
            other => Err(LedgerError::Decode(format!("unknown tx status {other:?}"))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestResponse {
    pub manifest: String,
}

#[derive(Clone, Default)]
pub struct HttpLedger {
    client: Client,
}

impl HttpLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn rpc(endpoint: &Endpoint, segments: &[&str]) -> Result<Url, LedgerError> {
        url(&endpoint.rpc_address, segments)
    }

    fn rest(endpoint: &Endpoint, segments: &[&str]) -> Result<Url, LedgerError> {
        url(&endpoint.rest_address, segments)
    }

    fn wire_tx(endpoint: &Endpoint, message: &WriteMessage, gas: Gas) -> WireTx {
        WireTx {
            write: WireWrite::from_message(message),
            signer: endpoint.signing_identity.key_name.clone(),
            account: endpoint.signing_identity.account.clone(),
            gas,
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, LedgerError> {
        let resp = self.client.get(url).send().await.map_err(transport)?;
        decode(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, url: Url, body: &WireTx) -> Result<T, LedgerError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }
}

/// Append `segments` to `base`, each percent-encoded as one path segment.
fn url(base: &str, segments: &[&str]) -> Result<Url, LedgerError> {
    let mut url = Url::parse(base)
        .map_err(|e| LedgerError::Transport(format!("bad address {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| LedgerError::Transport(format!("address {base:?} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn transport(e: reqwest::Error) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

/// Map a non-success status to the matching ledger error.
async fn check(resp: Response) -> Result<Response, LedgerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => LedgerError::NotFound(body),
        s if s.is_client_error() => LedgerError::Rejected(format!("{s}: {body}")),
        s => LedgerError::Transport(format!("{s}: {body}")),
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, LedgerError> {
    check(resp)
        .await?
        .json::<T>()
        .await
        .map_err(|e| LedgerError::Decode(e.to_string()))
}

#[async_trait]
impl LedgerWriter for HttpLedger {
    async fn estimate_cost(
        &self,
        endpoint: &Endpoint,
        message: &WriteMessage,
    ) -> Result<Gas, LedgerError> {
        let resp: EstimateResponse = self
            .post(Self::rpc(endpoint, &["estimate"])?, &Self::wire_tx(endpoint, message, 0))
            .await?;
        Ok(resp.gas)
    }

    async fn submit(
        &self,
        endpoint: &Endpoint,
        message: &WriteMessage,
        gas: Gas,
    ) -> Result<TxRef, LedgerError> {
        let resp: BroadcastResponse = self
            .post(Self::rpc(endpoint, &["broadcast"])?, &Self::wire_tx(endpoint, message, gas))
            .await?;
        Ok(TxRef(resp.tx_hash))
    }
}

#[async_trait]
impl LedgerReader for HttpLedger {
    async fn pending_tx_count(&self, endpoint: &Endpoint) -> Result<u64, LedgerError> {
        let resp: PendingResponse = self.get(Self::rpc(endpoint, &["num_unconfirmed_txs"])?).await?;
        resp.n_txs
            .parse()
            .map_err(|_| LedgerError::Decode(format!("n_txs {:?} is not a count", resp.n_txs)))
    }

    async fn tx_status(&self, endpoint: &Endpoint, tx: &TxRef) -> Result<TxStatus, LedgerError> {
        let resp: TxResponse = self.get(Self::rpc(endpoint, &["tx", tx.0.as_str()])?).await?;
        resp.into_status()
    }

    async fn subscribe_txs(&self, endpoint: &Endpoint) -> Result<TxEventStream, LedgerError> {
        let resp = self
            .client
            .get(Self::rpc(endpoint, &["events", "tx"])?)
            .send()
            .await
            .map_err(transport)?;
        let body = check(resp).await?.bytes_stream().boxed();
        Ok(ndjson_events(body))
    }

    async fn chunk_by_key(&self, endpoint: &Endpoint, key: &str) -> Result<Bytes, LedgerError> {
        let resp: ChunkResponse = self.get(Self::rest(endpoint, &["chunks", key])?).await?;
        hex::decode(&resp.data)
            .map(Bytes::from)
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn manifest_by_key(&self, endpoint: &Endpoint, key: &str) -> Result<String, LedgerError> {
        let resp: ManifestResponse = self
            .get(Self::rest(endpoint, &["manifests", key])?)
            .await?;
        Ok(resp.manifest)
    }
}

struct LineReader<E> {
    body: BoxStream<'static, Result<Bytes, E>>,
    buf: Vec<u8>,
    done: bool,
}

/// Split a byte stream into newline-delimited `TxEvent`s. Blank lines are
/// keepalives and skipped. A transport error ends the stream after being
/// yielded once.
fn ndjson_events<E>(body: BoxStream<'static, Result<Bytes, E>>) -> TxEventStream
where
    E: std::fmt::Display + Send + 'static,
{
    let reader = LineReader {
        body,
        buf: Vec::new(),
        done: false,
    };
    futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = reader.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let event = serde_json::from_str::<TxEvent>(line)
                    .map_err(|e| LedgerError::Decode(e.to_string()));
                return Some((event, reader));
            }
            if reader.done {
                return None;
            }
            match reader.body.next().await {
                Some(Ok(bytes)) => reader.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    reader.done = true;
                    reader.buf.clear();
                    return Some((Err(LedgerError::Transport(e.to_string())), reader));
                }
                None => {
                    reader.done = true;
                    if !reader.buf.is_empty() {
                        reader.buf.push(b'\n');
                    }
                }
            }
        }
    })
    .boxed()
}
