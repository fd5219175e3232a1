//! chainstore-services — the upload pipeline: allocation, per-endpoint
//! transmission, confirmation, manifest commit and verification, plus the
//! ledger clients it runs against.

pub mod allocator;
pub mod confirmation;
pub mod discovery;
pub mod http;
pub mod ledger;
pub mod manifest_builder;
pub mod memory;
pub mod queue;
pub mod stats;
pub mod transmitter;
pub mod upload;
pub mod verifier;

pub use allocator::Allocator;
pub use confirmation::{Armed, Confirmation, Confirmed};
pub use discovery::{
    resolve_endpoints, ConfiguredSigners, EndpointDiscovery, SigningProvider, StaticDiscovery,
};
pub use http::HttpLedger;
pub use ledger::{
    Gas, Ledger, LedgerReader, LedgerWriter, MessageKind, MessageShape, TxEvent, TxEventStream,
    TxRef, TxStatus, WriteMessage,
};
pub use manifest_builder::ManifestBuilder;
pub use memory::MemoryLedger;
pub use queue::{PendingChunk, PendingQueue};
pub use stats::{EndpointStats, UploadStats};
pub use transmitter::{Receipt, Transmitter};
pub use upload::{Distribution, EngineSettings, SubmissionResult, UploadEngine, UploadReport};
pub use verifier::{compare, VerificationReport, Verifier};
