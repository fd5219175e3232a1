//! Endpoints — independently addressable ledger nodes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// Holds chunk payloads.
    #[default]
    Data,
    /// Holds manifests.
    Index,
}

/// What discovery knows about an endpoint, before a signer is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub name: String,
    #[serde(default)]
    pub role: EndpointRole,
    pub rpc_address: String,
    pub rest_address: String,
}

/// Reference to a key able to sign writes for one endpoint. Holds the key
/// name and account address only; secret material stays with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningIdentity {
    pub key_name: String,
    pub account: String,
}

/// A resolved endpoint. Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub role: EndpointRole,
    pub rpc_address: String,
    pub rest_address: String,
    pub signing_identity: SigningIdentity,
}

impl Endpoint {
    pub fn new(descriptor: EndpointDescriptor, signing_identity: SigningIdentity) -> Self {
        Self {
            name: descriptor.name,
            role: descriptor.role,
            rpc_address: descriptor.rpc_address,
            rest_address: descriptor.rest_address,
            signing_identity,
        }
    }

    pub fn is_data(&self) -> bool {
        self.role == EndpointRole::Data
    }
}

/// Data endpoints of a snapshot, in snapshot order.
pub fn data_endpoints(snapshot: &[Endpoint]) -> Vec<Endpoint> {
    snapshot.iter().filter(|e| e.is_data()).cloned().collect()
}

/// The first index endpoint of a snapshot.
pub fn index_endpoint(snapshot: &[Endpoint]) -> Result<&Endpoint> {
    snapshot
        .iter()
        .find(|e| e.role == EndpointRole::Index)
        .ok_or(Error::MissingIndexEndpoint)
}

/// Look an endpoint up by name.
pub fn find<'a>(snapshot: &'a [Endpoint], name: &str) -> Result<&'a Endpoint> {
    snapshot
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| Error::MissingEndpoint(name.to_string()))
}
