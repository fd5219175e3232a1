//! Endpoint discovery and signing identities.
//!
//! Both are external collaborators. The pipeline takes one snapshot at
//! run start and never refreshes it mid-run.

use std::collections::HashMap;

use async_trait::async_trait;

use chainstore_core::config::ChainstoreConfig;
use chainstore_core::{Endpoint, EndpointDescriptor, Error, Result, SigningIdentity};

#[async_trait]
pub trait EndpointDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<EndpointDescriptor>>;
}

#[async_trait]
pub trait SigningProvider: Send + Sync {
    async fn identity(&self, endpoint_name: &str) -> Result<SigningIdentity>;
}

/// Discovery backed by a fixed list, usually the config file.
pub struct StaticDiscovery {
    endpoints: Vec<EndpointDescriptor>,
}

impl StaticDiscovery {
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self { endpoints }
    }

    pub fn from_config(config: &ChainstoreConfig) -> Self {
        Self::new(config.endpoints.iter().map(|e| e.descriptor()).collect())
    }
}

#[async_trait]
impl EndpointDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<EndpointDescriptor>> {
        Ok(self.endpoints.clone())
    }
}

/// Key references per endpoint name, as listed in the config file.
pub struct ConfiguredSigners {
    identities: HashMap<String, SigningIdentity>,
}

impl ConfiguredSigners {
    pub fn new(identities: HashMap<String, SigningIdentity>) -> Self {
        Self { identities }
    }

    pub fn from_config(config: &ChainstoreConfig) -> Self {
        Self::new(
            config
                .endpoints
                .iter()
                .map(|e| (e.name.clone(), e.signing_identity()))
                .collect(),
        )
    }
}

#[async_trait]
impl SigningProvider for ConfiguredSigners {
    async fn identity(&self, endpoint_name: &str) -> Result<SigningIdentity> {
        self.identities
            .get(endpoint_name)
            .cloned()
            .ok_or_else(|| Error::MissingEndpoint(endpoint_name.to_string()))
    }
}

/// Resolve the read-only endpoint snapshot for one run.
pub async fn resolve_endpoints(
    discovery: &dyn EndpointDiscovery,
    signers: &dyn SigningProvider,
) -> Result<Vec<Endpoint>> {
    let descriptors = discovery.discover().await?;
    if descriptors.is_empty() {
        return Err(Error::EmptyEndpointPool);
    }

    let mut snapshot = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let identity = signers.identity(&descriptor.name).await?;
        tracing::debug!(
            endpoint = %descriptor.name,
            role = ?descriptor.role,
            rpc = %descriptor.rpc_address,
            "endpoint resolved"
        );
        snapshot.push(Endpoint::new(descriptor, identity));
    }
    Ok(snapshot)
}
