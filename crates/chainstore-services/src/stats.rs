//! Upload stats — per-endpoint submission and confirmation counters.

use std::sync::Arc;

use dashmap::DashMap;

use crate::ledger::Gas;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub submitted: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub gas_used: Gas,
}

/// Shared counters, cheap to clone into every worker.
#[derive(Clone, Default)]
pub struct UploadStats {
    endpoints: Arc<DashMap<String, EndpointStats>>,
}

impl UploadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self, endpoint: &str) {
        self.endpoints.entry(endpoint.to_string()).or_default().submitted += 1;
    }

    pub fn record_confirmed(&self, endpoint: &str, gas_used: Gas) {
        let mut stats = self.endpoints.entry(endpoint.to_string()).or_default();
        stats.confirmed += 1;
        stats.gas_used += gas_used;
    }

    pub fn record_failed(&self, endpoint: &str) {
        self.endpoints.entry(endpoint.to_string()).or_default().failed += 1;
    }

    pub fn record_timed_out(&self, endpoint: &str) {
        self.endpoints.entry(endpoint.to_string()).or_default().timed_out += 1;
    }

    pub fn get(&self, endpoint: &str) -> EndpointStats {
        self.endpoints
            .get(endpoint)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Counters for every endpoint touched so far, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, EndpointStats)> {
        let mut all: Vec<_> = self
            .endpoints
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn log_summary(&self) {
        for (endpoint, stats) in self.snapshot() {
            tracing::info!(
                endpoint = %endpoint,
                submitted = stats.submitted,
                confirmed = stats.confirmed,
                failed = stats.failed,
                timed_out = stats.timed_out,
                gas_used = stats.gas_used,
                "endpoint stats"
            );
        }
    }
}
