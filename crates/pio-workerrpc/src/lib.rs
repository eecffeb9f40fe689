//! Per-worker HTTP RPC client used by fanout. See spec.md §4.4.
//!
//! Every failure mode -- unresolvable name, refused connection, timeout,
//! non-2xx status, unparsable body -- folds to `None`. Fanout callers only
//! ever see "this worker answered" or "this worker didn't"; they never see
//! *why*, because the leader has no reliable way to tell "down" from "slow"
//! from "misconfigured" apart, and conflating them would invite callers to
//! special-case failure modes that aren't actually distinguishable.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

impl Verb {
    /// Per-verb timeout: reads are cheap and get a short budget; mutations
    /// (especially job control) get longer, matching spec.md §4.4.
    fn timeout(self) -> Duration {
        match self {
            Verb::Get => Duration::from_secs(1),
            Verb::Post => Duration::from_secs(6),
            Verb::Patch => Duration::from_secs(6),
            Verb::Delete => Duration::from_secs(3),
        }
    }
}

/// Resolves a `pioreactor_unit` name to a base URL for its unit API.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, pioreactor_unit: &str) -> Option<String>;
}

/// Resolves `{unit}` to `http://{unit}.local:{port}` via mDNS-style hostnames,
/// the same convention the cluster's workers advertise themselves under.
pub struct DnsResolver {
    port: u16,
}

impl DnsResolver {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, pioreactor_unit: &str) -> Option<String> {
        Some(format!("http://{pioreactor_unit}.local:{port}", port = self.port))
    }
}

/// Fixed unit -> base-URL map, for tests and for leaders pinned to known IPs.
#[derive(Default)]
pub struct StaticResolver {
    addresses: std::collections::HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pioreactor_unit: impl Into<String>, base_url: impl Into<String>) -> &mut Self {
        self.addresses.insert(pioreactor_unit.into(), base_url.into());
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, pioreactor_unit: &str) -> Option<String> {
        self.addresses.get(pioreactor_unit).cloned()
    }
}

/// Per-worker HTTP RPC client.
pub struct WorkerRpc {
    client: reqwest::Client,
    resolver: Box<dyn Resolver>,
}

impl WorkerRpc {
    pub fn new(resolver: impl Resolver + 'static) -> Self {
        Self {
            client: reqwest::Client::new(),
            resolver: Box::new(resolver),
        }
    }

    /// Call `endpoint` (e.g. `/unit_api/jobs/run/job_name/stirring`) on
    /// `pioreactor_unit`. Returns `None` for any failure whatsoever.
    pub async fn call(&self, pioreactor_unit: &str, verb: Verb, endpoint: &str, body: Option<Value>) -> Option<Value> {
        let base = self.resolver.resolve(pioreactor_unit).await?;
        let url = format!("{base}{endpoint}");

        let mut request = match verb {
            Verb::Get => self.client.get(&url),
            Verb::Post => self.client.post(&url),
            Verb::Patch => self.client.patch(&url),
            Verb::Delete => self.client.delete(&url),
        }
        .timeout(verb.timeout());

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            tracing::debug!(
                pioreactor_unit,
                status = %response.status(),
                endpoint,
                "worker rpc returned non-2xx"
            );
            return None;
        }
        response.json::<Value>().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unresolvable_worker_folds_to_none() {
        let rpc = WorkerRpc::new(StaticResolver::new());
        let result = rpc.call("ghost", Verb::Get, "/unit_api/jobs/running", None).await;
        assert!(result.is_none());
    }
}
