//! Concurrent dispatch of one RPC call across a set of workers. See
//! spec.md §4.5. `$broadcast` expansion to the active worker list is the
//! caller's job -- Fanout only ever sees the concrete unit names it's given.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use pio_workerrpc::{Verb, WorkerRpc};
use serde_json::Value;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Call `endpoint` on every worker in `pioreactor_units` concurrently.
/// Each entry in the result is present for every requested worker: `None`
/// covers both "the worker errored" and "the global timeout elapsed before
/// it answered".
pub async fn fanout(
    rpc: &WorkerRpc,
    verb: Verb,
    endpoint: &str,
    pioreactor_units: &[String],
    body: Option<Value>,
    timeout: Option<Duration>,
) -> HashMap<String, Option<Value>> {
    let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);

    let calls = pioreactor_units.iter().map(|unit| {
        let body = body.clone();
        async move {
            let result = tokio::time::timeout(timeout, rpc.call(unit, verb, endpoint, body)).await;
            let value = match result {
                Ok(value) => value,
                Err(_) => {
                    tracing::debug!(pioreactor_unit = %unit, endpoint, "fanout call timed out");
                    None
                }
            };
            (unit.clone(), value)
        }
    });

    join_all(calls).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pio_workerrpc::Resolver;

    struct NeverResolves;

    #[async_trait]
    impl Resolver for NeverResolves {
        async fn resolve(&self, _pioreactor_unit: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn every_requested_worker_has_an_entry() {
        let rpc = WorkerRpc::new(NeverResolves);
        let units = vec!["pio01".to_string(), "pio02".to_string()];
        let results = fanout(&rpc, Verb::Get, "/unit_api/jobs/running", &units, None, None).await;
        assert_eq!(results.len(), 2);
        assert!(results["pio01"].is_none());
        assert!(results["pio02"].is_none());
    }
}
