use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable keys a `pio run` task is allowed to forward.
///
/// Anything outside this list is stripped before the task is handed to
/// `TaskEngine`/`WorkerRPC` -- the "env sandbox" invariant from spec.md §8.
pub const ALLOWED_ENV_KEYS: &[&str] = &[
    "EXPERIMENT",
    "JOB_SOURCE",
    "TESTING",
    "HOSTNAME",
    "HARDWARE",
    "ACTIVE",
    "FIRMWARE",
    "DEBUG",
    "MODEL_NAME",
    "MODEL_VERSION",
    "SKIP_PLUGINS",
];

/// Body of a "run job" request: `{options, args, env}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgsOptionsEnvs {
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ArgsOptionsEnvs {
    /// Keep only allow-listed keys, then overlay the leader-injected pair.
    pub fn sandboxed_env(&self, experiment: &str) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .env
            .iter()
            .filter(|(k, _)| ALLOWED_ENV_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.insert("EXPERIMENT".to_string(), experiment.to_string());
        env.insert("ACTIVE".to_string(), "1".to_string());
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandboxed_env_strips_unknown_keys() {
        let mut body = ArgsOptionsEnvs::default();
        body.env.insert("EXPERIMENT".into(), "exp-A".into());
        body.env.insert("EVIL".into(), "1".into());

        let env = body.sandboxed_env("exp-A");
        assert!(env.keys().all(|k| ALLOWED_ENV_KEYS.contains(&k.as_str())));
        assert_eq!(env.get("EXPERIMENT"), Some(&"exp-A".to_string()));
        assert_eq!(env.get("ACTIVE"), Some(&"1".to_string()));
        assert!(!env.contains_key("EVIL"));
    }
}
