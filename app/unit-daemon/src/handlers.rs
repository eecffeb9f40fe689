//! Subprocess-shelling `TaskHandler`s for the task kinds a worker node runs
//! locally: job start/stop, plugin management, and the filesystem writes
//! `pio-unit-api` defers to the queue. Each handler shells out to the `pio`
//! CLI the same way the Huey tasks this was distilled from do, just with
//! `tokio::process::Command` standing in for `subprocess.run`/`Popen`.

use std::collections::HashMap;
use std::sync::Arc;

use pio_taskengine::{FnTaskHandler, HandlerError, TaskEngine, TaskHandler};
use pio_types::env::ALLOWED_ENV_KEYS;
use pio_types::task::TaskKind;
use serde_json::Value;
use tokio::process::Command;

fn filtered_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .filter(|(k, _)| ALLOWED_ENV_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Turns a free-form `{"option-name": value}` map into `--option-name
/// value` pairs. Boolean `true` becomes a bare flag, `false` is omitted.
fn options_to_cli_args(options: &HashMap<String, Value>) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in options {
        let flag = format!("--{key}");
        match value {
            Value::Bool(true) => args.push(flag),
            Value::Bool(false) => {}
            Value::String(s) => {
                args.push(flag);
                args.push(s.clone());
            }
            other => {
                args.push(flag);
                args.push(other.to_string());
            }
        }
    }
    args
}

struct PioRunHandler {
    pio_executable: String,
}

#[async_trait::async_trait]
impl TaskHandler for PioRunHandler {
    async fn handle(&self, payload: Value) -> Result<Value, HandlerError> {
        let job_name = payload
            .get("job_name")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::Failed("missing `job_name`".into()))?;
        let options: HashMap<String, Value> = payload
            .get("options")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let extra_args: Vec<String> = payload
            .get("args")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let env: HashMap<String, String> = payload
            .get("env")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let mut args = vec!["run".to_string(), job_name.to_string()];
        args.extend(options_to_cli_args(&options));
        args.extend(extra_args);

        tracing::info!(job_name, ?args, "executing pio run");
        Command::new(&self.pio_executable)
            .args(&args)
            .envs(filtered_env(&env))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| HandlerError::Failed(format!("failed to start `pio run {job_name}`: {e}")))?;

        // Long-running job: fire-and-forget, matching the source task's
        // `Popen(..., start_new_session=True)` -- we don't wait on it.
        Ok(Value::Bool(true))
    }
}

struct PioKillHandler {
    pio_executable: String,
}

#[async_trait::async_trait]
impl TaskHandler for PioKillHandler {
    async fn handle(&self, payload: Value) -> Result<Value, HandlerError> {
        let mut args = vec!["kill".to_string()];
        for (flag, key) in [
            ("--job-name", "job_name"),
            ("--experiment", "experiment"),
            ("--job-source", "job_source"),
            ("--job-id", "job_id"),
        ] {
            if let Some(value) = payload.get(key).and_then(Value::as_str) {
                args.push(flag.to_string());
                args.push(value.to_string());
            }
        }

        tracing::info!(?args, "executing pio kill");
        let status = Command::new(&self.pio_executable)
            .args(&args)
            .status()
            .await
            .map_err(|e| HandlerError::Failed(format!("failed to start `pio kill`: {e}")))?;
        Ok(Value::Bool(status.success()))
    }
}

fn plugin_name_handler(
    pio_executable: String,
    subcommand: &'static str,
) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |payload: Value| {
        let pio_executable = pio_executable.clone();
        Box::pin(async move {
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `name`".into()))?
                .to_string();

            tracing::info!(subcommand, %name, "executing pio plugins");
            let status = Command::new(&pio_executable)
                .args(["plugins", subcommand, &name])
                .status()
                .await
                .map_err(|e| HandlerError::Failed(format!("failed to start `pio plugins {subcommand}`: {e}")))?;
            if status.success() {
                Ok(Value::Bool(true))
            } else {
                Err(HandlerError::Failed(format!("`pio plugins {subcommand} {name}` exited with {status}")))
            }
        })
    }))
}

/// `pio plugins list --json` prints a JSON array on its last stdout line;
/// the `/plugins/installed` route parses that line out of `stdout` itself.
fn plugins_list_handler(pio_executable: String) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |_payload: Value| {
        let pio_executable = pio_executable.clone();
        Box::pin(async move {
            let output = Command::new(&pio_executable)
                .args(["plugins", "list", "--json"])
                .output()
                .await
                .map_err(|e| HandlerError::Failed(format!("failed to start `pio plugins list`: {e}")))?;
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(serde_json::json!({ "success": output.status.success(), "stdout": stdout }))
        })
    }))
}

fn save_file_handler() -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(|payload: Value| {
        Box::pin(async move {
            let path = payload
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `path`".into()))?;
            let content = payload
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `content`".into()))?;
            tokio::fs::write(path, content)
                .await
                .map(|_| Value::Bool(true))
                .map_err(|e| HandlerError::Failed(format!("could not write `{path}`: {e}")))
        })
    }))
}

fn rm_handler() -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(|payload: Value| {
        Box::pin(async move {
            let path = payload
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `path`".into()))?;
            tracing::info!(path, "deleting file");
            let status = Command::new("rm")
                .arg(path)
                .status()
                .await
                .map_err(|e| HandlerError::Failed(format!("failed to start `rm`: {e}")))?;
            Ok(Value::Bool(status.success()))
        })
    }))
}

/// Register every task kind this node executes in-process. Must run before
/// `tasks.spawn_consumers()`.
pub fn register(tasks: &TaskEngine, pio_executable: &str) {
    tasks.register_handler(TaskKind::PioRun, Arc::new(PioRunHandler { pio_executable: pio_executable.to_string() }));
    tasks.register_handler(TaskKind::PioKill, Arc::new(PioKillHandler { pio_executable: pio_executable.to_string() }));
    tasks.register_handler(TaskKind::PioPluginsInstall, plugin_name_handler(pio_executable.to_string(), "install"));
    tasks.register_handler(TaskKind::PioPluginsUninstall, plugin_name_handler(pio_executable.to_string(), "uninstall"));
    tasks.register_handler(TaskKind::PioPluginsList, plugins_list_handler(pio_executable.to_string()));
    tasks.register_handler(TaskKind::SaveFile, save_file_handler());
    tasks.register_handler(TaskKind::Rm, rm_handler());
}
