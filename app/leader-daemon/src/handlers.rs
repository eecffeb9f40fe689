//! Subprocess- and fanout-backed `TaskHandler`s for every task kind the
//! leader's `TaskEngine` can run. Grounded directly on `pioreactorui`'s Huey
//! task module: each leader-only `pio`/`pios` invocation here is the same
//! command line that module shells out to, translated from
//! `subprocess.run`/`check_call` to `tokio::process::Command`. The
//! multicast/post-to-worker kinds wrap `pio_fanout::fanout` the way the
//! source's `*_across_cluster` tasks wrap their own per-worker HTTP helper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pio_fanout::fanout;
use pio_taskengine::{FnTaskHandler, HandlerError, TaskEngine, TaskHandler};
use pio_types::task::TaskKind;
use pio_workerrpc::{Verb, WorkerRpc};
use serde_json::Value;
use tokio::process::Command;

use crate::config::Config;

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

fn add_new_pioreactor_handler(pio_executable: String) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |payload: Value| {
        let pio_executable = pio_executable.clone();
        Box::pin(async move {
            let unit = payload
                .get("pioreactor_unit")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `pioreactor_unit`".into()))?;
            let version = payload
                .get("version")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `version`".into()))?;
            let model = payload
                .get("model")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `model`".into()))?;

            tracing::info!(unit, version, model, "executing pio workers add");
            let status = Command::new(&pio_executable)
                .args(["workers", "add", unit, "-v", version, "-m", model])
                .status()
                .await
                .map_err(|e| HandlerError::Failed(format!("failed to start `pio workers add`: {e}")))?;
            if status.success() {
                Ok(Value::Bool(true))
            } else {
                Err(HandlerError::Failed(format!("`pio workers add {unit}` exited with {status}")))
            }
        })
    }))
}

/// `config_root` is the directory real Pioreactor nodes read `config.ini`
/// and `config_<unit>.ini` from -- conventionally the storage root itself.
fn write_config_and_sync_handler(pios_executable: String, config_root: std::path::PathBuf) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |payload: Value| {
        let pios_executable = pios_executable.clone();
        let config_root = config_root.clone();
        Box::pin(async move {
            let filename = payload
                .get("filename")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `filename`".into()))?;
            let data = payload
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `data`".into()))?;
            let target = payload
                .get("target")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `target`".into()))?;
            let flag = payload
                .get("flag")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `flag`".into()))?;

            tokio::fs::write(config_root.join(filename), data)
                .await
                .map_err(|e| HandlerError::Failed(format!("could not write `{filename}`: {e}")))?;

            tracing::info!(filename, target, flag, "executing pios sync-configs");
            let output = Command::new(&pios_executable)
                .args(["sync-configs", "--units", target, flag])
                .output()
                .await
                .map_err(|e| HandlerError::Failed(format!("failed to start `pios sync-configs`: {e}")))?;
            if output.status.success() {
                Ok(Value::Bool(true))
            } else {
                Err(HandlerError::Failed(String::from_utf8_lossy(&output.stderr).trim().to_string()))
            }
        })
    }))
}

/// `pio_run_export_experiment_data`'s original task returns `(success,
/// stdout)`; the CLI prints the archive's filename as the last line of
/// stdout on success, which this parses out for the leader API's synchronous
/// `/api/export_datasets` response.
fn export_experiment_data_handler(pio_executable: String) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |payload: Value| {
        let pio_executable = pio_executable.clone();
        Box::pin(async move {
            let mut args = vec!["run".to_string(), "export_experiment_data".to_string()];
            if let Some(datasets) = payload.get("selectedDatasets").and_then(Value::as_array) {
                for dataset in datasets {
                    if let Some(d) = dataset.as_str() {
                        args.push("--dataset-name".to_string());
                        args.push(d.to_string());
                    }
                }
            }
            if let Some(experiments) = payload.get("experimentSelection").and_then(Value::as_array) {
                for experiment in experiments {
                    if let Some(e) = experiment.as_str() {
                        args.push("--experiment".to_string());
                        args.push(e.to_string());
                    }
                }
            }
            if payload.get("partitionByUnitSelection").and_then(Value::as_bool).unwrap_or(false) {
                args.push("--partition-by-unit".to_string());
            }
            if payload.get("partitionByExperimentSelection").and_then(Value::as_bool).unwrap_or(false) {
                args.push("--partition-by-experiment".to_string());
            }

            tracing::info!(?args, "executing pio run export_experiment_data");
            let output = Command::new(&pio_executable)
                .args(&args)
                .output()
                .await
                .map_err(|e| HandlerError::Failed(format!("failed to start export: {e}")))?;
            if !output.status.success() {
                return Err(HandlerError::Failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let filename = stdout
                .lines()
                .last()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .ok_or_else(|| HandlerError::Failed("export produced no output filename".into()))?;
            Ok(serde_json::json!({ "filename": filename }))
        })
    }))
}

/// `pio update`/`pio update ui` kill the daemon that's running them as a
/// side effect, so their exit status is meaningless -- the source task
/// documents this as "HACK: this always returns >0... so just return true".
/// The fire-and-forget spawn below is the direct analog: we never await the
/// child's exit code at all.
fn fire_and_forget_update_handler(pio_executable: String, args: &'static [&'static str]) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |payload: Value| {
        let pio_executable = pio_executable.clone();
        Box::pin(async move {
            let mut full_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            if let Some(source) = payload.get("archive_path").and_then(Value::as_str) {
                full_args.push("--source".to_string());
                full_args.push(source.to_string());
            }
            tracing::info!(?full_args, "executing pio update (fire-and-forget)");
            Command::new(&pio_executable)
                .args(&full_args)
                .spawn()
                .map_err(|e| HandlerError::Failed(format!("failed to start update: {e}")))?;
            Ok(Value::Bool(true))
        })
    }))
}

fn post_to_worker_handler(rpc: Arc<WorkerRpc>) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |payload: Value| {
        let rpc = rpc.clone();
        Box::pin(async move {
            let worker = payload
                .get("worker")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `worker`".into()))?
                .to_string();
            let endpoint = payload
                .get("endpoint")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `endpoint`".into()))?
                .to_string();
            let body = payload.get("json").cloned();
            let response = rpc.call(&worker, Verb::Post, &endpoint, body).await;
            Ok(serde_json::json!({ "worker": worker, "response": response }))
        })
    }))
}

fn multicast_handler(rpc: Arc<WorkerRpc>, verb: Verb) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |payload: Value| {
        let rpc = rpc.clone();
        Box::pin(async move {
            let endpoint = payload
                .get("endpoint")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::Failed("missing `endpoint`".into()))?;
            if !endpoint.starts_with("/unit_api") {
                return Err(HandlerError::Failed("multicast endpoint must start with /unit_api".into()));
            }
            let units: Vec<String> = payload
                .get("units")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .ok_or_else(|| HandlerError::Failed("missing `units`".into()))?;
            let body = payload.get("body").cloned();

            let results = fanout(&rpc, verb, endpoint, &units, body, Some(Duration::from_secs(30))).await;
            serde_json::to_value(results).map_err(|e| HandlerError::Failed(e.to_string()))
        })
    }))
}

/// Register a handler for every `TaskKind`. Must run before
/// `tasks.spawn_consumers()`.
pub fn register(tasks: &TaskEngine, config: &Config, rpc: Arc<WorkerRpc>) {
    let pio = config.pio_executable.clone();
    let pios = config.pios_executable.clone();
    let config_root = std::path::PathBuf::from(&config.storage_root);

    tasks.register_handler(TaskKind::AddNewPioreactor, add_new_pioreactor_handler(pio.clone()));
    tasks.register_handler(TaskKind::WriteConfigAndSync, write_config_and_sync_handler(pios.clone(), config_root));
    tasks.register_handler(TaskKind::PioRunExportExperimentData, export_experiment_data_handler(pio.clone()));
    tasks.register_handler(TaskKind::PioUpdateApp, fire_and_forget_update_handler(pio.clone(), &["update", "app"]));
    tasks.register_handler(TaskKind::PioUpdateUi, fire_and_forget_update_handler(pio.clone(), &["update", "ui"]));
    tasks.register_handler(TaskKind::PioUpdateEverything, fire_and_forget_update_handler(pio.clone(), &["update"]));
    tasks.register_handler(TaskKind::PostToWorker, post_to_worker_handler(rpc.clone()));
    tasks.register_handler(TaskKind::MulticastGet, multicast_handler(rpc.clone(), Verb::Get));
    tasks.register_handler(TaskKind::MulticastPost, multicast_handler(rpc.clone(), Verb::Post));
    tasks.register_handler(TaskKind::MulticastPatch, multicast_handler(rpc.clone(), Verb::Patch));
    tasks.register_handler(TaskKind::MulticastDelete, multicast_handler(rpc, Verb::Delete));

    // The leader also runs its own node's local jobs/plugins in-process,
    // same as `pio-unit-api` does when it's the leader's own UnitAPI.
    unit_handlers::register(tasks, &pio);
}

/// Duplicated rather than shared with `pio-unit-daemon`: each binary
/// registers its own handlers against the engine it owns (spec.md §4.5),
/// and the two processes never share a `TaskEngine`.
mod unit_handlers {
    use super::*;

    fn filtered_env(env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| pio_types::env::ALLOWED_ENV_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn pio_run_handler(pio_executable: String) -> Arc<dyn TaskHandler> {
        Arc::new(FnTaskHandler::new(move |payload: Value| {
            let pio_executable = pio_executable.clone();
            Box::pin(async move {
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

                tracing::info!(job_name, ?args, "executing pio run (leader-local)");
                Command::new(&pio_executable)
                    .args(&args)
                    .envs(filtered_env(&env))
                    .stdin(std::process::Stdio::null())
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .spawn()
                    .map_err(|e| HandlerError::Failed(format!("failed to start `pio run {job_name}`: {e}")))?;
                Ok(Value::Bool(true))
            })
        }))
    }

    fn pio_kill_handler(pio_executable: String) -> Arc<dyn TaskHandler> {
        Arc::new(FnTaskHandler::new(move |payload: Value| {
            let pio_executable = pio_executable.clone();
            Box::pin(async move {
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
                let status = Command::new(&pio_executable)
                    .args(&args)
                    .status()
                    .await
                    .map_err(|e| HandlerError::Failed(format!("failed to start `pio kill`: {e}")))?;
                Ok(Value::Bool(status.success()))
            })
        }))
    }

    fn plugin_name_handler(pio_executable: String, subcommand: &'static str) -> Arc<dyn TaskHandler> {
        Arc::new(FnTaskHandler::new(move |payload: Value| {
            let pio_executable = pio_executable.clone();
            Box::pin(async move {
                let name = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HandlerError::Failed("missing `name`".into()))?
                    .to_string();
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

    /// `pio plugins list --json` prints a JSON array on its last stdout
    /// line; the `/plugins/installed` route parses that line out of
    /// `stdout` itself.
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
                let status = Command::new("rm")
                    .arg(path)
                    .status()
                    .await
                    .map_err(|e| HandlerError::Failed(format!("failed to start `rm`: {e}")))?;
                Ok(Value::Bool(status.success()))
            })
        }))
    }

    pub fn register(tasks: &TaskEngine, pio_executable: &str) {
        tasks.register_handler(TaskKind::PioRun, pio_run_handler(pio_executable.to_string()));
        tasks.register_handler(TaskKind::PioKill, pio_kill_handler(pio_executable.to_string()));
        tasks.register_handler(TaskKind::PioPluginsInstall, plugin_name_handler(pio_executable.to_string(), "install"));
        tasks.register_handler(TaskKind::PioPluginsUninstall, plugin_name_handler(pio_executable.to_string(), "uninstall"));
        tasks.register_handler(TaskKind::PioPluginsList, plugins_list_handler(pio_executable.to_string()));
        tasks.register_handler(TaskKind::SaveFile, save_file_handler());
        tasks.register_handler(TaskKind::Rm, rm_handler());
    }
}
