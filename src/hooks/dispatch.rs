//! Hook dispatch
//!
//! Each resolved hook is run as
//! `<hook> <payload-file> <event> <name|None> <branch|None>`.
//!
//! Synchronous hooks run one at a time in resolution order and share a
//! single payload file, removed once the batch finishes. The batch runs on
//! its own task, so it completes even if the request that started it is
//! dropped. Backgrounded hooks
//! get their own payload file which is handed over to the hook: it is never
//! removed here, cleaning it up is the hook's job.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::hooks::metadata::EventMetadata;
use crate::hooks::resolver::ResolvedHook;

/// Marker recorded for backgrounded hooks.
pub const BACKGROUNDED_MARKER: &str = "yes";

/// Dispatch errors that abort the whole batch (before any hook runs).
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to write payload file: {0}")]
    TempFile(#[from] io::Error),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What happened to one hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HookOutcome {
    /// Synchronous hook that ran to completion. Fields stay in key order.
    Completed {
        returncode: i32,
        stderr: String,
        stdout: String,
    },
    /// Hook launched without waiting.
    Backgrounded { backgrounded: String },
    /// Hook that could not be started.
    Failed { error: String },
}

impl HookOutcome {
    pub fn backgrounded() -> Self {
        HookOutcome::Backgrounded {
            backgrounded: BACKGROUNDED_MARKER.to_string(),
        }
    }
}

/// Per-hook outcomes keyed by hook name; iteration order is sorted.
pub type DispatchReport = BTreeMap<String, HookOutcome>;

/// Write `payload` to a fresh temporary file.
fn write_payload_file(payload: &[u8]) -> Result<NamedTempFile, DispatchError> {
    let mut file = tempfile::Builder::new().prefix("hookrelay-").tempfile()?;
    file.write_all(payload)?;
    file.flush()?;
    Ok(file)
}

fn hook_command(hook: &ResolvedHook, payload_file: &Path, meta: &EventMetadata) -> Command {
    let mut cmd = Command::new(&hook.path);
    cmd.arg(payload_file)
        .arg(&meta.event)
        .arg(meta.name_arg())
        .arg(meta.branch_arg())
        .stdin(Stdio::null());
    cmd
}

/// Exit code, or the negated signal number for a hook killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

async fn run_sync(hook: &ResolvedHook, payload_file: &Path, meta: &EventMetadata) -> HookOutcome {
    let output = match hook_command(hook, payload_file, meta).output().await {
        Ok(output) => output,
        Err(e) => {
            error!(target: "dispatch", path = %hook.path.display(), error = %e, "Failed to run hook");
            return HookOutcome::Failed {
                error: e.to_string(),
            };
        }
    };

    let returncode = exit_code(output.status);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if returncode != 0 {
        error!(
            target: "dispatch",
            path = %hook.path.display(),
            returncode,
            stderr = %stderr,
            "Hook failed"
        );
    } else {
        debug!(target: "dispatch", hook = %hook.name, "Hook completed");
    }

    HookOutcome::Completed {
        returncode,
        stderr,
        stdout,
    }
}

fn launch_background(hook: &ResolvedHook, payload: &[u8], meta: &EventMetadata) -> HookOutcome {
    let job_file: PathBuf = match write_payload_file(payload).and_then(|f| {
        f.keep()
            .map(|(_, path)| path)
            .map_err(|e| DispatchError::TempFile(e.error))
    }) {
        Ok(path) => path,
        Err(e) => {
            error!(target: "dispatch", hook = %hook.name, error = %e, "Failed to write background payload file");
            return HookOutcome::Failed {
                error: e.to_string(),
            };
        }
    };

    let spawned = hook_command(hook, &job_file, meta)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(child) => {
            info!(
                target: "dispatch",
                hook = %hook.name,
                pid = child.id().unwrap_or_default(),
                payload = %job_file.display(),
                "Backgrounded hook"
            );
            HookOutcome::backgrounded()
        }
        Err(e) => {
            error!(target: "dispatch", path = %hook.path.display(), error = %e, "Failed to launch background hook");
            // The hook never started, so the payload file is still ours.
            let _ = std::fs::remove_file(&job_file);
            HookOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Report key for a hook: its file name.
fn report_key(hook: &ResolvedHook) -> String {
    hook.path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| hook.name.clone())
}

/// Run every hook in order and collect their outcomes.
///
/// A failing hook never stops the ones after it. The batch is spawned onto
/// the runtime, so dropping the returned future does not cancel it.
pub async fn dispatch_hooks(
    hooks: Vec<ResolvedHook>,
    meta: EventMetadata,
    payload: &Value,
) -> Result<DispatchReport, DispatchError> {
    let serialized = serde_json::to_vec(payload)?;
    tokio::spawn(run_batch(hooks, meta, serialized)).await?
}

async fn run_batch(
    hooks: Vec<ResolvedHook>,
    meta: EventMetadata,
    serialized: Vec<u8>,
) -> Result<DispatchReport, DispatchError> {
    let shared = write_payload_file(&serialized)?;

    let mut report = DispatchReport::new();
    for hook in &hooks {
        let outcome = if hook.is_background() {
            launch_background(hook, &serialized, &meta)
        } else {
            run_sync(hook, shared.path(), &meta).await
        };
        report.insert(report_key(hook), outcome);
    }

    shared.close()?;
    Ok(report)
}

/// Render a report as 4-space indented JSON with sorted keys.
pub fn render_report(report: &DispatchReport) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    report.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
