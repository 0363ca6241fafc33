//! Background-cleanup proxy: drives the external tool with the cleanup
//! script instead of the conversion script, for the `cleanup_background`
//! dispatcher operation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::info;

use crate::error::CoreError;
use crate::runner::{persist_if_nonempty, wait_with_timeout, DEFAULT_TIMEOUT_SECS};
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct CleanupParams {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub outline_threshold: u8,
    pub fill_tolerance: u8,
    pub preview_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub success: bool,
    pub output_path: PathBuf,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

/// Run the background-cleanup script against `params.input_path`, writing
/// `params.output_path`. On any failure returns the specific `CoreError`
/// variant rather than a generic one, so the dispatcher can surface
/// `CLEANUP_SCRIPT_NOT_FOUND` / `ASEPRITE_CLEANUP_FAILED` / `CLEANUP_ERROR`
/// directly.
pub async fn run_cleanup(settings: &Settings, params: &CleanupParams) -> Result<CleanupResult, CoreError> {
    let script = settings.cleanup_script();
    if !script.is_file() {
        return Err(CoreError::CleanupScriptNotFound(script));
    }
    if !settings.aseprite_exe.exists() && which::which(&settings.aseprite_exe).is_err() {
        return Err(CoreError::CleanupFailed(
            "external tool executable not found. Set ASEPRITE_EXE or install it on PATH".to_string(),
        ));
    }

    if let Some(parent) = params.output_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::CleanupError(e.to_string()))?;
    }

    let command = build_command(settings, &script, params);

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .current_dir(&settings.workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    info!(command = %command.join(" "), "cleanup: spawning external tool");
    let child = cmd.spawn().map_err(CoreError::SpawnFailed)?;
    let (exit_code, stdout, stderr) =
        wait_with_timeout(child, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .await
            .map_err(|e| CoreError::CleanupError(e.to_string()))?;

    let log_dir = params.output_path.parent().unwrap_or_else(|| Path::new("."));
    let stdout_path = persist_if_nonempty(log_dir, "cleanup_stdout.txt", &stdout)
        .await
        .map_err(|e| CoreError::CleanupError(e.to_string()))?;
    let stderr_path = persist_if_nonempty(log_dir, "cleanup_stderr.txt", &stderr)
        .await
        .map_err(|e| CoreError::CleanupError(e.to_string()))?;

    if exit_code != 0 {
        return Err(CoreError::CleanupFailed(format!(
            "external tool exited with status {exit_code}\ncommand: {}",
            command.join(" ")
        )));
    }

    if !params.output_path.is_file() {
        return Err(CoreError::CleanupError(
            "cleanup script reported success but did not produce the output file".to_string(),
        ));
    }

    Ok(CleanupResult {
        success: true,
        output_path: params.output_path.clone(),
        stdout_path,
        stderr_path,
    })
}

fn build_command(settings: &Settings, script: &Path, params: &CleanupParams) -> Vec<String> {
    let mut command = vec![
        settings.aseprite_exe.display().to_string(),
        "--batch".to_string(),
    ];
    let preview_mode = if params.preview_mode { "true" } else { "false" };
    let kv = [
        ("input_path".to_string(), params.input_path.display().to_string()),
        ("output_path".to_string(), params.output_path.display().to_string()),
        ("outline_threshold".to_string(), params.outline_threshold.to_string()),
        ("fill_tolerance".to_string(), params.fill_tolerance.to_string()),
        ("preview_mode".to_string(), preview_mode.to_string()),
    ];
    for (key, value) in kv {
        command.push("--script-param".to_string());
        command.push(format!("{key}={value}"));
    }
    command.push("--script".to_string());
    command.push(script.display().to_string());
    command
}
