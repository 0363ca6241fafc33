//! External-tool runner: spawns the conversion batch job and classifies its outcome.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::error::CoreError;
use crate::grid_detector::detect_grid;
use crate::job::{AnchorInfo, ConvertResult, JobSpec, QualityMetrics};
use crate::profile::{AnchorMode, BackgroundMode, ConversionProfile, LoopMode};
use crate::settings::Settings;
use crate::validator::{self, ValidationOutcome};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Status of the optional high-quality preview pass, embedded in `job.log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HqPreviewStatus {
    pub attempted: bool,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl Default for HqPreviewStatus {
    fn default() -> Self {
        Self {
            attempted: false,
            succeeded: false,
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct JobLog<'a> {
    status: &'a str,
    error_code: Option<&'a str>,
    message: Option<&'a str>,
    started_at: &'a str,
    completed_at: &'a str,
    duration_seconds: f64,
    command: Vec<String>,
    exit_code: Option<i32>,
    stdout_path: Option<String>,
    stderr_path: Option<String>,
    hq_preview: &'a HqPreviewStatus,
}

#[derive(Debug, Deserialize, Default)]
struct ScriptMeta {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    frame_count: u32,
    #[serde(default)]
    fps: u32,
    #[serde(default)]
    grid: Option<ScriptMetaGrid>,
    #[serde(default)]
    quality: Option<QualityMetrics>,
    #[serde(default)]
    anchor: Option<AnchorInfo>,
}

#[derive(Debug, Deserialize, Default)]
struct ScriptMetaGrid {
    rows: u32,
    cols: u32,
}

/// Run one conversion job: spawn the external tool, capture its output,
/// classify the outcome, and write the per-job log. Never returns an `Err`
/// for conversion failures reported by the process or the script — those
/// are represented in the returned `ConvertResult`. Only truly exceptional
/// conditions (spawn failure) propagate as `CoreError`.
pub async fn run_job(
    settings: &Settings,
    job: &JobSpec,
    profile: &mut ConversionProfile,
) -> Result<ConvertResult, CoreError> {
    let started_at = now_iso();
    let started_instant = std::time::Instant::now();
    let out_dir = job.output_dir.join(&job.job_name);
    tokio::fs::create_dir_all(&out_dir).await?;

    if job.auto_detect_grid && profile.grid.is_unset_default() {
        let detection = detect_grid(&job.input_path);
        if detection.detected {
            if let Some(grid) = detection.grid {
                profile.grid = grid;
            }
        }
    }

    let command = build_command(settings, job, profile, &out_dir);

    let mut result = ConvertResult::failed(
        job.input_path.clone(),
        job.job_name.clone(),
        started_at.clone(),
    );

    if !settings.aseprite_exe.exists() && which::which(&settings.aseprite_exe).is_err() {
        result.error_code = Some("ASEPRITE_NOT_FOUND".to_string());
        result.error_message = Some(
            "external tool executable not found. Set ASEPRITE_EXE or install it on PATH"
                .to_string(),
        );
        result.duration_seconds = started_instant.elapsed().as_secs_f64();
        result.completed_at = Some(now_iso());
        write_job_log(&out_dir, &result, &command, None, None, None, &HqPreviewStatus::default())
            .await?;
        return Ok(result);
    }

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .current_dir(&settings.workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd.spawn().map_err(CoreError::SpawnFailed)?;

    let (exit_code, stdout, stderr) =
        wait_with_timeout(child, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await?;

    let stdout_path = persist_if_nonempty(&out_dir, "aseprite_stdout.txt", &stdout).await?;
    let stderr_path = persist_if_nonempty(&out_dir, "aseprite_stderr.txt", &stderr).await?;

    if exit_code != 0 {
        result.error_code = Some("ASEPRITE_EXIT_NONZERO".to_string());
        result.error_message = Some(format!(
            "external tool exited with status {exit_code}\ncommand: {}",
            command.join(" ")
        ));
        result.duration_seconds = started_instant.elapsed().as_secs_f64();
        result.completed_at = Some(now_iso());
        write_job_log(
            &out_dir,
            &result,
            &command,
            Some(exit_code),
            stdout_path,
            stderr_path,
            &HqPreviewStatus::default(),
        )
        .await?;
        return Ok(result);
    }

    let meta_path = out_dir.join("meta.json");
    let meta = match tokio::fs::read_to_string(&meta_path).await {
        Ok(raw) => serde_json::from_str::<ScriptMeta>(&raw).ok(),
        Err(_) => None,
    };

    match &meta {
        Some(meta) if meta.status == "failed" || meta.status == "error" => {
            result.error_code = Some(
                meta.error_code
                    .clone()
                    .unwrap_or_else(|| "LUA_REPORTED_FAILURE".to_string()),
            );
            result.error_message = Some(
                meta.error_message
                    .clone()
                    .unwrap_or_else(|| "Lua conversion failed".to_string()),
            );
            result.duration_seconds = started_instant.elapsed().as_secs_f64();
            result.completed_at = Some(now_iso());
            write_job_log(
                &out_dir,
                &result,
                &command,
                Some(exit_code),
                stdout_path,
                stderr_path,
                &HqPreviewStatus::default(),
            )
            .await?;
            return Ok(result);
        }
        _ => {}
    }

    let validation = validator::validate_output(&out_dir, &profile.export, Some(&meta_path));
    if let ValidationOutcome::Invalid { missing, parse_error } = &validation {
        result.error_code = Some("OUTPUT_VALIDATION_FAILED".to_string());
        result.error_message = Some(format!(
            "missing artifacts: {missing:?}, parse_error: {parse_error:?}"
        ));
        result.duration_seconds = started_instant.elapsed().as_secs_f64();
        result.completed_at = Some(now_iso());
        write_job_log(
            &out_dir,
            &result,
            &command,
            Some(exit_code),
            stdout_path,
            stderr_path,
            &HqPreviewStatus::default(),
        )
        .await?;
        return Ok(result);
    }

    result.success = true;
    result.error_code = None;
    result.error_message = None;
    result.aseprite_path = exists_or_none(out_dir.join("anim.aseprite"));
    result.sheet_png_path = exists_or_none(out_dir.join("anim_sheet.png"));
    result.sheet_json_path = exists_or_none(out_dir.join("anim_sheet.json"));
    result.gif_path = exists_or_none(out_dir.join("anim_preview.gif"));
    result.meta_path = exists_or_none(meta_path.clone());

    if let Some(meta) = &meta {
        result.frame_count = meta.frame_count;
        result.fps = meta.fps;
        if let Some(grid) = &meta.grid {
            result.grid_rows = grid.rows;
            result.grid_cols = grid.cols;
        }
        result.quality = meta.quality.clone();
        result.anchor_info = meta.anchor.clone();
    }
    if result.grid_rows == 0 {
        result.grid_rows = profile.grid.rows;
    }
    if result.grid_cols == 0 {
        result.grid_cols = profile.grid.cols;
    }
    if result.fps == 0 {
        result.fps = profile.timing.fps;
    }

    let mut hq_status = HqPreviewStatus::default();
    if profile.export.hq_gif {
        hq_status.attempted = true;
        match crate::hq_preview::build_hq_preview(settings, &out_dir, profile).await {
            Ok(()) => hq_status.succeeded = true,
            Err(e) => hq_status.error = Some(e.to_string()),
        }
    }

    result.duration_seconds = started_instant.elapsed().as_secs_f64();
    result.completed_at = Some(now_iso());
    write_job_log(
        &out_dir,
        &result,
        &command,
        Some(exit_code),
        stdout_path,
        stderr_path,
        &hq_status,
    )
    .await?;

    Ok(result)
}

fn exists_or_none(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

/// Build the ordered `--script-param key=value` invocation, prepending the
/// executable and batch-mode flag and appending the script path last.
fn build_command(
    settings: &Settings,
    job: &JobSpec,
    profile: &ConversionProfile,
    out_dir: &Path,
) -> Vec<String> {
    let mut params: Vec<(String, String)> = Vec::new();
    params.push(("input_path".into(), job.input_path.display().to_string()));
    params.push(("output_dir".into(), out_dir.display().to_string()));
    params.push(("job_name".into(), job.job_name.clone()));

    params.push(("grid_rows".into(), profile.grid.rows.to_string()));
    params.push(("grid_cols".into(), profile.grid.cols.to_string()));
    params.push(("grid_offset_x".into(), profile.grid.offset_x.to_string()));
    params.push(("grid_offset_y".into(), profile.grid.offset_y.to_string()));
    params.push(("grid_pad_x".into(), profile.grid.pad_x.to_string()));
    params.push(("grid_pad_y".into(), profile.grid.pad_y.to_string()));

    params.push(("fps".into(), profile.timing.fps.to_string()));
    params.push((
        "loop_mode".into(),
        match profile.timing.loop_mode {
            LoopMode::Loop => "loop".to_string(),
            LoopMode::Pingpong => "pingpong".to_string(),
        },
    ));

    params.push((
        "anchor_mode".into(),
        match profile.anchor.mode {
            AnchorMode::Foot => "foot".to_string(),
            AnchorMode::Center => "center".to_string(),
            AnchorMode::None => "none".to_string(),
        },
    ));
    params.push(("anchor_alpha_threshold".into(), profile.anchor.alpha_threshold.to_string()));
    params.push(("anchor_x_band_min".into(), profile.anchor.x_band.0.to_string()));
    params.push(("anchor_x_band_max".into(), profile.anchor.x_band.1.to_string()));

    params.push((
        "background_mode".into(),
        match profile.background.mode {
            BackgroundMode::Transparent => "transparent".to_string(),
            BackgroundMode::Keep => "keep".to_string(),
            BackgroundMode::Color => "color".to_string(),
        },
    ));
    params.push(("background_color_r".into(), profile.background.color.0.to_string()));
    params.push(("background_color_g".into(), profile.background.color.1.to_string()));
    params.push(("background_color_b".into(), profile.background.color.2.to_string()));
    params.push(("background_tolerance".into(), profile.background.tolerance.to_string()));

    params.push(("export_aseprite".into(), bool_str(profile.export.aseprite)));
    params.push(("export_sheet_png_json".into(), bool_str(profile.export.sheet_png_json)));
    params.push(("export_gif_preview".into(), bool_str(profile.export.gif_preview)));
    params.push(("export_sheet_padding_border".into(), profile.export.sheet_padding_border.to_string()));
    params.push(("export_sheet_padding_inner".into(), profile.export.sheet_padding_inner.to_string()));
    params.push(("export_trim".into(), bool_str(profile.export.trim)));
    params.push(("export_hq_gif".into(), bool_str(profile.export.hq_gif)));

    let mut command = vec![
        settings.aseprite_exe.display().to_string(),
        "--batch".to_string(),
    ];
    for (key, value) in params {
        command.push("--script-param".to_string());
        command.push(format!("{key}={value}"));
    }
    command.push("--script".to_string());
    command.push(settings.convert_script().display().to_string());
    command
}

fn bool_str(value: bool) -> String {
    if value { "true".to_string() } else { "false".to_string() }
}

pub(crate) async fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
) -> Result<(i32, Vec<u8>, Vec<u8>), CoreError> {
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let wait_fut = async {
        let status = child.wait().await?;
        let mut stdout = Vec::new();
        if let Some(mut out) = stdout_handle {
            use tokio::io::AsyncReadExt;
            let _ = out.read_to_end(&mut stdout).await;
        }
        let mut stderr = Vec::new();
        if let Some(mut err) = stderr_handle {
            use tokio::io::AsyncReadExt;
            let _ = err.read_to_end(&mut stderr).await;
        }
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    match tokio::time::timeout(timeout, wait_fut).await {
        Ok(Ok((status, stdout, stderr))) => {
            Ok((status.code().unwrap_or(-1), stdout, stderr))
        }
        Ok(Err(e)) => Err(CoreError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            Err(CoreError::Unexpected(format!(
                "external tool timed out after {}s",
                timeout.as_secs()
            )))
        }
    }
}

pub(crate) async fn persist_if_nonempty(
    out_dir: &Path,
    name: &str,
    content: &[u8],
) -> Result<Option<PathBuf>, CoreError> {
    if content.is_empty() {
        return Ok(None);
    }
    let path = out_dir.join(name);
    let normalized = String::from_utf8_lossy(content).replace("\r\n", "\n");
    tokio::fs::write(&path, normalized.as_bytes()).await?;
    Ok(Some(path))
}

async fn write_job_log(
    out_dir: &Path,
    result: &ConvertResult,
    command: &[String],
    exit_code: Option<i32>,
    stdout_path: Option<PathBuf>,
    stderr_path: Option<PathBuf>,
    hq_preview: &HqPreviewStatus,
) -> Result<(), CoreError> {
    let completed_at = result.completed_at.clone().unwrap_or_else(now_iso);
    let log = JobLog {
        status: if result.success { "success" } else { "failed" },
        error_code: result.error_code.as_deref(),
        message: result.error_message.as_deref(),
        started_at: &result.started_at,
        completed_at: &completed_at,
        duration_seconds: result.duration_seconds,
        command: command.to_vec(),
        exit_code,
        stdout_path: stdout_path.map(|p| p.display().to_string()),
        stderr_path: stderr_path.map(|p| p.display().to_string()),
        hq_preview,
    };
    let serialized = serde_json::to_string_pretty(&log).map_err(|e| CoreError::Unexpected(e.to_string()))?;
    tokio::fs::write(out_dir.join("job.log"), serialized.replace("\r\n", "\n")).await?;

    if !result.success {
        let message = result.error_message.clone().unwrap_or_default();
        tokio::fs::write(out_dir.join("error.txt"), format!("{message}\n")).await?;
    }
    Ok(())
}

fn now_iso() -> String {
    chrono::Local::now().to_rfc3339()
}
