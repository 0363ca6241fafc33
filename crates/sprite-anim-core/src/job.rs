//! Job specification, sidecar overrides, and conversion/detection results.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::profile::{self, ConversionProfile, Grid, JobOverride};

/// Complete specification for a single conversion task.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub job_name: String,
    pub profile_name: Option<String>,
    pub auto_detect_grid: bool,
    pub grid_rows: Option<u32>,
    pub grid_cols: Option<u32>,
    pub fps: Option<u32>,
    /// Per-job override for the success-disposition target, in place of
    /// `Settings::processed_dir`.
    pub processed_dir: Option<PathBuf>,
    /// Per-job override for the failure-disposition parent, in place of
    /// `Settings::failed_dir`.
    pub failed_dir: Option<PathBuf>,
}

impl JobSpec {
    /// Derive a job from a bare input path: the job name defaults to the
    /// input's file stem.
    pub fn from_file(input_path: PathBuf, output_dir: PathBuf, job_name: Option<String>) -> Self {
        let job_name = job_name.unwrap_or_else(|| {
            input_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string())
        });
        Self {
            input_path,
            output_dir,
            job_name,
            profile_name: None,
            auto_detect_grid: true,
            grid_rows: None,
            grid_cols: None,
            fps: None,
            processed_dir: None,
            failed_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub anchor_jitter_rms_px: f64,
    pub baseline_var_px: f64,
    pub bbox_var: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorInfo {
    pub mode: String,
    pub target_x: i64,
    pub target_y: i64,
    #[serde(default)]
    pub per_frame_offsets: Vec<(i64, i64)>,
}

/// Outcome of converting one input file, whether it succeeded or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResult {
    pub success: bool,
    pub input_path: PathBuf,
    pub job_name: String,

    pub aseprite_path: Option<PathBuf>,
    pub sheet_png_path: Option<PathBuf>,
    pub sheet_json_path: Option<PathBuf>,
    pub gif_path: Option<PathBuf>,
    pub meta_path: Option<PathBuf>,

    pub frame_count: u32,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub fps: u32,

    pub quality: Option<QualityMetrics>,
    pub anchor_info: Option<AnchorInfo>,

    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub error_log_path: Option<PathBuf>,

    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_seconds: f64,
}

impl ConvertResult {
    pub fn failed(input_path: PathBuf, job_name: String, started_at: String) -> Self {
        Self {
            success: false,
            input_path,
            job_name,
            aseprite_path: None,
            sheet_png_path: None,
            sheet_json_path: None,
            gif_path: None,
            meta_path: None,
            frame_count: 0,
            grid_rows: 0,
            grid_cols: 0,
            fps: 0,
            quality: None,
            anchor_info: None,
            error_code: None,
            error_message: None,
            error_log_path: None,
            started_at,
            completed_at: None,
            duration_seconds: 0.0,
        }
    }
}

/// Result of automatic grid detection via gap analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub grid: Option<Grid>,
    pub confidence: f64,

    pub image_width: u32,
    pub image_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,

    pub method: String,
    pub notes: Vec<String>,
}

/// Read `<input_stem>.job.json` next to `input_path`, if present.
///
/// Returns `Ok(None)` when there's no sidecar at all, and
/// `Err(JobOverrideInvalid)` when one exists but fails to parse.
pub fn load_sidecar_override(input_path: &Path) -> Result<Option<JobOverride>, CoreError> {
    let sidecar = sidecar_path(input_path);
    if !sidecar.is_file() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&sidecar).map_err(|e| CoreError::JobOverrideInvalid {
        path: sidecar.clone(),
        reason: e.to_string(),
    })?;

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| CoreError::JobOverrideInvalid {
            path: sidecar,
            reason: e.to_string(),
        })
}

/// Effective profile and auto-detect flag for one job after folding in its
/// sidecar override, if any. The sidecar is loaded at most once (invariant
/// vi) — call this exactly once per job, before the tool-call overrides are
/// applied on top.
pub struct ResolvedJob {
    pub profile: ConversionProfile,
    pub auto_detect_grid: bool,
}

pub fn resolve_with_sidecar(
    profile: &ConversionProfile,
    input_path: &Path,
    default_auto_detect_grid: bool,
) -> Result<ResolvedJob, CoreError> {
    let mut resolved = profile.clone();
    let mut auto_detect_grid = default_auto_detect_grid;

    if let Some(over) = load_sidecar_override(input_path)? {
        profile::apply_sidecar_override(&mut resolved, &over)?;
        if let Some(v) = over.auto_detect_grid {
            auto_detect_grid = v;
        }
    }

    Ok(ResolvedJob {
        profile: resolved,
        auto_detect_grid,
    })
}

fn sidecar_path(input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{stem}.job.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn job_name_defaults_to_file_stem() {
        let job = JobSpec::from_file(
            PathBuf::from("/ws/inbox/walk_cycle.png"),
            PathBuf::from("/ws/out"),
            None,
        );
        assert_eq!(job.job_name, "walk_cycle");
    }

    #[test]
    fn missing_sidecar_returns_none() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("walk.png");
        fs::write(&input, b"fake png").unwrap();
        assert!(load_sidecar_override(&input).unwrap().is_none());
    }

    #[test]
    fn present_sidecar_parses() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("walk.png");
        fs::write(&input, b"fake png").unwrap();
        fs::write(
            dir.path().join("walk.job.json"),
            r#"{"timing": {"fps": 24}}"#,
        )
        .unwrap();

        let over = load_sidecar_override(&input).unwrap().unwrap();
        assert_eq!(over.timing.unwrap().fps, Some(24));
    }

    #[test]
    fn resolve_with_sidecar_overrides_auto_detect_flag() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("walk.png");
        fs::write(&input, b"fake png").unwrap();
        fs::write(
            dir.path().join("walk.job.json"),
            r#"{"auto_detect_grid": false, "timing": {"fps": 24}}"#,
        )
        .unwrap();

        let profile = ConversionProfile::game_default();
        let resolved = resolve_with_sidecar(&profile, &input, true).unwrap();
        assert!(!resolved.auto_detect_grid);
        assert_eq!(resolved.profile.timing.fps, 24);
    }

    #[test]
    fn resolve_with_sidecar_keeps_default_when_no_sidecar() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("walk.png");
        fs::write(&input, b"fake png").unwrap();

        let profile = ConversionProfile::game_default();
        let resolved = resolve_with_sidecar(&profile, &input, true).unwrap();
        assert!(resolved.auto_detect_grid);
    }

    #[test]
    fn malformed_sidecar_is_rejected() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("walk.png");
        fs::write(&input, b"fake png").unwrap();
        fs::write(dir.path().join("walk.job.json"), "{not json").unwrap();

        let err = load_sidecar_override(&input).unwrap_err();
        assert!(matches!(err, CoreError::JobOverrideInvalid { .. }));
    }
}
