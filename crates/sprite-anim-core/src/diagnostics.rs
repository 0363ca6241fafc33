//! Status and doctor reporting: pure functions over `Settings` plus a thin
//! serializable view of queue/watcher state for the dispatcher's `status`
//! and `doctor` operations.

use std::path::PathBuf;

use serde::Serialize;

use crate::queue::QueueStats;
use crate::settings::Settings;
use crate::watcher::WatcherHealth;

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub path: PathBuf,
    pub available: bool,
}

pub fn tool_status(settings: &Settings) -> ToolStatus {
    let available = settings.aseprite_exe.exists() || which::which(&settings.aseprite_exe).is_ok();
    ToolStatus {
        path: settings.aseprite_exe.clone(),
        available,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherHealthReport {
    pub running: bool,
    pub files_processed: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl From<&WatcherHealth> for WatcherHealthReport {
    fn from(health: &WatcherHealth) -> Self {
        Self {
            running: health.running,
            files_processed: health.files_processed,
            error_count: health.error_count,
            last_error: health.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub aseprite: ToolStatus,
    pub workspace_root: PathBuf,
    pub inbox_dir: PathBuf,
    pub out_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub queue: QueueStats,
    pub watcher: Option<WatcherHealthReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub aseprite: ToolStatus,
    pub convert_script_present: bool,
    pub cleanup_script_present: bool,
    pub workspace_root_exists: bool,
    pub workspace_root_writable: bool,
    pub ffmpeg_available: bool,
    pub gifsicle_available: bool,
    pub findings: Vec<String>,
}

/// Diagnostics for the `doctor` operation: tool path/availability, script
/// presence, workspace directory health, and optional-dependency
/// availability, collected into a flat findings list.
pub fn doctor(settings: &Settings) -> DoctorReport {
    let aseprite = tool_status(settings);
    let convert_script_present = settings.convert_script().is_file();
    let cleanup_script_present = settings.cleanup_script().is_file();
    let workspace_root_exists = settings.workspace_root.is_dir();
    let workspace_root_writable = workspace_root_exists && is_writable(&settings.workspace_root);
    let ffmpeg_available = which::which("ffmpeg").is_ok();
    let gifsicle_available = which::which("gifsicle").is_ok();

    let mut findings = Vec::new();
    if !aseprite.available {
        findings.push(format!(
            "external tool executable not found at '{}' or on PATH",
            settings.aseprite_exe.display()
        ));
    }
    if !convert_script_present {
        findings.push(format!(
            "conversion script missing: {}",
            settings.convert_script().display()
        ));
    }
    if !cleanup_script_present {
        findings.push(format!(
            "cleanup script missing: {}",
            settings.cleanup_script().display()
        ));
    }
    if !workspace_root_exists {
        findings.push(format!(
            "workspace root does not exist: {}",
            settings.workspace_root.display()
        ));
    } else if !workspace_root_writable {
        findings.push(format!(
            "workspace root is not writable: {}",
            settings.workspace_root.display()
        ));
    }
    if !ffmpeg_available {
        findings.push("ffmpeg not found on PATH; HQ preview post-processing will be skipped".to_string());
    }
    if !gifsicle_available {
        findings.push("gifsicle not found on PATH; HQ preview will skip the optimisation pass".to_string());
    }

    DoctorReport {
        aseprite,
        convert_script_present,
        cleanup_script_present,
        workspace_root_exists,
        workspace_root_writable,
        ffmpeg_available,
        gifsicle_available,
        findings,
    }
}

fn is_writable(dir: &std::path::Path) -> bool {
    let probe = dir.join(format!(".doctor_write_probe_{}", std::process::id()));
    match std::fs::write(&probe, b"x") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn doctor_reports_missing_tool_and_scripts() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::from_env(dir.path());
        settings.aseprite_exe = PathBuf::from("/definitely/not/a/real/aseprite/binary");
        settings.ensure_directories().unwrap();

        let report = doctor(&settings);
        assert!(!report.aseprite.available);
        assert!(!report.convert_script_present);
        assert!(report.workspace_root_exists);
        assert!(report.workspace_root_writable);
        assert!(report.findings.iter().any(|f| f.contains("external tool executable")));
        assert!(report.findings.iter().any(|f| f.contains("conversion script")));
    }

    #[test]
    fn doctor_reports_present_scripts() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_env(dir.path());
        settings.ensure_directories().unwrap();
        std::fs::create_dir_all(&settings.scripts_dir).unwrap();
        std::fs::write(settings.convert_script(), b"-- convert").unwrap();
        std::fs::write(settings.cleanup_script(), b"-- cleanup").unwrap();

        let report = doctor(&settings);
        assert!(report.convert_script_present);
        assert!(report.cleanup_script_present);
    }

    #[test]
    fn doctor_flags_nonexistent_workspace_root() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let settings = Settings::from_env(&missing);

        let report = doctor(&settings);
        assert!(!report.workspace_root_exists);
        assert!(!report.workspace_root_writable);
        assert!(report.findings.iter().any(|f| f.contains("does not exist")));
    }
}
