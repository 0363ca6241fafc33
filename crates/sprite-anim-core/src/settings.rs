//! Per-workspace configuration, built from environment overrides.

use std::path::{Path, PathBuf};

use crate::profile::ConversionProfile;

/// Absolute paths for a single workspace plus the resolved external tool
/// executable. Constructed once per workspace root and handed out to every
/// component that needs a path or a profile default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub aseprite_exe: PathBuf,
    pub workspace_root: PathBuf,
    pub inbox_dir: PathBuf,
    pub out_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub default_profile: String,
}

impl Settings {
    /// Build settings for `workspace_root`, resolving the external tool
    /// executable from `ASEPRITE_EXE`, then a handful of common install
    /// locations, then falling back to the bare name on `PATH`.
    pub fn from_env(workspace_root: &Path) -> Self {
        let workspace_root = workspace_root.to_path_buf();
        let scripts_dir = std::env::var("ASEPRITE_SCRIPTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| workspace_root.join("scripts"));
        Self {
            aseprite_exe: find_aseprite(),
            inbox_dir: workspace_root.join("inbox"),
            out_dir: workspace_root.join("out"),
            processed_dir: workspace_root.join("processed"),
            failed_dir: workspace_root.join("failed"),
            scripts_dir,
            workspace_root,
            default_profile: std::env::var("ASEPRITE_DEFAULT_PROFILE")
                .unwrap_or_else(|_| "game_default".to_string()),
        }
    }

    /// Path to the conversion script the external tool runs in batch mode.
    pub fn convert_script(&self) -> PathBuf {
        self.scripts_dir.join("convert.lua")
    }

    /// Path to the background-cleanup script used by the cleanup proxy.
    pub fn cleanup_script(&self) -> PathBuf {
        self.scripts_dir.join("cleanup.lua")
    }

    /// Create the four workspace subdirectories if they don't already exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            &self.inbox_dir,
            &self.out_dir,
            &self.processed_dir,
            &self.failed_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Look up a named profile, falling back to `default_profile` when
    /// `name` is `None`, and to `game_default` when the name is unknown.
    pub fn get_profile(&self, name: Option<&str>) -> ConversionProfile {
        ConversionProfile::get(name.or(Some(self.default_profile.as_str())))
    }
}

/// Search `ASEPRITE_EXE`, then common per-OS install locations, then PATH.
/// Never errors: the returned path is probed again by the runner, which
/// raises `ASEPRITE_NOT_FOUND` at invocation time if it still doesn't exist.
fn find_aseprite() -> PathBuf {
    if let Ok(path) = std::env::var("ASEPRITE_EXE") {
        let path = PathBuf::from(path);
        if path.exists() {
            return path;
        }
    }

    let exe_name = if cfg!(windows) { "Aseprite.exe" } else { "aseprite" };

    if let Ok(path) = which::which(exe_name) {
        return path;
    }

    let mut common_paths = Vec::new();
    if cfg!(windows) {
        common_paths.push(PathBuf::from(r"C:\Program Files\Aseprite\Aseprite.exe"));
        common_paths.push(PathBuf::from(
            r"C:\Program Files (x86)\Aseprite\Aseprite.exe",
        ));
        if let Some(home) = std::env::var_os("USERPROFILE") {
            common_paths.push(PathBuf::from(home).join("AppData/Local/Aseprite/Aseprite.exe"));
        }
    } else if cfg!(target_os = "macos") {
        common_paths.push(PathBuf::from("/Applications/Aseprite.app/Contents/MacOS/aseprite"));
    } else {
        common_paths.push(PathBuf::from("/usr/bin/aseprite"));
        common_paths.push(PathBuf::from("/usr/local/bin/aseprite"));
    }

    for path in common_paths {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from(exe_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn from_env_derives_subdirectories() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_env(dir.path());
        assert_eq!(settings.inbox_dir, dir.path().join("inbox"));
        assert_eq!(settings.out_dir, dir.path().join("out"));
        assert_eq!(settings.processed_dir, dir.path().join("processed"));
        assert_eq!(settings.failed_dir, dir.path().join("failed"));
    }

    #[test]
    fn ensure_directories_creates_all_four() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_env(dir.path());
        settings.ensure_directories().unwrap();
        assert!(settings.inbox_dir.is_dir());
        assert!(settings.out_dir.is_dir());
        assert!(settings.processed_dir.is_dir());
        assert!(settings.failed_dir.is_dir());
    }

    #[test]
    fn unknown_profile_name_falls_back_to_game_default() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_env(dir.path());
        let profile = settings.get_profile(Some("nonexistent"));
        assert_eq!(profile.name, "game_default");
    }

    #[test]
    fn no_name_falls_back_to_default_profile() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::from_env(dir.path());
        settings.default_profile = "unity_default".to_string();
        let profile = settings.get_profile(None);
        assert_eq!(profile.name, "unity_default");
    }
}
