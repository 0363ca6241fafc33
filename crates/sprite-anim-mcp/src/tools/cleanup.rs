use schemars::JsonSchema;
use serde::Deserialize;

fn default_outline_threshold() -> u8 {
    30
}

fn default_fill_tolerance() -> u8 {
    50
}

#[derive(Deserialize, JsonSchema)]
pub struct CleanupBackgroundParams {
    /// Path to the input image, resolved against the workspace root
    pub input_path: String,
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
    /// Output image path, resolved against the workspace root
    pub output_path: Option<String>,
    /// Edge-detection threshold for the outline pass
    #[serde(default = "default_outline_threshold")]
    pub outline_threshold: u8,
    /// Colour-distance tolerance for the flood-fill pass
    #[serde(default = "default_fill_tolerance")]
    pub fill_tolerance: u8,
    /// Run in preview mode (cheaper, lower-fidelity pass)
    #[serde(default)]
    pub preview_mode: bool,
    /// Allow path arguments to resolve outside the workspace root
    #[serde(default)]
    pub allow_external_paths: bool,
}
