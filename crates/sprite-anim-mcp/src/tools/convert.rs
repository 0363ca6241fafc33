use schemars::JsonSchema;
use serde::Deserialize;

fn default_limit() -> u32 {
    50
}

#[derive(Deserialize, JsonSchema)]
pub struct ConvertInboxParams {
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
    /// Maximum number of inbox files to process, oldest first
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Conversion profile name
    pub profile: Option<String>,
    /// Tool-call grid row override (highest precedence)
    pub grid_rows: Option<u32>,
    /// Tool-call grid column override (highest precedence)
    pub grid_cols: Option<u32>,
    /// Tool-call fps override (highest precedence)
    pub fps: Option<u32>,
    /// Processed-files directory override, resolved against the workspace root
    pub processed_dir: Option<String>,
    /// Failed-files directory override, resolved against the workspace root
    pub failed_dir: Option<String>,
    /// Allow path arguments to resolve outside the workspace root
    #[serde(default)]
    pub allow_external_paths: bool,
}

#[derive(Deserialize, JsonSchema)]
pub struct ConvertFileParams {
    /// Path to the input image, resolved against the workspace root
    pub input_path: String,
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
    /// Output directory override, resolved against the workspace root
    pub out_dir: Option<String>,
    /// Conversion profile name
    pub profile: Option<String>,
    /// Tool-call grid row override (highest precedence)
    pub grid_rows: Option<u32>,
    /// Tool-call grid column override (highest precedence)
    pub grid_cols: Option<u32>,
    /// Tool-call fps override (highest precedence)
    pub fps: Option<u32>,
    /// Allow path arguments to resolve outside the workspace root
    #[serde(default)]
    pub allow_external_paths: bool,
}
