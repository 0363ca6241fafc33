use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema, Default)]
pub struct StatusParams {
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
}

#[derive(Deserialize, JsonSchema, Default)]
pub struct DoctorParams {
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct DryRunDetectParams {
    /// Path to the input image, resolved against the workspace root
    pub input_path: String,
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
    /// Allow path arguments to resolve outside the workspace root
    #[serde(default)]
    pub allow_external_paths: bool,
}
