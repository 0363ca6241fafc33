use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema, Default)]
pub struct WatchStartParams {
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
    /// Inbox directory override, resolved against the workspace root
    pub inbox_dir: Option<String>,
    /// Output directory override, resolved against the workspace root
    pub out_dir: Option<String>,
    /// Processed-files directory override, resolved against the workspace root
    pub processed_dir: Option<String>,
    /// Failed-files directory override, resolved against the workspace root
    pub failed_dir: Option<String>,
    /// Conversion profile applied to files the watcher enqueues
    pub profile: Option<String>,
    /// Allow path arguments to resolve outside the workspace root
    #[serde(default)]
    pub allow_external_paths: bool,
}

#[derive(Deserialize, JsonSchema, Default)]
pub struct WatchStopParams {
    /// Workspace root (defaults to SS_ANIM_WORKSPACE, then the current directory)
    pub workspace_root: Option<String>,
}
