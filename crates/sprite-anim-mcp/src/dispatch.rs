//! Shared dispatcher plumbing: workspace-root resolution, the uniform error
//! envelope, and a thin start/end timing wrapper around each handler.
//!
//! Mirrors how the core crate centralises its error taxonomy in one module
//! (`sprite_anim_core::error`) — this module is the analogous seam for the
//! tool surface: every handler in `tools/` funnels through `dispatch::run`
//! so error translation and logging happen exactly once.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{json, Value};
use sprite_anim_core::{CoreError, WorkspaceContext};
use tracing::info;

/// Resolve the workspace root for a call: the explicit `workspace_root`
/// argument when given, else `SS_ANIM_WORKSPACE`, else the current
/// directory. Relative values are resolved against the process's current
/// directory; `~` is expanded against `HOME`.
pub fn resolve_workspace_root(workspace_root: Option<&str>) -> std::io::Result<PathBuf> {
    let raw = workspace_root
        .map(|s| s.to_string())
        .or_else(|| std::env::var("SS_ANIM_WORKSPACE").ok())
        .unwrap_or_else(|| ".".to_string());

    let expanded = expand_tilde(&raw);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    Ok(joined.canonicalize().unwrap_or(joined))
}

fn expand_tilde(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(value)
}

/// Look up or lazily create the `WorkspaceContext` for a resolved root.
pub fn context_for(root: &Path) -> std::sync::Arc<WorkspaceContext> {
    sprite_anim_core::context_for(root)
}

/// Run `op_name`'s body, translating any `CoreError` into the uniform error
/// envelope and logging one structured entry at start and end with the
/// elapsed milliseconds (§4.10).
pub async fn run<T, F, Fut>(op_name: &'static str, body: F) -> CallToolResult
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let started = Instant::now();
    info!(op = op_name, "dispatch: start");

    let outcome = body().await;
    let elapsed_ms = started.elapsed().as_millis();

    let text = match outcome {
        Ok(value) => {
            info!(op = op_name, elapsed_ms, "dispatch: end (ok)");
            serde_json::to_string_pretty(&value).unwrap_or_else(|e| {
                error_envelope(&CoreError::Unexpected(format!("failed to serialise response: {e}")))
            })
        }
        Err(err) => {
            info!(op = op_name, elapsed_ms, error_code = %err.code_str(), "dispatch: end (error)");
            error_envelope(&err)
        }
    };

    CallToolResult::success(vec![Content::text(text)])
}

/// Build the uniform error envelope: `{"error", "error_code", "message", ...}`
/// plus whatever contextual fields the variant carries.
pub fn error_envelope(err: &CoreError) -> String {
    let message = err.to_string();
    let mut obj = json!({
        "error": message,
        "error_code": err.code_str(),
        "message": message,
    });

    if let CoreError::PathOutsideWorkspace { field, path, workspace_root } = err {
        if let Value::Object(map) = &mut obj {
            map.insert("field".to_string(), json!(field));
            map.insert("path".to_string(), json!(path.display().to_string()));
            map.insert("workspace_root".to_string(), json!(workspace_root.display().to_string()));
        }
    }

    serde_json::to_string_pretty(&obj).unwrap_or(message)
}

/// Resolve a path argument per §4.1, translating an empty string to "not
/// supplied" the way the tool surface's optional string params do.
pub fn resolve_path_arg(
    value: Option<&str>,
    workspace_root: &Path,
    allow_external: bool,
    field_name: &str,
    default: Option<&Path>,
) -> Result<PathBuf, CoreError> {
    sprite_anim_core::path_policy::resolve_workspace_path(
        value.unwrap_or(""),
        workspace_root,
        allow_external,
        field_name,
        default,
    )
}
