pub mod cleanup;
pub mod convert;
pub mod diagnostics;
pub mod watch;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, ServerCapabilities, ServerInfo};
use rmcp::{tool_handler, tool_router, ServerHandler};

use sprite_anim_core::error::CoreError;
use sprite_anim_core::grid_detector::detect_grid;
use sprite_anim_core::{apply_tool_overrides, convert_one_file, process_batch, scan_inbox};

use crate::dispatch;

use cleanup::CleanupBackgroundParams;
use convert::{ConvertFileParams, ConvertInboxParams};
use diagnostics::{DoctorParams, DryRunDetectParams, StatusParams};
use watch::{WatchStartParams, WatchStopParams};

/// The `sprite-anim` tool surface: one handler per operation in §6, each
/// routed through `dispatch::run` so path-policy and error-envelope
/// behaviour lives in exactly one place.
#[derive(Clone)]
pub struct SpriteAnimMcp {
    tool_router: ToolRouter<Self>,
}

impl SpriteAnimMcp {
    /// Access the tool router for testing/introspection.
    pub fn router(&self) -> &ToolRouter<Self> {
        &self.tool_router
    }
}

impl Default for SpriteAnimMcp {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_router]
impl SpriteAnimMcp {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    /// Idempotently (re)start the folder watcher and its job queue for a workspace.
    #[rmcp::tool]
    async fn watch_start(
        &self,
        Parameters(params): Parameters<WatchStartParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("watch_start", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let ctx = dispatch::context_for(&root);

            // Validate any directory overrides against the path policy even
            // though `WorkspaceContext`'s `Settings` are fixed for the
            // process (§3 Lifecycles) — a caller supplying an escaping
            // override still gets `PATH_OUTSIDE_WORKSPACE` up front.
            for (value, field) in [
                (&params.inbox_dir, "inbox_dir"),
                (&params.out_dir, "out_dir"),
                (&params.processed_dir, "processed_dir"),
                (&params.failed_dir, "failed_dir"),
            ] {
                if let Some(value) = value {
                    dispatch::resolve_path_arg(Some(value.as_str()), &root, params.allow_external_paths, field, None)?;
                }
            }

            ctx.start_watching(params.profile.clone());

            Ok(serde_json::json!({
                "started": true,
                "workspace_root": ctx.settings.workspace_root,
                "inbox_dir": ctx.settings.inbox_dir,
                "out_dir": ctx.settings.out_dir,
                "processed_dir": ctx.settings.processed_dir,
                "failed_dir": ctx.settings.failed_dir,
            }))
        })
        .await)
    }

    /// Stop the watcher and its job queue for a workspace; reports lifetime files_processed.
    #[rmcp::tool]
    async fn watch_stop(
        &self,
        Parameters(params): Parameters<WatchStopParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("watch_stop", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let ctx = dispatch::context_for(&root);
            let files_processed = ctx.stop_watching().await;

            Ok(serde_json::json!({
                "stopped": true,
                "files_processed": files_processed,
            }))
        })
        .await)
    }

    /// Batch-process oldest-first up to `limit` image files from the workspace inbox.
    #[rmcp::tool]
    async fn convert_inbox(
        &self,
        Parameters(params): Parameters<ConvertInboxParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("convert_inbox", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let ctx = dispatch::context_for(&root);

            let processed_dir = match &params.processed_dir {
                Some(v) => Some(dispatch::resolve_path_arg(
                    Some(v.as_str()),
                    &root,
                    params.allow_external_paths,
                    "processed_dir",
                    None,
                )?),
                None => None,
            };
            let failed_dir = match &params.failed_dir {
                Some(v) => Some(dispatch::resolve_path_arg(
                    Some(v.as_str()),
                    &root,
                    params.allow_external_paths,
                    "failed_dir",
                    None,
                )?),
                None => None,
            };

            let mut profile = ctx.settings.get_profile(params.profile.as_deref());
            apply_tool_overrides(&mut profile, params.grid_rows, params.grid_cols, params.fps)?;

            let files = scan_inbox(&ctx.settings.inbox_dir, params.limit as usize);
            let results = process_batch(
                &ctx.settings,
                &files,
                &profile,
                &ctx.settings.out_dir,
                processed_dir.as_deref(),
                failed_dir.as_deref(),
            )
            .await;

            Ok(serde_json::json!({
                "processed": results.len(),
                "results": results,
            }))
        })
        .await)
    }

    /// Process one input file synchronously and return its conversion result.
    #[rmcp::tool]
    async fn convert_file(
        &self,
        Parameters(params): Parameters<ConvertFileParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("convert_file", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let ctx = dispatch::context_for(&root);

            let input_path = dispatch::resolve_path_arg(
                Some(&params.input_path),
                &root,
                params.allow_external_paths,
                "input_path",
                None,
            )?;
            if !input_path.is_file() {
                return Err(CoreError::FileNotFound(input_path));
            }

            let out_dir = dispatch::resolve_path_arg(
                params.out_dir.as_deref(),
                &root,
                params.allow_external_paths,
                "out_dir",
                Some(&ctx.settings.out_dir),
            )?;

            let profile = ctx.settings.get_profile(params.profile.as_deref());
            let result = convert_one_file(
                &ctx.settings,
                &input_path,
                &out_dir,
                None,
                profile,
                params.grid_rows,
                params.grid_cols,
                params.fps,
                None,
                None,
            )
            .await;

            Ok(result)
        })
        .await)
    }

    /// Report tool availability, workspace paths, queue statistics, and watcher health.
    #[rmcp::tool]
    async fn status(
        &self,
        Parameters(params): Parameters<StatusParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("status", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let ctx = dispatch::context_for(&root);
            Ok(ctx.status())
        })
        .await)
    }

    /// Run automatic grid detection on an image without converting it.
    #[rmcp::tool]
    async fn dry_run_detect(
        &self,
        Parameters(params): Parameters<DryRunDetectParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("dry_run_detect", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let input_path = dispatch::resolve_path_arg(
                Some(&params.input_path),
                &root,
                params.allow_external_paths,
                "input_path",
                None,
            )?;
            if !input_path.is_file() {
                return Err(CoreError::FileNotFound(input_path));
            }

            Ok(detect_grid(&input_path))
        })
        .await)
    }

    /// Diagnose tool/script/workspace/optional-dependency availability.
    #[rmcp::tool]
    async fn doctor(
        &self,
        Parameters(params): Parameters<DoctorParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("doctor", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let ctx = dispatch::context_for(&root);
            Ok(ctx.doctor())
        })
        .await)
    }

    /// Drive the external tool's background-cleanup script against one input image.
    #[rmcp::tool]
    async fn cleanup_background(
        &self,
        Parameters(params): Parameters<CleanupBackgroundParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(dispatch::run("cleanup_background", || async move {
            let root = dispatch::resolve_workspace_root(params.workspace_root.as_deref())
                .map_err(|e| CoreError::Unexpected(e.to_string()))?;
            let ctx = dispatch::context_for(&root);

            let input_path = dispatch::resolve_path_arg(
                Some(&params.input_path),
                &root,
                params.allow_external_paths,
                "input_path",
                None,
            )?;
            if !input_path.is_file() {
                return Err(CoreError::FileNotFound(input_path));
            }

            let default_output = default_cleanup_output(&input_path);
            let output_path = dispatch::resolve_path_arg(
                params.output_path.as_deref(),
                &root,
                params.allow_external_paths,
                "output_path",
                Some(&default_output),
            )?;

            let cleanup_params = sprite_anim_core::cleanup::CleanupParams {
                input_path,
                output_path,
                outline_threshold: params.outline_threshold,
                fill_tolerance: params.fill_tolerance,
                preview_mode: params.preview_mode,
            };

            sprite_anim_core::cleanup::run_cleanup(&ctx.settings, &cleanup_params).await
        })
        .await)
    }
}

fn default_cleanup_output(input_path: &std::path::Path) -> std::path::PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = input_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    let name = format!("{stem}_cleaned.{ext}");
    input_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(name)
}

#[tool_handler]
impl ServerHandler for SpriteAnimMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "sprite-anim job orchestration tools. Drop spritesheets into a workspace's \
                 inbox/ and call watch_start to convert them automatically, or use \
                 convert_file/convert_inbox for direct invocation. Use status and doctor to \
                 check workspace and external-tool health, and dry_run_detect to preview \
                 automatic grid detection before converting."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
