use sprite_anim_mcp::SpriteAnimMcp;
use std::collections::HashSet;

/// All eight dispatcher operations must be registered in the tool router.
#[test]
fn all_tools_registered() {
    let server = SpriteAnimMcp::new();
    let tools = server.router().list_all();
    let names: HashSet<&str> = tools.iter().map(|t| t.name.as_ref()).collect();

    let expected = [
        "watch_start",
        "watch_stop",
        "convert_inbox",
        "convert_file",
        "status",
        "dry_run_detect",
        "doctor",
        "cleanup_background",
    ];

    assert_eq!(
        tools.len(),
        expected.len(),
        "Expected {} tools, got {}: {:?}",
        expected.len(),
        tools.len(),
        names
    );

    for name in &expected {
        assert!(names.contains(name), "Missing tool: {name}");
    }
}

/// Every tool must have a non-empty description (from doc comments).
#[test]
fn all_tools_have_descriptions() {
    let server = SpriteAnimMcp::new();
    let tools = server.router().list_all();

    for tool in &tools {
        let desc = tool.description.as_deref().unwrap_or("");
        assert!(!desc.is_empty(), "Tool '{}' has no description", tool.name);
    }
}

/// Every tool takes at least one parameter, so every schema should carry properties.
#[test]
fn tools_have_input_schema() {
    let server = SpriteAnimMcp::new();
    let tools = server.router().list_all();

    for tool in &tools {
        let schema = serde_json::to_value(&*tool.input_schema).unwrap();
        let props = schema.get("properties");
        assert!(
            props.is_some(),
            "Tool '{}' should have properties in input schema, got: {}",
            tool.name,
            serde_json::to_string_pretty(&schema).unwrap()
        );
    }
}

/// Parameter structs must deserialize correctly from JSON, applying defaults
/// the way the dispatcher expects.
#[test]
fn param_deserialization() {
    use sprite_anim_mcp::tools::cleanup::*;
    use sprite_anim_mcp::tools::convert::*;
    use sprite_anim_mcp::tools::diagnostics::*;
    use sprite_anim_mcp::tools::watch::*;

    let p: WatchStartParams = serde_json::from_str(r#"{"profile": "pixel_hero"}"#).unwrap();
    assert_eq!(p.profile.as_deref(), Some("pixel_hero"));
    assert!(p.workspace_root.is_none());
    assert!(!p.allow_external_paths);

    let p: WatchStopParams = serde_json::from_str(r#"{}"#).unwrap();
    assert!(p.workspace_root.is_none());

    let p: ConvertInboxParams = serde_json::from_str(r#"{"grid_rows": 4, "grid_cols": 8}"#).unwrap();
    assert_eq!(p.limit, 50);
    assert_eq!(p.grid_rows, Some(4));
    assert_eq!(p.grid_cols, Some(8));
    assert!(p.processed_dir.is_none());

    let p: ConvertInboxParams = serde_json::from_str(r#"{"limit": 5}"#).unwrap();
    assert_eq!(p.limit, 5);

    let p: ConvertFileParams = serde_json::from_str(r#"{"input_path": "inbox/hero.png"}"#).unwrap();
    assert_eq!(p.input_path, "inbox/hero.png");
    assert!(p.fps.is_none());

    let p: StatusParams = serde_json::from_str(r#"{}"#).unwrap();
    assert!(p.workspace_root.is_none());

    let p: DoctorParams = serde_json::from_str(r#"{"workspace_root": "/tmp/ws"}"#).unwrap();
    assert_eq!(p.workspace_root.as_deref(), Some("/tmp/ws"));

    let p: DryRunDetectParams = serde_json::from_str(r#"{"input_path": "inbox/hero.png"}"#).unwrap();
    assert_eq!(p.input_path, "inbox/hero.png");
    assert!(!p.allow_external_paths);

    let p: CleanupBackgroundParams = serde_json::from_str(r#"{"input_path": "raw/hero.png"}"#).unwrap();
    assert_eq!(p.outline_threshold, 30);
    assert_eq!(p.fill_tolerance, 50);
    assert!(!p.preview_mode);

    let p: CleanupBackgroundParams =
        serde_json::from_str(r#"{"input_path": "raw/hero.png", "outline_threshold": 10, "preview_mode": true}"#)
            .unwrap();
    assert_eq!(p.outline_threshold, 10);
    assert_eq!(p.fill_tolerance, 50);
    assert!(p.preview_mode);
}

/// The error envelope built for a missing input path carries the closed
/// error code `dry_run_detect`/`convert_file` surface to clients.
#[test]
fn error_envelope_reports_file_not_found() {
    use sprite_anim_mcp::dispatch::error_envelope;
    use sprite_anim_core::CoreError;

    let err = CoreError::FileNotFound(std::path::PathBuf::from("/tmp/does-not-exist.png"));
    let text = error_envelope(&err);
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["error_code"], "FILE_NOT_FOUND");
    assert!(value["message"].as_str().unwrap().contains("does-not-exist.png"));
}

/// A fresh workspace root gets its four fixed subdirectories, and `status`
/// reports them without requiring the watcher to be running.
#[test]
fn status_reports_workspace_paths_for_fresh_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("fresh-workspace");
    std::fs::create_dir_all(&root).unwrap();
    let root = root.canonicalize().unwrap();

    let ctx = sprite_anim_core::context_for(&root);
    let status = ctx.status();

    assert_eq!(status.inbox_dir, ctx.settings.inbox_dir);
    assert!(!status.queue.running);
    assert!(status.watcher.is_none());
}
