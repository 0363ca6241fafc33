//! End-to-end conversion against a fake external-tool executable: a shell
//! script that reads the `--script-param key=value` flags this crate's
//! runner emits and writes a canned `meta.json`, the way a real batch-mode
//! content-creation executable would after a successful run.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use sprite_anim_core::profile::ConversionProfile;
use sprite_anim_core::queue::convert_one_file;
use sprite_anim_core::settings::Settings;

/// Writes a fake executable at `path` that parses `--script-param
/// output_dir=...`/`job_name=...` from its args and drops the declared
/// export artifacts plus a success `meta.json` into `<output_dir>`.
fn write_fake_tool(path: &Path) {
    let script = r#"#!/bin/sh
set -e
output_dir=""
job_name=""
prev=""
for arg in "$@"; do
    case "$prev" in
        --script-param)
            case "$arg" in
                output_dir=*) output_dir="${arg#output_dir=}" ;;
                job_name=*) job_name="${arg#job_name=}" ;;
            esac
            ;;
    esac
    prev="$arg"
done

mkdir -p "$output_dir"
touch "$output_dir/anim.aseprite"
touch "$output_dir/anim_sheet.png"
echo '{}' > "$output_dir/anim_sheet.json"
touch "$output_dir/anim_preview.gif"
cat > "$output_dir/meta.json" <<EOF
{"status": "success", "frame_count": 6, "fps": 12, "grid": {"rows": 2, "cols": 3}}
EOF
exit 0
"#;
    std::fs::write(path, script).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

#[tokio::test]
async fn convert_one_file_succeeds_against_fake_tool() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::from_env(dir.path());
    settings.ensure_directories().unwrap();

    let fake_tool = dir.path().join("fake-aseprite.sh");
    write_fake_tool(&fake_tool);
    settings.aseprite_exe = fake_tool;

    let input = settings.inbox_dir.join("walk.png");
    std::fs::write(&input, b"fake pixels").unwrap();

    let result = convert_one_file(
        &settings,
        &input,
        &settings.out_dir,
        None,
        ConversionProfile::game_default(),
        None,
        None,
        None,
        None,
        None,
    )
    .await;

    assert!(result.success, "expected success, got: {result:?}");
    assert_eq!(result.frame_count, 6);
    assert_eq!(result.fps, 12);
    assert_eq!(result.grid_rows, 2);
    assert_eq!(result.grid_cols, 3);
    assert!(result.duration_seconds >= 0.0);
    assert!(result.completed_at.is_some());

    let job_dir = settings.out_dir.join(&result.job_name);
    assert!(job_dir.join("meta.json").is_file());
    assert!(job_dir.join("job.log").is_file());
    assert!(settings.processed_dir.join("walk.png").is_file());
}

#[tokio::test]
async fn convert_one_file_reports_nonzero_exit_from_fake_tool() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::from_env(dir.path());
    settings.ensure_directories().unwrap();

    let fake_tool = dir.path().join("fake-aseprite-fail.sh");
    std::fs::write(&fake_tool, "#!/bin/sh\nexit 7\n").unwrap();
    let mut perms = std::fs::metadata(&fake_tool).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&fake_tool, perms).unwrap();
    settings.aseprite_exe = fake_tool;

    let input = settings.inbox_dir.join("walk.png");
    std::fs::write(&input, b"fake pixels").unwrap();

    let result = convert_one_file(
        &settings,
        &input,
        &settings.out_dir,
        None,
        ConversionProfile::game_default(),
        None,
        None,
        None,
        None,
        None,
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("ASEPRITE_EXIT_NONZERO"));
    assert!(result.duration_seconds >= 0.0);
    assert!(result.completed_at.is_some());
    assert!(settings.failed_dir.join("walk").is_dir());
}
