//! Validate that an external-tool run actually produced the declared artifacts.

use std::path::Path;

use crate::profile::Export;

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid,
    Invalid {
        missing: Vec<String>,
        parse_error: Option<String>,
    },
}

/// Check `out_dir` against what `export` declares should have been produced.
///
/// `meta_path` defaults to `<out_dir>/meta.json`; it is always required and,
/// if present, is parsed as JSON (a parse failure is reported but doesn't by
/// itself add to `missing`).
pub fn validate_output(out_dir: &Path, export: &Export, meta_path: Option<&Path>) -> ValidationOutcome {
    let meta_path = meta_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| out_dir.join("meta.json"));

    let mut missing = Vec::new();

    if export.aseprite && !out_dir.join("anim.aseprite").is_file() {
        missing.push("anim.aseprite".to_string());
    }
    if export.sheet_png_json {
        if !out_dir.join("anim_sheet.png").is_file() {
            missing.push("anim_sheet.png".to_string());
        }
        if !out_dir.join("anim_sheet.json").is_file() {
            missing.push("anim_sheet.json".to_string());
        }
    }
    if export.gif_preview && !out_dir.join("anim_preview.gif").is_file() {
        missing.push("anim_preview.gif".to_string());
    }

    let mut parse_error = None;
    if !meta_path.is_file() {
        missing.push("meta.json".to_string());
    } else {
        match std::fs::read_to_string(&meta_path) {
            Ok(raw) => {
                if let Err(e) = serde_json::from_str::<serde_json::Value>(&raw) {
                    parse_error = Some(e.to_string());
                }
            }
            Err(e) => parse_error = Some(e.to_string()),
        }
    }

    if missing.is_empty() && parse_error.is_none() {
        ValidationOutcome::Valid
    } else {
        ValidationOutcome::Invalid { missing, parse_error }
    }
}
