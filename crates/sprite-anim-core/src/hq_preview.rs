//! Post-processing: rebuild the preview GIF via an external media encoder for
//! a palette-optimised result, replacing the default preview in place.

use std::path::{Path, PathBuf};

use image::{GenericImage, GenericImageView, RgbaImage};
use serde_json::Value;
use tokio::process::Command;

use crate::error::CoreError;
use crate::profile::ConversionProfile;
use crate::settings::Settings;

struct FrameRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    paste: Option<PasteInfo>,
}

struct PasteInfo {
    dst_x: u32,
    dst_y: u32,
    out_w: u32,
    out_h: u32,
}

/// Drives the external encoder to rebuild `<out_dir>/anim_preview.gif` from
/// the sheet PNG and atlas JSON at a higher quality than the default preview
/// the conversion script emits. Leaves the default preview untouched on any
/// failure.
pub async fn build_hq_preview(
    settings: &Settings,
    out_dir: &Path,
    profile: &ConversionProfile,
) -> Result<(), CoreError> {
    let encoder = which::which("ffmpeg").map_err(|_| {
        CoreError::Unexpected("ffmpeg not available on PATH; skipping HQ preview".to_string())
    })?;

    let sheet_path = out_dir.join("anim_sheet.png");
    let atlas_path = out_dir.join("anim_sheet.json");
    let preview_path = out_dir.join("anim_preview.gif");

    let sheet = image::open(&sheet_path)
        .map_err(|e| CoreError::Unexpected(format!("failed to open sheet PNG: {e}")))?
        .to_rgba8();
    let atlas_raw = tokio::fs::read_to_string(&atlas_path)
        .await
        .map_err(|e| CoreError::Unexpected(format!("failed to read atlas JSON: {e}")))?;
    let atlas: Value = serde_json::from_str(&atlas_raw)
        .map_err(|e| CoreError::Unexpected(format!("failed to parse atlas JSON: {e}")))?;

    let frames = parse_frame_rects(&atlas)?;
    if frames.is_empty() {
        return Err(CoreError::Unexpected("atlas JSON has no frames".to_string()));
    }

    // Only create the temp frames directory once the encoder is confirmed
    // resolvable; an unavailable encoder must never leave one behind.
    let temp_dir = tempfile::Builder::new()
        .prefix("sprite_anim_hq_preview_")
        .tempdir()
        .map_err(CoreError::Io)?;

    for (i, rect) in frames.iter().enumerate() {
        let cropped = sheet.view(rect.x, rect.y, rect.w, rect.h).to_image();
        let frame_image = match &rect.paste {
            Some(paste) => {
                let mut canvas = RgbaImage::new(paste.out_w, paste.out_h);
                canvas
                    .copy_from(&cropped, paste.dst_x, paste.dst_y)
                    .map_err(|e| CoreError::Unexpected(format!("frame composite failed: {e}")))?;
                canvas
            }
            None => cropped,
        };
        let frame_path = temp_dir.path().join(format!("frame_{i:04}.png"));
        frame_image
            .save(&frame_path)
            .map_err(|e| CoreError::Unexpected(format!("failed to write frame {i}: {e}")))?;
    }

    write_concat_manifest(temp_dir.path(), frames.len(), profile.timing.fps).await?;

    let palette_path = temp_dir.path().join("palette.png");
    let raw_gif_path = temp_dir.path().join("raw.gif");

    run_ffmpeg(
        &encoder,
        temp_dir.path(),
        &[
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            "frames.txt",
            "-vf",
            "palettegen=stats_mode=diff",
            "-y",
        ],
        &palette_path,
    )
    .await?;

    run_ffmpeg(
        &encoder,
        temp_dir.path(),
        &[
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            "frames.txt",
            "-i",
            "palette.png",
            "-lavfi",
            "paletteuse=dither=bayer:bayer_scale=5",
            "-loop",
            "0",
            "-y",
        ],
        &raw_gif_path,
    )
    .await?;

    let final_source = match which::which("gifsicle") {
        Ok(gifsicle) => {
            let optimized_path = temp_dir.path().join("optimized.gif");
            let status = Command::new(&gifsicle)
                .args(["-O3", "--output"])
                .arg(&optimized_path)
                .arg(&raw_gif_path)
                .status()
                .await
                .map_err(CoreError::SpawnFailed)?;
            if status.success() && optimized_path.exists() {
                optimized_path
            } else {
                raw_gif_path
            }
        }
        Err(_) => raw_gif_path,
    };

    tokio::fs::rename(&final_source, &preview_path)
        .await
        .map_err(|e| CoreError::Unexpected(format!("failed to replace preview atomically: {e}")))?;

    Ok(())
}

async fn run_ffmpeg(
    encoder: &Path,
    cwd: &Path,
    args: &[&str],
    output: &Path,
) -> Result<(), CoreError> {
    let mut cmd = Command::new(encoder);
    cmd.current_dir(cwd).args(args).arg(output);
    let status = cmd.status().await.map_err(CoreError::SpawnFailed)?;
    if !status.success() {
        return Err(CoreError::Unexpected(format!(
            "ffmpeg exited with status {status}"
        )));
    }
    Ok(())
}

/// Each frame's duration is `1/fps`; the last frame is written twice in the
/// concat manifest so the demuxer preserves its final display duration.
async fn write_concat_manifest(dir: &Path, frame_count: usize, fps: u32) -> Result<(), CoreError> {
    let duration = 1.0 / fps.max(1) as f64;
    let mut manifest = String::new();
    for i in 0..frame_count {
        manifest.push_str(&format!("file 'frame_{i:04}.png'\nduration {duration}\n"));
    }
    if frame_count > 0 {
        manifest.push_str(&format!("file 'frame_{:04}.png'\n", frame_count - 1));
    }
    tokio::fs::write(dir.join("frames.txt"), manifest)
        .await
        .map_err(CoreError::Io)
}

fn parse_frame_rects(atlas: &Value) -> Result<Vec<FrameRect>, CoreError> {
    let frames_value = atlas
        .get("frames")
        .ok_or_else(|| CoreError::Unexpected("atlas JSON missing 'frames'".to_string()))?;

    let entries: Vec<&Value> = match frames_value {
        Value::Array(arr) => arr.iter().collect(),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter().filter_map(|k| map.get(k)).collect()
        }
        _ => return Err(CoreError::Unexpected("'frames' is neither array nor object".to_string())),
    };

    entries.into_iter().map(parse_one_frame).collect()
}

fn parse_one_frame(entry: &Value) -> Result<FrameRect, CoreError> {
    let frame = entry
        .get("frame")
        .ok_or_else(|| CoreError::Unexpected("frame entry missing 'frame'".to_string()))?;
    let x = as_u32(frame, "x")?;
    let y = as_u32(frame, "y")?;
    let w = as_u32(frame, "w")?;
    let h = as_u32(frame, "h")?;

    let paste = match (entry.get("sourceSize"), entry.get("spriteSourceSize")) {
        (Some(source_size), Some(sprite_source_size)) => Some(PasteInfo {
            dst_x: as_u32(sprite_source_size, "x")?,
            dst_y: as_u32(sprite_source_size, "y")?,
            out_w: as_u32(source_size, "w")?,
            out_h: as_u32(source_size, "h")?,
        }),
        _ => None,
    };

    Ok(FrameRect { x, y, w, h, paste })
}

fn as_u32(value: &Value, field: &str) -> Result<u32, CoreError> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .ok_or_else(|| CoreError::Unexpected(format!("missing or invalid field '{field}'")))
}
