//! Automatic spritesheet grid detection via background-gap analysis.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use image::{GenericImageView, Rgba};
use once_cell::sync::Lazy;

use crate::job::DetectionResult;
use crate::profile::Grid;

const BG_TOLERANCE: u8 = 10;
const TRANSPARENT_ALPHA_THRESHOLD: u8 = 10;
const GAP_THRESHOLD: f64 = 0.95;
const GAP_GROUP_DISTANCE: u32 = 3;
const SAMPLE_TARGET: u32 = 128;
const CACHE_CAPACITY: usize = 256;

const COMMON_GRIDS: &[(u32, u32)] = &[
    (1, 4),
    (1, 6),
    (1, 8),
    (1, 12),
    (4, 1),
    (6, 1),
    (8, 1),
    (2, 2),
    (2, 4),
    (4, 2),
    (3, 4),
    (4, 3),
    (4, 4),
    (3, 3),
    (5, 5),
];

const COMMON_FRAME_COUNTS: &[u32] = &[4, 6, 8, 12, 16];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: String,
    size: u64,
    mtime: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: u64,
    misses: u64,
}

static CACHE: Lazy<Mutex<(HashMap<CacheKey, DetectionResult>, CacheStats)>> =
    Lazy::new(|| Mutex::new((HashMap::new(), CacheStats::default())));

/// Hit/miss counters for the process-wide detection cache, exposed for tests.
pub fn cache_stats() -> (u64, u64) {
    let guard = CACHE.lock().unwrap();
    (guard.1.hits, guard.1.misses)
}

pub fn clear_cache() {
    let mut guard = CACHE.lock().unwrap();
    guard.0.clear();
    guard.1 = CacheStats::default();
}

fn cache_key(path: &Path) -> Option<CacheKey> {
    let metadata = std::fs::metadata(path).ok()?;
    Some(CacheKey {
        path: path.to_string_lossy().into_owned(),
        size: metadata.len(),
        mtime: metadata.modified().ok(),
    })
}

/// Detect the grid layout of a spritesheet image. Cached by (path, size,
/// mtime); an OS error stat'ing the file just skips caching rather than
/// failing detection outright.
pub fn detect_grid(path: &Path) -> DetectionResult {
    let key = cache_key(path);

    if let Some(key) = &key {
        let mut guard = CACHE.lock().unwrap();
        if let Some(cached) = guard.0.get(key) {
            guard.1.hits += 1;
            return cached.clone();
        }
        guard.1.misses += 1;
    }

    let result = detect_grid_uncached(path);

    if let Some(key) = key {
        let mut guard = CACHE.lock().unwrap();
        if guard.0.len() >= CACHE_CAPACITY {
            guard.0.clear();
        }
        guard.0.insert(key, result.clone());
    }

    result
}

fn detect_grid_uncached(path: &Path) -> DetectionResult {
    let img = match image::open(path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            return DetectionResult {
                detected: false,
                grid: None,
                confidence: 0.0,
                image_width: 0,
                image_height: 0,
                frame_width: 0,
                frame_height: 0,
                method: String::new(),
                notes: vec![format!("failed to open image: {e}")],
            };
        }
    };

    let (width, height) = img.dimensions();
    let bg = detect_background_color(&img, width, height);

    let h_gaps = find_gaps(&img, width, height, bg, true);
    let v_gaps = find_gaps(&img, width, height, bg, false);

    let h_groups = group_gaps(&h_gaps);
    let v_groups = group_gaps(&v_gaps);

    let mut rows = h_groups.len() as u32 + 1;
    let mut cols = v_groups.len() as u32 + 1;
    let mut frame_height = if rows > 0 { height / rows.max(1) } else { height };
    let mut frame_width = if cols > 0 { width / cols.max(1) } else { width };
    let mut offset_x = 0;
    let mut offset_y = 0;
    let mut pad_x = 0;
    let mut pad_y = 0;
    let mut method = "gap_analysis";

    if rows > 1 && cols > 1 {
        if let Some(refined) = refine_offsets_and_padding(&img, width, height, bg, rows, cols) {
            offset_x = refined.offset_x;
            offset_y = refined.offset_y;
            pad_x = refined.pad_x;
            pad_y = refined.pad_y;
            frame_width = refined.frame_width;
            frame_height = refined.frame_height;
        }
    }

    if rows <= 1 || cols <= 1 {
        let (fallback_rows, fallback_cols) = try_common_grids(width, height);
        rows = fallback_rows;
        cols = fallback_cols;
        frame_height = height / rows.max(1);
        frame_width = width / cols.max(1);
        offset_x = 0;
        offset_y = 0;
        pad_x = 0;
        pad_y = 0;
        method = "common_grid";
    }

    let mut confidence: f64 = 0.5;
    if !h_gaps.is_empty() {
        confidence += 0.2;
    }
    if !v_gaps.is_empty() {
        confidence += 0.2;
    }
    if cols > 0 && width % cols == 0 {
        confidence += 0.05;
    }
    if rows > 0 && height % rows == 0 {
        confidence += 0.05;
    }
    confidence = confidence.min(1.0);

    DetectionResult {
        detected: true,
        grid: Some(Grid {
            rows,
            cols,
            offset_x,
            offset_y,
            pad_x,
            pad_y,
        }),
        confidence,
        image_width: width,
        image_height: height,
        frame_width,
        frame_height,
        method: method.to_string(),
        notes: Vec::new(),
    }
}

fn detect_background_color(img: &image::RgbaImage, width: u32, height: u32) -> Rgba<u8> {
    let corners = [
        img.get_pixel(0, 0),
        img.get_pixel(width - 1, 0),
        img.get_pixel(0, height - 1),
        img.get_pixel(width - 1, height - 1),
    ];

    let mut counts: HashMap<(u8, u8, u8), u32> = HashMap::new();
    for c in &corners {
        *counts.entry((c[0], c[1], c[2])).or_insert(0) += 1;
    }

    let most_common = counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(rgb, _)| rgb)
        .unwrap_or((255, 255, 255));

    let alpha = corners
        .iter()
        .find(|c| (c[0], c[1], c[2]) == most_common)
        .map(|c| c[3])
        .unwrap_or(255);

    Rgba([most_common.0, most_common.1, most_common.2, alpha])
}

fn is_background(pixel: Rgba<u8>, bg: Rgba<u8>) -> bool {
    if pixel[3] < TRANSPARENT_ALPHA_THRESHOLD {
        return true;
    }
    (0..3).all(|i| (pixel[i] as i16 - bg[i] as i16).unsigned_abs() as u8 <= BG_TOLERANCE)
}

fn find_gaps(img: &image::RgbaImage, width: u32, height: u32, bg: Rgba<u8>, horizontal: bool) -> Vec<u32> {
    let mut gaps = Vec::new();
    if horizontal {
        let stride = (width / SAMPLE_TARGET).max(1);
        let samples = (0..width).step_by(stride as usize).count();
        let allowed_non_bg = (samples as f64 * (1.0 - GAP_THRESHOLD)).floor() as usize;
        for y in 0..height {
            let non_bg = (0..width)
                .step_by(stride as usize)
                .filter(|&x| !is_background(*img.get_pixel(x, y), bg))
                .count();
            if non_bg <= allowed_non_bg {
                gaps.push(y);
            }
        }
    } else {
        let stride = (height / SAMPLE_TARGET).max(1);
        let samples = (0..height).step_by(stride as usize).count();
        let allowed_non_bg = (samples as f64 * (1.0 - GAP_THRESHOLD)).floor() as usize;
        for x in 0..width {
            let non_bg = (0..height)
                .step_by(stride as usize)
                .filter(|&y| !is_background(*img.get_pixel(x, y), bg))
                .count();
            if non_bg <= allowed_non_bg {
                gaps.push(x);
            }
        }
    }
    gaps
}

fn group_gaps(gaps: &[u32]) -> Vec<Vec<u32>> {
    let mut groups: Vec<Vec<u32>> = Vec::new();
    for &gap in gaps {
        match groups.last_mut() {
            Some(group) if gap - *group.last().unwrap() <= GAP_GROUP_DISTANCE => group.push(gap),
            _ => groups.push(vec![gap]),
        }
    }
    groups
}

struct Refinement {
    offset_x: u32,
    offset_y: u32,
    pad_x: u32,
    pad_y: u32,
    frame_width: u32,
    frame_height: u32,
}

/// Trim leading/trailing all-background margins, recompute gap groups inside
/// the trimmed rectangle, and accept the refinement only if the resulting
/// segment counts are internally consistent with `rows`/`cols`.
fn refine_offsets_and_padding(
    img: &image::RgbaImage,
    width: u32,
    height: u32,
    bg: Rgba<u8>,
    rows: u32,
    cols: u32,
) -> Option<Refinement> {
    let top = leading_background_rows(img, width, height, bg, false);
    let bottom = leading_background_rows(img, width, height, bg, true);
    let left = leading_background_cols(img, width, height, bg, false);
    let right = leading_background_cols(img, width, height, bg, true);

    if top + bottom >= height || left + right >= width {
        return None;
    }

    let trimmed_width = width - left - right;
    let trimmed_height = height - top - bottom;

    let h_groups = group_gaps(&find_gaps_in_rect(img, left, top, trimmed_width, trimmed_height, bg, true));
    let v_groups = group_gaps(&find_gaps_in_rect(img, left, top, trimmed_width, trimmed_height, bg, false));

    let refined_rows = h_groups.len() as u32 + 1;
    let refined_cols = v_groups.len() as u32 + 1;
    if refined_rows != rows || refined_cols != cols {
        return None;
    }

    let pad_y = median_group_width(&h_groups).unwrap_or(0);
    let pad_x = median_group_width(&v_groups).unwrap_or(0);

    let frame_height = (trimmed_height.saturating_sub(pad_y * (rows.saturating_sub(1)))) / rows.max(1);
    let frame_width = (trimmed_width.saturating_sub(pad_x * (cols.saturating_sub(1)))) / cols.max(1);

    if frame_width == 0 || frame_height == 0 {
        return None;
    }

    Some(Refinement {
        offset_x: left,
        offset_y: top,
        pad_x,
        pad_y,
        frame_width,
        frame_height,
    })
}

fn median_group_width(groups: &[Vec<u32>]) -> Option<u32> {
    if groups.is_empty() {
        return None;
    }
    let mut widths: Vec<u32> = groups
        .iter()
        .map(|g| g.last().unwrap() - g.first().unwrap() + 1)
        .collect();
    widths.sort_unstable();
    Some(widths[widths.len() / 2])
}

fn leading_background_rows(img: &image::RgbaImage, width: u32, height: u32, bg: Rgba<u8>, from_bottom: bool) -> u32 {
    let mut count = 0;
    for i in 0..height {
        let y = if from_bottom { height - 1 - i } else { i };
        let all_bg = (0..width).all(|x| is_background(*img.get_pixel(x, y), bg));
        if !all_bg {
            break;
        }
        count += 1;
    }
    count
}

fn leading_background_cols(img: &image::RgbaImage, width: u32, height: u32, bg: Rgba<u8>, from_right: bool) -> u32 {
    let mut count = 0;
    for i in 0..width {
        let x = if from_right { width - 1 - i } else { i };
        let all_bg = (0..height).all(|y| is_background(*img.get_pixel(x, y), bg));
        if !all_bg {
            break;
        }
        count += 1;
    }
    count
}

fn find_gaps_in_rect(
    img: &image::RgbaImage,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    bg: Rgba<u8>,
    horizontal: bool,
) -> Vec<u32> {
    if horizontal {
        (y0..y0 + height)
            .filter(|&y| (x0..x0 + width).all(|x| is_background(*img.get_pixel(x, y), bg)))
            .collect()
    } else {
        (x0..x0 + width)
            .filter(|&x| (y0..y0 + height).all(|y| is_background(*img.get_pixel(x, y), bg)))
            .collect()
    }
}

fn try_common_grids(width: u32, height: u32) -> (u32, u32) {
    let mut best_score = 0.0f64;
    let mut best = (1, 1);

    for &(rows, cols) in COMMON_GRIDS {
        if rows == 0 || cols == 0 || width % cols != 0 || height % rows != 0 {
            continue;
        }
        let cell_w = width / cols;
        let cell_h = height / rows;
        if cell_h == 0 {
            continue;
        }
        let aspect = cell_w as f64 / cell_h as f64;
        let mut score = 1.0 / ((aspect - 1.0).abs() + 0.1);

        if COMMON_FRAME_COUNTS.contains(&(rows * cols)) {
            score *= 1.5;
        }

        if score > best_score {
            best_score = score;
            best = (rows, cols);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba, RgbaImage};

    fn make_grid_sheet(rows: u32, cols: u32, cell: u32, gap: u32) -> RgbaImage {
        let width = cols * cell + (cols - 1) * gap;
        let height = rows * cell + (rows - 1) * gap;
        let mut img: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        for r in 0..rows {
            for c in 0..cols {
                let x0 = c * (cell + gap);
                let y0 = r * (cell + gap);
                for y in y0..y0 + cell {
                    for x in x0..x0 + cell {
                        img.put_pixel(x, y, Rgba([10, 20, 30, 255]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn detects_simple_grid_with_gaps() {
        let img = make_grid_sheet(2, 3, 16, 2);
        let bg = detect_background_color(&img, img.width(), img.height());
        assert_eq!((bg[0], bg[1], bg[2]), (255, 255, 255));

        let h_gaps = find_gaps(&img, img.width(), img.height(), bg, true);
        let v_gaps = find_gaps(&img, img.width(), img.height(), bg, false);
        assert!(!h_gaps.is_empty());
        assert!(!v_gaps.is_empty());

        let h_groups = group_gaps(&h_gaps);
        let v_groups = group_gaps(&v_gaps);
        assert_eq!(h_groups.len() as u32 + 1, 2);
        assert_eq!(v_groups.len() as u32 + 1, 3);
    }

    #[test]
    fn common_grid_fallback_prefers_square_cells() {
        let (rows, cols) = try_common_grids(256, 256);
        assert_eq!(rows * cols, 16.max(rows * cols));
        assert!(rows >= 1 && cols >= 1);
    }

    #[test]
    fn cache_roundtrips_via_tempfile() {
        clear_cache();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.png");
        let img = make_grid_sheet(2, 2, 16, 2);
        img.save(&path).unwrap();

        let first = detect_grid(&path);
        let (hits_after_first, misses_after_first) = cache_stats();
        assert_eq!(hits_after_first, 0);
        assert_eq!(misses_after_first, 1);

        let second = detect_grid(&path);
        let (hits_after_second, _) = cache_stats();
        assert_eq!(hits_after_second, 1);
        assert_eq!(first.grid, second.grid);
    }

    #[test]
    fn missing_file_reports_not_detected() {
        let result = detect_grid(Path::new("/nonexistent/does-not-exist.png"));
        assert!(!result.detected);
        assert!(!result.notes.is_empty());
    }
}
