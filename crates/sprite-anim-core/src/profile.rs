//! Conversion profiles: grid, timing, anchor, background and export settings.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Grid layout of a spritesheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub rows: u32,
    pub cols: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            rows: 1,
            cols: 1,
            offset_x: 0,
            offset_y: 0,
            pad_x: 0,
            pad_y: 0,
        }
    }
}

impl Grid {
    /// True if this is the unset 1x1-at-origin default the runner uses as a
    /// sentinel for "auto-detect me".
    pub fn is_unset_default(&self) -> bool {
        *self == Grid::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    Loop,
    Pingpong,
}

impl LoopMode {
    fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.to_lowercase().as_str() {
            "loop" => Ok(LoopMode::Loop),
            "pingpong" => Ok(LoopMode::Pingpong),
            other => Err(CoreError::Validation(format!(
                "invalid loop_mode '{other}': expected 'loop' or 'pingpong'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub fps: u32,
    pub loop_mode: LoopMode,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fps: 12,
            loop_mode: LoopMode::Loop,
        }
    }
}

impl Timing {
    pub fn with_fps(mut self, fps: u32) -> Result<Self, CoreError> {
        if !(1..=120).contains(&fps) {
            return Err(CoreError::Validation(format!(
                "fps {fps} out of range 1-120"
            )));
        }
        self.fps = fps;
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorMode {
    Foot,
    Center,
    None,
}

impl AnchorMode {
    fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.to_lowercase().as_str() {
            "foot" => Ok(AnchorMode::Foot),
            "center" => Ok(AnchorMode::Center),
            "none" => Ok(AnchorMode::None),
            other => Err(CoreError::Validation(format!(
                "invalid anchor mode '{other}': expected 'foot', 'center' or 'none'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub mode: AnchorMode,
    pub alpha_threshold: u8,
    pub x_band: (f64, f64),
}

impl Default for Anchor {
    fn default() -> Self {
        Self {
            mode: AnchorMode::Foot,
            alpha_threshold: 10,
            x_band: (0.25, 0.75),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    Transparent,
    Keep,
    Color,
}

impl BackgroundMode {
    fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.to_lowercase().as_str() {
            "transparent" => Ok(BackgroundMode::Transparent),
            "keep" => Ok(BackgroundMode::Keep),
            "color" => Ok(BackgroundMode::Color),
            other => Err(CoreError::Validation(format!(
                "invalid background mode '{other}': expected 'transparent', 'keep' or 'color'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Background {
    pub mode: BackgroundMode,
    pub color: (u8, u8, u8),
    pub tolerance: u8,
}

impl Default for Background {
    fn default() -> Self {
        Self {
            mode: BackgroundMode::Transparent,
            color: (255, 255, 255),
            tolerance: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub aseprite: bool,
    pub sheet_png_json: bool,
    pub gif_preview: bool,
    pub sheet_padding_border: u32,
    pub sheet_padding_inner: u32,
    pub trim: bool,
    pub hq_gif: bool,
}

impl Default for Export {
    fn default() -> Self {
        Self {
            aseprite: true,
            sheet_png_json: true,
            gif_preview: true,
            sheet_padding_border: 2,
            sheet_padding_inner: 2,
            trim: false,
            hq_gif: false,
        }
    }
}

/// Named, complete conversion profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionProfile {
    pub name: String,
    pub grid: Grid,
    pub timing: Timing,
    pub anchor: Anchor,
    pub background: Background,
    pub export: Export,
}

impl ConversionProfile {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            grid: Grid::default(),
            timing: Timing::default(),
            anchor: Anchor::default(),
            background: Background::default(),
            export: Export::default(),
        }
    }

    pub fn game_default() -> Self {
        Self::named("game_default")
    }

    pub fn unity_default() -> Self {
        let mut profile = Self::named("unity_default");
        profile.export.trim = true;
        profile
    }

    pub fn godot_default() -> Self {
        Self::named("godot_default")
    }

    pub fn preview_only() -> Self {
        let mut profile = Self::named("preview_only");
        profile.anchor.mode = AnchorMode::None;
        profile.export.aseprite = false;
        profile.export.sheet_png_json = false;
        profile.export.gif_preview = true;
        profile
    }

    /// Look up a built-in profile by name (case-insensitive), falling back to
    /// `game_default` for unknown names. Always returns an owned, independent
    /// copy so mutation by override merging never leaks between callers.
    pub fn get(name: Option<&str>) -> Self {
        match name.map(|n| n.to_lowercase()).as_deref() {
            Some("unity_default") => Self::unity_default(),
            Some("godot_default") => Self::godot_default(),
            Some("preview_only") => Self::preview_only(),
            _ => Self::game_default(),
        }
    }
}

/// Same shape as `ConversionProfile`'s five sub-records but every field
/// optional, loaded from a sidecar `<stem>.job.json`. `serde` field names
/// intentionally mirror the profile's for a uniform on-disk schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOverride {
    #[serde(default)]
    pub grid: Option<GridOverride>,
    #[serde(default)]
    pub timing: Option<TimingOverride>,
    #[serde(default)]
    pub anchor: Option<AnchorOverride>,
    #[serde(default)]
    pub background: Option<BackgroundOverride>,
    #[serde(default)]
    pub export: Option<ExportOverride>,
    #[serde(default)]
    pub auto_detect_grid: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridOverride {
    pub rows: Option<u32>,
    pub cols: Option<u32>,
    pub offset_x: Option<u32>,
    pub offset_y: Option<u32>,
    pub pad_x: Option<u32>,
    pub pad_y: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingOverride {
    pub fps: Option<u32>,
    pub loop_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnchorOverride {
    pub mode: Option<String>,
    pub alpha_threshold: Option<u8>,
    pub x_band: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackgroundOverride {
    pub mode: Option<String>,
    pub color: Option<(u8, u8, u8)>,
    pub tolerance: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportOverride {
    pub aseprite: Option<bool>,
    pub sheet_png_json: Option<bool>,
    pub gif_preview: Option<bool>,
    pub sheet_padding_border: Option<u32>,
    pub sheet_padding_inner: Option<u32>,
    pub trim: Option<bool>,
    pub hq_gif: Option<bool>,
}

/// Apply a sidecar override onto a profile copy, field by field. Only
/// fields present in the override are touched.
pub fn apply_sidecar_override(
    profile: &mut ConversionProfile,
    over: &JobOverride,
) -> Result<(), CoreError> {
    if let Some(g) = &over.grid {
        if let Some(v) = g.rows {
            profile.grid.rows = v;
        }
        if let Some(v) = g.cols {
            profile.grid.cols = v;
        }
        if let Some(v) = g.offset_x {
            profile.grid.offset_x = v;
        }
        if let Some(v) = g.offset_y {
            profile.grid.offset_y = v;
        }
        if let Some(v) = g.pad_x {
            profile.grid.pad_x = v;
        }
        if let Some(v) = g.pad_y {
            profile.grid.pad_y = v;
        }
    }
    if let Some(t) = &over.timing {
        if let Some(v) = t.fps {
            profile.timing = profile.timing.clone().with_fps(v)?;
        }
        if let Some(v) = &t.loop_mode {
            profile.timing.loop_mode = LoopMode::parse(v)?;
        }
    }
    if let Some(a) = &over.anchor {
        if let Some(v) = &a.mode {
            profile.anchor.mode = AnchorMode::parse(v)?;
        }
        if let Some(v) = a.alpha_threshold {
            profile.anchor.alpha_threshold = v;
        }
        if let Some(v) = a.x_band {
            profile.anchor.x_band = v;
        }
    }
    if let Some(b) = &over.background {
        if let Some(v) = &b.mode {
            profile.background.mode = BackgroundMode::parse(v)?;
        }
        if let Some(v) = b.color {
            profile.background.color = v;
        }
        if let Some(v) = b.tolerance {
            profile.background.tolerance = v;
        }
    }
    if let Some(e) = &over.export {
        if let Some(v) = e.aseprite {
            profile.export.aseprite = v;
        }
        if let Some(v) = e.sheet_png_json {
            profile.export.sheet_png_json = v;
        }
        if let Some(v) = e.gif_preview {
            profile.export.gif_preview = v;
        }
        if let Some(v) = e.sheet_padding_border {
            profile.export.sheet_padding_border = v;
        }
        if let Some(v) = e.sheet_padding_inner {
            profile.export.sheet_padding_inner = v;
        }
        if let Some(v) = e.trim {
            profile.export.trim = v;
        }
        if let Some(v) = e.hq_gif {
            profile.export.hq_gif = v;
        }
    }
    Ok(())
}

/// Apply tool-call-supplied overrides; these always win over both the
/// profile and any sidecar override (see precedence in SPEC_FULL.md §3).
pub fn apply_tool_overrides(
    profile: &mut ConversionProfile,
    grid_rows: Option<u32>,
    grid_cols: Option<u32>,
    fps: Option<u32>,
) -> Result<(), CoreError> {
    if let Some(v) = grid_rows {
        profile.grid.rows = v;
    }
    if let Some(v) = grid_cols {
        profile.grid.cols = v;
    }
    if let Some(v) = fps {
        profile.timing = profile.timing.clone().with_fps(v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_name_falls_back_to_game_default() {
        let profile = ConversionProfile::get(Some("does_not_exist"));
        assert_eq!(profile.name, "game_default");
    }

    #[test]
    fn profile_lookup_is_case_insensitive() {
        let profile = ConversionProfile::get(Some("UNITY_DEFAULT"));
        assert_eq!(profile.name, "unity_default");
        assert!(profile.export.trim);
    }

    #[test]
    fn loop_mode_normalises_casing() {
        assert_eq!(LoopMode::parse("LOOP").unwrap(), LoopMode::Loop);
        assert_eq!(LoopMode::parse("PingPong").unwrap(), LoopMode::Pingpong);
        assert!(LoopMode::parse("bounce").is_err());
    }

    #[test]
    fn anchor_mode_normalises_casing() {
        assert_eq!(AnchorMode::parse("FOOT").unwrap(), AnchorMode::Foot);
        assert!(AnchorMode::parse("head").is_err());
    }

    #[test]
    fn precedence_tool_overrides_beat_sidecar() {
        let mut profile = ConversionProfile::game_default();
        let over = JobOverride {
            grid: Some(GridOverride {
                rows: Some(3),
                cols: Some(4),
                ..Default::default()
            }),
            timing: Some(TimingOverride {
                fps: Some(8),
                loop_mode: Some("loop".into()),
            }),
            auto_detect_grid: Some(false),
            ..Default::default()
        };
        apply_sidecar_override(&mut profile, &over).unwrap();
        apply_tool_overrides(&mut profile, Some(2), None, Some(12)).unwrap();

        assert_eq!(profile.grid.rows, 2);
        assert_eq!(profile.grid.cols, 4);
        assert_eq!(profile.timing.fps, 12);
    }

    #[test]
    fn deep_copy_does_not_alias_shared_table() {
        let mut a = ConversionProfile::get(Some("game_default"));
        let b = ConversionProfile::get(Some("game_default"));
        a.grid.rows = 9;
        assert_eq!(b.grid.rows, 1);
    }
}
