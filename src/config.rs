use std::borrow::Cow;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::entries::{default_level_configs, LevelConfig};
use crate::error::{Result, TocError};
use crate::pdf::page_labels::PageLabelSettings;

/// Page geometry of the generated ToC, as fractions of the reference page size
/// unless noted otherwise.
pub mod layout {
    pub const MARGIN_X_RATIO: f32 = 0.12;
    pub const MARGIN_BOTTOM_RATIO: f32 = 0.08;

    pub const HEADING_FONT_SIZE_RATIO: f32 = 0.04;
    pub const HEADING_MARGIN_BOTTOM_RATIO: f32 = 0.05;
    pub const DEFAULT_TITLE_Y_RATIO: f32 = 0.1;

    pub const INDENT_PER_LEVEL_RATIO: f32 = 0.04;
    /// Space kept free right of a title line for the leader and page number.
    pub const RIGHT_PAD_RATIO: f32 = 0.3;
    /// Distance of the page number's right edge from the page edge.
    pub const PAGE_NUM_PAD_RATIO: f32 = 0.12;
    /// Extra gap above first-level rows.
    pub const FIRST_LEVEL_GAP_RATIO: f32 = 0.008;

    /// Points between the end of a title and the first leader dot.
    pub const DOT_GAP_TITLE: f32 = 4.0;
    /// Points between the last leader dot and the page number.
    pub const DOT_GAP_NUMBER: f32 = 4.0;
    /// Dots dropped from the computed run so it never touches the number.
    pub const DOT_RESERVE_COUNT: usize = 2;

    /// Points below the last baseline covered by a row's link rectangle.
    pub const ANNOT_Y_PADDING: f32 = 3.0;

    pub const A4_WIDTH: f32 = 595.28;
    pub const BASE_FONT_SIZE_FIRST: f32 = 11.0;
    pub const BASE_FONT_SIZE_OTHER: f32 = 10.0;
}

/// Visual style of one tier of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleConfig {
    pub font_size: f32,
    #[serde(deserialize_with = "deserialize_dot_leader")]
    pub dot_leader: bool,
    /// `#RRGGBB`
    pub color: String,
    pub line_spacing: f32,
}

impl StyleConfig {
    fn first_level() -> Self {
        StyleConfig {
            font_size: layout::BASE_FONT_SIZE_FIRST,
            dot_leader: true,
            color: "#000000".to_string(),
            line_spacing: 1.7,
        }
    }

    fn other_levels() -> Self {
        StyleConfig {
            font_size: layout::BASE_FONT_SIZE_OTHER,
            dot_leader: false,
            color: "#333333".to_string(),
            line_spacing: 1.6,
        }
    }

    pub fn line_height(&self) -> f32 {
        self.font_size * self.line_spacing
    }

    pub fn rgb(&self) -> Result<Rgb> {
        Rgb::parse_hex(&self.color)
    }
}

/// Color components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb(pub f32, pub f32, pub f32);

impl Rgb {
    pub fn parse_hex(color: &str) -> Result<Self> {
        let hex = color
            .strip_prefix('#')
            .filter(|hex| hex.len() == 6 && hex.is_ascii())
            .ok_or_else(|| TocError::input(format!("Invalid color {:?}, expected #RRGGBB", color)))?;
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map(|v| f32::from(v) / 255.0)
                .map_err(|_| TocError::input(format!("Invalid color {:?}", color)))
        };
        Ok(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_level_configs")]
    pub configs: Vec<LevelConfig>,
}

impl Default for PrefixSettings {
    fn default() -> Self {
        PrefixSettings {
            enabled: false,
            configs: default_level_configs(),
        }
    }
}

/// Font used for ToC text.
///
/// Without font files the built-in Helvetica pair is used. `regular` and `bold` may
/// point at the same TrueType file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontConfig {
    #[serde(default = "default_font_family")]
    pub family: String,
    #[serde(default)]
    pub regular: Option<PathBuf>,
    #[serde(default)]
    pub bold: Option<PathBuf>,
    /// Fail instead of falling back to Helvetica when the files cannot be loaded.
    #[serde(default)]
    pub required: bool,
}

fn default_font_family() -> String {
    "helvetica".to_string()
}

impl Default for FontConfig {
    fn default() -> Self {
        FontConfig {
            family: default_font_family(),
            regular: None,
            bold: None,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TocConfig {
    /// Heading position as a fraction of page height from the top.
    pub title_y_start: Option<f32>,
    /// 1-based page in the original document before which ToC pages are inserted.
    pub insert_at_page: u32,
    /// Added to every entry's page to reach the physical page in the original document.
    pub page_offset: i64,
    pub first_level: StyleConfig,
    pub other_levels: StyleConfig,
    pub prefix_settings: PrefixSettings,
    pub font: FontConfig,
    /// Heading text; chosen from the entry titles when unset.
    pub heading: Option<String>,
    /// When false only the outline is written.
    pub add_physical_toc_page: bool,
    pub page_labels: PageLabelSettings,
    /// Replace both font sizes with ones scaled to the reference page width.
    pub auto_font_size: bool,
}

impl Default for TocConfig {
    fn default() -> Self {
        TocConfig {
            title_y_start: None,
            insert_at_page: 2,
            page_offset: 0,
            first_level: StyleConfig::first_level(),
            other_levels: StyleConfig::other_levels(),
            prefix_settings: PrefixSettings::default(),
            font: FontConfig::default(),
            heading: None,
            add_physical_toc_page: true,
            page_labels: PageLabelSettings::default(),
            auto_font_size: false,
        }
    }
}

impl TocConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: TocConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, style) in [
            ("firstLevel", &self.first_level),
            ("otherLevels", &self.other_levels),
        ] {
            if !(style.font_size.is_finite() && style.font_size > 0.0) {
                return Err(TocError::input(format!(
                    "{}.fontSize must be positive, got {}",
                    name, style.font_size
                )));
            }
            if !(style.line_spacing.is_finite() && style.line_spacing > 0.0) {
                return Err(TocError::input(format!(
                    "{}.lineSpacing must be positive, got {}",
                    name, style.line_spacing
                )));
            }
            style.rgb()?;
        }
        if let Some(y) = self.title_y_start {
            if !(0.0..=1.0).contains(&y) {
                return Err(TocError::input(format!(
                    "titleYStart must be between 0 and 1, got {}",
                    y
                )));
            }
        }
        Ok(())
    }

    /// The config to lay out pages `page_width` points wide.
    pub fn for_page_width(&self, page_width: f32) -> Cow<'_, TocConfig> {
        if !self.auto_font_size {
            return Cow::Borrowed(self);
        }
        let (first, other) = auto_layout(page_width);
        let mut config = self.clone();
        config.first_level.font_size = first;
        config.other_levels.font_size = other;
        Cow::Owned(config)
    }

    /// Style for a row at `depth`; everything below the top tier shares one style.
    pub fn style_for_depth(&self, depth: usize) -> &StyleConfig {
        if depth == 0 {
            &self.first_level
        } else {
            &self.other_levels
        }
    }
}

/// Font sizes scaled from A4 to the given page width.
pub fn auto_layout(page_width: f32) -> (f32, f32) {
    let scale = (page_width / layout::A4_WIDTH).clamp(0.5, 3.0);
    (
        (layout::BASE_FONT_SIZE_FIRST * scale).floor(),
        (layout::BASE_FONT_SIZE_OTHER * scale).floor(),
    )
}

/// Read an integer from a number, a float (truncated) or the first digit run of a string.
/// A `-` directly before that run makes it negative.
pub fn lenient_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let start = s.find(|c: char| c.is_ascii_digit())?;
            let digits: String = s[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            let n: i64 = digits.parse().ok()?;
            Some(if s[..start].ends_with('-') { -n } else { n })
        }
        _ => None,
    }
}

pub fn deserialize_lenient_int<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(lenient_int(&value))
}

fn deserialize_dot_leader<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(on) => on,
        Value::String(s) => !s.is_empty(),
        _ => false,
    })
}
