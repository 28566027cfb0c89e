//! Watermark configuration and placement math.
//!
//! Text width is estimated as `font_size * chars * 0.5`, not measured from
//! font metrics. Anchored text is therefore placed reasonably but not
//! pixel-exactly for proportional fonts or non-Latin scripts.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::job::extension_of;

/// Distance kept from page edges by every non-center anchor
pub const EDGE_MARGIN: f32 = 50.0;

/// Average glyph advance as a fraction of the font size
pub const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkKind {
    Text,
    Image,
}

/// Position on the 3×3 anchor grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(from = "String", into = "String")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    #[default]
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Anchor {
    /// Parse a position name; unrecognized values mean center.
    pub fn parse_lenient(value: &str) -> Self {
        value.trim().to_ascii_lowercase().parse().unwrap_or_else(|_| {
            debug!(position = %value, "Unrecognized watermark position, using center");
            Anchor::Center
        })
    }
}

impl From<String> for Anchor {
    fn from(value: String) -> Self {
        Anchor::parse_lenient(&value)
    }
}

impl From<Anchor> for String {
    fn from(anchor: Anchor) -> Self {
        anchor.to_string()
    }
}

/// Which pages receive the watermark
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "PageSelectorRepr", into = "PageSelectorRepr")]
pub enum PageSelector {
    #[default]
    All,
    /// 1-based page numbers as supplied by the caller
    Pages(Vec<i64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PageSelectorRepr {
    Keyword(String),
    Pages(Vec<i64>),
}

impl TryFrom<PageSelectorRepr> for PageSelector {
    type Error = String;

    fn try_from(repr: PageSelectorRepr) -> Result<Self, Self::Error> {
        match repr {
            PageSelectorRepr::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(PageSelector::All),
            PageSelectorRepr::Keyword(k) => Err(format!(
                "page selector must be \"all\" or a list of page numbers, got \"{}\"",
                k
            )),
            PageSelectorRepr::Pages(pages) => Ok(PageSelector::Pages(pages)),
        }
    }
}

impl From<PageSelector> for PageSelectorRepr {
    fn from(selector: PageSelector) -> Self {
        match selector {
            PageSelector::All => PageSelectorRepr::Keyword("all".to_string()),
            PageSelector::Pages(pages) => PageSelectorRepr::Pages(pages),
        }
    }
}

impl PageSelector {
    /// 0-based indices of selected pages. Out-of-range entries are dropped,
    /// duplicates are applied once.
    pub fn resolve(&self, page_count: usize) -> Vec<usize> {
        match self {
            PageSelector::All => (0..page_count).collect(),
            PageSelector::Pages(pages) => {
                let mut seen = HashSet::new();
                pages
                    .iter()
                    .filter(|&&p| p >= 1 && (p as u64) <= page_count as u64)
                    .map(|&p| (p - 1) as usize)
                    .filter(|idx| seen.insert(*idx))
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Default for RgbColor {
    fn default() -> Self {
        Self {
            r: 0.5,
            g: 0.5,
            b: 0.5,
        }
    }
}

/// Watermark request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkConfig {
    #[serde(alias = "type")]
    pub kind: WatermarkKind,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub image_path: Option<PathBuf>,

    #[serde(default = "default_opacity")]
    pub opacity: f32,

    #[serde(default, alias = "rotation")]
    pub rotation_degrees: f32,

    #[serde(default = "default_font_size")]
    pub font_size: f32,

    #[serde(default)]
    pub position: Anchor,

    #[serde(default, alias = "pageNumbers")]
    pub pages: PageSelector,

    #[serde(default = "default_scale")]
    pub scale: f32,

    #[serde(default)]
    pub color: RgbColor,
}

fn default_opacity() -> f32 {
    0.5
}

fn default_font_size() -> f32 {
    48.0
}

fn default_scale() -> f32 {
    1.0
}

impl WatermarkConfig {
    /// Text watermark with default styling
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: WatermarkKind::Text,
            text: Some(text.into()),
            image_path: None,
            opacity: default_opacity(),
            rotation_degrees: 0.0,
            font_size: default_font_size(),
            position: Anchor::Center,
            pages: PageSelector::All,
            scale: default_scale(),
            color: RgbColor::default(),
        }
    }

    /// Image watermark with default styling
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatermarkKind::Image,
            text: None,
            image_path: Some(path.into()),
            ..Self::text("")
        }
    }

    /// Text must be non-empty for text watermarks; image watermarks need an
    /// existing PNG or JPEG.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |message: String| PipelineError::Watermark { message };

        match self.kind {
            WatermarkKind::Text => match self.text.as_deref() {
                Some(text) if !text.trim().is_empty() => Ok(()),
                _ => Err(invalid("text watermark requires non-empty text".to_string())),
            },
            WatermarkKind::Image => {
                let path = self
                    .image_path
                    .as_ref()
                    .ok_or_else(|| invalid("image watermark requires an image".to_string()))?;
                if !path.is_file() {
                    return Err(invalid(format!(
                        "watermark image not found: {}",
                        path.display()
                    )));
                }
                match extension_of(path).as_deref() {
                    Some("png" | "jpg" | "jpeg") => Ok(()),
                    _ => Err(invalid(format!(
                        "watermark image must be PNG or JPEG: {}",
                        path.display()
                    ))),
                }
            }
        }
    }

    /// Font size after scaling
    pub fn effective_font_size(&self) -> f32 {
        self.font_size * self.scale
    }
}

/// Rough rendered width of `text` at `font_size`
pub fn estimate_text_width(text: &str, font_size: f32) -> f32 {
    font_size * text.chars().count() as f32 * AVERAGE_GLYPH_WIDTH
}

/// Lower-left draw origin for content of the given size on a page.
///
/// Text is centered by its box like images are, with the font size as its
/// height, so `Center` text sits at `(H - font_size) / 2` rather than `H / 2`.
pub fn anchor_origin(
    anchor: Anchor,
    page_width: f32,
    page_height: f32,
    content_width: f32,
    content_height: f32,
) -> (f32, f32) {
    let left = EDGE_MARGIN;
    let h_center = (page_width - content_width) / 2.0;
    let right = page_width - content_width - EDGE_MARGIN;
    let top = page_height - content_height - EDGE_MARGIN;
    let v_center = (page_height - content_height) / 2.0;
    let bottom = EDGE_MARGIN;

    match anchor {
        Anchor::TopLeft => (left, top),
        Anchor::TopCenter => (h_center, top),
        Anchor::TopRight => (right, top),
        Anchor::CenterLeft => (left, v_center),
        Anchor::Center => (h_center, v_center),
        Anchor::CenterRight => (right, v_center),
        Anchor::BottomLeft => (left, bottom),
        Anchor::BottomCenter => (h_center, bottom),
        Anchor::BottomRight => (right, bottom),
    }
}
