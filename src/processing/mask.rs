//! Mask shapes and mask compilation
//!
//! A mask is a solid-color still image whose alpha channel is the union of
//! one or more rectangles/ellipses. It is overlaid on the video to hide
//! burned-in patient and device information.

use crate::error::{Error, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Outline of a mask shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rect,
    /// Ellipse inscribed in the bounding box
    Ellipse,
}

/// One mask shape in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskShape {
    #[serde(rename = "shape")]
    pub kind: ShapeKind,
    pub x0: f64,
    pub y0: f64,
    pub w: f64,
    pub h: f64,
    /// Opaque inside the shape (true) or outside of it (false)
    #[serde(default)]
    pub fill_inside: bool,
}

impl MaskShape {
    pub fn rect(x0: f64, y0: f64, w: f64, h: f64) -> Self {
        Self {
            kind: ShapeKind::Rect,
            x0,
            y0,
            w,
            h,
            fill_inside: false,
        }
    }

    pub fn ellipse(x0: f64, y0: f64, w: f64, h: f64) -> Self {
        Self {
            kind: ShapeKind::Ellipse,
            ..Self::rect(x0, y0, w, h)
        }
    }

    /// Circle of diameter `d` masking everything outside of it
    pub fn circle(x0: f64, y0: f64, d: f64) -> Self {
        Self::ellipse(x0, y0, d, d)
    }

    pub fn filled_inside(mut self) -> Self {
        self.fill_inside = true;
        self
    }

    pub fn x1(&self) -> f64 {
        self.x0 + self.w
    }

    pub fn y1(&self) -> f64 {
        self.y0 + self.h
    }

    /// Same shape with origin and extent scaled per axis
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            x0: self.x0 * sx,
            y0: self.y0 * sy,
            w: self.w * sx,
            h: self.h * sy,
            ..*self
        }
    }

    /// Mask opacity at pixel `(x, y)`: 255 opaque, 0 transparent
    pub fn alpha_at(&self, x: f64, y: f64) -> u8 {
        let opaque = match self.kind {
            ShapeKind::Rect => {
                let inside = self.x0 <= x && x < self.x1() && self.y0 <= y && y < self.y1();
                inside == self.fill_inside
            }
            ShapeKind::Ellipse => match self.ellipse_distance(x, y) {
                // boundary belongs to the shape for fill-inside, to the hole for fill-outside
                Some(q) if self.fill_inside => q <= 1.0,
                Some(q) => q > 1.0,
                None => !self.fill_inside,
            },
        };
        if opaque {
            255
        } else {
            0
        }
    }

    /// Normalized quadratic distance from the ellipse center, `None` if degenerate
    fn ellipse_distance(&self, x: f64, y: f64) -> Option<f64> {
        let (rx, ry) = (self.w / 2.0, self.h / 2.0);
        if rx <= 0.0 || ry <= 0.0 {
            return None;
        }
        let dx = (x - (self.x0 + rx)) / rx;
        let dy = (y - (self.y0 + ry)) / ry;
        Some(dx * dx + dy * dy)
    }

    /// ffmpeg expression that is non-zero where this shape is opaque
    fn lavfi_predicate(&self) -> String {
        match self.kind {
            ShapeKind::Rect => {
                let inside = format!(
                    "gte(X,{})*lt(X,{})*gte(Y,{})*lt(Y,{})",
                    self.x0,
                    self.x1(),
                    self.y0,
                    self.y1()
                );
                if self.fill_inside {
                    inside
                } else {
                    format!("not({})", inside)
                }
            }
            ShapeKind::Ellipse => {
                let (rx, ry) = (self.w / 2.0, self.h / 2.0);
                if rx <= 0.0 || ry <= 0.0 {
                    return if self.fill_inside { "0" } else { "1" }.to_string();
                }
                let q = format!(
                    "pow(X-({}),2)/{}+pow(Y-({}),2)/{}",
                    self.x0 + rx,
                    rx * rx,
                    self.y0 + ry,
                    ry * ry
                );
                if self.fill_inside {
                    format!("lte({},1)", q)
                } else {
                    format!("gt({},1)", q)
                }
            }
        }
    }
}

/// Solid mask color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MaskColor(pub [u8; 3]);

impl MaskColor {
    pub const BLACK: Self = Self([0, 0, 0]);
}

impl Default for MaskColor {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for MaskColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "0x{:02X}{:02X}{:02X}", r, g, b)
    }
}

impl FromStr for MaskColor {
    type Err = Error;

    /// Accepts a few color names, `#RRGGBB` and `0xRRGGBB`
    fn from_str(s: &str) -> Result<Self> {
        let named = match s.to_ascii_lowercase().as_str() {
            "black" => Some([0, 0, 0]),
            "white" => Some([255, 255, 255]),
            "gray" | "grey" => Some([128, 128, 128]),
            "red" => Some([255, 0, 0]),
            "green" => Some([0, 128, 0]),
            "blue" => Some([0, 0, 255]),
            "orange" => Some([255, 165, 0]),
            _ => None,
        };
        if let Some(rgb) = named {
            return Ok(MaskColor(rgb));
        }

        let hex = s
            .strip_prefix('#')
            .or_else(|| s.strip_prefix("0x"))
            .or_else(|| s.strip_prefix("0X"))
            .filter(|h| h.len() == 6 && h.is_ascii())
            .ok_or_else(|| Error::Config(format!("unknown mask color '{}'", s)))?;
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| Error::Config(format!("unknown mask color '{}'", s)))
        };
        Ok(MaskColor([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<String> for MaskColor {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MaskColor> for String {
    fn from(color: MaskColor) -> Self {
        color.to_string()
    }
}

/// Renderable mask: shapes resolved onto a canvas of the frame they cover
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMask {
    pub width: u32,
    pub height: u32,
    pub shapes: Vec<MaskShape>,
    pub color: MaskColor,
}

/// Compile shapes into a mask for a `width` x `height` canvas.
/// Returns `None` when there is nothing to mask.
///
/// Shapes may reach past the canvas (a circle cut off by the crop window);
/// they keep their full geometry and only the pixels inside the canvas are
/// evaluated.
pub fn compile_mask(width: u32, height: u32, shapes: &[MaskShape], color: MaskColor) -> Option<CompiledMask> {
    if shapes.is_empty() || width == 0 || height == 0 {
        return None;
    }
    Some(CompiledMask {
        width,
        height,
        shapes: shapes.to_vec(),
        color,
    })
}

impl CompiledMask {
    /// Combined opacity at pixel `(x, y)`: a pixel opaque in any shape stays opaque
    pub fn alpha_at(&self, x: u32, y: u32) -> u8 {
        let (x, y) = (x as f64, y as f64);
        self.shapes
            .iter()
            .map(|s| s.alpha_at(x, y))
            .max()
            .unwrap_or(0)
    }

    /// Rasterize into an RGBA still image
    pub fn render(&self) -> RgbaImage {
        let [r, g, b] = self.color.0;
        RgbaImage::from_fn(self.width, self.height, |x, y| Rgba([r, g, b, self.alpha_at(x, y)]))
    }

    pub fn write_png(&self, path: &Path) -> Result<()> {
        self.render().save_with_format(path, ImageFormat::Png)?;
        tracing::debug!("Mask image {}x{} written to {}", self.width, self.height, path.display());
        Ok(())
    }

    /// Describe the mask as an ffmpeg filter source producing one RGBA frame
    /// on the output pad `[label]`.
    pub fn to_lavfi(&self, label: &str) -> String {
        let size = format!("{}x{}", self.width, self.height);
        let mut graph = format!("color=c={}:s={},format=rgba[{}c]", self.color, size, label);

        for (i, shape) in self.shapes.iter().enumerate() {
            graph.push_str(&format!(
                ";nullsrc=s={},format=gray,geq=lum='if({},255,0)'[{}a{}]",
                size,
                shape.lavfi_predicate(),
                label,
                i
            ));
        }

        // fold the alpha planes together, keeping the brighter (more opaque) value
        let mut alpha = format!("{}a0", label);
        for i in 1..self.shapes.len() {
            let merged = format!("{}m{}", label, i);
            graph.push_str(&format!(
                ";[{}][{}a{}]blend=all_mode=lighten[{}]",
                alpha, label, i, merged
            ));
            alpha = merged;
        }

        graph.push_str(&format!(
            ";[{}c][{}]alphamerge,trim=end_frame=1[{}]",
            label, alpha, label
        ));
        graph
    }
}
