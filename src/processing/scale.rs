//! Frame scaling arithmetic
//!
//! Square-pixel correction, mask extents and mask coordinate adjustment.
//! Everything here is pure and works on frame-pixel coordinates.

use crate::processing::mask::MaskShape;
use crate::types::Sar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How non-square pixels are squared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScalingPolicy {
    /// Leave pixels non-square
    None,
    /// Grow the short dimension (no detail lost)
    #[default]
    #[serde(alias = "up")]
    Upscale,
    /// Shrink the long dimension (smaller output)
    #[serde(alias = "down")]
    Downscale,
}

impl ScalingPolicy {
    /// True when squaring `sar` under this policy rescales the height.
    /// Meaningless for `None` or square pixels.
    fn scales_height(self, sar: Sar) -> bool {
        (sar.num() < sar.den()) == (self == ScalingPolicy::Upscale)
    }
}

impl fmt::Display for ScalingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalingPolicy::None => "none",
            ScalingPolicy::Upscale => "upscale",
            ScalingPolicy::Downscale => "downscale",
        })
    }
}

impl FromStr for ScalingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(ScalingPolicy::None),
            "upscale" | "up" => Ok(ScalingPolicy::Upscale),
            "downscale" | "down" => Ok(ScalingPolicy::Downscale),
            other => Err(format!("unknown scaling policy '{}'", other)),
        }
    }
}

/// Integer crop window in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Crop {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl fmt::Display for Crop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Fractional rectangle, used for mask extents before they are snapped to a crop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x0: f64,
    pub y0: f64,
    pub w: f64,
    pub h: f64,
}

/// Round to the nearest even integer (ties go up)
pub fn round_even(value: f64) -> u32 {
    (2.0 * (value / 2.0).round()).max(0.0) as u32
}

/// Frame size after square-pixel correction.
///
/// A `crop` replaces `(width, height)` before scaling. Only one dimension is
/// ever changed, and it is rounded to an even number.
pub fn compute_scaled_size(
    width: u32,
    height: u32,
    sar: Sar,
    policy: ScalingPolicy,
    crop: Option<&Crop>,
) -> (u32, u32) {
    let (width, height) = crop.map_or((width, height), |c| (c.width, c.height));

    if sar.is_square() || policy == ScalingPolicy::None {
        return (width, height);
    }

    if policy.scales_height(sar) {
        let h = height as f64 * sar.den() as f64 / sar.num() as f64;
        (width, round_even(h))
    } else {
        let w = width as f64 * sar.num() as f64 / sar.den() as f64;
        (round_even(w), height)
    }
}

/// Tightest region kept by the fill-outside shapes.
///
/// Starts from the full frame and pulls each edge in to the shapes. Fill-inside
/// shapes only carve holes and never shrink the region. `None` for no shapes.
pub fn compute_mask_extent(width: u32, height: u32, shapes: &[MaskShape]) -> Option<Region> {
    if shapes.is_empty() {
        return None;
    }

    let (mut x0, mut y0) = (0.0_f64, 0.0_f64);
    let (mut x1, mut y1) = (width as f64, height as f64);
    for shape in shapes.iter().filter(|s| !s.fill_inside) {
        x0 = x0.max(shape.x0);
        y0 = y0.max(shape.y0);
        x1 = x1.min(shape.x1());
        y1 = y1.min(shape.y1());
    }

    Some(Region {
        x0,
        y0,
        w: (x1 - x0).max(0.0),
        h: (y1 - y0).max(0.0),
    })
}

/// Map shapes from the source frame onto the cropped and squared frame.
///
/// Returns new shapes; the input is never modified. With a crop the shapes
/// become crop-relative. When squaring is active, only the axis the squaring
/// step changes is rescaled.
pub fn adjust_mask_shapes(
    width: u32,
    height: u32,
    shapes: &[MaskShape],
    sar: Sar,
    policy: ScalingPolicy,
    crop: Option<&Crop>,
) -> Vec<MaskShape> {
    let mut shapes = shapes.to_vec();

    let (base_w, base_h) = match crop {
        Some(c) => {
            for shape in &mut shapes {
                shape.x0 -= c.x as f64;
                shape.y0 -= c.y as f64;
            }
            (c.width, c.height)
        }
        None => (width, height),
    };

    if !sar.is_square() && policy != ScalingPolicy::None {
        let (w, h) = compute_scaled_size(width, height, sar, policy, crop);
        let (sx, sy) = if h != base_h {
            (1.0, h as f64 / base_h as f64)
        } else {
            (w as f64 / base_w as f64, 1.0)
        };
        tracing::trace!("mask shapes rescaled by ({}, {})", sx, sy);
        for shape in &mut shapes {
            *shape = shape.scaled(sx, sy);
        }
    }

    shapes
}

/// Scale every shape by per-axis factors
pub fn rescale_shapes(shapes: &[MaskShape], sx: f64, sy: f64) -> Vec<MaskShape> {
    shapes.iter().map(|s| s.scaled(sx, sy)).collect()
}
