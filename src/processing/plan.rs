//! Transform planning
//!
//! Turns a frame geometry and a matched profile into the ordered filter steps
//! (scale → setsar → crop → overlay) plus the exact crop window and mask.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::processing::mask::{compile_mask, CompiledMask, MaskColor};
use crate::processing::scale::{
    adjust_mask_shapes, compute_mask_extent, compute_scaled_size, rescale_shapes, Crop, Region,
    ScalingPolicy,
};
use crate::profile::Profile;
use crate::types::{FrameGeometry, Sar};
use std::fmt;

/// Which dimension a scale step sets; the other one is left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleTarget {
    Width(u32),
    Height(u32),
}

/// One filter in the transform chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterStep {
    Scale(ScaleTarget),
    SetSar(Sar),
    Crop(Crop),
    /// Composite the plan's compiled mask over the frame
    Overlay,
}

impl fmt::Display for FilterStep {
    /// ffmpeg filter syntax
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStep::Scale(ScaleTarget::Width(w)) => write!(f, "scale=w={}", w),
            FilterStep::Scale(ScaleTarget::Height(h)) => write!(f, "scale=h={}", h),
            FilterStep::SetSar(sar) => write!(f, "setsar=sar={}/{}", sar.num(), sar.den()),
            FilterStep::Crop(c) => write!(f, "crop={}:{}:{}:{}", c.width, c.height, c.x, c.y),
            FilterStep::Overlay => f.write_str("overlay"),
        }
    }
}

/// Policy flags for planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub square_pixel: ScalingPolicy,
    pub crop_video: bool,
    pub apply_mask: bool,
    pub mask_color: MaskColor,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            square_pixel: ScalingPolicy::Upscale,
            crop_video: true,
            apply_mask: true,
            mask_color: MaskColor::BLACK,
        }
    }
}

impl PlanOptions {
    pub fn with_square_pixel(mut self, policy: ScalingPolicy) -> Self {
        self.square_pixel = policy;
        self
    }

    pub fn with_crop(mut self, crop: bool) -> Self {
        self.crop_video = crop;
        self
    }

    pub fn with_mask(mut self, mask: bool) -> Self {
        self.apply_mask = mask;
        self
    }
}

impl From<&Config> for PlanOptions {
    fn from(config: &Config) -> Self {
        Self {
            square_pixel: config.square_pixel,
            crop_video: config.crop_video,
            apply_mask: config.apply_mask,
            mask_color: config.mask_color,
        }
    }
}

/// Ordered transforms for one input, plus the geometry they were derived from
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    pub steps: Vec<FilterStep>,
    /// Effective SAR (profile override or stream value)
    pub sar: Sar,
    /// Frame size after the scale step
    pub scaled_size: (u32, u32),
    pub crop: Option<Crop>,
    pub mask: Option<CompiledMask>,
}

impl TransformPlan {
    /// Final output frame size
    pub fn output_size(&self) -> (u32, u32) {
        self.crop
            .map_or(self.scaled_size, |c| (c.width, c.height))
    }

    /// Comma-joined chain of every step except the overlay
    pub fn filter_chain(&self) -> String {
        self.steps
            .iter()
            .filter(|s| **s != FilterStep::Overlay)
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn has_overlay(&self) -> bool {
        self.steps.contains(&FilterStep::Overlay)
    }

    /// Full filter graph reading video from `[input]`. `mask_pad` names the
    /// pad carrying the mask frame; it is required when the plan overlays.
    pub fn filter_graph(&self, input: &str, mask_pad: Option<&str>) -> String {
        let chain = self.filter_chain();
        match mask_pad {
            Some(mask) if self.has_overlay() => {
                format!("[{}]{}[vid];[vid][{}]overlay", input, chain, mask)
            }
            _ => format!("[{}]{}", input, chain),
        }
    }
}

/// Derive the transform plan for `frame` under `profile`.
///
/// Shapes in the profile are authored on the frame produced by the profile's
/// reference scaling; they are mapped onto whatever frame the active policy
/// produces before the crop window and mask are derived.
pub fn plan_transforms(frame: &FrameGeometry, profile: &Profile, opts: &PlanOptions) -> Result<TransformPlan> {
    if frame.width == 0 || frame.height == 0 {
        return Err(Error::InvalidGeometry(format!("empty frame {}", frame)));
    }

    let roi = profile.region_of_interest(frame.height)?;
    let sar = roi.sar.unwrap_or(frame.sar);
    let squaring = !sar.is_square() && opts.square_pixel != ScalingPolicy::None;
    let active = if squaring {
        opts.square_pixel
    } else {
        ScalingPolicy::None
    };

    let mut steps = Vec::with_capacity(4);

    // scale
    let (width, height) = compute_scaled_size(frame.width, frame.height, sar, active, None);
    if width == 0 || height == 0 {
        return Err(Error::InvalidGeometry(format!(
            "squaring {} collapses the frame",
            frame
        )));
    }
    if squaring {
        let target = if height != frame.height {
            ScaleTarget::Height(height)
        } else {
            ScaleTarget::Width(width)
        };
        steps.push(FilterStep::Scale(target));
        steps.push(FilterStep::SetSar(Sar::SQUARE));
    } else {
        // pin the container aspect to the authoritative SAR, not the file's
        steps.push(FilterStep::SetSar(sar));
    }

    // shapes: reference frame -> native frame -> active frame
    let (ref_w, ref_h) = compute_scaled_size(frame.width, frame.height, sar, roi.reference, None);
    if ref_w == 0 || ref_h == 0 {
        return Err(Error::InvalidGeometry(format!(
            "{} has no {} reference frame",
            frame, roi.reference
        )));
    }
    let native = rescale_shapes(
        &roi.shapes,
        frame.width as f64 / ref_w as f64,
        frame.height as f64 / ref_h as f64,
    );
    let shapes = adjust_mask_shapes(frame.width, frame.height, &native, sar, active, None);
    tracing::debug!(
        "profile '{}' on {}: scaled to {}x{} ({} -> {})",
        profile.name,
        frame,
        width,
        height,
        roi.reference,
        active
    );

    // crop
    let crop = if opts.crop_video {
        let extent = compute_mask_extent(width, height, &shapes)
            .ok_or_else(|| Error::NoRegionOfInterest(profile.name.clone()))?;
        let crop = clip_crop(&extent, width, height)?;
        steps.push(FilterStep::Crop(crop));
        Some(crop)
    } else {
        None
    };

    // mask
    let mask = if opts.apply_mask {
        let (canvas_w, canvas_h) = crop.map_or((width, height), |c| (c.width, c.height));
        let relative = adjust_mask_shapes(width, height, &shapes, Sar::SQUARE, ScalingPolicy::None, crop.as_ref());
        compile_mask(canvas_w, canvas_h, &relative, opts.mask_color)
    } else {
        None
    };
    if mask.is_some() {
        steps.push(FilterStep::Overlay);
    }

    Ok(TransformPlan {
        steps,
        sar,
        scaled_size: (width, height),
        crop,
        mask,
    })
}

/// Snap a mask extent to a crop window inside a `width` x `height` frame.
///
/// The origin is kept; the extent shrinks to fit and is rounded down to even.
pub fn clip_crop(region: &Region, width: u32, height: u32) -> Result<Crop> {
    let x = region.x0.round().max(0.0) as u32;
    let y = region.y0.round().max(0.0) as u32;
    if x >= width || y >= height {
        return Err(Error::InvalidGeometry(format!(
            "crop origin ({}, {}) outside {}x{} frame",
            x, y, width, height
        )));
    }

    let w = (region.w.round().max(0.0) as u32).min(width - x) & !1;
    let h = (region.h.round().max(0.0) as u32).min(height - y) & !1;
    if w == 0 || h == 0 {
        return Err(Error::InvalidGeometry(format!(
            "crop {}x{} at ({}, {}) is empty",
            w, h, x, y
        )));
    }

    Ok(Crop::new(x, y, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::mask::{MaskShape, ShapeKind};

    fn kalare() -> Profile {
        Profile::named("Kalare")
            .with_sar(Sar::new(8, 9).unwrap())
            .with_circ(396.0, 92.0, 1140.0)
    }

    fn hd() -> FrameGeometry {
        FrameGeometry::new(1920, 1080)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_upscale_end_to_end() {
        let plan = plan_transforms(&hd(), &kalare(), &PlanOptions::default()).unwrap();

        assert_eq!(plan.sar, Sar::new(8, 9).unwrap());
        assert_eq!(plan.scaled_size, (1920, 1216));
        // the circle reaches below the squared frame, so the crop height is clipped
        let crop = Crop::new(396, 92, 1140, 1124);
        assert_eq!(
            plan.steps,
            vec![
                FilterStep::Scale(ScaleTarget::Height(1216)),
                FilterStep::SetSar(Sar::SQUARE),
                FilterStep::Crop(crop),
                FilterStep::Overlay,
            ]
        );

        let mask = plan.mask.as_ref().unwrap();
        assert_eq!((mask.width, mask.height), (1140, 1124));
        assert_eq!(mask.shapes.len(), 1);
        let circle = mask.shapes[0];
        assert_eq!(circle.kind, ShapeKind::Ellipse);
        assert!(!circle.fill_inside);
        assert!(close(circle.x0, 0.0) && close(circle.y0, 0.0));
        assert!(close(circle.w, 1140.0) && close(circle.h, 1140.0));
        assert_eq!(plan.output_size(), (1140, 1124));
    }

    #[test]
    fn test_clipped_circle_renders_on_cropped_canvas() {
        let plan = plan_transforms(&hd(), &kalare(), &PlanOptions::default()).unwrap();
        let mask = plan.mask.unwrap();
        // the circle still spans 1140 rows on a 1124-row canvas
        assert!(mask.shapes[0].y1() > mask.height as f64);

        let img = mask.render();
        assert_eq!(img.dimensions(), (1140, 1124));
        let last = mask.height - 1;
        assert_eq!(img.get_pixel(0, last).0[3], 255);
        assert_eq!(img.get_pixel(1139, last).0[3], 255);
        assert_eq!(img.get_pixel(0, 0).0[3], 255);
        // the bottom edge cuts through the circle, so its middle stays clear
        assert_eq!(img.get_pixel(570, last).0[3], 0);
        assert_eq!(img.get_pixel(570, 1).0[3], 0);
    }

    #[test]
    fn test_crop_fits_when_frame_is_tall_enough() {
        let profile = Profile::named("fits")
            .with_sar(Sar::new(8, 9).unwrap())
            .with_circ(396.0, 40.0, 1140.0);
        let plan = plan_transforms(&hd(), &profile, &PlanOptions::default()).unwrap();
        assert_eq!(plan.crop, Some(Crop::new(396, 40, 1140, 1140)));
    }

    #[test]
    fn test_no_region_of_interest() {
        let profile = Profile::named("empty").with_sar(Sar::new(8, 9).unwrap());
        let err = plan_transforms(&hd(), &profile, &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NoRegionOfInterest(name) if name == "empty"));
    }

    #[test]
    fn test_deterministic() {
        let opts = PlanOptions::default().with_square_pixel(ScalingPolicy::Downscale);
        let a = plan_transforms(&hd(), &kalare(), &opts).unwrap();
        let b = plan_transforms(&hd(), &kalare(), &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_downscale_rescales_authored_geometry() {
        let opts = PlanOptions::default().with_square_pixel(ScalingPolicy::Downscale);
        let plan = plan_transforms(&hd(), &kalare(), &opts).unwrap();

        assert_eq!(plan.scaled_size, (1706, 1080));
        assert_eq!(plan.steps[0], FilterStep::Scale(ScaleTarget::Width(1706)));

        // authored on the upscaled frame: both axes shrink by 8/9
        let crop = plan.crop.unwrap();
        assert!((crop.x as f64 - 396.0 * 8.0 / 9.0).abs() <= 1.0);
        assert!((crop.y as f64 - 92.0 * 8.0 / 9.0).abs() <= 1.0);
        assert!((crop.width as f64 - 1140.0 * 8.0 / 9.0).abs() <= 2.0);
        assert_eq!(crop.width % 2, 0);
        assert_eq!(crop.height % 2, 0);

        let circle = plan.mask.unwrap().shapes[0];
        assert!((circle.w - circle.h).abs() <= 1.0, "circle stays round: {:?}", circle);
    }

    #[test]
    fn test_unsquared_plan_maps_onto_native_frame() {
        let opts = PlanOptions::default().with_square_pixel(ScalingPolicy::None);
        let plan = plan_transforms(&hd(), &kalare(), &opts).unwrap();

        assert_eq!(plan.scaled_size, (1920, 1080));
        assert_eq!(plan.steps[0], FilterStep::SetSar(Sar::new(8, 9).unwrap()));
        assert!(!plan
            .steps
            .iter()
            .any(|s| matches!(s, FilterStep::Scale(_))));

        // only the stretched axis is mapped back: y by 1080/1216
        let crop = plan.crop.unwrap();
        assert_eq!(crop.x, 396);
        assert_eq!(crop.width, 1140);
        assert_eq!(crop.y, (92.0_f64 * 1080.0 / 1216.0).round() as u32);
        let circle = plan.mask.unwrap().shapes[0];
        assert!(close(circle.h, 1140.0 * 1080.0 / 1216.0));
        assert!(close(circle.w, 1140.0));
    }

    #[test]
    fn test_square_pixels_skip_scaling() {
        let profile = Profile::named("axiom").with_circ(45.0, 8.0, 530.0);
        let plan = plan_transforms(&FrameGeometry::new(720, 480), &profile, &PlanOptions::default()).unwrap();
        assert_eq!(
            plan.steps,
            vec![
                FilterStep::SetSar(Sar::SQUARE),
                FilterStep::Crop(Crop::new(45, 8, 530, 472)),
                FilterStep::Overlay,
            ]
        );
    }

    #[test]
    fn test_stream_sar_used_without_profile_override() {
        let profile = Profile::named("axiom").with_circ(45.0, 8.0, 530.0);
        let frame = FrameGeometry::new(720, 480).with_sar(Sar::new(10, 11).unwrap());
        let plan = plan_transforms(&frame, &profile, &PlanOptions::default()).unwrap();
        assert_eq!(plan.sar, Sar::new(10, 11).unwrap());
        assert_eq!(plan.steps[0], FilterStep::Scale(ScaleTarget::Height(528)));
    }

    #[test]
    fn test_mask_without_crop_uses_full_frame() {
        let opts = PlanOptions::default().with_crop(false);
        let plan = plan_transforms(&hd(), &kalare(), &opts).unwrap();
        assert_eq!(plan.crop, None);
        let mask = plan.mask.as_ref().unwrap();
        assert_eq!((mask.width, mask.height), (1920, 1216));
        assert!(close(mask.shapes[0].x0, 396.0));
        assert!(close(mask.shapes[0].y0, 92.0));
        assert_eq!(plan.steps.last(), Some(&FilterStep::Overlay));
    }

    #[test]
    fn test_crop_without_mask() {
        let opts = PlanOptions::default().with_mask(false);
        let plan = plan_transforms(&hd(), &kalare(), &opts).unwrap();
        assert!(plan.mask.is_none());
        assert!(!plan.has_overlay());
        assert!(plan.crop.is_some());
    }

    #[test]
    fn test_neither_crop_nor_mask_pins_sar() {
        let opts = PlanOptions::default()
            .with_square_pixel(ScalingPolicy::None)
            .with_crop(false)
            .with_mask(false);
        let plan = plan_transforms(&hd(), &kalare(), &opts).unwrap();
        assert_eq!(plan.steps, vec![FilterStep::SetSar(Sar::new(8, 9).unwrap())]);
        assert_eq!(plan.filter_graph("0:v", None), "[0:v]setsar=sar=8/9");
    }

    #[test]
    fn test_filter_graph_with_overlay() {
        let plan = plan_transforms(&hd(), &kalare(), &PlanOptions::default()).unwrap();
        assert_eq!(
            plan.filter_graph("0:v", Some("1:v")),
            "[0:v]scale=h=1216,setsar=sar=1/1,crop=1140:1124:396:92[vid];[vid][1:v]overlay"
        );
    }

    #[test]
    fn test_clip_crop() {
        let region = Region { x0: 10.0, y0: 10.0, w: 101.0, h: 50.0 };
        assert_eq!(clip_crop(&region, 100, 100).unwrap(), Crop::new(10, 10, 90, 50));

        let odd = Region { x0: 0.0, y0: 0.0, w: 33.0, h: 17.0 };
        assert_eq!(clip_crop(&odd, 100, 100).unwrap(), Crop::new(0, 0, 32, 16));

        let outside = Region { x0: 120.0, y0: 0.0, w: 10.0, h: 10.0 };
        assert!(matches!(clip_crop(&outside, 100, 100), Err(Error::InvalidGeometry(_))));

        let sliver = Region { x0: 0.0, y0: 0.0, w: 1.0, h: 10.0 };
        assert!(matches!(clip_crop(&sliver, 100, 100), Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn test_disjoint_shapes_are_invalid() {
        let profile = Profile::named("disjoint")
            .with_shape(MaskShape::rect(0.0, 0.0, 10.0, 10.0))
            .with_shape(MaskShape::rect(50.0, 50.0, 10.0, 10.0));
        let err = plan_transforms(&FrameGeometry::new(100, 100), &profile, &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }
}
