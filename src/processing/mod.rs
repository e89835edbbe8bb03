//! Frame geometry processing
//!
//! Pure, deterministic planning of the per-file transforms:
//! - Square-pixel scaling arithmetic
//! - Mask shape compilation
//! - Filter sequence planning

pub mod mask;
pub mod plan;
pub mod scale;

pub use mask::{compile_mask, CompiledMask, MaskColor, MaskShape, ShapeKind};
pub use plan::{clip_crop, plan_transforms, FilterStep, PlanOptions, ScaleTarget, TransformPlan};
pub use scale::{
    adjust_mask_shapes, compute_mask_extent, compute_scaled_size, rescale_shapes, round_even, Crop,
    Region, ScalingPolicy,
};
