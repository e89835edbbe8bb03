//! fluoromask: fluoroscopy video de-identification
//!
//! Recognizes the capture rig of a recording from its stream metadata, then
//! squares its pixels, crops it to the imaging field and masks whatever
//! identifying overlay is left around it, re-encoding through `ffmpeg`.
//!
//! # Features
//!
//! - **Planning**: pure, deterministic scale → setsar → crop → overlay plans
//! - **Masks**: rectangle/ellipse masks rendered to PNG or a lavfi source
//! - **Profiles**: ordered, first-match rig profiles loaded from TOML or JSON
//! - **Batch**: bounded-parallel processing where one bad file never stops the rest
//!
//! # Example
//!
//! ```rust
//! use fluoromask::processing::{plan_transforms, PlanOptions};
//! use fluoromask::{FrameGeometry, Profile, Sar};
//!
//! fn main() -> fluoromask::Result<()> {
//!     let profile = Profile::named("Kalare")
//!         .with_sar(Sar::new(8, 9)?)
//!         .with_circ(396.0, 92.0, 1140.0);
//!     let plan = plan_transforms(&FrameGeometry::new(1920, 1080), &profile, &PlanOptions::default())?;
//!     assert_eq!(plan.filter_chain(), "scale=h=1216,setsar=sar=1/1,crop=1140:1124:396:92");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod processing;
pub mod profile;
pub mod types;

// Re-exports for convenience
pub use config::{Config, MaskRender};
pub use error::{Error, Result};
pub use output::{FfmpegTranscoder, TranscodeJob, Transcoder};
pub use pipeline::{BatchReport, BatchRunner, Outcome};
pub use probe::{Ffprobe, MediaProbe, StreamInfo};
pub use processing::{MaskShape, PlanOptions, ScalingPolicy, TransformPlan};
pub use profile::{match_profile, Profile, ProfileSet};
pub use types::{FrameGeometry, Sar};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
