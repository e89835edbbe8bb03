//! Configuration types for fluoromask
//!
//! A [`Config`] starts from built-in defaults and is refined by option files
//! (TOML, or JSON in the legacy `CamelCase` layout). Later files win; their
//! profiles are merged by name into the ones already known.

use crate::error::{Error, Result};
use crate::processing::{MaskColor, PlanOptions, ScalingPolicy};
use crate::profile::ProfileSet;
use crate::types::{OrderedMap, Scalar};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the compiled mask reaches the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaskRender {
    /// RGBA PNG written next to the job, fed as a second input
    #[default]
    Image,
    /// Generated inside the filter graph
    Lavfi,
}

/// Complete, validated tool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConfigOverlay")]
pub struct Config {
    /// Square-pixel correction direction, `none` to keep the stored pixels
    pub square_pixel: ScalingPolicy,
    pub crop_video: bool,
    pub apply_mask: bool,
    pub keep_audio: bool,
    pub mask_color: MaskColor,
    pub mask_render: MaskRender,
    /// Destination folder; see [`crate::output::destination_for`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<PathBuf>,
    pub output_suffix: String,
    pub output_ext: String,
    pub overwrite: bool,
    /// Files transcoded concurrently
    pub jobs: usize,
    /// Kill a transcode running longer than this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Encoder options passed through as `-key value`, in order
    pub output_options: OrderedMap<Scalar>,
    pub profiles: ProfileSet,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            square_pixel: ScalingPolicy::Upscale,
            crop_video: true,
            apply_mask: true,
            keep_audio: true,
            mask_color: MaskColor::BLACK,
            mask_render: MaskRender::Image,
            output_folder: None,
            output_suffix: "_fixed".to_string(),
            output_ext: ".mp4".to_string(),
            overwrite: false,
            jobs: 1,
            timeout_secs: None,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            output_options: OrderedMap::new()
                .with("preset", Scalar::from("slow"))
                .with("crf", Scalar::from(18))
                .with("pix_fmt", Scalar::from("yuv420p")),
            profiles: ProfileSet::builtin(),
        }
    }
}

impl Config {
    /// Defaults refined by each option file in turn, then validated
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut config = Self::default();
        for path in paths {
            let overlay = ConfigOverlay::from_path(path.as_ref())?;
            tracing::debug!("applying options from {}", path.as_ref().display());
            config.apply(overlay);
        }
        config.validate()?;
        Ok(config)
    }

    /// Replace every value the overlay sets; merge its profiles by name
    pub fn apply(&mut self, overlay: ConfigOverlay) {
        match overlay.square_pixel {
            Some(SquarePixelSetting::Policy(policy)) => self.square_pixel = policy,
            Some(SquarePixelSetting::Flag(false)) => self.square_pixel = ScalingPolicy::None,
            Some(SquarePixelSetting::Flag(true)) => {
                self.square_pixel = overlay.scaling.unwrap_or(match self.square_pixel {
                    ScalingPolicy::None => ScalingPolicy::Upscale,
                    current => current,
                });
            }
            None => {
                if let Some(scaling) = overlay.scaling {
                    if self.square_pixel != ScalingPolicy::None {
                        self.square_pixel = scaling;
                    }
                }
            }
        }

        if let Some(v) = overlay.crop_video {
            self.crop_video = v;
        }
        if let Some(v) = overlay.apply_mask {
            self.apply_mask = v;
        }
        if let Some(v) = overlay.keep_audio {
            self.keep_audio = v;
        }
        if let Some(v) = overlay.mask_color {
            self.mask_color = v;
        }
        if let Some(v) = overlay.mask_render {
            self.mask_render = v;
        }
        if let Some(folder) = overlay.output_folder {
            // an empty folder clears a previous one
            self.output_folder = (!folder.as_os_str().is_empty()).then_some(folder);
        }
        if let Some(v) = overlay.output_suffix {
            self.output_suffix = v;
        }
        if let Some(v) = overlay.output_ext {
            self.output_ext = v;
        }
        if let Some(v) = overlay.overwrite {
            self.overwrite = v;
        }
        if let Some(v) = overlay.jobs {
            self.jobs = v;
        }
        if let Some(v) = overlay.timeout_secs {
            self.timeout_secs = (v > 0).then_some(v);
        }
        if let Some(v) = overlay.ffmpeg {
            self.ffmpeg = v;
        }
        if let Some(v) = overlay.ffprobe {
            self.ffprobe = v;
        }
        if let Some(v) = overlay.output_options {
            self.output_options = v;
        }
        if let Some(profiles) = overlay.profiles {
            self.profiles.merge(profiles);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::Config("jobs must be at least 1".into()));
        }
        if !self.output_ext.starts_with('.') || self.output_ext.len() < 2 {
            return Err(Error::Config(format!(
                "output extension '{}' must look like '.mp4'",
                self.output_ext
            )));
        }
        if self.profiles.is_empty() {
            return Err(Error::Config("no profiles defined".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions::from(self)
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = Some(folder.into());
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Write as TOML, or JSON for a `.json` path
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// `SquarePixel` is a policy name, or a legacy on/off flag paired with `Scaling`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SquarePixelSetting {
    Flag(bool),
    Policy(ScalingPolicy),
}

/// Partial configuration as read from one option file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverlay {
    #[serde(alias = "SquarePixel")]
    pub square_pixel: Option<SquarePixelSetting>,
    #[serde(alias = "Scaling")]
    pub scaling: Option<ScalingPolicy>,
    #[serde(alias = "CropVideo")]
    pub crop_video: Option<bool>,
    #[serde(alias = "ApplyMask")]
    pub apply_mask: Option<bool>,
    #[serde(alias = "KeepAudio")]
    pub keep_audio: Option<bool>,
    #[serde(alias = "MaskColor")]
    pub mask_color: Option<MaskColor>,
    pub mask_render: Option<MaskRender>,
    #[serde(alias = "OutputFolder")]
    pub output_folder: Option<PathBuf>,
    #[serde(alias = "OutputSuffix")]
    pub output_suffix: Option<String>,
    #[serde(alias = "OutputExt")]
    pub output_ext: Option<String>,
    #[serde(alias = "Overwrite")]
    pub overwrite: Option<bool>,
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    #[serde(alias = "OutputOptions")]
    pub output_options: Option<OrderedMap<Scalar>>,
    #[serde(alias = "Profiles")]
    pub profiles: Option<ProfileSet>,
}

impl ConfigOverlay {
    /// Parse an option file, JSON or TOML by extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let parsed = if is_json(path) {
            serde_json::from_str(&text).map_err(|e| e.to_string())
        } else {
            toml::from_str(&text).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

impl From<ConfigOverlay> for Config {
    fn from(overlay: ConfigOverlay) -> Self {
        let mut config = Config::default();
        config.apply(overlay);
        config
    }
}

/// Option files are recognized by extension
pub fn is_option_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("json" | "toml")
    )
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.square_pixel, ScalingPolicy::Upscale);
        assert!(config.crop_video && config.apply_mask && config.keep_audio);
        assert!(!config.overwrite);
        assert_eq!(config.output_suffix, "_fixed");
        assert_eq!(config.output_ext, ".mp4");
        let keys: Vec<_> = config.output_options.keys().collect();
        assert_eq!(keys, ["preset", "crf", "pix_fmt"]);
        assert_eq!(config.profiles.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overlay() {
        let overlay: ConfigOverlay = toml::from_str(
            r##"
square_pixel = "down"
apply_mask = false
mask_color = "#102030"
jobs = 4

[output_options]
crf = 23
preset = "fast"

[profiles."Lab rig"]
circ = [10, 10, 200]
match = { height = 240 }
"##,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply(overlay);
        assert_eq!(config.square_pixel, ScalingPolicy::Downscale);
        assert!(!config.apply_mask);
        assert!(config.crop_video);
        assert_eq!(config.mask_color, MaskColor([0x10, 0x20, 0x30]));
        assert_eq!(config.jobs, 4);
        // replaced, not merged
        assert_eq!(config.output_options.keys().collect::<Vec<_>>(), ["crf", "preset"]);
        // merged, not replaced
        let names: Vec<_> = config.profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            ["Toshiba Kalare (1080p)", "Siemens Axiom (480p)", "Lab rig"]
        );
    }

    #[test]
    fn test_legacy_json_options() {
        let overlay: ConfigOverlay = serde_json::from_str(
            r#"{
                "Profiles": {
                    "Toshiba Kalare (1080p)": [{"height": 1080}, {"sar": [8, 9], "circ": [396, 92, 1140]}]
                },
                "SquarePixel": true,
                "Scaling": "down",
                "OutputFolder": null,
                "OutputSuffix": "",
                "Overwrite": true
            }"#,
        )
        .unwrap();

        let mut config = Config::default().with_output_folder("/data/out");
        config.apply(overlay);
        assert_eq!(config.square_pixel, ScalingPolicy::Downscale);
        assert_eq!(config.output_folder, Some(PathBuf::from("/data/out")));
        assert_eq!(config.output_suffix, "");
        assert!(config.overwrite);
        let kalare = config.profiles.get("Toshiba Kalare (1080p)").unwrap();
        assert_eq!(kalare.circ, Some([396.0, 92.0, 1140.0]));
        assert_eq!(config.profiles.len(), 2);
    }

    #[test]
    fn test_square_pixel_flag() {
        let mut config = Config::default();
        config.apply(serde_json::from_str(r#"{"SquarePixel": false, "Scaling": "down"}"#).unwrap());
        assert_eq!(config.square_pixel, ScalingPolicy::None);

        config.apply(serde_json::from_str(r#"{"SquarePixel": true}"#).unwrap());
        assert_eq!(config.square_pixel, ScalingPolicy::Upscale);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let parsed: std::result::Result<ConfigOverlay, _> = toml::from_str("crop_vidoe = true");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validation() {
        assert!(Config::default().with_jobs(0).validate().is_err());

        let mut config = Config::default();
        config.output_ext = "mp4".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.toml");
        let second = dir.path().join("b.json");
        std::fs::write(&first, "output_suffix = \"_a\"\ncrop_video = false\n").unwrap();
        std::fs::write(&second, r#"{"OutputSuffix": "_b"}"#).unwrap();

        let config = Config::load(&[&first, &second]).unwrap();
        assert_eq!(config.output_suffix, "_b");
        assert!(!config.crop_video);
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "jobs = \"many\"").unwrap();
        assert!(matches!(Config::load(&[&bad]), Err(Error::Config(_))));
        assert!(matches!(
            Config::load(&[dir.path().join("missing.toml")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_saved_default_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.profiles.insert(
            Profile::named("Extra")
                .with_match("codec_name", "mpeg2video")
                .with_circ(1.0, 2.0, 300.0),
        );

        for name in ["fluoromask.toml", "nested/fluoromask.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(Config::load(&[&path]).unwrap(), config);
        }
    }

    #[test]
    fn test_option_file_detection() {
        assert!(is_option_file(Path::new("site.TOML")));
        assert!(is_option_file(Path::new("legacy.json")));
        assert!(!is_option_file(Path::new("run1.mp4")));
    }
}
