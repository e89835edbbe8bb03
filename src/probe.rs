//! Stream probing
//!
//! Reads the first video stream's metadata with `ffprobe`. Profiles match
//! against the stringified stream fields collected here.

use crate::error::{Error, Result};
use crate::types::{FrameGeometry, Sar, Scalar};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Metadata of the first video stream in a file
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// `None` when the container reports no (or a zero) aspect ratio
    pub sar: Option<Sar>,
    pub codec_name: String,
    pub duration_secs: Option<f64>,
    /// Every scalar stream field, stringified
    pub fields: BTreeMap<String, String>,
}

impl StreamInfo {
    pub fn new(width: u32, height: u32) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("width".to_string(), width.to_string());
        fields.insert("height".to_string(), height.to_string());
        Self {
            width,
            height,
            sar: None,
            codec_name: String::new(),
            duration_secs: None,
            fields,
        }
    }

    pub fn with_sar(mut self, sar: Sar) -> Self {
        self.fields.insert("sample_aspect_ratio".to_string(), sar.to_string());
        self.sar = Some(sar);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        let name = name.into();
        let value = value.to_string();
        if name == "codec_name" {
            self.codec_name = value.clone();
        }
        self.fields.insert(name, value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Native geometry; square pixels when the stream reports no SAR
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height).with_sar(self.sar.unwrap_or_default())
    }

    /// Parse `ffprobe -show_streams -show_format -of json` output.
    /// `source` names the input in errors.
    pub fn from_ffprobe_json(json: &str, source: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(json)
            .map_err(|e| Error::Probe(format!("{}: unreadable ffprobe output: {}", source, e)))?;

        let stream = doc["streams"]
            .as_array()
            .and_then(|streams| {
                streams
                    .iter()
                    .find(|s| s["codec_type"].as_str() == Some("video"))
            })
            .ok_or_else(|| Error::NotAVideo(format!("{}: no video stream", source)))?;

        let fields: BTreeMap<String, String> = stream
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| Scalar::from_json(v).map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let codec_name = fields.get("codec_name").cloned().unwrap_or_default();
        // text files are picked up by the tty demuxer
        if codec_name == "ansi" {
            return Err(Error::NotAVideo(format!("{}: text file", source)));
        }

        let dimension = |key: &str| {
            stream[key]
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .ok_or_else(|| Error::NotAVideo(format!("{}: no {}", source, key)))
        };
        let width = dimension("width")?;
        let height = dimension("height")?;

        let sar = fields
            .get("sample_aspect_ratio")
            .and_then(|s| s.parse::<Sar>().ok());

        let duration_secs = [&stream["duration"], &doc["format"]["duration"]]
            .into_iter()
            .find_map(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()));

        Ok(Self {
            width,
            height,
            sar,
            codec_name,
            duration_secs,
            fields,
        })
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        if let Some(sar) = self.sar {
            write!(f, " SAR {}", sar)?;
        }
        if !self.codec_name.is_empty() {
            write!(f, " {}", self.codec_name)?;
        }
        Ok(())
    }
}

/// Source of stream metadata
#[async_trait::async_trait]
pub trait MediaProbe: Send + Sync {
    /// Inspect `path`. Files without a usable video stream yield `NotAVideo`.
    async fn probe(&self, path: &Path) -> Result<StreamInfo>;
}

/// `ffprobe` child-process prober
#[derive(Debug, Clone)]
pub struct Ffprobe {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl Ffprobe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_streams",
            "-show_format",
            "-of",
            "json",
        ])
        .arg(path)
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl MediaProbe for Ffprobe {
    async fn probe(&self, path: &Path) -> Result<StreamInfo> {
        let source = path.display().to_string();
        tracing::debug!("probing {}", source);

        let mut cmd = self.command(path);
        let run = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| Error::Timeout(format!("ffprobe on {}", source)))?,
            None => run.await,
        }
        .map_err(|e| Error::Probe(format!("cannot run {}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!("ffprobe rejected {}: {}", source, stderr.trim());
            return Err(Error::NotAVideo(source));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        StreamInfo::from_ffprobe_json(&json, &source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KALARE: &str = r#"{
        "streams": [{
            "index": 0,
            "codec_name": "h264",
            "codec_type": "video",
            "width": 1920,
            "height": 1080,
            "sample_aspect_ratio": "8:9",
            "display_aspect_ratio": "256:135",
            "r_frame_rate": "30/1",
            "duration": "12.500000",
            "disposition": { "default": 1 }
        }],
        "format": { "filename": "run1.mp4", "duration": "12.533000" }
    }"#;

    #[test]
    fn test_parse_video_stream() {
        let info = StreamInfo::from_ffprobe_json(KALARE, "run1.mp4").unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.sar, Some(Sar::new(8, 9).unwrap()));
        assert_eq!(info.codec_name, "h264");
        assert_eq!(info.duration_secs, Some(12.5));
        assert_eq!(info.field("height"), Some("1080"));
        assert_eq!(info.field("r_frame_rate"), Some("30/1"));
        assert_eq!(info.field("disposition"), None);
        assert_eq!(info.geometry(), FrameGeometry::new(1920, 1080).with_sar(Sar::new(8, 9).unwrap()));
    }

    #[test]
    fn test_missing_sar_is_square() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "mpeg4",
            "width": 720, "height": 480, "sample_aspect_ratio": "0:1"}],
            "format": {"duration": "3.0"}}"#;
        let info = StreamInfo::from_ffprobe_json(json, "a.avi").unwrap();
        assert_eq!(info.sar, None);
        assert_eq!(info.geometry().sar, Sar::SQUARE);
        assert_eq!(info.duration_secs, Some(3.0));
    }

    #[test]
    fn test_not_a_video() {
        let audio = r#"{"streams": [{"codec_type": "audio", "codec_name": "aac"}]}"#;
        assert!(matches!(
            StreamInfo::from_ffprobe_json(audio, "a.m4a"),
            Err(Error::NotAVideo(_))
        ));

        let text = r#"{"streams": [{"codec_type": "video", "codec_name": "ansi",
            "width": 640, "height": 400}]}"#;
        assert!(matches!(
            StreamInfo::from_ffprobe_json(text, "notes.txt"),
            Err(Error::NotAVideo(_))
        ));

        assert!(matches!(
            StreamInfo::from_ffprobe_json("{}", "empty"),
            Err(Error::NotAVideo(_))
        ));
    }

    #[test]
    fn test_garbage_output() {
        assert!(matches!(
            StreamInfo::from_ffprobe_json("not json", "x"),
            Err(Error::Probe(_))
        ));
    }

    #[test]
    fn test_display() {
        let info = StreamInfo::new(1920, 1080)
            .with_sar(Sar::new(8, 9).unwrap())
            .with_field("codec_name", "h264");
        assert_eq!(info.to_string(), "1920x1080 SAR 8:9 h264");
        assert_eq!(info.field("sample_aspect_ratio"), Some("8:9"));
    }

    #[test]
    fn test_command_line() {
        let cmd = Ffprobe::new("ffprobe").command(Path::new("in.mp4"));
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-v", "error", "-select_streams", "v:0", "-show_streams", "-show_format", "-of",
                "json", "in.mp4"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let probe = Ffprobe::new("/nonexistent/bin/ffprobe");
        let err = probe.probe(Path::new("in.mp4")).await.unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
    }
}
