//! ffmpeg transcode driver
//!
//! Maps a [`TransformPlan`](crate::processing::TransformPlan) onto an
//! `ffmpeg -filter_complex` invocation and runs it as a child process.

use crate::config::{Config, MaskRender};
use crate::error::{Error, Result};
use crate::types::{OrderedMap, Scalar};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{TranscodeJob, Transcoder};

/// Pad name of the mask source inside a lavfi graph
const MASK_PAD: &str = "mask";

/// Lines of ffmpeg's stderr kept in error reports
const STDERR_TAIL_LINES: usize = 20;

/// Transcoder running the system `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    keep_audio: bool,
    overwrite: bool,
    mask_render: MaskRender,
    output_options: OrderedMap<Scalar>,
    timeout: Option<Duration>,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            keep_audio: true,
            overwrite: false,
            mask_render: MaskRender::Image,
            output_options: OrderedMap::new(),
            timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.ffmpeg.clone(),
            keep_audio: config.keep_audio,
            overwrite: config.overwrite,
            mask_render: config.mask_render,
            output_options: config.output_options.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_mask_render(mut self, render: MaskRender) -> Self {
        self.mask_render = render;
        self
    }

    pub fn with_keep_audio(mut self, keep: bool) -> Self {
        self.keep_audio = keep;
        self
    }

    pub fn with_output_option(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        self.output_options.insert(key, value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the job needs its mask written to an image first
    fn needs_mask_image(&self, job: &TranscodeJob) -> bool {
        self.mask_render == MaskRender::Image && job.plan.has_overlay() && job.plan.mask.is_some()
    }

    /// Filter graph for `job`, with the mask either on input 1 or generated
    pub fn filter_graph(&self, job: &TranscodeJob) -> String {
        let plan = &job.plan;
        match (&plan.mask, self.mask_render) {
            (Some(_), MaskRender::Image) if plan.has_overlay() => plan.filter_graph("0:v", Some("1:v")),
            (Some(mask), MaskRender::Lavfi) if plan.has_overlay() => format!(
                "{};{}",
                mask.to_lavfi(MASK_PAD),
                plan.filter_graph("0:v", Some(MASK_PAD))
            ),
            _ => plan.filter_graph("0:v", None),
        }
    }

    /// Full argument list. `mask_image` is the rendered mask, if any.
    pub fn build_args(&self, job: &TranscodeJob, mask_image: Option<&Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(if self.overwrite { "-y" } else { "-n" }.into());

        args.push("-i".into());
        args.push(job.source.clone().into());
        if let Some(mask) = mask_image {
            args.push("-i".into());
            args.push(mask.into());
        }

        args.push("-filter_complex".into());
        args.push(self.filter_graph(job).into());

        if !self.keep_audio {
            args.push("-an".into());
        }

        for (key, value) in self.output_options.iter() {
            args.push(format!("-{}", key).into());
            args.push(value.to_string().into());
        }

        args.push(job.destination.clone().into());
        args
    }

    async fn run(&self, args: Vec<OsString>, source: &Path) -> Result<()> {
        let program = self.program.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, output).await.map_err(|_| {
                Error::Timeout(format!("{} on {} after {:?}", program, source.display(), limit))
            })?,
            None => output.await,
        }?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::external(program, output.status.code(), tail(&stderr)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, job: &TranscodeJob) -> Result<()> {
        // scratch space lives until ffmpeg has read the mask
        let scratch = tempfile::Builder::new().prefix("fluoromask-").tempdir()?;

        let mask_image = match (&job.plan.mask, self.needs_mask_image(job)) {
            (Some(mask), true) => {
                let path = scratch.path().join("mask.png");
                let mask = mask.clone();
                let target = path.clone();
                tokio::task::spawn_blocking(move || mask.write_png(&target))
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e)))??;
                Some(path)
            }
            _ => None,
        };

        let args = self.build_args(job, mask_image.as_deref());
        tracing::debug!(
            "{} {}",
            self.program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        self.run(args, &job.source).await
    }
}

/// Last lines of a process's stderr
fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
