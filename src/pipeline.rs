//! Batch processing pipeline
//!
//! Connects probe → profile match → plan → transcode for every input file.
//! Files are independent: a file that cannot be handled is reported and the
//! batch moves on.

use crate::config::{is_option_file, Config};
use crate::error::{Error, Result};
use crate::output::{destination_for, prepare_destination, FfmpegTranscoder, TranscodeJob, Transcoder};
use crate::probe::{Ffprobe, MediaProbe};
use crate::processing::plan_transforms;
use crate::profile::match_profile;

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What happened to one input
#[derive(Debug)]
pub enum Outcome {
    Converted {
        destination: PathBuf,
        profile: String,
    },
    /// Dry run: planned but not transcoded
    Planned {
        destination: PathBuf,
        profile: String,
        filter_graph: String,
    },
    /// Input not applicable (not a video, no profile, output exists, ...)
    Skipped(Error),
    Failed(Error),
}

#[derive(Debug)]
pub struct FileReport {
    pub source: PathBuf,
    pub outcome: Outcome,
}

/// Per-batch tally, files listed in input order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    fn record(&mut self, report: FileReport) {
        match report.outcome {
            Outcome::Converted { .. } | Outcome::Planned { .. } => self.succeeded += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
        self.files.push(report);
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs the per-file pipeline over a set of inputs
pub struct BatchRunner {
    config: Arc<Config>,
    probe: Arc<dyn MediaProbe>,
    transcoder: Arc<dyn Transcoder>,
    dry_run: bool,
}

impl BatchRunner {
    pub fn new(config: Arc<Config>, probe: Arc<dyn MediaProbe>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            config,
            probe,
            transcoder,
            dry_run: false,
        }
    }

    /// Runner backed by the configured `ffprobe` and `ffmpeg` binaries
    pub fn from_config(config: Arc<Config>) -> Self {
        let mut probe = Ffprobe::new(&config.ffprobe);
        if let Some(timeout) = config.timeout() {
            probe = probe.with_timeout(timeout);
        }
        let transcoder = FfmpegTranscoder::from_config(&config);
        Self::new(config, Arc::new(probe), Arc::new(transcoder))
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Process `files`, at most `jobs` at a time
    pub async fn process_all(&self, files: Vec<PathBuf>) -> BatchReport {
        let jobs = self.config.jobs.max(1);
        tracing::info!("Processing {} file(s), {} at a time", files.len(), jobs);

        let mut reports: Vec<(usize, FileReport)> = stream::iter(files.into_iter().enumerate())
            .map(|(i, source)| async move { (i, self.process(source).await) })
            .buffer_unordered(jobs)
            .collect()
            .await;
        reports.sort_by_key(|(i, _)| *i);

        let mut batch = BatchReport::default();
        for (_, report) in reports {
            batch.record(report);
        }
        tracing::info!(
            "Done: {} converted, {} skipped, {} failed",
            batch.succeeded,
            batch.skipped,
            batch.failed
        );
        batch
    }

    /// Run one file through the pipeline; never fails the batch
    pub async fn process(&self, source: PathBuf) -> FileReport {
        let outcome = match self.convert(&source).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_skip() => {
                tracing::warn!("Skipping {}: {}", source.display(), e);
                Outcome::Skipped(e)
            }
            Err(e) => {
                tracing::error!("Failed {}: {}", source.display(), e);
                Outcome::Failed(e)
            }
        };
        FileReport { source, outcome }
    }

    async fn convert(&self, source: &Path) -> Result<Outcome> {
        let config = &self.config;
        let destination = destination_for(source, config)?;
        if !config.overwrite && destination.exists() {
            return Err(Error::OutputExists(destination));
        }

        let info = self.probe.probe(source).await?;
        let profile = match_profile(&info, &config.profiles)?;
        let plan = plan_transforms(&info.geometry(), profile, &config.plan_options())?;
        tracing::debug!("{}: {}", source.display(), plan.filter_chain());

        if self.dry_run {
            let mask_pad = plan.has_overlay().then_some("1:v");
            return Ok(Outcome::Planned {
                filter_graph: plan.filter_graph("0:v", mask_pad),
                destination,
                profile: profile.name.clone(),
            });
        }

        prepare_destination(&destination, config.overwrite)?;
        tracing::info!(
            "{} -> {} [{}]",
            source.display(),
            destination.display(),
            profile.name
        );
        let job = TranscodeJob::new(source, &destination, plan);
        self.transcoder.transcode(&job).await?;

        Ok(Outcome::Converted {
            destination,
            profile: profile.name.clone(),
        })
    }
}

/// Separate option files from media inputs given on the command line
pub fn split_inputs(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    paths
        .iter()
        .cloned()
        .partition(|p| p.is_file() && is_option_file(p))
}

/// Expand directories into the files below them, sorted by path.
///
/// Returns `(option_files, media)`. Option files found while walking a
/// directory are collected in path order so they apply after the ones
/// named on the command line. Hidden entries are left out.
pub fn discover_inputs(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut options = Vec::new();
    let mut media = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            walk(path, &mut found);
            found.sort();
            let (opts, files): (Vec<_>, Vec<_>) = found.into_iter().partition(|p| is_option_file(p));
            for opt in &opts {
                tracing::info!("Option file {}", opt.display());
            }
            options.extend(opts);
            media.extend(files);
        } else if path.exists() {
            media.push(path.clone());
        } else {
            tracing::warn!("Input not found: {}", path.display());
        }
    }
    (options, media)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }
        if path.is_dir() {
            walk(&path, found);
        } else {
            found.push(path);
        }
    }
}
