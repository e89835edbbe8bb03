//! fluoromask CLI
//!
//! Command-line interface for de-identifying fluoroscopy recordings.

use anyhow::Context;
use clap::{Parser, Subcommand};
use fluoromask::{
    match_profile,
    pipeline::{discover_inputs, split_inputs, BatchRunner, Outcome},
    processing::{plan_transforms, FilterStep},
    Config, FrameGeometry, Profile, Sar, ScalingPolicy, StreamInfo,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fluoromask")]
#[command(about = "De-identify and normalize fluoroscopy recordings - Crop, Mask, Square Pixels")]
#[command(version)]
struct Cli {
    /// Log planning details and ffmpeg command lines
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert video files (directories are searched recursively)
    Run {
        /// Option file (TOML or JSON), applied in order
        #[arg(short, long = "config")]
        configs: Vec<PathBuf>,

        /// Files converted in parallel
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Plan only, print the filter graphs
        #[arg(long)]
        dry_run: bool,

        /// Replace existing outputs
        #[arg(long)]
        overwrite: bool,

        /// Videos, folders and option files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show the transforms planned for a frame geometry
    Plan {
        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Sample aspect ratio of the stream (e.g. 8:9)
        #[arg(long)]
        sar: Option<Sar>,

        /// Use this profile instead of matching one
        #[arg(short, long)]
        profile: Option<String>,

        /// Square-pixel policy (none, up, down)
        #[arg(long)]
        square_pixel: Option<ScalingPolicy>,

        #[arg(short, long = "config")]
        configs: Vec<PathBuf>,
    },

    /// List configured profiles in match order
    Profiles {
        #[arg(short, long = "config")]
        configs: Vec<PathBuf>,
    },

    /// Write the default configuration
    InitConfig {
        path: PathBuf,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "fluoromask=debug" } else { "fluoromask=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    match cli.command {
        Commands::Run {
            configs,
            jobs,
            dry_run,
            overwrite,
            paths,
        } => cmd_run(configs, jobs, dry_run, overwrite, paths).await,
        Commands::Plan {
            width,
            height,
            sar,
            profile,
            square_pixel,
            configs,
        } => cmd_plan(width, height, sar, profile, square_pixel, configs),
        Commands::Profiles { configs } => cmd_profiles(configs),
        Commands::InitConfig { path, force } => cmd_init_config(path, force),
    }
}

fn load_config(configs: &[PathBuf]) -> anyhow::Result<Config> {
    Config::load(configs).context("Cannot load configuration")
}

async fn cmd_run(
    mut configs: Vec<PathBuf>,
    jobs: Option<usize>,
    dry_run: bool,
    overwrite: bool,
    paths: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let (option_files, inputs) = split_inputs(&paths);
    configs.extend(option_files);
    let (found_options, media) = discover_inputs(&inputs);
    configs.extend(found_options);

    let mut config = load_config(&configs)?;
    if let Some(jobs) = jobs {
        config = config.with_jobs(jobs);
    }
    if overwrite {
        config = config.with_overwrite(true);
    }
    config.validate()?;

    let runner = BatchRunner::from_config(Arc::new(config)).dry_run(dry_run);

    // dropping the batch kills running ffmpeg children
    let report = tokio::select! {
        report = runner.process_all(media) => report,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Interrupted");
        }
    };

    for file in &report.files {
        match &file.outcome {
            Outcome::Converted { destination, .. } => {
                println!("{} -> {}", file.source.display(), destination.display());
            }
            Outcome::Planned {
                destination,
                profile,
                filter_graph,
            } => {
                println!("{} -> {} [{}]", file.source.display(), destination.display(), profile);
                println!("  {}", filter_graph);
            }
            Outcome::Skipped(e) => println!("{}: skipped ({})", file.source.display(), e),
            Outcome::Failed(e) => println!("{}: FAILED ({})", file.source.display(), e),
        }
    }

    println!(
        "\n{} converted, {} skipped, {} failed",
        report.succeeded, report.skipped, report.failed
    );

    if !report.is_success() {
        anyhow::bail!("{} file(s) failed", report.failed);
    }
    Ok(())
}

fn cmd_plan(
    width: u32,
    height: u32,
    sar: Option<Sar>,
    profile: Option<String>,
    square_pixel: Option<ScalingPolicy>,
    configs: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(&configs)?;

    let mut info = StreamInfo::new(width, height);
    if let Some(sar) = sar {
        info = info.with_sar(sar);
    }

    let profile: &Profile = match &profile {
        Some(name) => config
            .profiles
            .get(name)
            .with_context(|| format!("No profile named '{}'", name))?,
        None => match_profile(&info, &config.profiles)?,
    };

    let mut opts = config.plan_options();
    if let Some(policy) = square_pixel {
        opts = opts.with_square_pixel(policy);
    }

    let frame: FrameGeometry = info.geometry();
    let plan = plan_transforms(&frame, profile, &opts)?;

    println!("Input:   {}", frame);
    println!("Profile: {}", profile.name);
    println!("SAR:     {}", plan.sar);
    println!("Steps:");
    for step in &plan.steps {
        match step {
            FilterStep::Overlay => println!("  overlay (mask)"),
            other => println!("  {}", other),
        }
    }
    if let Some(mask) = &plan.mask {
        println!("Mask:    {}x{}, {} shape(s), color {}", mask.width, mask.height, mask.shapes.len(), mask.color);
    }
    let (w, h) = plan.output_size();
    println!("Output:  {}x{}", w, h);
    println!("\n{}", plan.filter_graph("0:v", plan.has_overlay().then_some("1:v")));

    Ok(())
}

fn cmd_profiles(configs: Vec<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(&configs)?;

    println!("Profiles (first match wins)");
    println!("===========================\n");

    for profile in config.profiles.iter() {
        let predicate = profile
            .match_fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {}", profile.name);
        println!("    match: {}", if predicate.is_empty() { "any" } else { &predicate });
        if let Some(sar) = profile.sar {
            println!("    sar:   {}", sar);
        }
        if let Some([x0, y0, d]) = profile.circ {
            println!("    circ:  ({}, {}) d={}", x0, y0, d);
        }
        if !profile.shapes.is_empty() {
            println!("    shapes: {}", profile.shapes.len());
        }
        if profile.inkscape.is_some() {
            println!("    drawn in inkscape");
        }
    }

    Ok(())
}

fn cmd_init_config(path: PathBuf, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }
    Config::default()
        .save(&path)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    println!("Default configuration written to {}", path.display());
    Ok(())
}
