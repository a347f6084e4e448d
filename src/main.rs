use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use auto_rife::job::{JobSettings, VideoJob};
use auto_rife::observability::log_snapshot;
use auto_rife::pipeline::PipelineManager;
use auto_rife::progress::{
    BarAwareWriter, ConsoleReporter, LogReporter, ProgressReporter, stderr_bars,
};
use auto_rife::validation::validate_job;
use clap::{Parser, ValueHint};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use indicatif::MultiProgress;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let bars = (!cli.quiet && !cli.dry_run && io::stderr().is_terminal()).then(stderr_bars);
    configure_tracing(bars.as_ref())?;

    let job = build_job(&cli)?;
    let report = validate_job(&job);
    for warning in &report.warnings {
        warn!("{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!("{error_msg}");
        }
        return Err(anyhow!(
            "Job validation failed with {} error(s)",
            report.errors.len()
        ));
    }

    if cli.dry_run {
        return print_plan(&job);
    }

    let reporter: Box<dyn ProgressReporter> = match bars {
        Some(multi) => Box::new(ConsoleReporter::new(multi)),
        None => Box::new(LogReporter),
    };

    let (mut summary, metrics) = {
        let manager = PipelineManager::new(&job, reporter.as_ref());
        let summary = manager.run()?;
        (summary, manager.metrics().snapshot())
    };
    drop(reporter);

    if cli.digest {
        summary.attach_digests()?;
    }

    for video in &summary.videos {
        match (&video.output, &video.error) {
            (Some(output), _) => info!(
                input = %video.input.display(),
                output = %output.display(),
                sha256 = video.sha256.as_deref().unwrap_or("-"),
                "Video completed"
            ),
            (None, Some(err)) => error!(
                input = %video.input.display(),
                stage = ?video.failed_stage,
                "Video failed: {err}"
            ),
            (None, None) => {}
        }
    }

    if cli.print_metrics {
        log_snapshot(&metrics);
    }
    if let Some(path) = &cli.metrics_json {
        ensure_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &metrics)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = &cli.metrics_prometheus {
        ensure_parent(path)?;
        std::fs::write(path, metrics.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    if let Some(path) = &cli.report {
        summary.write_json(path)?;
        info!(report = %path.display(), "Job summary written");
    }

    let failed = summary.failed().count();
    if failed > 0 {
        bail!(
            "{failed} of {} video(s) failed",
            summary.videos.len()
        );
    }
    info!(videos = summary.completed(), "Task completed");
    Ok(())
}

fn configure_tracing(bars: Option<&MultiProgress>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Log lines share stderr with the bars and must not tear them.
    let writer = match bars.cloned() {
        Some(multi) => BoxMakeWriter::new(move || BarAwareWriter::new(multi.clone())),
        None => BoxMakeWriter::new(io::stderr),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

fn build_job(cli: &Cli) -> Result<VideoJob> {
    let from_cli = JobSettings {
        input: cli.input.clone(),
        exp: cli.exp,
        portion: cli.portion,
        output: cli.output.clone(),
        temp: cli.temp.clone(),
        ffmpeg: cli.ffmpeg.clone(),
        ffprobe: cli.ffprobe.clone(),
        rife: cli.rife.clone(),
        model: cli.model.clone(),
        ffmpeg_args: cli.ffmpeg_args.clone(),
        timeout_secs: cli.timeout,
        probe_timeout_secs: None,
        poll_interval_ms: cli.poll_interval_ms,
        keep_temp: cli.keep_temp.then_some(true),
    };
    let settings = match &cli.config {
        Some(path) => from_cli.layered_over(JobSettings::load(path)?),
        None => from_cli,
    };
    Ok(settings.resolve()?)
}

fn print_plan(job: &VideoJob) -> Result<()> {
    let reporter = LogReporter;
    let manager = PipelineManager::new(job, &reporter);
    for video in manager.plan()? {
        println!(
            "{}: {} frames @ {:.3} fps ({}), audio: {}",
            video.path.display(),
            video.total_frames,
            video.frame_rate.as_f64(),
            video.frame_rate,
            if video.has_audio { "yes" } else { "no" }
        );
        for portion in video.portions() {
            if portion.is_empty() {
                println!("  portion {:>3}: empty, skipped", portion.index);
                continue;
            }
            println!(
                "  portion {:>3}: frames {}..={} ({} in, {} out)",
                portion.index,
                portion.start,
                portion.end_frame(),
                portion.duration,
                portion.duration * u64::from(job.exp)
            );
        }
    }
    Ok(())
}

fn ensure_parent(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "auto-rife",
    version,
    about = "Multiply a video's frame rate with RIFE, one bounded portion at a time"
)]
struct Cli {
    #[arg(
        short,
        long,
        value_hint = ValueHint::AnyPath,
        required_unless_present = "config",
        help = "A directory of .mp4 files or a single video file"
    )]
    input: Option<PathBuf>,
    #[arg(
        short,
        long,
        required_unless_present = "config",
        help = "How many times the frame rate is multiplied"
    )]
    exp: Option<u32>,
    #[arg(short, long, help = "How many portions the video is divided into [default: 5]")]
    portion: Option<u32>,
    #[arg(short, long, value_hint = ValueHint::DirPath, help = "Where results are placed [default: result]")]
    output: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath, help = "Temporary working directory [default: temp]")]
    temp: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::ExecutablePath, help = "ffmpeg binary [default: ffmpeg]")]
    ffmpeg: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::ExecutablePath, help = "ffprobe binary [default: ffprobe]")]
    ffprobe: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::ExecutablePath, help = "rife-ncnn-vulkan binary [default: rife-ncnn-vulkan]")]
    rife: Option<PathBuf>,
    #[arg(long, help = "Interpolation model name [default: rife-v4.6]")]
    model: Option<String>,
    #[arg(long, value_hint = ValueHint::FilePath, help = "YAML job file; command-line values take precedence")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "SECONDS", help = "Kill any external tool running longer than this")]
    timeout: Option<u64>,
    #[arg(long = "poll-interval-ms", value_name = "MS", help = "Interpolation progress polling interval [default: 1000]")]
    poll_interval_ms: Option<u64>,
    #[arg(long, help = "Leave the working directories in place afterwards")]
    keep_temp: bool,
    #[arg(long, help = "Probe the inputs and print the portion plan without processing")]
    dry_run: bool,
    #[arg(short, long, help = "Log progress instead of drawing progress bars")]
    quiet: bool,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
    #[arg(long, help = "Write a JSON summary of every video's outcome")]
    report: Option<PathBuf>,
    #[arg(long, help = "Record the SHA-256 of every output in the summary")]
    digest: bool,
    #[arg(
        long = "ffmpegArgs",
        visible_alias = "ffmpeg-args",
        num_args = 1..,
        allow_hyphen_values = true,
        value_name = "ARGS",
        help = "Encoder arguments, consuming the rest of the command line [default: -crf 15 -c:v libx264 -pix_fmt yuv420p]"
    )]
    ffmpeg_args: Option<Vec<String>>,
}
