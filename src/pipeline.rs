use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use glob::glob;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::job::VideoJob;
use crate::metadata::{Portion, VideoMetadata, probe_video};
use crate::observability::MetricsCollector;
use crate::progress::ProgressReporter;
use crate::report::{JobSummary, VideoOutcome};
use crate::stages::{
    Concatenator, FrameExtractor, InterpolationRunner, SegmentEncoder, StageContext,
};
use crate::workspace::{WorkingDirectories, clear_dir};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Probe,
    Extract,
    Interpolate,
    Encode,
    Concat,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Extract => "extract",
            Self::Interpolate => "interpolate",
            Self::Encode => "encode",
            Self::Concat => "concat",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Probe => "Probing the video",
            Self::Extract => "Extracting the video",
            Self::Interpolate => "Video frame interpolating",
            Self::Encode => "Encoding the video",
            Self::Concat => "Concatenating the video",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoState {
    Probing,
    Extracting,
    Interpolating,
    Encoding,
    Concatenating,
    Done,
}

impl From<StageKind> for VideoState {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Probe => Self::Probing,
            StageKind::Extract => Self::Extracting,
            StageKind::Interpolate => Self::Interpolating,
            StageKind::Encode => Self::Encoding,
            StageKind::Concat => Self::Concatenating,
        }
    }
}

pub trait PortionStage {
    fn kind(&self) -> StageKind;
    fn run(&mut self, portion: &Portion, reporter: &dyn ProgressReporter) -> Result<()>;
}

/// Resolve the job input to the list of videos to process.
pub fn resolve_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("Input '{}' is neither a file nor a directory", input.display());
    }

    let escaped = glob::Pattern::escape(&input.to_string_lossy());
    let pattern = Path::new(&escaped).join("*.mp4");
    let pattern = pattern.to_string_lossy();
    let mut resolved = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("Invalid input pattern: {pattern}"))? {
        let path = entry?;
        if path.is_file() {
            resolved.push(path);
        }
    }
    resolved.sort();
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct ProcessedVideo {
    pub metadata: VideoMetadata,
    pub output: PathBuf,
    pub portions_processed: u32,
}

/// Drives every video of a job through the portion loop and concatenation.
pub struct PipelineManager<'a> {
    job: &'a VideoJob,
    dirs: WorkingDirectories,
    metrics: MetricsCollector,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> PipelineManager<'a> {
    pub fn new(job: &'a VideoJob, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            job,
            dirs: WorkingDirectories::new(&job.temp_dir),
            metrics: MetricsCollector::new(),
            reporter,
        }
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn plan(&self) -> Result<Vec<VideoMetadata>> {
        resolve_inputs(&self.job.input)?
            .iter()
            .map(|video| self.probe(video))
            .collect()
    }

    /// Process every input. A failing video is recorded and the job moves on.
    pub fn run(&self) -> Result<JobSummary> {
        self.metrics.reset();
        let started_at = Utc::now();
        let total_start = Instant::now();

        let inputs = resolve_inputs(&self.job.input)?;
        if inputs.is_empty() {
            warn!(input = %self.job.input.display(), "No .mp4 inputs found. Nothing to process.");
        }
        self.reporter.videos_planned(inputs.len());

        let mut videos = Vec::with_capacity(inputs.len());
        for (index, video) in inputs.iter().enumerate() {
            let span = tracing::span!(tracing::Level::INFO, "video", video = %video.display());
            let _span_guard = span.enter();
            let video_start = Instant::now();
            let mut state = VideoState::Probing;

            let outcome = match self.process_video(index, video, &mut state) {
                Ok(processed) => {
                    self.metrics.record_video_completed();
                    info!(output = %processed.output.display(), "Video completed");
                    VideoOutcome::completed(video, &processed, video_start.elapsed())
                }
                Err(err) => {
                    self.metrics.record_video_failed();
                    error!(stage = ?state, "Video failed: {err:#}");
                    VideoOutcome::failed(video, state, &err, video_start.elapsed())
                }
            };
            self.reporter.video_finished(index, outcome.succeeded());
            videos.push(outcome);
        }

        if !self.job.keep_temp {
            self.dirs.remove()?;
        }
        self.metrics.record_total_duration(total_start.elapsed());

        Ok(JobSummary {
            started_at,
            finished_at: Utc::now(),
            videos,
        })
    }

    fn probe(&self, video: &Path) -> Result<VideoMetadata> {
        let _timer = self.metrics.start_stage(StageKind::Probe.as_str());
        probe_video(
            &self.job.tools.ffprobe,
            video,
            self.job.portion_count,
            self.job.probe_timeout,
        )
    }

    #[instrument(skip(self, video, state))]
    pub fn process_video(
        &self,
        index: usize,
        video: &Path,
        state: &mut VideoState,
    ) -> Result<ProcessedVideo> {
        *state = VideoState::Probing;
        let metadata = self.probe(video)?;
        let portions = metadata.portions();
        let portion_total = portions.len() as u32;
        self.reporter.video_started(index, video, portion_total);
        info!(
            total_frames = metadata.total_frames,
            frame_rate = %metadata.frame_rate,
            section_length = metadata.section_length(),
            remainder = metadata.last_section_length(),
            "Video probed"
        );

        let ctx = StageContext {
            job: self.job,
            video: &metadata,
            dirs: &self.dirs,
        };
        let mut extractor = FrameExtractor::new(ctx);
        let mut interpolator = InterpolationRunner::new(ctx);
        let mut encoder = SegmentEncoder::new(ctx);
        let concatenator = Concatenator::new(ctx);

        self.dirs.clear_all()?;

        let mut portions_processed = 0;
        for portion in &portions {
            let span = tracing::span!(tracing::Level::DEBUG, "portion", portion = portion.index);
            let _span_guard = span.enter();
            self.reporter.portion_started(portion.index, portion_total);
            if portion.is_empty() {
                debug!("Skipping empty portion");
                continue;
            }

            let stages: [&mut dyn PortionStage; 3] =
                [&mut extractor, &mut interpolator, &mut encoder];
            for stage in stages {
                let kind = stage.kind();
                *state = kind.into();
                self.reporter.status(&format!(
                    "{} / {} portion, {}. eta {:.2}%",
                    portion.index + 1,
                    portion_total,
                    kind.label().to_lowercase(),
                    f64::from(portion.index) / f64::from(portion_total) * 100.0
                ));
                let span = tracing::span!(tracing::Level::DEBUG, "stage", stage = kind.as_str());
                let _stage_guard = span.enter();
                let _timer = self.metrics.start_stage(kind.as_str());
                stage.run(portion, self.reporter)?;
                if kind == StageKind::Interpolate {
                    // Source frames are not needed once the interpolated set exists.
                    clear_dir(self.dirs.input_frames())?;
                }
            }

            self.dirs.clear_frames()?;
            portions_processed += 1;
            self.metrics
                .record_portion(portion.duration * u64::from(self.job.exp));
        }

        *state = VideoState::Concatenating;
        self.reporter.status("Concatenating the video.");
        let manifest = encoder.write_manifest()?;
        let audio = if metadata.has_audio {
            Some(extractor.extract_audio()?)
        } else {
            warn!("Source has no audio stream; output will be silent");
            None
        };
        let output = {
            let _timer = self.metrics.start_stage(StageKind::Concat.as_str());
            concatenator.run(&manifest, audio.as_deref(), self.reporter)?
        };

        *state = VideoState::Done;
        self.reporter.status("Task completed.");
        Ok(ProcessedVideo {
            metadata,
            output,
            portions_processed,
        })
    }
}
