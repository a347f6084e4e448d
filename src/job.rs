use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PORTION_COUNT: u32 = 5;
pub const DEFAULT_OUTPUT_DIR: &str = "result";
pub const DEFAULT_TEMP_DIR: &str = "temp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_FFPROBE: &str = "ffprobe";
pub const DEFAULT_RIFE: &str = "rife-ncnn-vulkan";
pub const DEFAULT_MODEL: &str = "rife-v4.6";
pub const DEFAULT_ENCODER_ARGS: &[&str] = &["-crf", "15", "-c:v", "libx264", "-pix_fmt", "yuv420p"];
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobConfigError {
    #[error("an input file or directory is required")]
    MissingInput,
    #[error("a frame multiplier (--exp) is required")]
    MissingMultiplier,
    #[error("frame multiplier must be at least 1, got {0}")]
    InvalidMultiplier(u32),
    #[error("portion count must be at least 1, got {0}")]
    InvalidPortionCount(u32),
    #[error("interpolation model name cannot be empty")]
    EmptyModel,
    #[error("poll interval must be greater than zero")]
    InvalidPollInterval,
}

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub rife: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VideoJob {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub tools: ToolPaths,
    pub portion_count: u32,
    pub exp: u32,
    pub model: String,
    pub encoder_args: Vec<String>,
    pub tool_timeout: Option<Duration>,
    pub probe_timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub keep_temp: bool,
}

impl VideoJob {
    pub fn new(input: impl Into<PathBuf>, exp: u32) -> Result<Self, JobConfigError> {
        JobSettings {
            input: Some(input.into()),
            exp: Some(exp),
            ..JobSettings::default()
        }
        .resolve()
    }
}

/// Partially specified job settings, as read from a YAML job file or the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSettings {
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub exp: Option<u32>,
    #[serde(default)]
    pub portion: Option<u32>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub temp: Option<PathBuf>,
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    #[serde(default)]
    pub ffprobe: Option<PathBuf>,
    #[serde(default)]
    pub rife: Option<PathBuf>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ffmpeg_args: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub keep_temp: Option<bool>,
}

impl JobSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        let settings: JobSettings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse job YAML: {}", path.display()))?;
        Ok(settings)
    }

    /// Fill every unset field from `lower`.
    pub fn layered_over(self, lower: JobSettings) -> JobSettings {
        JobSettings {
            input: self.input.or(lower.input),
            exp: self.exp.or(lower.exp),
            portion: self.portion.or(lower.portion),
            output: self.output.or(lower.output),
            temp: self.temp.or(lower.temp),
            ffmpeg: self.ffmpeg.or(lower.ffmpeg),
            ffprobe: self.ffprobe.or(lower.ffprobe),
            rife: self.rife.or(lower.rife),
            model: self.model.or(lower.model),
            ffmpeg_args: self.ffmpeg_args.or(lower.ffmpeg_args),
            timeout_secs: self.timeout_secs.or(lower.timeout_secs),
            probe_timeout_secs: self.probe_timeout_secs.or(lower.probe_timeout_secs),
            poll_interval_ms: self.poll_interval_ms.or(lower.poll_interval_ms),
            keep_temp: self.keep_temp.or(lower.keep_temp),
        }
    }

    pub fn resolve(self) -> Result<VideoJob, JobConfigError> {
        let input = self.input.ok_or(JobConfigError::MissingInput)?;
        let exp = self.exp.ok_or(JobConfigError::MissingMultiplier)?;
        if exp == 0 {
            return Err(JobConfigError::InvalidMultiplier(exp));
        }
        let portion_count = self.portion.unwrap_or(DEFAULT_PORTION_COUNT);
        if portion_count == 0 {
            return Err(JobConfigError::InvalidPortionCount(portion_count));
        }
        let model = self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        if model.trim().is_empty() {
            return Err(JobConfigError::EmptyModel);
        }
        let poll_interval_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms == 0 {
            return Err(JobConfigError::InvalidPollInterval);
        }
        let encoder_args = match self.ffmpeg_args {
            Some(args) if !args.is_empty() => args,
            _ => DEFAULT_ENCODER_ARGS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(VideoJob {
            input,
            output_dir: self
                .output
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            temp_dir: self.temp.unwrap_or_else(|| PathBuf::from(DEFAULT_TEMP_DIR)),
            tools: ToolPaths {
                ffmpeg: self.ffmpeg.unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
                ffprobe: self.ffprobe.unwrap_or_else(|| PathBuf::from(DEFAULT_FFPROBE)),
                rife: self.rife.unwrap_or_else(|| PathBuf::from(DEFAULT_RIFE)),
            },
            portion_count,
            exp,
            model,
            encoder_args,
            tool_timeout: self.timeout_secs.map(Duration::from_secs),
            probe_timeout: Some(Duration::from_secs(
                self.probe_timeout_secs.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS),
            )),
            poll_interval: Duration::from_millis(poll_interval_ms),
            keep_temp: self.keep_temp.unwrap_or(false),
        })
    }
}
