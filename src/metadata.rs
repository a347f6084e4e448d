use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::process::ToolCommand;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no video stream found in {0}")]
    NoVideoStream(PathBuf),
    #[error("malformed probe output for {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("probe output for {path} is missing '{field}'")]
    MissingField { path: PathBuf, field: &'static str },
    #[error("invalid frame rate '{0}'")]
    InvalidFrameRate(String),
    #[error("invalid frame count '{0}'")]
    InvalidFrameCount(String),
}

/// Exact frame rate as reported by ffprobe (`30000/1001`, `25/1`, `25`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u64,
    pub denominator: u64,
}

impl FrameRate {
    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    pub fn multiplied(&self, factor: u32) -> FrameRate {
        FrameRate {
            numerator: self.numerator * u64::from(factor),
            denominator: self.denominator,
        }
    }
}

impl FromStr for FrameRate {
    type Err = ProbeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ProbeError::InvalidFrameRate(raw.to_string());
        let trimmed = raw.trim();
        let (numerator, denominator) = match trimmed.split_once('/') {
            Some((num, den)) => (
                num.trim().parse::<u64>().map_err(|_| invalid())?,
                den.trim().parse::<u64>().map_err(|_| invalid())?,
            ),
            None => (trimmed.parse::<u64>().map_err(|_| invalid())?, 1),
        };
        if numerator == 0 || denominator == 0 {
            return Err(invalid());
        }
        Ok(FrameRate {
            numerator,
            denominator,
        })
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Portion {
    pub index: u32,
    pub start: u64,
    pub duration: u64,
}

impl Portion {
    /// Inclusive index of the last frame.
    pub fn end_frame(&self) -> u64 {
        (self.start + self.duration).saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.duration == 0
    }
}

#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub path: PathBuf,
    pub total_frames: u64,
    pub frame_rate: FrameRate,
    pub portion_count: u32,
    pub has_audio: bool,
}

impl VideoMetadata {
    pub fn new(
        path: impl Into<PathBuf>,
        total_frames: u64,
        frame_rate: FrameRate,
        portion_count: u32,
    ) -> Self {
        Self {
            path: path.into(),
            total_frames,
            frame_rate,
            portion_count,
            has_audio: true,
        }
    }

    pub fn section_length(&self) -> u64 {
        self.total_frames / u64::from(self.portion_count.max(1))
    }

    pub fn last_section_length(&self) -> u64 {
        self.total_frames % u64::from(self.portion_count.max(1))
    }

    /// First frame of portion `p`, `None` past the final remainder portion.
    pub fn begin_frame(&self, portion: u32) -> Option<u64> {
        (portion <= self.portion_count).then(|| self.section_length() * u64::from(portion))
    }

    pub fn duration(&self, portion: u32) -> u64 {
        if portion == self.portion_count {
            self.last_section_length()
        } else {
            self.section_length()
        }
    }

    pub fn portion(&self, index: u32) -> Option<Portion> {
        let start = self.begin_frame(index)?;
        Some(Portion {
            index,
            start,
            duration: self.duration(index),
        })
    }

    /// Every portion `0..=portion_count`, the last one holding the remainder.
    pub fn portions(&self) -> Vec<Portion> {
        (0..=self.portion_count)
            .filter_map(|index| self.portion(index))
            .collect()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    nb_frames: Option<Value>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

pub fn probe_video(
    ffprobe: &Path,
    video: &Path,
    portion_count: u32,
    timeout: Option<Duration>,
) -> Result<VideoMetadata> {
    let output = stream_probe(ffprobe, video, "v", timeout)?;
    let (total_frames, frame_rate) = parse_video_stream(video, &output)?;

    let audio = stream_probe(ffprobe, video, "a", timeout)?;
    let has_audio = count_streams(video, &audio)? > 0;

    debug!(
        video = %video.display(),
        total_frames,
        frame_rate = %frame_rate,
        has_audio,
        "Probed video"
    );

    let mut metadata = VideoMetadata::new(video, total_frames, frame_rate, portion_count);
    metadata.has_audio = has_audio;
    Ok(metadata)
}

fn stream_probe(
    ffprobe: &Path,
    video: &Path,
    selector: &str,
    timeout: Option<Duration>,
) -> Result<String> {
    let command = ToolCommand::new(ffprobe)
        .args(["-v", "error", "-i"])
        .arg(video)
        .args(["-show_streams", "-select_streams", selector, "-print_format", "json"]);
    let output = command
        .run_stdout(timeout)
        .with_context(|| format!("ffprobe failed for {}", video.display()))?;
    Ok(output.stdout)
}

fn parse_probe(video: &Path, raw: &str) -> Result<ProbeOutput, ProbeError> {
    serde_json::from_str(raw).map_err(|err| ProbeError::Malformed {
        path: video.to_path_buf(),
        reason: err.to_string(),
    })
}

fn count_streams(video: &Path, raw: &str) -> Result<usize, ProbeError> {
    Ok(parse_probe(video, raw)?.streams.len())
}

pub fn parse_video_stream(video: &Path, raw: &str) -> Result<(u64, FrameRate), ProbeError> {
    let probe = parse_probe(video, raw)?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::NoVideoStream(video.to_path_buf()))?;

    let frames = stream.nb_frames.ok_or_else(|| ProbeError::MissingField {
        path: video.to_path_buf(),
        field: "nb_frames",
    })?;
    let total_frames = match &frames {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ProbeError::InvalidFrameCount(frames.to_string()))?;

    let rate = stream.r_frame_rate.ok_or_else(|| ProbeError::MissingField {
        path: video.to_path_buf(),
        field: "r_frame_rate",
    })?;
    Ok((total_frames, rate.parse()?))
}
