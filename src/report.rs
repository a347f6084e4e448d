use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::pipeline::{ProcessedVideo, VideoState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoOutcome {
    pub input: PathBuf,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
    pub portions_processed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<VideoState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub duration_ms: f64,
}

impl VideoOutcome {
    pub fn completed(input: &Path, processed: &ProcessedVideo, elapsed: Duration) -> Self {
        Self {
            input: input.to_path_buf(),
            status: OutcomeStatus::Completed,
            output: Some(processed.output.clone()),
            total_frames: Some(processed.metadata.total_frames),
            portions_processed: processed.portions_processed,
            failed_stage: None,
            error: None,
            sha256: None,
            duration_ms: elapsed.as_secs_f64() * 1_000.0,
        }
    }

    pub fn failed(input: &Path, stage: VideoState, err: &anyhow::Error, elapsed: Duration) -> Self {
        Self {
            input: input.to_path_buf(),
            status: OutcomeStatus::Failed,
            output: None,
            total_frames: None,
            portions_processed: 0,
            failed_stage: Some(stage),
            error: Some(format!("{err:#}")),
            sha256: None,
            duration_ms: elapsed.as_secs_f64() * 1_000.0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub videos: Vec<VideoOutcome>,
}

impl JobSummary {
    pub fn completed(&self) -> usize {
        self.videos.iter().filter(|v| v.succeeded()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &VideoOutcome> {
        self.videos.iter().filter(|v| !v.succeeded())
    }

    pub fn attach_digests(&mut self) -> Result<()> {
        for video in &mut self.videos {
            if let Some(output) = &video.output {
                video.sha256 = Some(compute_sha256(output)?);
            }
        }
        Ok(())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create report directory: {}", parent.display())
            })?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Failed to write report JSON: {}", path.display()))
    }
}

/// SHA-256 of the file at `path` as a hex string.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
