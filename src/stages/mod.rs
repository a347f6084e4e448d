pub mod concat;
pub mod encode;
pub mod extract;
pub mod interpolate;

use std::time::Duration;

use anyhow::{Context, Result};

use crate::job::VideoJob;
use crate::metadata::VideoMetadata;
use crate::pipeline::StageKind;
use crate::process::{FrameProgress, ToolCommand, parse_frame_progress};
use crate::progress::ProgressReporter;
use crate::workspace::WorkingDirectories;

pub use concat::Concatenator;
pub use encode::SegmentEncoder;
pub use extract::FrameExtractor;
pub use interpolate::InterpolationRunner;

#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub job: &'a VideoJob,
    pub video: &'a VideoMetadata,
    pub dirs: &'a WorkingDirectories,
}

/// Frame file name pattern shared by ffmpeg and the interpolation tool.
pub const FRAME_PATTERN: &str = "%08d.png";

/// Run an ffmpeg invocation, turning its `frame=` lines into stage progress.
pub(crate) fn run_with_frame_progress(
    command: &ToolCommand,
    stage: StageKind,
    total: u64,
    timeout: Option<Duration>,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    reporter.stage_started(stage, total);
    let mut progress = FrameProgress::new(total);
    command
        .run_streaming(timeout, |line| {
            if let Some(frame) = parse_frame_progress(line)
                && let Some(current) = progress.observe(frame)
            {
                reporter.stage_progress(stage, current, total);
            }
        })
        .with_context(|| format!("{} failed: {command}", stage.label()))?;
    reporter.stage_finished(stage);
    Ok(())
}
