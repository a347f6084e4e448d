use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::metadata::Portion;
use crate::pipeline::{PortionStage, StageKind};
use crate::process::ToolCommand;
use crate::progress::ProgressReporter;
use crate::stages::concat::remove_sidecar;
use crate::stages::{FRAME_PATTERN, StageContext, run_with_frame_progress};

pub struct FrameExtractor<'a> {
    ctx: StageContext<'a>,
}

impl<'a> FrameExtractor<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx }
    }

    /// Frame-selection filter for the inclusive range covered by `portion`.
    pub fn select_filter(portion: &Portion) -> String {
        format!(
            "select=between(n\\,{}\\,{}), setpts=PTS-STARTPTS",
            portion.start,
            portion.end_frame()
        )
    }

    pub fn command(&self, portion: &Portion) -> ToolCommand {
        ToolCommand::new(&self.ctx.job.tools.ffmpeg)
            .arg("-i")
            .arg(&self.ctx.video.path)
            .arg("-vf")
            .arg(Self::select_filter(portion))
            .args(["-y", "-hide_banner"])
            .arg(self.ctx.dirs.input_frames().join(FRAME_PATTERN))
    }

    pub fn audio_command(&self) -> ToolCommand {
        ToolCommand::new(&self.ctx.job.tools.ffmpeg)
            .arg("-i")
            .arg(&self.ctx.video.path)
            .args(["-vn", "-y", "-hide_banner", "-acodec", "copy"])
            .arg(self.audio_path())
    }

    pub fn audio_path(&self) -> PathBuf {
        self.ctx.dirs.audio_path(&self.ctx.video.file_name())
    }

    pub fn extract_audio(&self) -> Result<PathBuf> {
        let path = self.audio_path();
        let output = match self.audio_command().run_captured(self.ctx.job.tool_timeout) {
            Ok(output) => output,
            Err(err) => {
                remove_sidecar(&path);
                return Err(err).with_context(|| {
                    format!("Audio extraction failed for {}", self.ctx.video.path.display())
                });
            }
        };
        info!(
            audio = %path.display(),
            elapsed_ms = output.elapsed.as_millis() as u64,
            "Audio track extracted"
        );
        Ok(path)
    }
}

impl PortionStage for FrameExtractor<'_> {
    fn kind(&self) -> StageKind {
        StageKind::Extract
    }

    fn run(&mut self, portion: &Portion, reporter: &dyn ProgressReporter) -> Result<()> {
        debug!(
            start = portion.start,
            end = portion.end_frame(),
            "Extracting frame range"
        );
        run_with_frame_progress(
            &self.command(portion),
            self.kind(),
            portion.duration,
            self.ctx.job.tool_timeout,
            reporter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_selects_inclusive_range() {
        let portion = Portion {
            index: 1,
            start: 25,
            duration: 25,
        };
        assert_eq!(
            FrameExtractor::select_filter(&portion),
            r"select=between(n\,25\,49), setpts=PTS-STARTPTS"
        );
    }
}
