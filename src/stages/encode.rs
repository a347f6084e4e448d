use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::manifest::ConcatManifest;
use crate::metadata::Portion;
use crate::pipeline::{PortionStage, StageKind};
use crate::process::ToolCommand;
use crate::progress::ProgressReporter;
use crate::stages::{FRAME_PATTERN, StageContext, run_with_frame_progress};

/// Encodes interpolated frames into one transport-stream segment per portion
/// and keeps the concat manifest for the video.
pub struct SegmentEncoder<'a> {
    ctx: StageContext<'a>,
    manifest: ConcatManifest,
}

impl<'a> SegmentEncoder<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self {
            ctx,
            manifest: ConcatManifest::new(),
        }
    }

    pub fn segment_path(&self, portion: &Portion) -> PathBuf {
        self.ctx
            .dirs
            .segments()
            .join(format!("{}.ts", portion.index))
    }

    pub fn command(&self, portion: &Portion) -> ToolCommand {
        let input_rate = self.ctx.video.frame_rate.multiplied(self.ctx.job.exp);
        ToolCommand::new(&self.ctx.job.tools.ffmpeg)
            .arg("-framerate")
            .arg(input_rate.to_string())
            .arg("-i")
            .arg(self.ctx.dirs.output_frames().join(FRAME_PATTERN))
            .args(["-y", "-hide_banner"])
            .args(self.ctx.job.encoder_args.iter())
            .arg(self.segment_path(portion))
    }

    pub fn write_manifest(&self) -> Result<PathBuf> {
        let path = self.ctx.dirs.manifest_path();
        self.manifest.write(&path)?;
        Ok(path)
    }
}

impl PortionStage for SegmentEncoder<'_> {
    fn kind(&self) -> StageKind {
        StageKind::Encode
    }

    fn run(&mut self, portion: &Portion, reporter: &dyn ProgressReporter) -> Result<()> {
        let total = portion.duration * u64::from(self.ctx.job.exp);
        run_with_frame_progress(
            &self.command(portion),
            self.kind(),
            total,
            self.ctx.job.tool_timeout,
            reporter,
        )?;
        let segment = self.segment_path(portion);
        if !segment.is_file() {
            bail!(
                "Encoder finished but segment {} was not written",
                segment.display()
            );
        }
        self.manifest.push(portion.index, segment)
    }
}
