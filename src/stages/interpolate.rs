use std::thread;

use anyhow::{Context, Result};
use tracing::debug;

use crate::metadata::Portion;
use crate::pipeline::{PortionStage, StageKind};
use crate::process::{ExternalToolError, ToolCommand};
use crate::progress::ProgressReporter;
use crate::stages::StageContext;
use crate::workspace::count_files;

pub struct InterpolationRunner<'a> {
    ctx: StageContext<'a>,
}

impl<'a> InterpolationRunner<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn target_frames(&self, portion: &Portion) -> u64 {
        u64::from(self.ctx.job.exp) * portion.duration
    }

    pub fn command(&self, portion: &Portion) -> ToolCommand {
        ToolCommand::new(&self.ctx.job.tools.rife)
            .arg("-i")
            .arg(self.ctx.dirs.input_frames())
            .arg("-o")
            .arg(self.ctx.dirs.output_frames())
            .arg("-n")
            .arg(self.target_frames(portion).to_string())
            .arg("-m")
            .arg(&self.ctx.job.model)
    }
}

impl PortionStage for InterpolationRunner<'_> {
    fn kind(&self) -> StageKind {
        StageKind::Interpolate
    }

    fn run(&mut self, portion: &Portion, reporter: &dyn ProgressReporter) -> Result<()> {
        let target = self.target_frames(portion);
        let output_dir = self.ctx.dirs.output_frames();
        let timeout = self.ctx.job.tool_timeout;
        let command = self.command(portion);
        reporter.stage_started(self.kind(), target);

        let mut running = command.spawn()?;
        let mut observed = 0;
        loop {
            running.drain();
            let count = count_files(output_dir)?;
            if count != observed {
                observed = count;
                reporter.stage_progress(self.kind(), count.min(target), target);
            }
            if count == target {
                break;
            }

            if let Some(status) = running.try_status()? {
                running.drain();
                if !status.success() {
                    return Err(running.failure(status))
                        .with_context(|| format!("{} failed: {command}", self.kind().label()));
                }
                let found = count_files(output_dir)?;
                if found == target {
                    if found != observed {
                        reporter.stage_progress(self.kind(), target, target);
                    }
                    break;
                }
                return Err(ExternalToolError::InterpolationIncomplete {
                    expected: target,
                    found,
                }
                .into());
            }

            running.check_deadline(timeout)?;
            thread::sleep(self.ctx.job.poll_interval);
        }

        debug!(frames = target, "Interpolation target reached");
        running
            .finish(timeout)
            .with_context(|| format!("{} failed: {command}", self.kind().label()))?;
        reporter.stage_finished(self.kind());
        Ok(())
    }
}
