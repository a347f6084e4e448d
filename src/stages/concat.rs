use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::pipeline::StageKind;
use crate::process::ToolCommand;
use crate::progress::ProgressReporter;
use crate::stages::{StageContext, run_with_frame_progress};

/// Joins the encoded segments and the audio sidecar without re-encoding.
pub struct Concatenator<'a> {
    ctx: StageContext<'a>,
}

impl<'a> Concatenator<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn output_path(&self) -> PathBuf {
        self.ctx
            .job
            .output_dir
            .join(format!("processed_{}", self.ctx.video.file_name()))
    }

    pub fn command(&self, manifest: &Path, audio: Option<&Path>) -> ToolCommand {
        let mut command = ToolCommand::new(&self.ctx.job.tools.ffmpeg)
            .args(["-f", "concat", "-safe", "0", "-y", "-hide_banner", "-i"])
            .arg(manifest);
        if let Some(audio) = audio {
            command = command.arg("-i").arg(audio);
        }
        command.args(["-c", "copy"]).arg(self.output_path())
    }

    pub fn run(
        &self,
        manifest: &Path,
        audio: Option<&Path>,
        reporter: &dyn ProgressReporter,
    ) -> Result<PathBuf> {
        let output = self.output_path();
        fs::create_dir_all(&self.ctx.job.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                self.ctx.job.output_dir.display()
            )
        })?;

        let total = self.ctx.video.total_frames * u64::from(self.ctx.job.exp);
        let concatenated = run_with_frame_progress(
            &self.command(manifest, audio),
            StageKind::Concat,
            total,
            self.ctx.job.tool_timeout,
            reporter,
        );
        if let Some(audio) = audio {
            remove_sidecar(audio);
        }
        concatenated?;

        self.ctx.dirs.clear_segments()?;
        debug!(output = %output.display(), "Segments concatenated");
        Ok(output)
    }
}

pub(crate) fn remove_sidecar(audio: &Path) {
    match fs::remove_file(audio) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(audio = %audio.display(), error = %err, "Failed to remove audio sidecar");
        }
    }
}
