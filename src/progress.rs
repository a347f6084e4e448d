use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, info};

use crate::pipeline::StageKind;

pub trait ProgressReporter {
    fn videos_planned(&self, _total: usize) {}
    fn video_started(&self, _index: usize, _path: &Path, _portions: u32) {}
    fn video_finished(&self, _index: usize, _succeeded: bool) {}
    fn portion_started(&self, _portion: u32, _portions: u32) {}
    /// Coarse, human-readable state such as "2 / 6 portion, encoding".
    fn status(&self, _message: &str) {}
    fn stage_started(&self, _stage: StageKind, _total: u64) {}
    fn stage_progress(&self, stage: StageKind, current: u64, total: u64);
    fn stage_finished(&self, _stage: StageKind) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn video_started(&self, index: usize, path: &Path, portions: u32) {
        info!(index, video = %path.display(), portions, "Processing video");
    }

    fn status(&self, message: &str) {
        info!("{message}");
    }

    fn stage_progress(&self, stage: StageKind, current: u64, total: u64) {
        debug!(stage = stage.as_str(), current, total, "Stage progress");
    }
}

pub struct ConsoleReporter {
    files: ProgressBar,
    portions: ProgressBar,
    stage: ProgressBar,
    update_title: bool,
    _multi: MultiProgress,
}

impl ConsoleReporter {
    pub fn new(multi: MultiProgress) -> Self {
        let files = multi.add(ProgressBar::new(0).with_style(bar_style("cyan")));
        files.set_message("Processing file");
        let portions = multi.add(ProgressBar::new(0).with_style(bar_style("green")));
        portions.set_message("Total portion");
        let stage = multi.add(ProgressBar::new(0).with_style(bar_style("white")));
        Self {
            files,
            portions,
            stage,
            update_title: io::stderr().is_terminal(),
            _multi: multi,
        }
    }

    fn set_title(&self, title: &str) {
        if self.update_title {
            let mut stderr = io::stderr();
            let _ = write!(stderr, "\x1b]0;{title}\x07");
            let _ = stderr.flush();
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn videos_planned(&self, total: usize) {
        self.files.set_length(total as u64);
        self.files.set_position(0);
    }

    fn video_started(&self, _index: usize, path: &Path, portions: u32) {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.files.set_message(format!("Processing {name}"));
        self.portions.set_length(u64::from(portions));
        self.portions.set_position(0);
        self.portions.enable_steady_tick(Duration::from_millis(250));
    }

    fn video_finished(&self, _index: usize, _succeeded: bool) {
        self.files.inc(1);
        self.portions.disable_steady_tick();
    }

    fn portion_started(&self, portion: u32, _portions: u32) {
        self.portions.set_position(u64::from(portion));
    }

    fn status(&self, message: &str) {
        self.portions.set_message(message.to_string());
        self.set_title(message);
    }

    fn stage_started(&self, stage: StageKind, total: u64) {
        self.stage.set_style(bar_style(stage_colour(stage)));
        self.stage.set_message(stage.label());
        self.stage.set_length(total);
        self.stage.set_position(0);
    }

    fn stage_progress(&self, _stage: StageKind, current: u64, total: u64) {
        if self.stage.length() != Some(total) {
            self.stage.set_length(total);
        }
        self.stage.set_position(current);
    }

    fn stage_finished(&self, _stage: StageKind) {
        self.stage.set_position(self.stage.length().unwrap_or(0));
    }
}

impl Drop for ConsoleReporter {
    fn drop(&mut self) {
        self.stage.finish_and_clear();
        self.portions.finish_and_clear();
        self.files.finish();
    }
}

pub fn stderr_bars() -> MultiProgress {
    MultiProgress::with_draw_target(ProgressDrawTarget::stderr())
}

/// Stderr log writer that lifts the bars off the screen for each write.
#[derive(Clone)]
pub struct BarAwareWriter {
    multi: MultiProgress,
}

impl BarAwareWriter {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

impl Write for BarAwareWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.multi.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn bar_style(colour: &str) -> ProgressStyle {
    let template = format!("{{msg:<34}} [{{bar:40.{colour}}}] {{pos}}/{{len}} {{elapsed_precise}}");
    ProgressStyle::with_template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn stage_colour(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Extract => "magenta",
        StageKind::Interpolate => "yellow",
        StageKind::Encode => "blue",
        StageKind::Concat => "cyan",
        StageKind::Probe => "white",
    }
}
