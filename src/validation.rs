use std::path::Path;

use crate::job::VideoJob;
use crate::pipeline::resolve_inputs;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Check a job before any tool runs: inputs exist, binaries resolve, and the
/// output and temp locations do not collide.
pub fn validate_job(job: &VideoJob) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !job.input.exists() {
        report
            .errors
            .push(format!("Input '{}' does not exist", job.input.display()));
    } else {
        match resolve_inputs(&job.input) {
            Ok(inputs) if inputs.is_empty() => report.errors.push(format!(
                "Input directory '{}' contains no .mp4 files",
                job.input.display()
            )),
            Ok(_) => {}
            Err(err) => report.errors.push(format!("{err:#}")),
        }
    }

    for (label, path) in [
        ("ffmpeg", &job.tools.ffmpeg),
        ("ffprobe", &job.tools.ffprobe),
        ("interpolation tool", &job.tools.rife),
    ] {
        report.merge(validate_tool(label, path));
    }

    if job.output_dir.is_file() {
        report.errors.push(format!(
            "Output path '{}' is a file, expected a directory",
            job.output_dir.display()
        ));
    }
    if job.temp_dir.is_file() {
        report.errors.push(format!(
            "Temp path '{}' is a file, expected a directory",
            job.temp_dir.display()
        ));
    }
    if job.temp_dir == job.output_dir {
        report
            .errors
            .push("Temp and output directories must differ".into());
    }

    if job.exp == 1 {
        report
            .warnings
            .push("Frame multiplier 1 re-encodes the video without adding frames".into());
    }
    if job
        .encoder_args
        .iter()
        .any(|arg| arg == "-r" || arg == "-framerate")
    {
        report.warnings.push(
            "Encoder arguments override the frame rate; segments may play at the wrong speed"
                .into(),
        );
    }

    report
}

fn validate_tool(label: &str, path: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();
    if let Err(err) = which::which(path) {
        report.errors.push(format!(
            "Cannot find {label} at '{}': {err}",
            path.display()
        ));
    }
    report
}
