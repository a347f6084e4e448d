use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub total_duration_ms: f64,
    pub videos_completed: u64,
    pub videos_failed: u64,
    pub portions_processed: u64,
    pub frames_interpolated: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        self.update(|snapshot| snapshot.total_duration_ms = duration.as_secs_f64() * 1_000.0);
    }

    pub fn record_portion(&self, frames_interpolated: u64) {
        self.update(|snapshot| {
            snapshot.portions_processed += 1;
            snapshot.frames_interpolated += frames_interpolated;
        });
    }

    pub fn record_video_completed(&self) {
        self.update(|snapshot| snapshot.videos_completed += 1);
    }

    pub fn record_video_failed(&self) {
        self.update(|snapshot| snapshot.videos_failed += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        self.update(|snapshot| *snapshot = MetricsSnapshot::default());
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut guard) = self.inner.lock() {
            apply(&mut *guard);
        }
    }
}

/// Records the elapsed time of one stage run when dropped.
pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StageTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            metrics.max_duration_ms = metrics.max_duration_ms.max(duration_ms);
        }
        debug!(stage = self.stage.as_str(), duration_ms, "Stage duration recorded");
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        videos_completed = snapshot.videos_completed,
        videos_failed = snapshot.videos_failed,
        portions_processed = snapshot.portions_processed,
        frames_interpolated = snapshot.frames_interpolated,
        "Job metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let counters = [
            ("autorife_videos_completed_total", "Videos processed successfully", self.videos_completed),
            ("autorife_videos_failed_total", "Videos aborted by a stage failure", self.videos_failed),
            ("autorife_portions_processed_total", "Portions extracted, interpolated and encoded", self.portions_processed),
            ("autorife_frames_interpolated_total", "Frames requested from the interpolation tool", self.frames_interpolated),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"));
        }

        output.push_str("# HELP autorife_stage_calls_total Stage invocation count\n");
        output.push_str("# TYPE autorife_stage_calls_total counter\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "autorife_stage_calls_total{{stage=\"{stage}\"}} {}\n",
                metrics.calls
            ));
        }
        output.push_str(
            "# HELP autorife_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE autorife_stage_duration_seconds_total counter\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "autorife_stage_duration_seconds_total{{stage=\"{stage}\"}} {:.6}\n",
                metrics.total_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP autorife_stage_duration_seconds_max Maximum stage duration in seconds\n");
        output.push_str("# TYPE autorife_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "autorife_stage_duration_seconds_max{{stage=\"{stage}\"}} {:.6}\n",
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP autorife_job_duration_seconds Total job duration\n");
        output.push_str("# TYPE autorife_job_duration_seconds gauge\n");
        output.push_str(&format!(
            "autorife_job_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
