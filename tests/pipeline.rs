#![cfg(unix)]

mod common;

use std::cell::RefCell;
use std::fs;
use std::time::Duration;

use auto_rife::metadata::ProbeError;
use auto_rife::pipeline::{PipelineManager, StageKind, VideoState, resolve_inputs};
use auto_rife::process::ExternalToolError;
use auto_rife::progress::{LogReporter, ProgressReporter};
use auto_rife::report::OutcomeStatus;
use common::{TOOLS, job, touch_video};
use tempfile::tempdir;

#[test]
fn even_split_skips_the_empty_remainder_portion() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "clip_100.mp4");
    let job = job(temp.path(), &video, 2, 4);

    let reporter = LogReporter;
    let manager = PipelineManager::new(&job, &reporter);
    let summary = manager.run().unwrap();

    assert_eq!(summary.completed(), 1);
    let outcome = &summary.videos[0];
    assert_eq!(outcome.portions_processed, 4);
    assert_eq!(outcome.total_frames, Some(100));

    let output = temp.path().join("result").join("processed_clip_100.mp4");
    assert_eq!(outcome.output.as_deref(), Some(output.as_path()));
    let content = fs::read_to_string(&output).unwrap();
    assert_eq!(
        content,
        "0.ts 50\n1.ts 50\n2.ts 50\n3.ts 50\naudio clip_100.mp4.m4a\n"
    );

    let snapshot = manager.metrics().snapshot();
    assert_eq!(snapshot.portions_processed, 4);
    assert_eq!(snapshot.frames_interpolated, 200);
    assert_eq!(snapshot.stages["interpolate"].calls, 4);
    assert_eq!(snapshot.stages["concat"].calls, 1);

    assert!(!temp.path().join("temp").exists());
}

#[test]
fn remainder_frames_get_their_own_segment() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "clip_101.mp4");
    let job = job(temp.path(), &video, 3, 4);

    let reporter = LogReporter;
    let summary = PipelineManager::new(&job, &reporter).run().unwrap();
    assert_eq!(summary.videos[0].portions_processed, 5);

    let content =
        fs::read_to_string(temp.path().join("result").join("processed_clip_101.mp4")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "0.ts 75",
            "1.ts 75",
            "2.ts 75",
            "3.ts 75",
            "4.ts 3",
            "audio clip_101.mp4.m4a"
        ]
    );
}

#[test]
fn silent_sources_are_concatenated_without_audio() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "silent_12.mp4");
    let mut job = job(temp.path(), &video, 2, 3);
    job.keep_temp = true;

    let reporter = LogReporter;
    let summary = PipelineManager::new(&job, &reporter).run().unwrap();
    assert_eq!(summary.completed(), 1);

    let content =
        fs::read_to_string(temp.path().join("result").join("processed_silent_12.mp4")).unwrap();
    assert!(!content.contains("audio"));
    assert_eq!(content.lines().count(), 3);

    let scratch = temp.path().join("temp");
    assert!(scratch.join("input_frames").is_dir());
    assert_eq!(fs::read_dir(scratch.join("input_frames")).unwrap().count(), 0);
    assert_eq!(fs::read_dir(scratch.join("output_ts")).unwrap().count(), 0);
}

#[test]
fn missing_video_stream_fails_before_touching_the_workspace() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "nostream_10.mp4");
    let job = job(temp.path(), &video, 2, 4);

    let reporter = LogReporter;
    let manager = PipelineManager::new(&job, &reporter);
    let mut state = VideoState::Probing;
    let err = manager.process_video(0, &video, &mut state).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProbeError>(),
        Some(ProbeError::NoVideoStream(_))
    ));
    assert_eq!(state, VideoState::Probing);
    assert!(!temp.path().join("temp").exists());
    assert!(!temp.path().join("result").exists());
}

#[test]
fn failing_video_does_not_stop_the_job() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("in");
    touch_video(&input, "a_nostream_10.mp4");
    touch_video(&input, "b_clip_20.mp4");
    let job = job(temp.path(), &input, 2, 2);

    let reporter = LogReporter;
    let manager = PipelineManager::new(&job, &reporter);
    let summary = manager.run().unwrap();

    assert_eq!(summary.videos.len(), 2);
    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OutcomeStatus::Failed);
    assert_eq!(failed[0].failed_stage, Some(VideoState::Probing));
    assert!(failed[0].error.as_deref().unwrap().contains("no video stream"));

    assert!(summary.videos[1].succeeded());
    assert!(temp.path().join("result").join("processed_b_clip_20.mp4").is_file());

    let snapshot = manager.metrics().snapshot();
    assert_eq!(snapshot.videos_failed, 1);
    assert_eq!(snapshot.videos_completed, 1);
}

#[test]
fn interpolation_failure_is_reported_immediately() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "clip_10.mp4");
    let mut job = job(temp.path(), &video, 2, 2);
    job.tools.rife = TOOLS.rife_fail();

    let reporter = LogReporter;
    let manager = PipelineManager::new(&job, &reporter);
    let mut state = VideoState::Probing;
    let err = manager.process_video(0, &video, &mut state).unwrap_err();

    assert_eq!(state, VideoState::Interpolating);
    match err.downcast_ref::<ExternalToolError>() {
        Some(ExternalToolError::NonZeroExit { tool, .. }) => assert_eq!(tool, "rife-fail"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!temp.path().join("result").exists());
}

#[test]
fn short_interpolation_output_is_an_error() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "clip_10.mp4");
    let mut job = job(temp.path(), &video, 2, 2);
    job.tools.rife = TOOLS.rife_short();

    let reporter = LogReporter;
    let manager = PipelineManager::new(&job, &reporter);
    let mut state = VideoState::Probing;
    let err = manager.process_video(0, &video, &mut state).unwrap_err();

    match err.downcast_ref::<ExternalToolError>() {
        Some(ExternalToolError::InterpolationIncomplete { expected, found }) => {
            assert_eq!(*expected, 10);
            assert_eq!(*found, 9);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn hung_interpolation_is_killed_after_the_timeout() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "clip_10.mp4");
    let mut job = job(temp.path(), &video, 2, 2);
    job.tools.rife = TOOLS.rife_hang();
    job.tool_timeout = Some(Duration::from_millis(1500));

    let reporter = LogReporter;
    let manager = PipelineManager::new(&job, &reporter);
    let started = std::time::Instant::now();
    let mut state = VideoState::Probing;
    let err = manager.process_video(0, &video, &mut state).unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(matches!(
        err.downcast_ref::<ExternalToolError>(),
        Some(ExternalToolError::Timeout { .. })
    ));
    assert_eq!(state, VideoState::Interpolating);
}

#[test]
fn directories_resolve_to_sorted_mp4_files() {
    let temp = tempdir().unwrap();
    touch_video(temp.path(), "b_2.mp4");
    touch_video(temp.path(), "a_1.mp4");
    touch_video(temp.path(), "notes.txt");
    touch_video(temp.path(), "c_3.mkv");
    fs::create_dir(temp.path().join("nested.mp4")).unwrap();

    let resolved = resolve_inputs(temp.path()).unwrap();
    let names: Vec<_> = resolved
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["a_1.mp4", "b_2.mp4"]);

    let single = resolve_inputs(&resolved[1]).unwrap();
    assert_eq!(single, vec![resolved[1].clone()]);
    assert!(resolve_inputs(&temp.path().join("missing")).is_err());
}

#[test]
fn plan_probes_without_running_stages() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "clip_101.mp4");
    let job = job(temp.path(), &video, 2, 4);

    let reporter = LogReporter;
    let plan = PipelineManager::new(&job, &reporter).plan().unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].total_frames, 101);
    assert_eq!(plan[0].frame_rate.to_string(), "30/1");
    assert!(plan[0].has_audio);
    assert_eq!(plan[0].portions().len(), 5);
    assert!(!temp.path().join("temp").exists());
}

#[derive(Default)]
struct RecordingReporter {
    runs: RefCell<Vec<(StageKind, u64, Vec<u64>)>>,
}

impl ProgressReporter for RecordingReporter {
    fn stage_started(&self, stage: StageKind, total: u64) {
        self.runs.borrow_mut().push((stage, total, Vec::new()));
    }

    fn stage_progress(&self, stage: StageKind, current: u64, total: u64) {
        let mut runs = self.runs.borrow_mut();
        let run = runs.last_mut().expect("progress before stage start");
        assert_eq!(run.0, stage);
        assert_eq!(run.1, total);
        run.2.push(current);
    }
}

impl RecordingReporter {
    fn runs_of(&self, stage: StageKind) -> Vec<(u64, Vec<u64>)> {
        self.runs
            .borrow()
            .iter()
            .filter(|(kind, _, _)| *kind == stage)
            .map(|(_, total, values)| (*total, values.clone()))
            .collect()
    }
}

#[test]
fn stage_progress_rises_to_each_stage_target() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "clip_100.mp4");
    let job = job(temp.path(), &video, 2, 4);

    let reporter = RecordingReporter::default();
    let summary = PipelineManager::new(&job, &reporter).run().unwrap();
    assert_eq!(summary.completed(), 1);

    for (stage, target) in [
        (StageKind::Extract, 25),
        (StageKind::Interpolate, 50),
        (StageKind::Encode, 50),
    ] {
        let runs = reporter.runs_of(stage);
        assert_eq!(runs.len(), 4, "{stage}");
        for (total, values) in runs {
            assert_eq!(total, target, "{stage}");
            assert!(!values.is_empty(), "{stage}");
            assert!(values.windows(2).all(|w| w[0] < w[1]), "{stage}: {values:?}");
            assert!(values.iter().all(|v| *v <= total), "{stage}: {values:?}");
            assert_eq!(*values.last().unwrap(), target, "{stage}: {values:?}");
        }
    }

    let extract = reporter.runs_of(StageKind::Extract);
    assert_eq!(extract[0].1, (1..=25).collect::<Vec<u64>>());
    let concat = reporter.runs_of(StageKind::Concat);
    assert_eq!(concat.len(), 1);
    assert_eq!(concat[0].0, 200);
}

#[test]
fn stderr_diagnostics_do_not_corrupt_metadata() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "noisy_48.mp4");
    let job = job(temp.path(), &video, 2, 4);

    let reporter = LogReporter;
    let plan = PipelineManager::new(&job, &reporter).plan().unwrap();
    assert_eq!(plan[0].total_frames, 48);
    assert_eq!(plan[0].frame_rate.to_string(), "30/1");
}

#[test]
fn failed_concat_leaves_no_audio_sidecar_behind() {
    let temp = tempdir().unwrap();
    let video = touch_video(&temp.path().join("in"), "badconcat_8.mp4");
    let job = job(temp.path(), &video, 2, 2);

    let reporter = LogReporter;
    let summary = PipelineManager::new(&job, &reporter).run().unwrap();

    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failed_stage, Some(VideoState::Concatenating));
    assert!(!temp.path().join("temp").join("badconcat_8.mp4.m4a").exists());
    assert!(!temp.path().join("temp").exists());
}
