//! Drives the real process plumbing through stand-in `ffmpeg`/`ffprobe` scripts.
//!
//! Kept to a single test so no other test thread forks while a script is
//! still open for writing.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use overlay_dispatcher::{
    BatchDispatcher, ConfigBuilder, DispatchError, FfmpegToolkit, LogSink, MediaTools, OverlayJob,
    ProgressTracker, UnitStatus,
};

const FAKE_FFPROBE: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "ffprobe version fake"; exit 0; fi
for last; do :; done
case "$last" in
  *2-Bob*) echo "N/A"; exit 0;;
esac
echo "4.000000"
"#;

const FAKE_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "ffmpeg version fake"; exit 0; fi
for last; do :; done
case "$last" in
  *3-Dave*) echo "Error opening input" >&2; echo "Conversion failed!" >&2; exit 1;;
esac
echo "frame=1"
echo "out_time_ms=N/A"
echo "out_time_ms=1000000"
echo "progress=continue"
echo "out_time_ms=3000000"
echo "progress=end"
printf 'video' > "$last"
"#;

const GARBLED_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then exit 0; fi
echo "out_time_ms=1000000"
printf 'junk=\377\376\n'
echo "out_time_ms=3000000"
echo "progress=end"
"#;

const SLOW_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then exit 0; fi
echo "out_time_ms=0"
exec sleep 30
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn make_unit(root: &Path, name: &str) {
    for (sub, file) in [("Screen Recording", "recording.mov"), ("HeyGen Video", "avatar.mp4")] {
        let dir = root.join(name).join(sub);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), b"media").unwrap();
    }
}

#[tokio::test]
async fn test_ffmpeg_toolkit_against_stand_in_scripts() {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let ffprobe = write_script(&bin, "ffprobe", FAKE_FFPROBE);
    let ffmpeg = write_script(&bin, "ffmpeg", FAKE_FFMPEG);
    let slow_ffmpeg = write_script(&bin, "ffmpeg-slow", SLOW_FFMPEG);
    let garbled_ffmpeg = write_script(&bin, "ffmpeg-garbled", GARBLED_FFMPEG);

    let root = temp.path().join("Videos");
    for name in ["1-Alice", "2-Bob", "3-Dave", "xyz-Carol"] {
        make_unit(&root, name);
    }

    // Full batch: one success, one probe failure, one transcode failure
    let config = ConfigBuilder::new()
        .with_workers(2)
        .with_ffmpeg(ffmpeg.clone())
        .with_ffprobe(ffprobe.clone())
        .with_hwaccel(None)
        .build();
    let dispatcher = BatchDispatcher::with_ffmpeg(config.clone()).unwrap();
    let (report, board) = dispatcher.run(&root, LogSink::new()).await.unwrap();

    assert_eq!(board.unit_ids(), ["1-Alice".to_string(), "2-Bob".to_string(), "3-Dave".to_string()]);
    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 1);

    let alice = report.unit("1-Alice").unwrap();
    assert_eq!(alice.status, UnitStatus::Completed);
    assert_eq!(alice.duration_seconds, Some(4.0));
    assert_eq!(std::fs::read_to_string(&alice.output).unwrap(), "video");
    assert_eq!(board.get("1-Alice").unwrap().percent, 100.0);

    let bob = report.unit("2-Bob").unwrap();
    assert_eq!(bob.status, UnitStatus::Failed);
    assert!(bob.error.as_deref().unwrap().contains("unexpected duration output"));

    let dave = report.unit("3-Dave").unwrap();
    assert_eq!(dave.status, UnitStatus::Failed);
    let message = dave.error.as_deref().unwrap();
    assert!(message.contains("exit status: 1"), "{}", message);
    assert!(message.contains("Conversion failed!"), "{}", message);

    let mut outputs: Vec<String> = std::fs::read_dir(temp.path().join("Final Video"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    outputs.sort();
    assert_eq!(outputs, vec!["1-Alice.mp4".to_string()]);

    // Progress lines reach the tracker
    let toolkit = FfmpegToolkit::new(&config);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let job = OverlayJob {
        unit_id: "1-Alice".to_string(),
        background: root.join("1-Alice/Screen Recording/recording.mov"),
        overlay: root.join("1-Alice/HeyGen Video/avatar.mp4"),
        output: temp.path().join("direct.mp4"),
        total_duration: 4.0,
    };
    let mut tracker = ProgressTracker::new(&job.unit_id, job.total_duration, tx);
    toolkit.transcode(&job, &mut tracker).await.unwrap();
    drop(tracker);

    let mut percents = Vec::new();
    while let Some(overlay_dispatcher::board::BoardMessage::Progress(event)) = rx.recv().await {
        percents.push(event.percent);
    }
    assert_eq!(percents, vec![25.0, 75.0]);

    // Non UTF-8 noise on the progress stream is skipped, not fatal
    let config = ConfigBuilder::new()
        .with_ffmpeg(garbled_ffmpeg)
        .with_ffprobe(ffprobe.clone())
        .build();
    let toolkit = FfmpegToolkit::new(&config);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut tracker = ProgressTracker::new(&job.unit_id, job.total_duration, tx);
    toolkit.transcode(&job, &mut tracker).await.unwrap();
    drop(tracker);

    let mut percents = Vec::new();
    while let Some(overlay_dispatcher::board::BoardMessage::Progress(event)) = rx.recv().await {
        percents.push(event.percent);
    }
    assert_eq!(percents, vec![25.0, 75.0]);

    // A hung job is killed once the timeout expires
    let config = ConfigBuilder::new()
        .with_ffmpeg(slow_ffmpeg)
        .with_ffprobe(ffprobe.clone())
        .with_job_timeout(1)
        .build();
    let toolkit = FfmpegToolkit::new(&config);
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let mut tracker = ProgressTracker::new(&job.unit_id, job.total_duration, tx);
    let started = std::time::Instant::now();
    let err = toolkit.transcode(&job, &mut tracker).await.unwrap_err();
    assert!(matches!(err, DispatchError::Timeout { .. }), "{}", err);
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    // Missing binaries are caught before discovery
    let config = ConfigBuilder::new()
        .with_ffmpeg(bin.join("does-not-exist"))
        .with_ffprobe(ffprobe)
        .build();
    let err = BatchDispatcher::with_ffmpeg(config)
        .unwrap()
        .run(&root, LogSink::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingDependency { .. }), "{}", err);
}
