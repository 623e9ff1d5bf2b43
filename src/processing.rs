use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::board::{run_reporter, BoardMessage, ProgressBoard, ProgressSink};
use crate::config::Config;
use crate::discovery::{UnitScanner, WorkUnit};
use crate::error::{DispatchError, Result};
use crate::overlay::OverlayJob;
use crate::progress::ProgressTracker;
use crate::video::{FfmpegToolkit, MediaTools};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Completed,
    Failed,
}

/// Outcome of one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit_id: String,
    pub status: UnitStatus,
    pub output: PathBuf,
    /// Probed background duration, absent if the probe failed
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
    pub processing_time: Duration,
}

/// Overall batch results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub root_dir: PathBuf,
    pub output_dir: PathBuf,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub units: Vec<UnitReport>,
}

impl BatchReport {
    /// Save the report as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(path, json).await?;
        info!("💾 Batch report saved to: {}", path.display());
        Ok(())
    }

    pub fn unit(&self, unit_id: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }
}

/// Units that would run, and where their outputs go
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub root_dir: PathBuf,
    pub output_dir: PathBuf,
    pub units: Vec<WorkUnit>,
}

/// Runs one FFmpeg composite per unit with at most `max_workers` in flight
pub struct BatchDispatcher {
    config: Config,
    scanner: UnitScanner,
    tools: Arc<dyn MediaTools>,
    worker_semaphore: Arc<Semaphore>,
}

impl BatchDispatcher {
    pub fn new(config: Config, tools: Arc<dyn MediaTools>) -> Result<Self> {
        config.validate()?;
        let max_workers = config.dispatch.max_workers;
        info!("🔧 Initializing BatchDispatcher with {} workers", max_workers);

        Ok(Self {
            scanner: UnitScanner::new(config.layout.clone()),
            config,
            tools,
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
        })
    }

    /// Dispatcher driving the real `ffmpeg`/`ffprobe` binaries
    pub fn with_ffmpeg(config: Config) -> Result<Self> {
        let tools = Arc::new(FfmpegToolkit::new(&config));
        Self::new(config, tools)
    }

    /// Discover units under `root` and resolve the output directory
    pub async fn plan(&self, root: &Path) -> Result<BatchPlan> {
        let root_dir = tokio::fs::canonicalize(root).await?;
        let units = self.scanner.discover(&root_dir).await?;
        let output_dir = self.config.layout.resolve_output_dir(&root_dir);

        Ok(BatchPlan {
            root_dir,
            output_dir,
            units,
        })
    }

    /// Commands each unit would run, without probing or launching anything
    pub fn planned_commands(&self, plan: &BatchPlan) -> Vec<(String, String)> {
        plan.units
            .iter()
            .map(|unit| {
                let job = self.job_for(unit, &plan.output_dir, 0.0);
                (unit.unit_id.clone(), self.tools.planned_command(&job))
            })
            .collect()
    }

    /// Check tools, discover units, and composite all of them.
    ///
    /// Only a missing tool, an unusable root or an empty schedule fail the
    /// batch; per-unit failures land in the report.
    pub async fn run<S>(&self, root: &Path, sink: S) -> Result<(BatchReport, ProgressBoard<S>)>
    where
        S: ProgressSink + 'static,
    {
        self.tools.check_available().await?;
        let plan = self.plan(root).await?;
        self.run_plan(plan, sink).await
    }

    /// Composite every unit of an existing plan
    pub async fn run_plan<S>(&self, plan: BatchPlan, sink: S) -> Result<(BatchReport, ProgressBoard<S>)>
    where
        S: ProgressSink + 'static,
    {
        let started_at = Utc::now();
        let start_time = Instant::now();

        info!("🚀 Starting batch of {} units...", plan.units.len());
        info!("📁 Input: {}", plan.root_dir.display());
        info!("📂 Output: {}", plan.output_dir.display());
        tokio::fs::create_dir_all(&plan.output_dir).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = tokio::spawn(run_reporter(ProgressBoard::new(sink), rx));

        for unit in &plan.units {
            let _ = tx.send(BoardMessage::Scheduled {
                unit_id: unit.unit_id.clone(),
            });
        }

        let total_units = plan.units.len();
        let mut handles = Vec::with_capacity(total_units);

        for (index, unit) in plan.units.iter().enumerate() {
            // Admission happens here, in discovery order
            let Ok(permit) = Arc::clone(&self.worker_semaphore).acquire_owned().await else {
                error!("Worker pool closed, {} units not started", total_units - index);
                break;
            };

            debug!("📹 Admitting unit {}/{}: {}", index + 1, total_units, unit.unit_id);
            let tools = Arc::clone(&self.tools);
            let job = self.job_for(unit, &plan.output_dir, 0.0);
            let tx = tx.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let report = process_unit(tools.as_ref(), job, &tx).await;
                let _ = tx.send(BoardMessage::Finished(report.clone()));
                report
            });
            handles.push((unit, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (unit, handle) in handles {
            match handle.await {
                Ok(report) => results.push(report),
                Err(e) => {
                    error!("Worker for {} did not finish: {}", unit.unit_id, e);
                    let report = UnitReport {
                        unit_id: unit.unit_id.clone(),
                        status: UnitStatus::Failed,
                        output: self.output_path(unit, &plan.output_dir),
                        duration_seconds: None,
                        error: Some(format!("worker aborted: {}", e)),
                        processing_time: Duration::ZERO,
                    };
                    let _ = tx.send(BoardMessage::Finished(report.clone()));
                    results.push(report);
                }
            }
        }

        drop(tx);
        let mut board = reporter.await.map_err(std::io::Error::other)?;

        let succeeded = results.iter().filter(|r| r.status == UnitStatus::Completed).count();
        let report = BatchReport {
            started_at,
            root_dir: plan.root_dir,
            output_dir: plan.output_dir,
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            total_time: start_time.elapsed(),
            units: results,
        };

        board.complete(&report);
        Ok((report, board))
    }

    fn output_path(&self, unit: &WorkUnit, output_dir: &Path) -> PathBuf {
        unit.output_path(output_dir, &self.config.layout.output_extension)
    }

    fn job_for(&self, unit: &WorkUnit, output_dir: &Path, total_duration: f64) -> OverlayJob {
        OverlayJob {
            unit_id: unit.unit_id.clone(),
            background: unit.background.clone(),
            overlay: unit.overlay.clone(),
            output: self.output_path(unit, output_dir),
            total_duration,
        }
    }
}

/// Probe then composite one unit; every failure becomes a `Failed` report
async fn process_unit(tools: &dyn MediaTools, mut job: OverlayJob, tx: &UnboundedSender<BoardMessage>) -> UnitReport {
    let start_time = Instant::now();
    let mut report = UnitReport {
        unit_id: job.unit_id.clone(),
        status: UnitStatus::Failed,
        output: job.output.clone(),
        duration_seconds: None,
        error: None,
        processing_time: Duration::ZERO,
    };

    match tools.probe_duration(&job.background).await {
        Ok(duration) => {
            job.total_duration = duration;
            report.duration_seconds = Some(duration);
        }
        Err(e) => {
            report.error = Some(e.to_string());
            report.processing_time = start_time.elapsed();
            return report;
        }
    }

    info!("🎬 Processing {} ({:.1}s of video)", job.unit_id, job.total_duration);
    let mut tracker = ProgressTracker::new(&job.unit_id, job.total_duration, tx.clone());
    let result = tools.transcode(&job, &mut tracker).await;
    tracker.finish();

    match result {
        Ok(()) => report.status = UnitStatus::Completed,
        Err(e) => report.error = Some(failure_message(&e)),
    }
    report.processing_time = start_time.elapsed();
    report
}

fn failure_message(err: &DispatchError) -> String {
    match err {
        // partial output stays on disk
        DispatchError::JobRuntime { .. } | DispatchError::Timeout { .. } => {
            format!("{} (output may be incomplete)", err)
        }
        _ => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::LogSink;
    use crate::config::ConfigBuilder;
    use tempfile::TempDir;

    #[test]
    fn test_dispatcher_creation() {
        let config = ConfigBuilder::new().with_workers(4).build();
        let dispatcher = BatchDispatcher::with_ffmpeg(config).unwrap();
        assert_eq!(dispatcher.worker_semaphore.available_permits(), 4);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ConfigBuilder::new().with_workers(0).build();
        assert!(matches!(
            BatchDispatcher::with_ffmpeg(config),
            Err(DispatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let dispatcher = BatchDispatcher::with_ffmpeg(Config::default()).unwrap();
        let err = dispatcher.plan(&temp.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));
    }

    #[tokio::test]
    async fn test_plan_resolves_sibling_output() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Videos");
        for sub in ["Screen Recording", "HeyGen Video"] {
            let dir = root.join("1-Alice").join(sub);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("clip.mp4"), b"").unwrap();
        }

        let dispatcher = BatchDispatcher::with_ffmpeg(Config::default()).unwrap();
        let plan = dispatcher.plan(&root).await.unwrap();
        assert!(plan.output_dir.ends_with("Final Video"));
        assert_eq!(plan.output_dir.parent(), plan.root_dir.parent());

        let commands = dispatcher.planned_commands(&plan);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "1-Alice");
        assert!(commands[0].1.contains("-progress pipe:1"));
        assert!(commands[0].1.contains("1-Alice.mp4"));
    }

    #[tokio::test]
    async fn test_empty_plan_still_acknowledges() {
        let temp = TempDir::new().unwrap();
        let dispatcher = BatchDispatcher::with_ffmpeg(Config::default()).unwrap();
        let plan = BatchPlan {
            root_dir: temp.path().to_path_buf(),
            output_dir: temp.path().join("out"),
            units: Vec::new(),
        };

        let (report, board) = dispatcher.run_plan(plan, LogSink::new()).await.unwrap();
        assert_eq!(report.total, 0);
        assert!(board.unit_ids().is_empty());
        assert!(temp.path().join("out").is_dir());
    }

    #[test]
    fn test_failure_message_flags_partial_output() {
        let err = DispatchError::JobRuntime {
            status: "exit status: 1".to_string(),
            detail: "Conversion failed!".to_string(),
        };
        assert!(failure_message(&err).ends_with("(output may be incomplete)"));

        let err = DispatchError::Probe {
            path: PathBuf::from("a.mov"),
            reason: "bad".to_string(),
        };
        assert!(!failure_message(&err).contains("incomplete"));
    }
}
