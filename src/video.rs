use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Config, OverlayConfig, ToolConfig};
use crate::error::{DispatchError, Result};
use crate::overlay::{build_ffmpeg_args, build_probe_args, render_command, OverlayJob};
use crate::progress::ProgressTracker;

/// Lines of FFmpeg stderr kept for failure messages
const STDERR_TAIL_LINES: usize = 5;

/// External media capabilities the dispatcher relies on
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Fail fast if a required executable cannot be run
    async fn check_available(&self) -> Result<()>;

    /// Total duration of a media file in seconds
    async fn probe_duration(&self, input: &Path) -> Result<f64>;

    /// Run one composite, feeding every progress line to `tracker`
    async fn transcode(&self, job: &OverlayJob, tracker: &mut ProgressTracker) -> Result<()>;

    /// Human-readable description of what `transcode` would run
    fn planned_command(&self, job: &OverlayJob) -> String {
        format!(
            "{} + {} -> {}",
            job.background.display(),
            job.overlay.display(),
            job.output.display()
        )
    }
}

/// Parse `ffprobe` duration output: a single positive number of seconds
pub fn parse_duration(stdout: &str) -> Option<f64> {
    let seconds: f64 = stdout.lines().next()?.trim().parse().ok()?;
    (seconds.is_finite() && seconds > 0.0).then_some(seconds)
}

/// `MediaTools` backed by the `ffmpeg` and `ffprobe` command line tools
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    tools: ToolConfig,
    overlay: OverlayConfig,
    job_timeout: Option<Duration>,
    probe_timeout: Option<Duration>,
}

impl FfmpegToolkit {
    pub fn new(config: &Config) -> Self {
        Self {
            tools: config.tools.clone(),
            overlay: config.overlay.clone(),
            job_timeout: config.dispatch.job_timeout(),
            probe_timeout: config.dispatch.probe_timeout(),
        }
    }

    async fn check_tool(&self, program: &Path) -> Result<()> {
        let missing = |reason: String| DispatchError::MissingDependency {
            tool: program.display().to_string(),
            reason,
        };

        let status = Command::new(program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| missing(e.to_string()))?;

        if !status.success() {
            return Err(missing(format!("`-version` exited with {}", status)));
        }

        debug!("🔧 Found {}", program.display());
        Ok(())
    }
}

/// Await `fut`, giving up after `limit` if one is set
async fn with_timeout<F: Future>(limit: Option<Duration>, what: impl FnOnce() -> String, fut: F) -> Result<F::Output> {
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| DispatchError::Timeout { what: what(), after }),
        None => Ok(fut.await),
    }
}

async fn collect_tail<R: AsyncRead + Unpin>(reader: R, keep: usize) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(keep);
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();

    while let Ok(n) = reader.read_until(b'\n', &mut raw).await {
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        raw.clear();
        if line.is_empty() {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into()
}

#[async_trait]
impl MediaTools for FfmpegToolkit {
    async fn check_available(&self) -> Result<()> {
        self.check_tool(&self.tools.ffmpeg).await?;
        self.check_tool(&self.tools.ffprobe).await?;
        Ok(())
    }

    async fn probe_duration(&self, input: &Path) -> Result<f64> {
        let probe_error = |reason: String| DispatchError::Probe {
            path: input.to_path_buf(),
            reason,
        };

        let mut cmd = Command::new(&self.tools.ffprobe);
        cmd.args(build_probe_args(input))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = with_timeout(
            self.probe_timeout,
            || format!("Probe of {}", input.display()),
            cmd.output(),
        )
        .await?
        .map_err(|e| probe_error(format!("could not run {}: {}", self.tools.ffprobe.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(probe_error(format!("ffprobe exited with {}: {}", output.status, stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = parse_duration(&stdout)
            .ok_or_else(|| probe_error(format!("unexpected duration output {:?}", stdout.trim())))?;

        info!("📹 {}: {:.1}s", input.display(), duration);
        Ok(duration)
    }

    async fn transcode(&self, job: &OverlayJob, tracker: &mut ProgressTracker) -> Result<()> {
        let args = build_ffmpeg_args(job, &self.tools, &self.overlay);
        debug!("🎬 {}", render_command(&self.tools.ffmpeg, &args));

        let mut child = Command::new(&self.tools.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DispatchError::JobLaunch {
                program: self.tools.ffmpeg.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DispatchError::JobLaunch {
            program: self.tools.ffmpeg.display().to_string(),
            source: std::io::Error::other("stdout was not captured"),
        })?;
        let stderr_tail = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_tail(stderr, STDERR_TAIL_LINES)));

        let run = async {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            // raw bytes, so a garbled line cannot end the stream early
            while reader.read_until(b'\n', &mut line).await? > 0 {
                tracker.observe_line(&String::from_utf8_lossy(&line));
                line.clear();
            }
            Ok::<_, std::io::Error>(child.wait().await?)
        };

        let status = match with_timeout(self.job_timeout, || format!("Transcode of {}", job.unit_id), run).await {
            Ok(status) => status?,
            Err(timeout) => {
                warn!("⏱️ Killing ffmpeg for {}", job.unit_id);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill ffmpeg for {}: {}", job.unit_id, e);
                }
                return Err(timeout);
            }
        };

        if status.success() {
            return Ok(());
        }

        let tail = match stderr_tail {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };
        Err(DispatchError::JobRuntime {
            status: status.to_string(),
            detail: if tail.is_empty() {
                "no diagnostic output".to_string()
            } else {
                tail.join(" | ")
            },
        })
    }

    fn planned_command(&self, job: &OverlayJob) -> String {
        render_command(&self.tools.ffmpeg, &build_ffmpeg_args(job, &self.tools, &self.overlay))
    }
}
