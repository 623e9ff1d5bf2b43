use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DispatchError, Result};

/// Configuration for the overlay dispatcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool and liveness settings
    pub dispatch: DispatchConfig,

    /// External tool locations and encoder choices
    pub tools: ToolConfig,

    /// On-disk layout of units and outputs
    pub layout: LayoutConfig,

    /// Picture-in-picture geometry
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of concurrent transcodes
    pub max_workers: usize,

    /// Kill a transcode after this many seconds (0 = no limit)
    pub job_timeout_secs: u64,

    /// Kill a duration probe after this many seconds (0 = no limit)
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// FFmpeg executable
    pub ffmpeg: PathBuf,

    /// FFprobe executable
    pub ffprobe: PathBuf,

    /// Hardware decoder passed to `-hwaccel`
    pub hwaccel: Option<String>,

    /// Video encoder passed to `-c:v`
    pub video_codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Subdirectory holding the background (screen recording) video
    pub background_dir: String,

    /// Subdirectory holding the overlay (avatar) video
    pub overlay_dir: String,

    /// Name of the shared output directory, created next to the root
    pub output_dir_name: String,

    /// Explicit output directory, overrides `output_dir_name`
    pub output_dir: Option<PathBuf>,

    /// Extension of composited files
    pub output_extension: String,

    /// Input file extensions accepted as media
    pub supported_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Overlay edge length as a fraction of the background width
    pub scale_ratio: f64,

    /// Pixels between the overlay and the right edge
    pub margin_right: u32,

    /// Pixels between the overlay and the top edge
    pub margin_top: u32,

    /// Mask the overlay to a circle
    pub circular_mask: bool,

    /// Stop when the shorter input ends
    pub end_with_shortest: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            job_timeout_secs: 0,
            probe_timeout_secs: 30,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        // VideoToolbox is only present on macOS builds of FFmpeg
        let (hwaccel, video_codec) = if cfg!(target_os = "macos") {
            (Some("videotoolbox".to_string()), "h264_videotoolbox")
        } else {
            (None, "libx264")
        };

        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            hwaccel,
            video_codec: video_codec.to_string(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            background_dir: "Screen Recording".to_string(),
            overlay_dir: "HeyGen Video".to_string(),
            output_dir_name: "Final Video".to_string(),
            output_dir: None,
            output_extension: "mp4".to_string(),
            supported_extensions: vec![
                "mp4".to_string(),
                "mkv".to_string(),
                "avi".to_string(),
                "mov".to_string(),
                "webm".to_string(),
                "m4v".to_string(),
            ],
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            scale_ratio: 0.14,
            margin_right: 543,
            margin_top: 270,
            circular_mask: true,
            end_with_shortest: true,
        }
    }
}

impl DispatchConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        (self.probe_timeout_secs > 0).then(|| Duration::from_secs(self.probe_timeout_secs))
    }
}

impl LayoutConfig {
    /// Resolve where composited files go for a given (canonical) root directory
    pub fn resolve_output_dir(&self, root: &Path) -> PathBuf {
        if let Some(ref dir) = self.output_dir {
            return dir.clone();
        }
        match root.parent() {
            Some(parent) => parent.join(&self.output_dir_name),
            None => root.join(&self.output_dir_name),
        }
    }

    /// Whether a file name carries one of the supported media extensions
    pub fn is_supported_media(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.supported_extensions.iter().any(|s| s.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl Config {
    /// Load configuration from the first config file found
    pub fn load() -> Result<Self> {
        let config_paths = [
            "overlay-dispatcher.toml",
            "config/overlay-dispatcher.toml",
        ];

        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::load_from(Path::new(path));
            }
        }

        Self::from_env()
    }

    /// Load configuration from an explicit file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)
            .map_err(|e| DispatchError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        config.with_env_overrides()
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(workers) = std::env::var("OVERLAY_DISPATCHER_WORKERS") {
            self.dispatch.max_workers = workers.parse().map_err(|_| {
                DispatchError::Config(format!("OVERLAY_DISPATCHER_WORKERS is not a number: {}", workers))
            })?;
        }

        if let Ok(timeout) = std::env::var("OVERLAY_DISPATCHER_JOB_TIMEOUT") {
            self.dispatch.job_timeout_secs = timeout.parse().map_err(|_| {
                DispatchError::Config(format!("OVERLAY_DISPATCHER_JOB_TIMEOUT is not a number: {}", timeout))
            })?;
        }

        if let Ok(ffmpeg) = std::env::var("OVERLAY_DISPATCHER_FFMPEG") {
            self.tools.ffmpeg = PathBuf::from(ffmpeg);
        }

        if let Ok(ffprobe) = std::env::var("OVERLAY_DISPATCHER_FFPROBE") {
            self.tools.ffprobe = PathBuf::from(ffprobe);
        }

        if let Ok(output_dir) = std::env::var("OVERLAY_DISPATCHER_OUTPUT_DIR") {
            self.layout.output_dir = Some(PathBuf::from(output_dir));
        }

        Ok(self)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| DispatchError::Config(e.to_string()))?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_workers == 0 {
            return Err(DispatchError::Config("max_workers must be greater than 0".to_string()));
        }

        if !(self.overlay.scale_ratio > 0.0 && self.overlay.scale_ratio <= 1.0) {
            return Err(DispatchError::Config(format!(
                "scale_ratio must be in (0, 1], got {}",
                self.overlay.scale_ratio
            )));
        }

        let names = [
            ("background_dir", &self.layout.background_dir),
            ("overlay_dir", &self.layout.overlay_dir),
            ("output_dir_name", &self.layout.output_dir_name),
            ("output_extension", &self.layout.output_extension),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(DispatchError::Config(format!("{} must not be empty", field)));
            }
        }

        if self.layout.background_dir == self.layout.overlay_dir {
            return Err(DispatchError::Config(
                "background_dir and overlay_dir must differ".to_string(),
            ));
        }

        if self.layout.supported_extensions.is_empty() {
            return Err(DispatchError::Config("supported_extensions must not be empty".to_string()));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Overlay Dispatcher Configuration:\n\
            - Workers: {}\n\
            - Job Timeout: {}\n\
            - FFmpeg: {} (codec {}, hwaccel {})\n\
            - Inputs: '{}' + '{}'\n\
            - Overlay: {:.0}% width, {}px right, {}px top",
            self.dispatch.max_workers,
            match self.dispatch.job_timeout() {
                Some(t) => format!("{}s", t.as_secs()),
                None => "none".to_string(),
            },
            self.tools.ffmpeg.display(),
            self.tools.video_codec,
            self.tools.hwaccel.as_deref().unwrap_or("none"),
            self.layout.background_dir,
            self.layout.overlay_dir,
            self.overlay.scale_ratio * 100.0,
            self.overlay.margin_right,
            self.overlay.margin_top,
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.dispatch.max_workers = workers;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.config.dispatch.job_timeout_secs = secs;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.layout.output_dir = Some(dir);
        self
    }

    pub fn with_ffmpeg(mut self, ffmpeg: PathBuf) -> Self {
        self.config.tools.ffmpeg = ffmpeg;
        self
    }

    pub fn with_ffprobe(mut self, ffprobe: PathBuf) -> Self {
        self.config.tools.ffprobe = ffprobe;
        self
    }

    pub fn with_hwaccel(mut self, hwaccel: Option<String>) -> Self {
        self.config.tools.hwaccel = hwaccel;
        self
    }

    pub fn with_video_codec(mut self, codec: &str) -> Self {
        self.config.tools.video_codec = codec.to_string();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
