//! Overlay Dispatcher
//!
//! Batch picture-in-picture compositor: finds numbered profile folders holding
//! a screen recording and an avatar video, and runs one FFmpeg composite per
//! folder through a bounded worker pool with live progress and ETA.

pub mod board;
pub mod config;
pub mod discovery;
pub mod error;
pub mod overlay;
pub mod processing;
pub mod progress;
pub mod video;

// Re-export main types for easy access
pub use crate::board::{LogSink, ProgressBoard, ProgressSink, TerminalSink};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::discovery::{UnitScanner, WorkUnit};
pub use crate::error::{DispatchError, Result};
pub use crate::overlay::OverlayJob;
pub use crate::processing::{BatchDispatcher, BatchPlan, BatchReport, UnitReport, UnitStatus};
pub use crate::progress::{ProgressEvent, ProgressTracker};
pub use crate::video::{FfmpegToolkit, MediaTools};
