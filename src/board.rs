//! Presentation side of a batch: the per-unit progress board and its sinks.
//!
//! Workers never touch display state. They post [`BoardMessage`]s on a
//! channel and a single reporter task applies them to the [`ProgressBoard`],
//! which forwards each change to a [`ProgressSink`].

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::processing::{BatchReport, UnitReport, UnitStatus};
use crate::progress::ProgressEvent;

/// Hand-off from workers to the reporter task
#[derive(Debug, Clone)]
pub enum BoardMessage {
    Scheduled { unit_id: String },
    Progress(ProgressEvent),
    Finished(UnitReport),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayStatus {
    Queued,
    Running,
    Completed,
    Failed(String),
}

/// Latest known state of one unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDisplay {
    pub percent: f64,
    pub eta_seconds: f64,
    pub status: DisplayStatus,
}

impl UnitDisplay {
    fn queued() -> Self {
        Self {
            percent: 0.0,
            eta_seconds: 0.0,
            status: DisplayStatus::Queued,
        }
    }
}

/// Renders board changes; only ever called from the reporter task
pub trait ProgressSink: Send {
    fn on_scheduled(&mut self, _unit_id: &str) {}

    fn on_progress(&mut self, event: &ProgressEvent);

    fn on_finished(&mut self, report: &UnitReport);

    fn on_batch_complete(&mut self, _report: &BatchReport) {}
}

impl<S: ProgressSink + ?Sized> ProgressSink for Box<S> {
    fn on_scheduled(&mut self, unit_id: &str) {
        (**self).on_scheduled(unit_id)
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        (**self).on_progress(event)
    }

    fn on_finished(&mut self, report: &UnitReport) {
        (**self).on_finished(report)
    }

    fn on_batch_complete(&mut self, report: &BatchReport) {
        (**self).on_batch_complete(report)
    }
}

/// Map of `unit_id` to display state, owned by the reporter task
#[derive(Debug)]
pub struct ProgressBoard<S> {
    units: HashMap<String, UnitDisplay>,
    order: Vec<String>,
    sink: S,
}

impl<S: ProgressSink> ProgressBoard<S> {
    pub fn new(sink: S) -> Self {
        Self {
            units: HashMap::new(),
            order: Vec::new(),
            sink,
        }
    }

    pub fn apply(&mut self, message: BoardMessage) {
        match message {
            BoardMessage::Scheduled { unit_id } => {
                if self.units.insert(unit_id.clone(), UnitDisplay::queued()).is_none() {
                    self.order.push(unit_id.clone());
                }
                self.sink.on_scheduled(&unit_id);
            }
            BoardMessage::Progress(event) => {
                let Some(display) = self.units.get_mut(&event.unit_id) else {
                    debug!("Progress for unscheduled unit {}", event.unit_id);
                    return;
                };
                display.percent = event.percent;
                display.eta_seconds = event.eta_seconds;
                if display.status == DisplayStatus::Queued {
                    display.status = DisplayStatus::Running;
                }
                self.sink.on_progress(&event);
            }
            BoardMessage::Finished(report) => {
                let Some(display) = self.units.get_mut(&report.unit_id) else {
                    debug!("Result for unscheduled unit {}", report.unit_id);
                    return;
                };
                display.status = match report.status {
                    UnitStatus::Completed => DisplayStatus::Completed,
                    UnitStatus::Failed => {
                        DisplayStatus::Failed(report.error.clone().unwrap_or_default())
                    }
                };
                self.sink.on_finished(&report);
            }
        }
    }

    /// Final acknowledgment once every unit has resolved
    pub fn complete(&mut self, report: &BatchReport) {
        self.sink.on_batch_complete(report);
    }

    pub fn get(&self, unit_id: &str) -> Option<&UnitDisplay> {
        self.units.get(unit_id)
    }

    /// Units in the order they were scheduled
    pub fn unit_ids(&self) -> &[String] {
        &self.order
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Drain the hand-off channel into the board until every sender is gone
pub async fn run_reporter<S: ProgressSink>(
    mut board: ProgressBoard<S>,
    mut rx: UnboundedReceiver<BoardMessage>,
) -> ProgressBoard<S> {
    while let Some(message) = rx.recv().await {
        board.apply(message);
    }
    board
}

/// Sink that reports through `tracing`, for non-interactive runs
#[derive(Debug, Default)]
pub struct LogSink {
    /// Last logged tenth (0..=10) per unit, to keep the log readable
    last_step: HashMap<String, u32>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogSink {
    fn on_scheduled(&mut self, unit_id: &str) {
        debug!("⏳ Queued {}", unit_id);
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        let step = (event.percent / 10.0).floor() as u32;
        let previous = self.last_step.insert(event.unit_id.clone(), step);
        if previous != Some(step) {
            info!("📊 {}: {}", event.unit_id, event.display());
        }
    }

    fn on_finished(&mut self, report: &UnitReport) {
        match report.status {
            UnitStatus::Completed => info!(
                "✅ {} done in {:.1}s -> {}",
                report.unit_id,
                report.processing_time.as_secs_f64(),
                report.output.display()
            ),
            UnitStatus::Failed => warn!(
                "❌ {} failed: {}",
                report.unit_id,
                report.error.as_deref().unwrap_or("Unknown error")
            ),
        }
    }

    fn on_batch_complete(&mut self, report: &BatchReport) {
        info!(
            "🎉 All units processed: {} succeeded, {} failed",
            report.succeeded, report.failed
        );
    }
}

/// Sink drawing one progress bar per unit
pub struct TerminalSink {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl TerminalSink {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template("{prefix:>24} [{bar:30.cyan/blue}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏ ");

        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalSink {
    fn on_scheduled(&mut self, unit_id: &str) {
        let bar = self.multi.add(ProgressBar::new(1000));
        bar.set_style(self.style.clone());
        bar.set_prefix(unit_id.to_string());
        bar.set_message("0%  ETA: --s");
        self.bars.insert(unit_id.to_string(), bar);
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        if let Some(bar) = self.bars.get(&event.unit_id) {
            bar.set_position((event.percent * 10.0).round() as u64);
            bar.set_message(event.display());
        }
    }

    fn on_finished(&mut self, report: &UnitReport) {
        if let Some(bar) = self.bars.get(&report.unit_id) {
            match report.status {
                UnitStatus::Completed => bar.finish_with_message(format!(
                    "✅ done in {:.1}s",
                    report.processing_time.as_secs_f64()
                )),
                UnitStatus::Failed => bar.abandon_with_message(format!(
                    "❌ {}",
                    report.error.as_deref().unwrap_or("failed")
                )),
            }
        }
    }

    fn on_batch_complete(&mut self, report: &BatchReport) {
        let summary = format!(
            "🎉 All folders have been processed ({} succeeded, {} failed)",
            report.succeeded, report.failed
        );
        if let Err(e) = self.multi.println(&summary) {
            warn!("Failed to print batch summary: {}", e);
            info!("{}", summary);
        }
    }
}
