//! FFmpeg `-progress` stream parsing and per-job ETA tracking

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::board::BoardMessage;

/// Percent complete and estimated seconds remaining for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub unit_id: String,
    pub percent: f64,
    pub eta_seconds: f64,
}

impl ProgressEvent {
    pub fn completed(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            percent: 100.0,
            eta_seconds: 0.0,
        }
    }

    /// Display text in the `12.3%  ETA: 45.6s` form
    pub fn display(&self) -> String {
        format!("{:.1}%  ETA: {:.1}s", self.percent, self.eta_seconds)
    }
}

/// Extract elapsed output time in seconds from one `key=value` progress line.
///
/// FFmpeg reports `out_time_ms` in microseconds despite the name; newer builds
/// also emit `out_time_us` with the same value. Anything else, including
/// `out_time_ms=N/A` before the first frame, yields `None`.
pub fn parse_out_time(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key.trim() {
        "out_time_ms" | "out_time_us" => {
            let micros: i64 = value.trim().parse().ok()?;
            Some(micros as f64 / 1_000_000.0)
        }
        _ => None,
    }
}

/// Percent complete, clamped to `[0, 100]`, and ETA in seconds.
///
/// The ETA extrapolates the wall time spent so far over the remaining share
/// of the output and is never negative.
pub fn compute_progress(output_seconds: f64, total_duration: f64, wall_elapsed: f64) -> (f64, f64) {
    if total_duration <= 0.0 || !total_duration.is_finite() {
        return (0.0, 0.0);
    }

    let percent = (100.0 * output_seconds / total_duration).clamp(0.0, 100.0);
    let eta = if percent > 0.0 {
        (wall_elapsed * (100.0 / percent - 1.0)).max(0.0)
    } else {
        0.0
    };

    (percent, eta)
}

/// Turns a job's progress lines into events for the board
pub struct ProgressTracker {
    unit_id: String,
    total_duration: f64,
    started: Instant,
    tx: UnboundedSender<BoardMessage>,
    events_sent: usize,
    last_output: Option<f64>,
}

impl ProgressTracker {
    pub fn new(unit_id: &str, total_duration: f64, tx: UnboundedSender<BoardMessage>) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            total_duration,
            started: Instant::now(),
            tx,
            events_sent: 0,
            last_output: None,
        }
    }

    /// Feed one line of the progress stream; emits an event if it carried a
    /// new output time. The `out_time_us` twin of an `out_time_ms` line is
    /// absorbed here.
    pub fn observe_line(&mut self, line: &str) -> Option<ProgressEvent> {
        let output_seconds = parse_out_time(line)?;
        if self.last_output == Some(output_seconds) {
            return None;
        }
        self.last_output = Some(output_seconds);

        let (percent, eta_seconds) = compute_progress(
            output_seconds,
            self.total_duration,
            self.started.elapsed().as_secs_f64(),
        );

        let event = ProgressEvent {
            unit_id: self.unit_id.clone(),
            percent,
            eta_seconds,
        };
        self.send(event.clone());
        Some(event)
    }

    /// Emit the terminal `(100, 0)` event once the stream has ended
    pub fn finish(mut self) -> ProgressEvent {
        let event = ProgressEvent::completed(&self.unit_id);
        self.send(event.clone());
        debug!("📈 {} emitted {} progress events", self.unit_id, self.events_sent);
        event
    }

    fn send(&mut self, event: ProgressEvent) {
        if self.tx.send(BoardMessage::Progress(event)).is_err() {
            debug!("Progress board closed, dropping update for {}", self.unit_id);
        }
        self.events_sent += 1;
    }
}
