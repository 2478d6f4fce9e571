//! Step-based progress reporting for scan sessions.
//!
//! A session is split into a fixed number of steps planned up front. The
//! overall budget ([`StepProgress::MAX_PROGRESS`]) is divided evenly between
//! them, and each remote scan reports percentages through a [`ScanProgress`]
//! that converts percentage changes into increments of its step's share.

use indicatif::ProgressBar;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receives progress updates.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: Option<&str>, increment: Option<f64>);
}

/// Discards every update.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn report(&self, _message: Option<&str>, _increment: Option<f64>) {}
}

/// Drives an `indicatif` bar of length 100.
pub struct ProgressBarSink {
    bar: ProgressBar,
    total: Mutex<f64>,
}

impl ProgressBarSink {
    pub fn new(bar: ProgressBar) -> Self {
        bar.set_length(100);
        Self {
            bar,
            total: Mutex::new(0.0),
        }
    }

    pub fn finish_with_message(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

impl ProgressSink for ProgressBarSink {
    fn report(&self, message: Option<&str>, increment: Option<f64>) {
        if let Some(message) = message {
            self.bar.set_message(message.to_string());
        }
        if let Some(increment) = increment {
            let mut total = lock(&self.total);
            *total += increment;
            self.bar.set_position(total.round() as u64);
        }
    }
}

#[derive(Default)]
struct StepState {
    message: Option<String>,
    steps_done: usize,
    substeps: Option<usize>,
    reported: f64,
}

/// Progress of a session made of `total_steps` steps.
pub struct StepProgress {
    sink: Arc<dyn ProgressSink>,
    total_steps: usize,
    state: Mutex<StepState>,
    cancel: Option<CancellationToken>,
}

impl StepProgress {
    pub const MAX_PROGRESS: f64 = 99.0;

    pub fn new(sink: Arc<dyn ProgressSink>, total_steps: usize) -> Self {
        Self {
            sink,
            total_steps: total_steps.max(1),
            state: Mutex::new(StepState::default()),
            cancel: None,
        }
    }

    /// Stops reporting once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Starts the next step, optionally split into `substeps` equal parts.
    pub fn start_step(&self, message: &str, substeps: Option<usize>) {
        let mut state = lock(&self.state);
        state.steps_done += 1;
        state.message = Some(if self.total_steps > 1 {
            format!("{} ({}/{})", message, state.steps_done, self.total_steps)
        } else {
            message.to_string()
        });
        state.substeps = substeps.filter(|n| *n > 0);
        self.sink.report(Some(message), None);
    }

    /// Share of the budget for one step, or one substep when the current step
    /// has substeps.
    pub fn step_increment(&self) -> f64 {
        let state = lock(&self.state);
        Self::increment_for(self.total_steps, state.substeps)
    }

    fn increment_for(total_steps: usize, substeps: Option<usize>) -> f64 {
        let per_step = Self::MAX_PROGRESS / total_steps as f64;
        match substeps {
            Some(n) => per_step / n as f64,
            None => per_step,
        }
    }

    /// Reports `increment`, or one step share when `None`.
    ///
    /// Ignored until a step has started and after cancellation. The total
    /// never exceeds [`MAX_PROGRESS`](Self::MAX_PROGRESS).
    pub fn report_progress(&self, increment: Option<f64>) {
        if self.is_cancelled() {
            return;
        }
        let mut state = lock(&self.state);
        let Some(message) = state.message.clone() else {
            return;
        };
        let remaining = (Self::MAX_PROGRESS - state.reported).max(0.0);
        let increment = increment
            .unwrap_or_else(|| Self::increment_for(self.total_steps, state.substeps))
            .clamp(0.0, remaining);
        state.reported += increment;
        self.sink.report(Some(&message), Some(increment));
    }

    /// Total reported so far.
    pub fn reported(&self) -> f64 {
        lock(&self.state).reported
    }

    /// Creates a percentage reporter for one remote scan of the current step.
    pub fn create_scan_progress(self: &Arc<Self>, scan_name: impl Into<String>) -> ScanProgress {
        ScanProgress {
            step: Arc::clone(self),
            scan_name: scan_name.into(),
            last_percentage: Mutex::new(0.0),
        }
    }
}

/// Converts percentage-complete updates of one scan into step increments.
pub struct ScanProgress {
    step: Arc<StepProgress>,
    scan_name: String,
    last_percentage: Mutex<f64>,
}

impl ScanProgress {
    /// Reports the share matching the change since the last percentage.
    ///
    /// Repeated or decreasing percentages report nothing.
    pub fn set_percentage(&self, percentage: f64) {
        let percentage = percentage.clamp(0.0, 100.0);
        let mut last = lock(&self.last_percentage);
        if percentage <= *last {
            return;
        }
        debug!(
            scan = %self.scan_name,
            from = *last,
            to = percentage,
            "Scan reported change in progress"
        );
        let increment = self.step.step_increment() * ((percentage - *last) / 100.0);
        *last = percentage;
        drop(last);
        self.step.report_progress(Some(increment));
    }

    pub fn scan_name(&self) -> &str {
        &self.scan_name
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(Option<String>, Option<f64>)>>,
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, message: Option<&str>, increment: Option<f64>) {
            lock(&self.events).push((message.map(str::to_string), increment));
        }
    }

    impl RecordingSink {
        fn increments(&self) -> Vec<f64> {
            lock(&self.events).iter().filter_map(|(_, inc)| *inc).collect()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_report_before_step_is_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let progress = StepProgress::new(sink.clone(), 2);
        progress.report_progress(None);
        assert!(sink.increments().is_empty());
    }

    #[test]
    fn test_step_increment_divides_budget() {
        let progress = StepProgress::new(Arc::new(NoopSink), 3);
        assert!(approx(progress.step_increment(), 33.0));

        progress.start_step("Scanning", Some(3));
        assert!(approx(progress.step_increment(), 11.0));

        progress.start_step("Next", None);
        assert!(approx(progress.step_increment(), 33.0));
    }

    #[test]
    fn test_step_message_includes_counter() {
        let sink = Arc::new(RecordingSink::default());
        let progress = StepProgress::new(sink.clone(), 2);
        progress.start_step("Dependencies", None);
        progress.report_progress(None);

        let events = lock(&sink.events);
        assert_eq!(events[0].0.as_deref(), Some("Dependencies"));
        assert_eq!(events[1].0.as_deref(), Some("Dependencies (1/2)"));
        assert!(approx(events[1].1.unwrap(), 49.5));
    }

    #[test]
    fn test_scan_progress_reports_deltas_once() {
        let sink = Arc::new(RecordingSink::default());
        let progress = Arc::new(StepProgress::new(sink.clone(), 1));
        progress.start_step("Graph scan", None);
        let scan = progress.create_scan_progress("graph");

        scan.set_percentage(50.0);
        scan.set_percentage(50.0);
        scan.set_percentage(30.0);
        scan.set_percentage(100.0);

        let increments = sink.increments();
        assert_eq!(increments.len(), 2);
        assert!(approx(increments[0], 49.5));
        assert!(approx(increments[1], 49.5));
        assert!(approx(progress.reported(), 99.0));
    }

    #[test]
    fn test_total_never_exceeds_budget() {
        let sink = Arc::new(RecordingSink::default());
        let progress = StepProgress::new(sink.clone(), 2);
        progress.start_step("a", None);
        progress.report_progress(Some(80.0));
        progress.report_progress(Some(80.0));
        progress.report_progress(None);

        assert!(approx(progress.reported(), StepProgress::MAX_PROGRESS));
        assert!(approx(sink.increments().iter().sum::<f64>(), 99.0));
    }

    #[test]
    fn test_reports_stop_after_cancel() {
        let sink = Arc::new(RecordingSink::default());
        let token = CancellationToken::new();
        let progress =
            Arc::new(StepProgress::new(sink.clone(), 1).with_cancellation(token.clone()));
        progress.start_step("Graph scan", None);
        let scan = progress.create_scan_progress("graph");

        scan.set_percentage(40.0);
        token.cancel();
        scan.set_percentage(100.0);
        progress.report_progress(None);

        assert_eq!(sink.increments().len(), 1);
        assert!(approx(progress.reported(), 39.6));
    }

    #[test]
    fn test_progress_bar_sink_tracks_position() {
        let sink = ProgressBarSink::new(ProgressBar::hidden());
        sink.report(Some("Graph scan"), Some(33.3));
        sink.report(None, Some(33.3));
        assert_eq!(sink.bar.position(), 67);
        assert_eq!(sink.bar.length(), Some(100));
        assert_eq!(sink.bar.message(), "Graph scan");
        sink.finish_with_message("done");
        assert!(sink.bar.is_finished());
    }
}
