//! Progress reporting cadence: every 100 events or every 5s, whichever first.

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub added: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Events processed per second since the last report.
    pub rate: f64,
    /// Estimated seconds remaining, if `limit` bounds the run.
    pub eta_secs: Option<f64>,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &Progress);
}

/// Default reporter: logs at `info` via `tracing`.
pub struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn report(&self, progress: &Progress) {
        tracing::info!(
            processed = progress.processed,
            added = progress.added,
            skipped = progress.skipped,
            errors = progress.errors,
            rate = progress.rate,
            "sync progress"
        );
    }
}

/// Decides when to fire the next progress report and computes the rate.
pub struct ProgressTracker {
    every_n: u64,
    every: Duration,
    last_report_at: Instant,
    last_report_processed: u64,
    limit: Option<usize>,
}

impl ProgressTracker {
    pub fn new(every_n: u64, every: Duration, limit: Option<usize>) -> Self {
        Self { every_n, every, last_report_at: Instant::now(), last_report_processed: 0, limit }
    }

    /// Returns `Some(Progress)` iff a report is due given the current totals.
    pub fn maybe_report(&mut self, processed: u64, added: u64, skipped: u64, errors: u64) -> Option<Progress> {
        let due_by_count = self.every_n > 0 && processed > 0 && processed % self.every_n == 0;
        let due_by_time = self.last_report_at.elapsed() >= self.every;
        if !due_by_count && !due_by_time {
            return None;
        }

        let elapsed = self.last_report_at.elapsed().as_secs_f64().max(1e-6);
        let delta = processed.saturating_sub(self.last_report_processed);
        let rate = delta as f64 / elapsed;
        let eta_secs = self.limit.map(|limit| {
            let remaining = (limit as u64).saturating_sub(processed) as f64;
            if rate > 0.0 { remaining / rate } else { 0.0 }
        });

        self.last_report_at = Instant::now();
        self.last_report_processed = processed;

        Some(Progress { processed, added, skipped, errors, rate, eta_secs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_n_events() {
        let mut tracker = ProgressTracker::new(2, Duration::from_secs(3600), None);
        assert!(tracker.maybe_report(1, 1, 0, 0).is_none());
        assert!(tracker.maybe_report(2, 2, 0, 0).is_some());
    }

    #[test]
    fn reports_after_time_elapses_even_below_count() {
        let mut tracker = ProgressTracker::new(1_000_000, Duration::from_millis(1), None);
        std::thread::sleep(Duration::from_millis(5));
        assert!(tracker.maybe_report(1, 1, 0, 0).is_some());
    }
}
