//! Progress reporting for encryption/decryption jobs

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Percent of `total` covered by `done`, capped at 100. An empty total counts as done.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (u128::from(done) * 100 / u128::from(total)).min(100) as u8
}

/// Terminal progress bar for a job
pub struct ProgressTracker {
    bar: ProgressBar,
}

impl ProgressTracker {
    /// Create a new percent-based progress bar
    pub fn new(operation: &str) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template(&format!(
                "{} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos:>3}}% {{msg}}",
                operation
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Create a tracker that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Set the current percentage
    pub fn set_percent(&self, percent: u8) {
        self.bar.set_position(u64::from(percent.min(100)));
    }

    /// Set message shown after the bar
    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    /// Mark operation as finished
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Mark operation as finished and clear
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 200), 0);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(199, 200), 99);
        assert_eq!(percent(200, 200), 100);
        assert_eq!(percent(300, 200), 100);
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new("Testing");

        for step in 1..=10u8 {
            tracker.set_percent(step * 10);
            thread::sleep(Duration::from_millis(5));
        }
        tracker.set_message("Almost done...");
        tracker.finish("Complete");
    }

    #[test]
    fn test_hidden_tracker_clamps() {
        let tracker = ProgressTracker::hidden();
        tracker.set_percent(250);
        assert_eq!(tracker.bar.position(), 100);
        tracker.finish_and_clear();
    }

    #[test]
    fn test_finished_message_survives_drop() {
        let tracker = ProgressTracker::hidden();
        tracker.set_message("notes.txt");
        tracker.finish("done");
        let bar = tracker.bar.clone();
        drop(tracker);
        assert!(bar.is_finished());
        assert_eq!(bar.message(), "done");
    }
}
