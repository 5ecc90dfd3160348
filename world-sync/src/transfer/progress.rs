//! Upload progress reporting.
//!
//! A run uploads a single archive, so progress is reported through the log
//! rather than pushed anywhere: one line at most every few seconds with the
//! percentage, speed and estimated time left.

use std::time::{Duration, Instant};
use tracing::info;

/// Tracks bytes sent for one upload and logs at a bounded rate.
#[derive(Debug)]
pub struct UploadProgress {
    label: String,
    total_bytes: u64,
    transferred_bytes: u64,
    started: Instant,
    last_report: Instant,
    report_interval: Duration,
}

impl UploadProgress {
    pub fn new(label: impl Into<String>, total_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            total_bytes,
            transferred_bytes: 0,
            started: now,
            last_report: now,
            report_interval: Duration::from_secs(5),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Record `bytes` more sent. Returns true when a line was logged.
    pub fn advance(&mut self, bytes: u64) -> bool {
        self.transferred_bytes += bytes;

        let now = Instant::now();
        if now.duration_since(self.last_report) < self.report_interval {
            return false;
        }
        self.last_report = now;
        self.report();
        true
    }

    /// Log the final totals.
    pub fn finish(&self) {
        let elapsed = self.started.elapsed();
        info!(
            "Uploaded {}: {} in {} ({})",
            self.label,
            format_bytes(self.transferred_bytes),
            format_duration(elapsed.as_secs()),
            format_speed(self.average_speed())
        );
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        ((self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
    }

    /// Average bytes/second since the upload started
    pub fn average_speed(&self) -> u64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            (self.transferred_bytes as f64 / secs) as u64
        } else {
            0
        }
    }

    fn report(&self) {
        let speed = self.average_speed();
        let eta = if speed > 0 {
            self.total_bytes.saturating_sub(self.transferred_bytes) / speed
        } else {
            0
        };
        info!(
            "Uploading {}: {:.1}% of {} at {}, about {} left",
            self.label,
            self.percent(),
            format_bytes(self.total_bytes),
            format_speed(speed),
            format_duration(eta)
        );
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
