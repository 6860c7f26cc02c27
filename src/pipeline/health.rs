//! Health monitoring and metrics for a run

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Health metrics for a run
///
/// Tracks per-stage counters and the time of the last progress. All fields
/// use atomic operations so the decode and encode threads can share one
/// instance behind an `Arc`.
#[derive(Debug)]
pub struct PipelineHealth {
    /// Segments opened so far
    pub segments: AtomicU64,

    /// Samples pulled out of demuxers
    pub samples_demuxed: AtomicU64,

    pub bytes_demuxed: AtomicU64,

    /// Bytes read back from decoder output buffers
    pub bytes_decoded: AtomicU64,

    /// Bytes copied into encoder input slots
    pub bytes_encoded_in: AtomicU64,

    /// Samples handed to the muxer
    pub samples_muxed: AtomicU64,

    pub bytes_muxed: AtomicU64,

    /// Slot acquisitions that timed out
    pub backpressure_polls: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last unit of progress
    pub last_progress: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            segments: AtomicU64::new(0),
            samples_demuxed: AtomicU64::new(0),
            bytes_demuxed: AtomicU64::new(0),
            bytes_decoded: AtomicU64::new(0),
            bytes_encoded_in: AtomicU64::new(0),
            samples_muxed: AtomicU64::new(0),
            bytes_muxed: AtomicU64::new(0),
            backpressure_polls: AtomicU64::new(0),
            last_progress: AtomicU64::new(now_micros()),
        }
    }

    /// Reset the stall timer without counting anything
    pub fn mark_progress(&self) {
        self.last_progress.store(now_micros(), Ordering::Relaxed);
    }

    pub fn record_segment(&self) {
        self.segments.fetch_add(1, Ordering::Relaxed);
        self.mark_progress();
    }

    pub fn record_demuxed(&self, size: usize) {
        self.samples_demuxed.fetch_add(1, Ordering::Relaxed);
        self.bytes_demuxed.fetch_add(size as u64, Ordering::Relaxed);
        self.mark_progress();
    }

    pub fn record_decoded(&self, size: usize) {
        self.bytes_decoded.fetch_add(size as u64, Ordering::Relaxed);
        self.mark_progress();
    }

    pub fn record_encoder_input(&self, size: usize) {
        self.bytes_encoded_in.fetch_add(size as u64, Ordering::Relaxed);
        self.mark_progress();
    }

    pub fn record_muxed(&self, size: usize) {
        self.samples_muxed.fetch_add(1, Ordering::Relaxed);
        self.bytes_muxed.fetch_add(size as u64, Ordering::Relaxed);
        self.mark_progress();
    }

    /// Record a slot acquisition that returned nothing
    pub fn record_backpressure(&self) {
        self.backpressure_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn segments(&self) -> u64 {
        self.segments.load(Ordering::Relaxed)
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded.load(Ordering::Relaxed)
    }

    pub fn bytes_encoded_in(&self) -> u64 {
        self.bytes_encoded_in.load(Ordering::Relaxed)
    }

    pub fn samples_muxed(&self) -> u64 {
        self.samples_muxed.load(Ordering::Relaxed)
    }

    pub fn bytes_muxed(&self) -> u64 {
        self.bytes_muxed.load(Ordering::Relaxed)
    }

    /// Check if no stage made progress for the given duration
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = self.last_progress.load(Ordering::Relaxed);
        now_micros().saturating_sub(last) > threshold.as_micros() as u64
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            segments: self.segments(),
            samples_demuxed: self.samples_demuxed.load(Ordering::Relaxed),
            bytes_demuxed: self.bytes_demuxed.load(Ordering::Relaxed),
            bytes_decoded: self.bytes_decoded(),
            bytes_encoded_in: self.bytes_encoded_in(),
            samples_muxed: self.samples_muxed(),
            bytes_muxed: self.bytes_muxed(),
            backpressure_polls: self.backpressure_polls.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSummary {
    pub segments: u64,
    pub samples_demuxed: u64,
    pub bytes_demuxed: u64,
    pub bytes_decoded: u64,
    pub bytes_encoded_in: u64,
    pub samples_muxed: u64,
    pub bytes_muxed: u64,
    pub backpressure_polls: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} segments, {} samples demuxed ({} bytes), {} bytes decoded, {} bytes to encoder, {} samples muxed ({} bytes), {} backpressure polls",
            self.segments,
            self.samples_demuxed,
            self.bytes_demuxed,
            self.bytes_decoded,
            self.bytes_encoded_in,
            self.samples_muxed,
            self.bytes_muxed,
            self.backpressure_polls
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_segment();
        health.record_demuxed(1000);
        health.record_demuxed(500);
        health.record_decoded(1500);
        health.record_encoder_input(1500);
        health.record_muxed(1500);
        health.record_backpressure();

        let summary = health.summary();
        assert_eq!(summary.segments, 1);
        assert_eq!(summary.samples_demuxed, 2);
        assert_eq!(summary.bytes_demuxed, 1500);
        assert_eq!(summary.bytes_decoded, summary.bytes_encoded_in);
        assert_eq!(summary.samples_muxed, 1);
        assert_eq!(summary.backpressure_polls, 1);
        assert!(summary.to_string().starts_with("Health: 1 segments"));
    }

    #[test]
    fn test_stall_detection() {
        let health = PipelineHealth::new();

        // Should not be stalled immediately
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_decoded(10);
        std::thread::sleep(Duration::from_millis(150));

        assert!(health.is_stalled(Duration::from_millis(100)));

        // backpressure alone is not progress
        health.record_backpressure();
        assert!(health.is_stalled(Duration::from_millis(100)));
    }
}
