//! Timestamp continuity across segment boundaries
//!
//! Every segment starts its own timeline near zero. The tracker shifts each
//! segment by the sum of the last native timestamps of all segments before
//! it, so the stream handed to the encoder reads as one recording.

use super::types::Timestamp;
use crate::error::{PipelineError, Result};

#[derive(Debug, Default, Clone)]
pub struct ContinuityTracker {
    cumulative_offset: i64,
    /// Last native timestamp seen in the current segment
    last_native: Option<Timestamp>,
    last_adjusted: Option<Timestamp>,
    boundaries: u64,
}

impl ContinuityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current segment and fold its last timestamp into the offset.
    ///
    /// Must be called exactly once per boundary. A segment that produced no
    /// samples adds nothing. Returns the new cumulative offset.
    pub fn end_segment(&mut self) -> i64 {
        let last = self.last_native.take().map(|ts| ts.micros).unwrap_or(0);
        self.cumulative_offset = self.cumulative_offset.saturating_add(last.max(0));
        self.boundaries += 1;
        self.cumulative_offset
    }

    /// Adjust a native sample timestamp.
    ///
    /// `segment_just_ended` closes the previous segment first, which is the
    /// same as calling [`end_segment`](Self::end_segment) beforehand.
    pub fn next_timestamp(&mut self, native: Timestamp, segment_just_ended: bool) -> Timestamp {
        if segment_just_ended {
            self.end_segment();
        }
        self.last_native = Some(native);
        let adjusted = native.offset_by(self.cumulative_offset);
        self.last_adjusted = Some(adjusted);
        adjusted
    }

    /// Last timestamp handed out, zero before the first sample
    pub fn last_adjusted(&self) -> Timestamp {
        self.last_adjusted.unwrap_or(Timestamp::ZERO)
    }

    /// Number of segment boundaries crossed so far
    pub fn boundaries(&self) -> u64 {
        self.boundaries
    }
}

/// Rejects a timestamp smaller than the previous one on the same track
#[derive(Debug, Default, Clone)]
pub struct MonotonicGuard {
    last: Option<Timestamp>,
}

impl MonotonicGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `pts` if it does not go backwards; equal timestamps pass
    pub fn check(&mut self, pts: Timestamp) -> Result<()> {
        if let Some(previous) = self.last
            && pts < previous
        {
            return Err(PipelineError::NonMonotonicTimestamp {
                previous,
                current: pts,
            });
        }
        self.last = Some(pts);
        Ok(())
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[test]
    fn test_offsets_accumulate_per_boundary() {
        let mut tracker = ContinuityTracker::new();
        let segments: [&[i64]; 3] = [
            &[0, 2_500_000, 5_000_000],
            &[0, 1_000_000, 3_000_000],
            &[0, 4_000_000],
        ];

        let mut firsts = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            for (j, native) in segment.iter().enumerate() {
                let adjusted = tracker.next_timestamp(ts(*native), i > 0 && j == 0);
                if j == 0 {
                    firsts.push(adjusted.micros);
                }
            }
        }

        assert_eq!(firsts, vec![0, 5_000_000, 8_000_000]);
        assert_eq!(tracker.last_adjusted().micros, 12_000_000);
        assert_eq!(tracker.boundaries(), 2);
    }

    #[test]
    fn test_empty_segment_adds_nothing() {
        let mut tracker = ContinuityTracker::new();
        tracker.next_timestamp(ts(1_000), false);
        assert_eq!(tracker.end_segment(), 1_000);
        // segment two is empty
        assert_eq!(tracker.end_segment(), 1_000);
        assert_eq!(tracker.next_timestamp(ts(0), false).micros, 1_000);
    }

    #[test]
    fn test_guard_rejects_regression() {
        let mut guard = MonotonicGuard::new();
        guard.check(ts(10)).unwrap();
        guard.check(ts(10)).unwrap();
        guard.check(ts(20)).unwrap();
        let err = guard.check(ts(15)).unwrap_err();
        assert!(matches!(err, PipelineError::NonMonotonicTimestamp { .. }));
        assert_eq!(guard.last(), Some(ts(20)));
    }
}
