//! Fire-and-forget progress notifications
//!
//! The orchestrator never waits on its listener: events go through a bounded
//! tokio channel with `try_send`, and a full or closed channel only drops the
//! event. Every event is also written to the log.

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Engines picked for the run, by name
    EnginesSelected { decoder: String, encoder: String },
    /// Decoding moved on to the segment at `index` (zero based)
    SegmentAdvanced { index: usize, path: PathBuf },
    DecodeComplete,
    EncodeComplete { samples: u64 },
    /// The input directory held nothing to merge
    NoInput,
    Failed { reason: String },
}

impl std::fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineEvent::EnginesSelected { decoder, encoder } => {
                write!(f, "decoder: {decoder}, encoder: {encoder}")
            }
            PipelineEvent::SegmentAdvanced { index, path } => {
                write!(f, "segment {} ({})", index + 1, path.display())
            }
            PipelineEvent::DecodeComplete => write!(f, "decode complete"),
            PipelineEvent::EncodeComplete { samples } => {
                write!(f, "encode complete, {samples} samples written")
            }
            PipelineEvent::NoInput => write!(f, "no input segments"),
            PipelineEvent::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// An event stamped with the wall-clock time it was emitted
#[derive(Debug, Clone)]
pub struct TimedEvent {
    pub at: DateTime<Local>,
    pub event: PipelineEvent,
}

#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TimedEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver a listener drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TimedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (EventSink { tx: Some(tx) }, rx)
    }

    /// A sink that only logs
    pub fn disabled() -> Self {
        EventSink { tx: None }
    }

    pub fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Failed { .. } | PipelineEvent::NoInput => warn!("{}", event),
            _ => info!("{}", event),
        }
        let Some(tx) = &self.tx else {
            return;
        };
        let timed = TimedEvent {
            at: Local::now(),
            event,
        };
        if let Err(e) = tx.try_send(timed) {
            debug!("Event dropped: {}", e);
        }
    }
}
