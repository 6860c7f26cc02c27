//! Segment-merging pipeline
//!
//! This module ties the media services together into one run:
//! - Control: the run state machine and the orchestrator driving it
//! - Timing: per-boundary timestamp continuity and the monotonic guard
//! - Data model: stream descriptors, buffer metadata, samples
//! - Observability: health counters and fire-and-forget events
//!
//! # Architecture
//!
//! The orchestrator owns every engine, demuxer and the muxer of a run. On the
//! software path a single loop copies decoder output into encoder input slots;
//! on the zero-copy path a decode-drive thread renders onto the encoder's
//! input surface while an encode-drain thread feeds the muxer.

pub mod continuity;
pub mod descriptor;
pub mod events;
pub mod health;
pub mod orchestrator;
pub mod state;
pub mod transform;
pub mod types;

pub use continuity::{ContinuityTracker, MonotonicGuard};
pub use descriptor::{FormatKey, StreamDescriptor};
pub use events::{EventSink, PipelineEvent, TimedEvent};
pub use health::{HealthSummary, PipelineHealth};
pub use orchestrator::{Orchestrator, RunReport};
pub use state::{FailureReason, PipelineRunState};
pub use transform::{Passthrough, PcmGain, SampleTransform};
pub use types::{BufferInfo, InputFlags, MediaKind, Sample, Timestamp};
