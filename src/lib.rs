//! Merge an ordered directory of media segments into one continuous file.
//!
//! Segments are demuxed one after the other, decoded, optionally transformed,
//! re-encoded and muxed into a single track, with presentation timestamps
//! shifted so they stay monotonic across segment boundaries.

pub mod backend;
pub mod codec;
pub mod config;
pub mod container;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod segment;

pub use error::{PipelineError, Result};
