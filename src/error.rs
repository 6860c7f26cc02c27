//! Error type shared by every pipeline component

use crate::pipeline::types::{MediaKind, Timestamp};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no input segments found in {}", dir.display())]
    NoInput { dir: PathBuf },

    #[error("segment not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("no {kind} track found in {}", path.display())]
    NoMatchingTrack { path: PathBuf, kind: MediaKind },

    #[error("invalid container {}: {message}", path.display())]
    InvalidContainer { path: PathBuf, message: String },

    #[error(
        "{} does not continue the stream: {key} is {found}, expected {expected}",
        path.display()
    )]
    FormatMismatch {
        path: PathBuf,
        key: &'static str,
        expected: String,
        found: String,
    },

    #[error("codec fault in {engine}: {message}")]
    CodecFault { engine: String, message: String },

    #[error("muxer error: {0}")]
    Muxer(String),

    #[error("timestamp regression: {current} after {previous}")]
    NonMonotonicTimestamp {
        previous: Timestamp,
        current: Timestamp,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("pipeline stalled for {0:?}")]
    Stalled(std::time::Duration),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Build a codec fault attributed to the named engine
    pub fn codec(engine: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PipelineError::CodecFault {
            engine: engine.into(),
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
