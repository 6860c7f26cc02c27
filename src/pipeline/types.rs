//! Core types for the pipeline system

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Presentation timestamp in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Microseconds since the start of the stream
    pub micros: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { micros: 0 };

    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Convert to duration, clamping negative values to zero
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }

    /// Shift this timestamp by a signed number of microseconds
    pub fn offset_by(&self, micros: i64) -> Self {
        Self {
            micros: self.micros.saturating_add(micros),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// Kind of media carried by the single track of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio samples
    #[default]
    Audio,
    /// Video frames
    Video,
}

impl MediaKind {
    /// MIME prefix used to select a container track of this kind
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/",
            MediaKind::Video => "video/",
        }
    }

    /// Check whether a track MIME type belongs to this kind
    pub fn matches_mime(&self, mime: &str) -> bool {
        mime.starts_with(self.mime_prefix())
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(format!("unknown media kind '{other}' (expected audio or video)")),
        }
    }
}

/// Metadata attached to a codec output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Number of valid payload bytes
    pub size: usize,
    /// Presentation timestamp of the payload
    pub pts: Timestamp,
    /// Last buffer the engine will ever produce
    pub is_end_of_stream: bool,
    /// Codec configuration data, not a media sample
    pub is_config_change: bool,
}

impl BufferInfo {
    /// Info for a regular media payload
    pub fn sample(size: usize, pts: Timestamp) -> Self {
        Self {
            size,
            pts,
            is_end_of_stream: false,
            is_config_change: false,
        }
    }

    /// Info for the end-of-stream marker (may still carry a payload)
    pub fn end_of_stream(size: usize, pts: Timestamp) -> Self {
        Self {
            size,
            pts,
            is_end_of_stream: true,
            is_config_change: false,
        }
    }

    /// Info for codec configuration data
    pub fn config_change(size: usize) -> Self {
        Self {
            size,
            pts: Timestamp::ZERO,
            is_end_of_stream: false,
            is_config_change: true,
        }
    }
}

/// Flags passed along with a submitted input buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputFlags {
    /// No more input follows this buffer
    pub end_of_stream: bool,
    /// The buffer is a non-final chunk of a larger logical sample
    pub partial: bool,
}

impl InputFlags {
    pub const NONE: InputFlags = InputFlags {
        end_of_stream: false,
        partial: false,
    };

    pub const END_OF_STREAM: InputFlags = InputFlags {
        end_of_stream: true,
        partial: false,
    };

    pub const PARTIAL: InputFlags = InputFlags {
        end_of_stream: false,
        partial: true,
    };
}

/// One frame presented on a zero-copy surface
#[derive(Clone)]
pub struct Sample {
    pub data: Bytes,
    pub pts: Timestamp,
}

impl Sample {
    pub fn new(data: Bytes, pts: Timestamp) -> Self {
        Self { data, pts }
    }

    /// Get the size of the sample payload in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("pts", &self.pts)
            .field("size", &self.size())
            .finish()
    }
}
