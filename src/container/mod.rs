//! Demuxer and muxer adapters

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod wav;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::pipeline::descriptor::StreamDescriptor;
use crate::pipeline::types::{BufferInfo, Timestamp};

/// Output container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mpeg4,
    Matroska,
    MpegTs,
    Wav,
}

impl ContainerFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp4" | "m4a" | "mov" => Some(ContainerFormat::Mpeg4),
            "mkv" | "mka" | "webm" => Some(ContainerFormat::Matroska),
            "ts" | "m2ts" => Some(ContainerFormat::MpegTs),
            "wav" | "wave" => Some(ContainerFormat::Wav),
            _ => None,
        }
    }

    /// Short name understood by FFmpeg's muxer lookup
    pub fn short_name(&self) -> &'static str {
        match self {
            ContainerFormat::Mpeg4 => "mp4",
            ContainerFormat::Matroska => "matroska",
            ContainerFormat::MpegTs => "mpegts",
            ContainerFormat::Wav => "wav",
        }
    }
}

/// Outcome of pulling one sample out of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// `size` bytes were copied into the caller's buffer
    Sample { size: usize, timestamp: Timestamp },
    /// The segment holds no more samples
    EndOfSegment,
}

/// Reader for the selected track of one segment
pub trait Demuxer: Send {
    /// Copy the next elementary sample into `buffer`
    fn pull(&mut self, buffer: &mut [u8]) -> Result<Pull>;

    /// Release the underlying file; safe to call more than once
    fn close(&mut self);
}

/// Writer appending encoded samples to one output container
pub trait Muxer: Send {
    /// Declare a track; only valid before `start`
    fn add_track(&mut self, descriptor: &StreamDescriptor) -> Result<usize>;

    fn start(&mut self) -> Result<()>;

    /// Append one sample; timestamps per track must be non-decreasing
    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()>;

    /// Finalize the container; fails when a declared track got no samples
    fn stop(&mut self) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ContainerFormat::from_path(Path::new("merged.MP4")),
            Some(ContainerFormat::Mpeg4)
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("out/merged.wav")),
            Some(ContainerFormat::Wav)
        );
        assert_eq!(ContainerFormat::from_path(Path::new("merged")), None);
    }
}
