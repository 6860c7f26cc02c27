//! Stream format metadata and encoder format construction

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::EncoderSettings;
use crate::error::{PipelineError, Result};
use crate::pipeline::types::MediaKind;

/// AAC Low Complexity object type
pub const AAC_PROFILE_LC: i64 = 2;

/// Flexible YUV 4:2:0 color format understood by hardware encoders
pub const COLOR_FORMAT_YUV420_FLEXIBLE: i64 = 0x7F42_0888;

/// Keys of the codec format parameter map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKey {
    SampleRate,
    ChannelCount,
    BitsPerSample,
    Width,
    Height,
    BitRate,
    FrameRate,
    CaptureRate,
    IFrameInterval,
    ColorFormat,
    MaxInputSize,
    /// Duration in microseconds
    Duration,
    AacProfile,
}

impl FormatKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKey::SampleRate => "sample-rate",
            FormatKey::ChannelCount => "channel-count",
            FormatKey::BitsPerSample => "bits-per-sample",
            FormatKey::Width => "width",
            FormatKey::Height => "height",
            FormatKey::BitRate => "bitrate",
            FormatKey::FrameRate => "frame-rate",
            FormatKey::CaptureRate => "capture-rate",
            FormatKey::IFrameInterval => "i-frame-interval",
            FormatKey::ColorFormat => "color-format",
            FormatKey::MaxInputSize => "max-input-size",
            FormatKey::Duration => "durationUs",
            FormatKey::AacProfile => "aac-profile",
        }
    }
}

/// Format of the single track flowing through a run
///
/// Derived from the first segment's container metadata, then extended with
/// the keys an encoder needs before it can be configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub kind: MediaKind,
    pub mime: String,
    pub parameters: BTreeMap<FormatKey, i64>,
    /// Out-of-band codec setup bytes (AudioSpecificConfig, OpusHead, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codec_config: Vec<u8>,
}

impl StreamDescriptor {
    pub fn new(kind: MediaKind, mime: impl Into<String>) -> Self {
        Self {
            kind,
            mime: mime.into(),
            parameters: BTreeMap::new(),
            codec_config: Vec::new(),
        }
    }

    /// Builder-style setter
    pub fn with(mut self, key: FormatKey, value: i64) -> Self {
        self.parameters.insert(key, value);
        self
    }

    pub fn set(&mut self, key: FormatKey, value: i64) {
        self.parameters.insert(key, value);
    }

    pub fn get(&self, key: FormatKey) -> Option<i64> {
        self.parameters.get(&key).copied()
    }

    pub fn contains(&self, key: FormatKey) -> bool {
        self.parameters.contains_key(&key)
    }

    /// Maximum input buffer size, if negotiated
    pub fn max_input_size(&self) -> Option<usize> {
        self.get(FormatKey::MaxInputSize)
            .filter(|size| *size > 0)
            .map(|size| size as usize)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.get(FormatKey::SampleRate).map(|v| v as u32)
    }

    pub fn channel_count(&self) -> Option<u16> {
        self.get(FormatKey::ChannelCount).map(|v| v as u16)
    }

    /// Check that the segment at `path`, described by `next`, can be fed to
    /// the decoder configured for this stream.
    pub fn ensure_continues(&self, next: &StreamDescriptor, path: &Path) -> Result<()> {
        let mismatch = |key: &'static str, expected: String, found: String| {
            Err(PipelineError::FormatMismatch {
                path: path.to_path_buf(),
                key,
                expected,
                found,
            })
        };
        if next.mime != self.mime {
            return mismatch("mime", self.mime.clone(), next.mime.clone());
        }
        for key in CONTINUITY_KEYS {
            let (expected, found) = (self.get(*key), next.get(*key));
            if expected != found {
                return mismatch(key.as_str(), show(expected), show(found));
            }
        }
        Ok(())
    }
}

/// Keys every segment must share with the first one
const CONTINUITY_KEYS: &[FormatKey] = &[
    FormatKey::SampleRate,
    FormatKey::ChannelCount,
    FormatKey::BitsPerSample,
    FormatKey::Width,
    FormatKey::Height,
];

fn show(value: Option<i64>) -> String {
    value.map_or_else(|| "unset".to_string(), |v| v.to_string())
}

impl std::fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{mime={}", self.mime)?;
        for (key, value) in &self.parameters {
            write!(f, ", {}={}", key.as_str(), value)?;
        }
        write!(f, "}}")
    }
}

/// Build the encoder format from the source format.
///
/// Pure function of the media kind: audio gets bit rate, max input size and
/// the AAC-LC profile; video additionally gets frame rate, capture rate,
/// I-frame interval and a flexible YUV color format.
pub fn encoder_descriptor(source: &StreamDescriptor, settings: &EncoderSettings) -> StreamDescriptor {
    let mut descriptor = source.clone();
    // the encoder produces its own setup bytes
    descriptor.codec_config.clear();
    if let Some(mime) = &settings.mime {
        descriptor.mime = mime.clone();
    }
    descriptor.set(FormatKey::BitRate, settings.bit_rate);
    descriptor.set(FormatKey::MaxInputSize, settings.max_input_size as i64);

    match source.kind {
        MediaKind::Audio => {
            descriptor.set(FormatKey::AacProfile, settings.aac_profile);
        }
        MediaKind::Video => {
            descriptor.set(FormatKey::FrameRate, settings.frame_rate);
            descriptor.set(FormatKey::CaptureRate, settings.capture_rate);
            descriptor.set(FormatKey::IFrameInterval, settings.i_frame_interval);
            descriptor.set(FormatKey::ColorFormat, settings.color_format);
        }
    }
    descriptor
}

/// Minimal audio encoder format, used when an encoder rejects the derived one
pub fn fallback_audio_descriptor(mime: &str, settings: &EncoderSettings) -> StreamDescriptor {
    StreamDescriptor::new(MediaKind::Audio, settings.mime.as_deref().unwrap_or(mime))
        .with(FormatKey::BitRate, settings.bit_rate)
        .with(FormatKey::ChannelCount, 2)
        .with(FormatKey::SampleRate, 44_100)
        .with(FormatKey::AacProfile, settings.aac_profile)
        .with(FormatKey::MaxInputSize, settings.max_input_size as i64)
}
