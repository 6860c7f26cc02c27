//! Raw sample hook between decoder output and encoder input

use super::descriptor::{FormatKey, StreamDescriptor};
use super::types::{BufferInfo, MediaKind};
use crate::error::{PipelineError, Result};

/// In-place transform applied to each decoded buffer on the software path.
///
/// The zero-copy path never exposes decoded bytes, so a run with a
/// non-passthrough transform must use software transfer.
pub trait SampleTransform: Send {
    fn name(&self) -> &str;

    /// Called once with the decoder output format before the first buffer
    fn prepare(&mut self, _format: &StreamDescriptor) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, data: &mut [u8], info: &BufferInfo) -> Result<()>;

    fn is_passthrough(&self) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl SampleTransform for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn apply(&mut self, _data: &mut [u8], _info: &BufferInfo) -> Result<()> {
        Ok(())
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

/// Linear gain over signed 16-bit little-endian PCM, clamped to full scale
#[derive(Debug, Clone, Copy)]
pub struct PcmGain {
    factor: f32,
}

impl PcmGain {
    pub fn new(factor: f32) -> Self {
        PcmGain {
            factor: factor.max(0.0),
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }
}

impl SampleTransform for PcmGain {
    fn name(&self) -> &str {
        "pcm-gain"
    }

    fn prepare(&mut self, format: &StreamDescriptor) -> Result<()> {
        if format.kind != MediaKind::Audio {
            return Err(PipelineError::Unsupported(
                "gain only applies to audio".into(),
            ));
        }
        let bits = format.get(FormatKey::BitsPerSample).unwrap_or(16);
        if bits != 16 {
            return Err(PipelineError::Unsupported(format!(
                "gain needs 16-bit samples, the stream has {bits}"
            )));
        }
        Ok(())
    }

    fn apply(&mut self, data: &mut [u8], info: &BufferInfo) -> Result<()> {
        // a chunk may end in the middle of a sample
        let whole = data.len() - data.len() % 2;
        if whole != data.len() {
            log::debug!("pcm-gain: odd buffer of {} bytes at {}", info.size, info.pts);
        }
        for pair in data[..whole].chunks_exact_mut(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 * self.factor;
            let clamped = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            pair.copy_from_slice(&clamped.to_le_bytes());
        }
        Ok(())
    }

    fn is_passthrough(&self) -> bool {
        self.factor == 1.0
    }
}
