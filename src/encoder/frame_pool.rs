use ac_ffmpeg::codec::audio::{AudioFrame, AudioFrameMut, ChannelLayout, SampleFormat};
use ac_ffmpeg::time::TimeBase;
use std::collections::VecDeque;

/// Pool of PCM frames handed to the encoder's resampler.
///
/// Frames are keyed by sample count: decoded buffers are usually the same
/// size, so most takes are served from the pool. A frame still referenced by
/// the resampler is skipped and a new one allocated.
pub(crate) struct FramePool {
    frames: VecDeque<AudioFrame>,
    layout: ChannelLayout,
    sample_format: SampleFormat,
    sample_rate: u32,
    time_base: TimeBase,
}

/// Frames kept around between takes
const MAX_POOLED: usize = 8;

impl FramePool {
    pub fn new(
        layout: ChannelLayout,
        sample_format: SampleFormat,
        sample_rate: u32,
        time_base: TimeBase,
    ) -> Self {
        Self {
            frames: VecDeque::with_capacity(MAX_POOLED),
            layout,
            sample_format,
            sample_rate,
            time_base,
        }
    }

    /// Put a given frame back to the pool after it was used.
    #[inline]
    pub fn put(&mut self, frame: AudioFrame) {
        if self.frames.len() < MAX_POOLED {
            self.frames.push_back(frame);
        }
    }

    /// Take a writable frame holding `samples` samples per channel
    pub fn take(&mut self, samples: usize) -> AudioFrameMut {
        let available = self.frames.len();
        for _ in 0..available {
            let Some(frame) = self.frames.pop_front() else {
                break;
            };
            if frame.samples() != samples {
                continue;
            }
            match frame.try_into_mut() {
                Ok(frame) => return frame,
                Err(frame) => self.frames.push_back(frame),
            }
        }

        AudioFrameMut::silence(&self.layout, self.sample_format, self.sample_rate, samples)
            .with_time_base(self.time_base)
    }
}
