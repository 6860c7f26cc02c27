use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioDecoder, AudioFrame, AudioResampler, ChannelLayout};
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp as AvTimestamp};
use bytes::Bytes;
use log::{debug, info, warn};
use std::time::Duration;

use crate::codec::{
    CodecEngine, CodecRole, DEFAULT_SLOT_CAPACITY, EngineLifecycle, InputSlot, OutputSlot,
    OutputTarget, SlotExchange,
};
use crate::container::ffmpeg::decoder_for_mime;
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::{FormatKey, StreamDescriptor};
use crate::pipeline::types::{BufferInfo, InputFlags, MediaKind, Timestamp};

/// Bytes per interleaved 16-bit sample
const BYTES_PER_SAMPLE: usize = 2;

/// Audio decoder over libavcodec.
///
/// Every decoded frame is converted to packed s16 at the source rate and
/// channel count, so downstream stages see the same raw layout regardless of
/// the codec's native sample format.
pub struct FfmpegAudioDecoder {
    lifecycle: EngineLifecycle,
    exchange: SlotExchange,
    descriptor: Option<StreamDescriptor>,
    decoder: Option<AudioDecoder>,
    /// Built from the first decoded frame, once the native format is known
    resampler: Option<AudioResampler>,
    last_pts: Timestamp,
}

// SAFETY: libavcodec contexts are only touched by the thread owning the engine
unsafe impl Send for FfmpegAudioDecoder {}

impl Default for FfmpegAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegAudioDecoder {
    pub fn new() -> Self {
        Self {
            lifecycle: EngineLifecycle::Unconfigured,
            exchange: SlotExchange::new("ffmpeg.decoder"),
            descriptor: None,
            decoder: None,
            resampler: None,
            last_pts: Timestamp::ZERO,
        }
    }

    fn fault(&self, e: impl std::fmt::Display) -> PipelineError {
        PipelineError::codec(self.exchange.name(), e)
    }

    /// Push one compressed packet and collect whatever it decodes to
    fn decode(&mut self, packet: &[u8], pts: Timestamp) -> Result<()> {
        let packet = PacketMut::from(packet)
            .with_time_base(TimeBase::MICROSECONDS)
            .with_pts(AvTimestamp::from_micros(pts.micros))
            .freeze();
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| PipelineError::InvalidState("decoder not configured".into()))?;
        if let Err(e) = decoder.try_push(packet) {
            return Err(self.fault(e));
        }
        self.collect_frames()
    }

    fn collect_frames(&mut self) -> Result<()> {
        loop {
            let frame = match self.decoder.as_mut().map(|d| d.take()) {
                Some(Ok(Some(frame))) => frame,
                Some(Ok(None)) | None => return Ok(()),
                Some(Err(e)) => return Err(self.fault(e)),
            };
            self.convert(frame)?;
        }
    }

    /// Resample one native frame to packed s16 and queue it
    fn convert(&mut self, frame: AudioFrame) -> Result<()> {
        if self.resampler.is_none() {
            let layout = frame.channel_layout().to_owned();
            let resampler = AudioResampler::builder()
                .source_channel_layout(layout.clone())
                .source_sample_format(frame.sample_format())
                .source_sample_rate(frame.sample_rate())
                .target_channel_layout(layout)
                .target_sample_format(get_sample_format("s16"))
                .target_sample_rate(frame.sample_rate())
                .build()
                .map_err(|e| self.fault(e))?;
            self.resampler = Some(resampler);
        }
        let fallback = frame.pts().as_micros().unwrap_or(self.last_pts.micros);
        let pushed = match self.resampler.as_mut() {
            Some(resampler) => resampler.push(frame),
            None => return Ok(()),
        };
        pushed.map_err(|e| self.fault(e))?;
        self.take_resampled(fallback)
    }

    fn take_resampled(&mut self, fallback_pts: i64) -> Result<()> {
        loop {
            let frame = match self.resampler.as_mut().map(|r| r.take()) {
                Some(Ok(Some(frame))) => frame,
                Some(Ok(None)) | None => return Ok(()),
                Some(Err(e)) => return Err(self.fault(e)),
            };
            let channels = frame.channel_layout().channels() as usize;
            let len = frame.samples() * channels * BYTES_PER_SAMPLE;
            let planes = frame.planes();
            let data = Bytes::copy_from_slice(&planes[0].data()[..len]);
            let pts = Timestamp::from_micros(frame.pts().as_micros().unwrap_or(fallback_pts));
            self.last_pts = pts;
            self.exchange.produce(data, BufferInfo::sample(len, pts));
        }
    }

    /// Flush codec and resampler, then queue the end-of-stream marker
    fn finish(&mut self, pts: Timestamp) -> Result<()> {
        if let Some(decoder) = self.decoder.as_mut()
            && let Err(e) = decoder.flush()
        {
            return Err(self.fault(e));
        }
        self.collect_frames()?;
        if let Some(resampler) = self.resampler.as_mut()
            && let Err(e) = resampler.flush()
        {
            return Err(self.fault(e));
        }
        self.take_resampled(self.last_pts.micros)?;
        let end = pts.max(self.last_pts);
        self.exchange.produce(Bytes::new(), BufferInfo::end_of_stream(0, end));
        Ok(())
    }
}

impl CodecEngine for FfmpegAudioDecoder {
    fn name(&self) -> &str {
        self.exchange.name()
    }

    fn role(&self) -> CodecRole {
        CodecRole::Decoder
    }

    fn configure(&mut self, descriptor: &StreamDescriptor, target: OutputTarget) -> Result<()> {
        if self.lifecycle != EngineLifecycle::Unconfigured {
            return Err(PipelineError::InvalidState(format!(
                "{} already configured",
                self.name()
            )));
        }
        if descriptor.kind != MediaKind::Audio {
            return Err(PipelineError::Unsupported(
                "the ffmpeg backend decodes audio only".into(),
            ));
        }
        if matches!(target, OutputTarget::Surface(_)) {
            return Err(PipelineError::Unsupported(format!(
                "{} cannot render to a surface",
                self.name()
            )));
        }

        let codec = decoder_for_mime(&descriptor.mime)
            .ok_or_else(|| self.fault(format!("no decoder for {}", descriptor.mime)))?;
        let mut builder = AudioDecoder::builder(codec)
            .map_err(|e| self.fault(e))?
            .time_base(TimeBase::MICROSECONDS);
        if let Some(rate) = descriptor.sample_rate() {
            builder = builder.sample_rate(rate);
        }
        if let Some(channels) = descriptor.channel_count() {
            match ChannelLayout::from_channels(channels as u32) {
                Some(layout) => builder = builder.channel_layout(layout),
                None => warn!("No default layout for {} channels", channels),
            }
        }
        if !descriptor.codec_config.is_empty() {
            builder = builder.extradata(Some(descriptor.codec_config.clone()));
        }
        let decoder = builder.build().map_err(|e| self.fault(e))?;
        info!("Using decoder: {}", codec);

        self.exchange = SlotExchange::new(format!("ffmpeg.{codec}"));
        self.exchange
            .configure(descriptor.max_input_size().unwrap_or(DEFAULT_SLOT_CAPACITY));
        self.decoder = Some(decoder);
        self.descriptor = Some(descriptor.clone());
        self.lifecycle = EngineLifecycle::Running;
        Ok(())
    }

    fn output_descriptor(&self) -> Result<StreamDescriptor> {
        let source = self
            .descriptor
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidState(format!("{} not configured", self.name())))?;
        let mut raw = StreamDescriptor::new(MediaKind::Audio, "audio/raw");
        for key in [FormatKey::SampleRate, FormatKey::ChannelCount, FormatKey::Duration] {
            if let Some(value) = source.get(key) {
                raw.set(key, value);
            }
        }
        raw.set(FormatKey::BitsPerSample, 16);
        Ok(raw)
    }

    fn acquire_input_slot(&mut self, _timeout: Duration) -> Result<Option<InputSlot>> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        Ok(self.exchange.take_input())
    }

    fn submit_input(
        &mut self,
        slot: InputSlot,
        len: usize,
        pts: Timestamp,
        flags: InputFlags,
    ) -> Result<()> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        let Some(payload) = self.exchange.accept(slot, len, flags)? else {
            return Ok(());
        };
        if !payload.is_empty() {
            self.decode(&payload, pts)?;
        }
        if flags.end_of_stream {
            debug!("{}: end of stream at {}", self.name(), pts);
            self.finish(pts)?;
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        Err(PipelineError::InvalidState(format!(
            "{} has no input surface",
            self.name()
        )))
    }

    fn acquire_output_slot(&mut self, _timeout: Duration) -> Result<Option<OutputSlot>> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        Ok(self.exchange.next_output())
    }

    fn release_output_slot(&mut self, slot: OutputSlot, render: bool) -> Result<()> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        self.exchange.give_back(&slot)?;
        if render {
            debug!("{}: render requested without a surface, ignored", self.name());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.lifecycle {
            EngineLifecycle::Released => Err(PipelineError::InvalidState(format!(
                "{} already released",
                self.name()
            ))),
            _ => {
                self.exchange.reset();
                self.lifecycle = EngineLifecycle::Stopped;
                Ok(())
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.lifecycle == EngineLifecycle::Released {
            return Err(PipelineError::InvalidState(format!(
                "{} released twice",
                self.name()
            )));
        }
        if self.exchange.outstanding() > 0 {
            return Err(PipelineError::InvalidState(format!(
                "{} has {} outstanding slots",
                self.name(),
                self.exchange.outstanding()
            )));
        }
        self.decoder = None;
        self.resampler = None;
        self.lifecycle = EngineLifecycle::Released;
        Ok(())
    }
}
