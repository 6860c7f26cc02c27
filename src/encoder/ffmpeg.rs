use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioEncoder, AudioResampler, ChannelLayout};
use ac_ffmpeg::codec::Encoder;
use ac_ffmpeg::time::{TimeBase, Timestamp as AvTimestamp};
use bytes::Bytes;
use log::{debug, info};
use std::time::Duration;

use super::frame_pool::FramePool;
use crate::codec::{
    CodecEngine, CodecRole, DEFAULT_SLOT_CAPACITY, EngineLifecycle, InputSlot, OutputSlot,
    OutputTarget, SlotExchange,
};
use crate::container::ffmpeg::encoder_for_mime;
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::{FormatKey, StreamDescriptor};
use crate::pipeline::types::{BufferInfo, InputFlags, MediaKind, Timestamp};

/// Encoder fallback chain per output MIME type: preferred implementations
/// first, the FFmpeg native one last.
const ENCODER_CHAIN: &[(&str, &[(&str, &[(&str, &str)])])] = &[(
    "audio/mp4a-latm",
    &[
        // Fraunhofer FDK, only present in non-free builds
        ("libfdk_aac", &[("afterburner", "1")]),
        ("aac", &[("aac_coder", "twoloop")]),
    ],
)];

/// Sample layout each encoder accepts
fn sample_format_name(codec: &str) -> &'static str {
    match codec {
        "aac" | "libvorbis" => "fltp",
        "libmp3lame" => "s16p",
        _ => "s16",
    }
}

const NO_OPTIONS: &[(&str, &str)] = &[];

const DEFAULT_SAMPLE_RATE: i64 = 44_100;
const DEFAULT_CHANNELS: i64 = 2;
/// Bytes per interleaved 16-bit sample
const BYTES_PER_SAMPLE: usize = 2;

/// Open the first encoder of the chain for `descriptor.mime` that accepts it
pub(crate) fn build_audio_encoder(descriptor: &StreamDescriptor) -> Result<(AudioEncoder, &'static str)> {
    if descriptor.kind != MediaKind::Audio {
        return Err(PipelineError::Unsupported(
            "the ffmpeg backend encodes audio only".into(),
        ));
    }

    let candidates: Vec<(&'static str, &'static [(&'static str, &'static str)])> = ENCODER_CHAIN
        .iter()
        .find(|(mime, _)| *mime == descriptor.mime)
        .map(|(_, chain)| chain.to_vec())
        .or_else(|| encoder_for_mime(&descriptor.mime).map(|codec| vec![(codec, NO_OPTIONS)]))
        .ok_or_else(|| {
            PipelineError::codec("ffmpeg.encoder", format!("no encoder for {}", descriptor.mime))
        })?;

    let rate = descriptor.get(FormatKey::SampleRate).unwrap_or(DEFAULT_SAMPLE_RATE) as u32;
    let channels = descriptor.get(FormatKey::ChannelCount).unwrap_or(DEFAULT_CHANNELS) as u32;
    let layout = ChannelLayout::from_channels(channels).ok_or_else(|| {
        PipelineError::codec("ffmpeg.encoder", format!("no channel layout for {channels} channels"))
    })?;

    let mut last_error = String::from("no candidate");
    for (codec, options) in candidates {
        let mut builder = match AudioEncoder::builder(codec) {
            Ok(b) => b,
            Err(e) => {
                debug!("Encoder {} not available, skipping: {}", codec, e);
                last_error = e.to_string();
                continue;
            }
        };
        builder = builder
            .sample_format(get_sample_format(sample_format_name(codec)))
            .sample_rate(rate)
            .channel_layout(layout.clone())
            .time_base(TimeBase::MICROSECONDS);
        if let Some(bit_rate) = descriptor.get(FormatKey::BitRate)
            && bit_rate > 0
        {
            builder = builder.bit_rate(bit_rate as u64);
        }
        for (k, v) in options {
            builder = builder.set_option(k, v);
        }
        match builder.build() {
            Ok(encoder) => return Ok((encoder, codec)),
            Err(e) => {
                debug!("Encoder {} failed to initialize: {}", codec, e);
                last_error = e.to_string();
            }
        }
    }
    Err(PipelineError::codec("ffmpeg.encoder", last_error))
}

struct Engine {
    encoder: AudioEncoder,
    resampler: AudioResampler,
    pool: FramePool,
    /// Bytes of one interleaved s16 frame (all channels)
    frame_bytes: usize,
}

/// Audio encoder over libavcodec.
///
/// Accepts packed s16 PCM of any length per slot; the resampler regroups it
/// into the frame size and sample format the codec wants.
pub struct FfmpegAudioEncoder {
    lifecycle: EngineLifecycle,
    exchange: SlotExchange,
    descriptor: Option<StreamDescriptor>,
    engine: Option<Engine>,
    last_pts: Timestamp,
}

// SAFETY: libavcodec contexts are only touched by the thread owning the engine
unsafe impl Send for FfmpegAudioEncoder {}

impl Default for FfmpegAudioEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegAudioEncoder {
    pub fn new() -> Self {
        Self {
            lifecycle: EngineLifecycle::Unconfigured,
            exchange: SlotExchange::new("ffmpeg.encoder"),
            descriptor: None,
            engine: None,
            last_pts: Timestamp::ZERO,
        }
    }

    fn open(descriptor: &StreamDescriptor) -> Result<(Engine, StreamDescriptor, &'static str)> {
        let (encoder, codec) = build_audio_encoder(descriptor)?;
        let fault = |e: ac_ffmpeg::Error| PipelineError::codec(codec, e);

        let params = encoder.codec_parameters();
        let layout = params.channel_layout().to_owned();
        let rate = params.sample_rate();
        let s16 = get_sample_format("s16");

        let resampler = AudioResampler::builder()
            .source_channel_layout(layout.clone())
            .source_sample_format(s16)
            .source_sample_rate(rate)
            .target_channel_layout(layout.clone())
            .target_sample_format(params.sample_format())
            .target_sample_rate(rate)
            .target_frame_samples(encoder.samples_per_frame())
            .build()
            .map_err(fault)?;

        let mut output = descriptor.clone();
        if let Some(extradata) = params.extradata() {
            output.codec_config = extradata.to_vec();
        }
        let frame_bytes = layout.channels() as usize * BYTES_PER_SAMPLE;
        let pool = FramePool::new(layout, s16, rate, TimeBase::MICROSECONDS);

        Ok((
            Engine {
                encoder,
                resampler,
                pool,
                frame_bytes,
            },
            output,
            codec,
        ))
    }

    /// Feed one PCM buffer through the resampler into the encoder
    fn encode(&mut self, pcm: &[u8], pts: Timestamp) -> Result<()> {
        let name = self.exchange.name().to_string();
        let fault = |e: ac_ffmpeg::Error| PipelineError::codec(name.as_str(), e);
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| PipelineError::InvalidState("encoder not configured".into()))?;

        if pcm.len() % engine.frame_bytes != 0 {
            return Err(PipelineError::codec(
                name.as_str(),
                format!("{} bytes is not a whole number of frames", pcm.len()),
            ));
        }
        let samples = pcm.len() / engine.frame_bytes;
        let mut frame = engine
            .pool
            .take(samples)
            .with_pts(AvTimestamp::from_micros(pts.micros));
        frame.planes_mut()[0].data_mut()[..pcm.len()].copy_from_slice(pcm);
        let frame = frame.freeze();

        engine.resampler.push(frame.clone()).map_err(fault)?;
        engine.pool.put(frame);
        pump(engine, &mut self.exchange, &fault)
    }

    /// Drain everything buffered in the resampler and the codec
    fn finish(&mut self, pts: Timestamp) -> Result<()> {
        let name = self.exchange.name().to_string();
        let fault = |e: ac_ffmpeg::Error| PipelineError::codec(name.as_str(), e);
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| PipelineError::InvalidState("encoder not configured".into()))?;

        engine.resampler.flush().map_err(fault)?;
        pump(engine, &mut self.exchange, &fault)?;
        engine.encoder.flush().map_err(fault)?;
        drain_packets(&mut engine.encoder, &mut self.exchange, &fault)?;
        self.exchange.produce(Bytes::new(), BufferInfo::end_of_stream(0, pts));
        Ok(())
    }
}

fn pump(
    engine: &mut Engine,
    exchange: &mut SlotExchange,
    fault: &impl Fn(ac_ffmpeg::Error) -> PipelineError,
) -> Result<()> {
    while let Some(frame) = engine.resampler.take().map_err(fault)? {
        engine.encoder.push(frame).map_err(fault)?;
        drain_packets(&mut engine.encoder, exchange, fault)?;
    }
    Ok(())
}

fn drain_packets(
    encoder: &mut AudioEncoder,
    exchange: &mut SlotExchange,
    fault: &impl Fn(ac_ffmpeg::Error) -> PipelineError,
) -> Result<()> {
    while let Some(packet) = encoder.take().map_err(fault)? {
        let pts = packet.pts().as_micros().unwrap_or(0);
        let data = Bytes::copy_from_slice(packet.data());
        let info = BufferInfo::sample(data.len(), Timestamp::from_micros(pts));
        exchange.produce(data, info);
    }
    Ok(())
}

impl CodecEngine for FfmpegAudioEncoder {
    fn name(&self) -> &str {
        self.exchange.name()
    }

    fn role(&self) -> CodecRole {
        CodecRole::Encoder
    }

    fn configure(&mut self, descriptor: &StreamDescriptor, target: OutputTarget) -> Result<()> {
        if self.lifecycle != EngineLifecycle::Unconfigured {
            return Err(PipelineError::InvalidState(format!(
                "{} already configured",
                self.name()
            )));
        }
        if matches!(target, OutputTarget::Surface(_)) {
            return Err(PipelineError::codec(self.name(), "an encoder cannot render to a surface"));
        }

        let (engine, output, codec) = Self::open(descriptor)?;
        info!("Using encoder: {}", codec);
        self.exchange = SlotExchange::new(format!("ffmpeg.{codec}"));
        self.exchange
            .configure(descriptor.max_input_size().unwrap_or(DEFAULT_SLOT_CAPACITY));
        // codec config leads the output, ahead of the first packet
        if !output.codec_config.is_empty() {
            let config = Bytes::copy_from_slice(&output.codec_config);
            self.exchange
                .produce(config, BufferInfo::config_change(output.codec_config.len()));
        }
        self.engine = Some(engine);
        self.descriptor = Some(output);
        self.lifecycle = EngineLifecycle::Running;
        Ok(())
    }

    fn output_descriptor(&self) -> Result<StreamDescriptor> {
        self.descriptor
            .clone()
            .ok_or_else(|| PipelineError::InvalidState(format!("{} not configured", self.name())))
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
            self.encode(&payload, pts)?;
            self.last_pts = pts;
        }
        if flags.end_of_stream {
            self.finish(pts.max(self.last_pts))?;
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

    fn release_output_slot(&mut self, slot: OutputSlot, _render: bool) -> Result<()> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        self.exchange.give_back(&slot)
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
        self.engine = None;
        self.lifecycle = EngineLifecycle::Released;
        Ok(())
    }
}
