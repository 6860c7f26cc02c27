use ac_ffmpeg::codec::CodecParameters;
use ac_ffmpeg::format::demuxer::{Demuxer as AvDemuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer as AvMuxer, MuxerBuilder, OutputFormat};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp as AvTimestamp};
use log::{debug, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{ContainerFormat, Demuxer, Muxer, Pull};
use crate::encoder::build_audio_encoder;
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::{FormatKey, StreamDescriptor};
use crate::pipeline::types::{BufferInfo, MediaKind, Timestamp};

/// Largest compressed audio packet accepted from a container
const AUDIO_MAX_INPUT_SIZE: i64 = 256 * 1024;

const MICROSECONDS: TimeBase = TimeBase::MICROSECONDS;

/// Codec names for one MIME type: (mime, decoder, encoder)
const CODEC_MAP: &[(&str, &str, &str)] = &[
    ("audio/mp4a-latm", "aac", "aac"),
    ("audio/opus", "opus", "libopus"),
    ("audio/mpeg", "mp3", "libmp3lame"),
    ("audio/flac", "flac", "flac"),
    ("audio/vorbis", "vorbis", "libvorbis"),
    ("audio/raw", "pcm_s16le", "pcm_s16le"),
    ("video/avc", "h264", "libx264"),
    ("video/hevc", "hevc", "libx265"),
    ("video/x-vnd.on2.vp8", "vp8", "libvpx"),
    ("video/x-vnd.on2.vp9", "vp9", "libvpx-vp9"),
];

pub(crate) fn decoder_for_mime(mime: &str) -> Option<&'static str> {
    CODEC_MAP
        .iter()
        .find(|(m, _, _)| *m == mime)
        .map(|(_, decoder, _)| *decoder)
}

pub(crate) fn encoder_for_mime(mime: &str) -> Option<&'static str> {
    CODEC_MAP
        .iter()
        .find(|(m, _, _)| *m == mime)
        .map(|(_, _, encoder)| *encoder)
}

fn mime_for_decoder(decoder: &str) -> Option<&'static str> {
    CODEC_MAP
        .iter()
        .find(|(_, d, _)| *d == decoder)
        .map(|(mime, _, _)| *mime)
}

fn invalid(path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::InvalidContainer {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Describe a container stream with the keys the pipeline understands
fn describe(path: &Path, params: &CodecParameters, kind: MediaKind) -> Result<StreamDescriptor> {
    let decoder = params
        .decoder_name()
        .ok_or_else(|| invalid(path, "no decoder for the selected track"))?;
    let mime = mime_for_decoder(decoder).unwrap_or(match kind {
        MediaKind::Audio => "audio/unknown",
        MediaKind::Video => "video/unknown",
    });
    let mut descriptor = StreamDescriptor::new(kind, mime);

    if let Some(audio) = params.as_audio_codec_parameters() {
        descriptor.set(FormatKey::SampleRate, audio.sample_rate() as i64);
        descriptor.set(FormatKey::ChannelCount, audio.channel_layout().channels() as i64);
        descriptor.set(FormatKey::MaxInputSize, AUDIO_MAX_INPUT_SIZE);
        if audio.bit_rate() > 0 {
            descriptor.set(FormatKey::BitRate, audio.bit_rate() as i64);
        }
        if let Some(extradata) = audio.extradata() {
            descriptor.codec_config = extradata.to_vec();
        }
    } else if let Some(video) = params.as_video_codec_parameters() {
        let (w, h) = (video.width() as i64, video.height() as i64);
        descriptor.set(FormatKey::Width, w);
        descriptor.set(FormatKey::Height, h);
        // worst case for one uncompressed 4:2:0 picture
        descriptor.set(FormatKey::MaxInputSize, (w * h * 3 / 2).max(AUDIO_MAX_INPUT_SIZE));
        if video.bit_rate() > 0 {
            descriptor.set(FormatKey::BitRate, video.bit_rate() as i64);
        }
        if let Some(extradata) = video.extradata() {
            descriptor.codec_config = extradata.to_vec();
        }
    }
    Ok(descriptor)
}

/// libavformat reader positioned on one track of a segment
pub struct FfmpegDemuxer {
    path: PathBuf,
    demuxer: Option<DemuxerWithStreamInfo<File>>,
    stream_index: usize,
}

// SAFETY: the demuxer is only ever driven from the thread owning it
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(path: &Path, kind: MediaKind) -> Result<(Self, StreamDescriptor)> {
        if !path.is_file() {
            return Err(PipelineError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path)?;
        let io = IO::from_seekable_read_stream(file);
        let demuxer = AvDemuxer::builder()
            .build(io)
            .map_err(|e| invalid(path, e))?
            .find_stream_info(None)
            .map_err(|(_, e)| invalid(path, e))?;

        let (stream_index, params) = demuxer
            .streams()
            .iter()
            .enumerate()
            .map(|(index, stream)| (index, stream.codec_parameters()))
            .find(|(_, params)| match kind {
                MediaKind::Audio => params.is_audio_codec(),
                MediaKind::Video => params.is_video_codec(),
            })
            .ok_or_else(|| PipelineError::NoMatchingTrack {
                path: path.to_path_buf(),
                kind,
            })?;

        let mut descriptor = describe(path, &params, kind)?;
        if let Some(duration) = demuxer.streams()[stream_index].duration().as_micros() {
            descriptor.set(FormatKey::Duration, duration);
        }
        debug!(
            "Opened {} track {} of {}: {}",
            kind,
            stream_index,
            path.display(),
            descriptor
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                demuxer: Some(demuxer),
                stream_index,
            },
            descriptor,
        ))
    }
}

impl Demuxer for FfmpegDemuxer {
    fn pull(&mut self, buffer: &mut [u8]) -> Result<Pull> {
        let Some(demuxer) = self.demuxer.as_mut() else {
            return Ok(Pull::EndOfSegment);
        };
        loop {
            let Some(packet) = demuxer.take().map_err(|e| invalid(&self.path, e))? else {
                return Ok(Pull::EndOfSegment);
            };
            if packet.stream_index() != self.stream_index {
                continue;
            }

            let data = packet.data();
            if data.len() > buffer.len() {
                return Err(invalid(
                    &self.path,
                    format!("{} byte sample exceeds {} byte buffer", data.len(), buffer.len()),
                ));
            }
            buffer[..data.len()].copy_from_slice(data);

            let stamp = if packet.pts().is_null() {
                packet.dts()
            } else {
                packet.pts()
            };
            // encoder priming shows up as negative pts; a segment starts at zero
            let micros = stamp.as_micros().unwrap_or(0).max(0);
            return Ok(Pull::Sample {
                size: data.len(),
                timestamp: Timestamp::from_micros(micros),
            });
        }
    }

    fn close(&mut self) {
        if self.demuxer.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }
}

/// libavformat writer for a single-track output
pub struct FfmpegMuxer {
    path: PathBuf,
    format: ContainerFormat,
    builder: Option<MuxerBuilder>,
    muxer: Option<AvMuxer<File>>,
    tracks: Vec<TimeBase>,
    written: Vec<u64>,
    /// Last dts pushed per track, in the stream time base
    last_dts: Vec<Option<i64>>,
}

/// Decode timestamp for the next packet of a track.
///
/// Containers want dts strictly increasing while encoders may repeat a pts
/// (AAC priming, clamped segment starts), so a repeat is nudged one tick on.
fn next_dts(last: Option<i64>, pts: i64) -> i64 {
    match last {
        Some(last) if pts <= last => last + 1,
        _ => pts,
    }
}

// SAFETY: see FfmpegDemuxer
unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn open(path: &Path, format: ContainerFormat) -> Result<Self> {
        if OutputFormat::find_by_name(format.short_name()).is_none() {
            return Err(PipelineError::Muxer(format!(
                "libavformat has no `{}` muxer",
                format.short_name()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            format,
            builder: Some(AvMuxer::builder()),
            muxer: None,
            tracks: Vec::new(),
            written: Vec::new(),
            last_dts: Vec::new(),
        })
    }
}

impl Muxer for FfmpegMuxer {
    fn add_track(&mut self, descriptor: &StreamDescriptor) -> Result<usize> {
        let builder = self
            .builder
            .as_mut()
            .ok_or_else(|| PipelineError::Muxer("tracks must be added before start".into()))?;
        if descriptor.kind != MediaKind::Audio {
            return Err(PipelineError::Unsupported(
                "the ffmpeg muxer writes audio tracks only".into(),
            ));
        }

        // codec parameters come from an encoder configured like the real one
        let (encoder, _) = build_audio_encoder(descriptor)?;
        let params: CodecParameters = encoder.codec_parameters().into();
        let index = builder
            .add_stream(&params)
            .map_err(|e| PipelineError::Muxer(e.to_string()))?;
        self.written.push(0);
        self.last_dts.push(None);
        Ok(index)
    }

    fn start(&mut self) -> Result<()> {
        let builder = self
            .builder
            .take()
            .ok_or_else(|| PipelineError::Muxer("muxer already started".into()))?;
        let format = OutputFormat::find_by_name(self.format.short_name())
            .ok_or_else(|| PipelineError::Muxer(format!("unknown format {}", self.format.short_name())))?;
        let file = File::create(&self.path)?;
        let io = IO::from_seekable_write_stream(file);
        let muxer = builder
            .build(io, format)
            .map_err(|e| PipelineError::Muxer(e.to_string()))?;
        self.tracks = muxer.streams().iter().map(|s| s.time_base()).collect();
        self.muxer = Some(muxer);
        info!("Writing {} to {}", self.format.short_name(), self.path.display());
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| PipelineError::Muxer("muxer not started".into()))?;
        let time_base = *self
            .tracks
            .get(track)
            .ok_or_else(|| PipelineError::Muxer(format!("unknown track {track}")))?;

        let pts = AvTimestamp::new(info.pts.micros, MICROSECONDS)
            .with_time_base(time_base)
            .timestamp();
        let dts = next_dts(self.last_dts[track], pts);
        let packet = PacketMut::from(data)
            .with_time_base(time_base)
            .with_pts(AvTimestamp::new(pts.max(dts), time_base))
            .with_dts(AvTimestamp::new(dts, time_base))
            .with_stream_index(track)
            .freeze();
        muxer
            .push(packet)
            .map_err(|e| PipelineError::Muxer(e.to_string()))?;
        self.last_dts[track] = Some(dts);
        self.written[track] += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut muxer) = self.muxer.take() else {
            return Err(PipelineError::Muxer("muxer not started".into()));
        };
        muxer
            .flush()
            .map_err(|e| PipelineError::Muxer(e.to_string()))?;
        muxer
            .close()
            .map_err(|e| PipelineError::Muxer(e.to_string()))?;

        if let Some(track) = self.written.iter().position(|count| *count == 0) {
            return Err(PipelineError::Muxer(format!("track {track} received no samples")));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.muxer.take().is_some() {
            warn!("Released {} without stopping it", self.path.display());
        }
        self.builder = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_map() {
        assert_eq!(decoder_for_mime("audio/mp4a-latm"), Some("aac"));
        assert_eq!(encoder_for_mime("audio/opus"), Some("libopus"));
        assert_eq!(mime_for_decoder("pcm_s16le"), Some("audio/raw"));
        assert_eq!(decoder_for_mime("audio/x-unknown"), None);
    }

    #[test]
    fn test_dts_strictly_increases() {
        assert_eq!(next_dts(None, -1024), -1024);
        assert_eq!(next_dts(Some(-1024), 0), 0);
        // repeated pts at a segment boundary
        assert_eq!(next_dts(Some(0), 0), 1);
        assert_eq!(next_dts(Some(1), 0), 2);
        assert_eq!(next_dts(Some(2), 1024), 1024);
    }

    #[test]
    fn test_missing_segment() {
        let err = FfmpegDemuxer::open(Path::new("/nonexistent/1.mp4"), MediaKind::Audio).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }
}
