//! RIFF/WAVE PCM container
//!
//! The demuxer splits the `data` chunk into fixed runs of sample frames with
//! microsecond timestamps derived from the frame position; the muxer writes a
//! placeholder header on start and patches the chunk sizes on stop.

use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{ContainerFormat, Demuxer, Muxer, Pull};
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::{FormatKey, StreamDescriptor};
use crate::pipeline::types::{BufferInfo, MediaKind, Timestamp};

/// MIME type of the single track of a WAV file
pub const PCM_MIME: &str = "audio/raw";

/// Sample frames per demuxed sample, one AAC frame worth of audio
pub const FRAMES_PER_SAMPLE: usize = 1024;

const HEADER_LEN: u64 = 44;
const FORMAT_PCM: u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// PCM layout of a WAV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavSpec {
    pub fn pcm16(channels: u16, sample_rate: u32) -> Self {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
        }
    }

    /// Bytes per sample frame (all channels)
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize).div_ceil(8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Microsecond timestamp of a frame position
    pub fn frame_timestamp(&self, frame: u64) -> Timestamp {
        let micros = frame as u128 * 1_000_000 / self.sample_rate.max(1) as u128;
        Timestamp::from_micros(micros as i64)
    }

    fn from_descriptor(descriptor: &StreamDescriptor) -> Result<Self> {
        let sample_rate = descriptor
            .sample_rate()
            .ok_or_else(|| PipelineError::Muxer("track has no sample rate".into()))?;
        let channels = descriptor
            .channel_count()
            .ok_or_else(|| PipelineError::Muxer("track has no channel count".into()))?;
        let bits_per_sample = descriptor.get(FormatKey::BitsPerSample).unwrap_or(16) as u16;
        Ok(WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
        })
    }
}

/// Layout and size of an existing WAV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub spec: WavSpec,
    pub data_offset: u64,
    pub data_len: u64,
}

impl WavInfo {
    pub fn frames(&self) -> u64 {
        self.data_len / self.spec.block_align().max(1) as u64
    }

    pub fn duration(&self) -> std::time::Duration {
        self.spec.frame_timestamp(self.frames()).as_duration()
    }
}

fn invalid(path: &Path, message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidContainer {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn read_header<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<WavInfo> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut riff = [0u8; 12];
    reader
        .read_exact(&mut riff)
        .map_err(|_| invalid(path, "file too short for a RIFF header"))?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(invalid(path, "not a RIFF/WAVE file"));
    }

    let mut spec = None;
    let mut pos = 12u64;
    loop {
        let mut chunk = [0u8; 8];
        if reader.read_exact(&mut chunk).is_err() {
            return Err(invalid(path, "missing data chunk"));
        }
        pos += 8;
        let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as u64;

        match &chunk[0..4] {
            b"fmt " => {
                if size < 16 {
                    return Err(invalid(path, "fmt chunk too short"));
                }
                let mut fmt = vec![0u8; size as usize];
                reader.read_exact(&mut fmt)?;
                let format = u16::from_le_bytes([fmt[0], fmt[1]]);
                let is_pcm = match format {
                    FORMAT_PCM => true,
                    FORMAT_EXTENSIBLE if fmt.len() >= 26 => {
                        u16::from_le_bytes([fmt[24], fmt[25]]) == FORMAT_PCM
                    }
                    _ => false,
                };
                if !is_pcm {
                    return Err(invalid(path, format!("unsupported WAV format tag {format:#06x}")));
                }
                let parsed = WavSpec {
                    channels: u16::from_le_bytes([fmt[2], fmt[3]]),
                    sample_rate: u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]),
                    bits_per_sample: u16::from_le_bytes([fmt[14], fmt[15]]),
                };
                if parsed.channels == 0 || parsed.sample_rate == 0 || parsed.bits_per_sample == 0 {
                    return Err(invalid(path, "degenerate PCM format"));
                }
                spec = Some(parsed);
                pos += size;
                if size % 2 == 1 {
                    reader.seek(SeekFrom::Current(1))?;
                    pos += 1;
                }
            }
            b"data" => {
                let spec = spec.ok_or_else(|| invalid(path, "data chunk before fmt chunk"))?;
                // streaming writers leave the size unset
                let data_len = size.min(file_len.saturating_sub(pos));
                return Ok(WavInfo {
                    spec,
                    data_offset: pos,
                    data_len,
                });
            }
            _ => {
                let skip = size + size % 2;
                reader.seek(SeekFrom::Current(skip as i64))?;
                pos += skip;
            }
        }
    }
}

fn write_header<W: Write>(writer: &mut W, spec: &WavSpec, data_len: u64) -> Result<()> {
    let padded = data_len + data_len % 2;
    let riff_len = (HEADER_LEN - 8 + padded).min(u32::MAX as u64) as u32;
    let data_len = data_len.min(u32::MAX as u64) as u32;

    writer.write_all(b"RIFF")?;
    writer.write_all(&riff_len.to_le_bytes())?;
    writer.write_all(b"WAVE")?;
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&FORMAT_PCM.to_le_bytes())?;
    writer.write_all(&spec.channels.to_le_bytes())?;
    writer.write_all(&spec.sample_rate.to_le_bytes())?;
    writer.write_all(&spec.byte_rate().to_le_bytes())?;
    writer.write_all(&(spec.block_align() as u16).to_le_bytes())?;
    writer.write_all(&spec.bits_per_sample.to_le_bytes())?;
    writer.write_all(b"data")?;
    writer.write_all(&data_len.to_le_bytes())?;
    Ok(())
}

/// Read the header of an existing WAV file
pub fn read_info(path: &Path) -> Result<WavInfo> {
    let mut file = File::open(path).map_err(|_| PipelineError::NotFound {
        path: path.to_path_buf(),
    })?;
    read_header(&mut file, path)
}

/// Write a complete WAV file from interleaved PCM bytes
pub fn write_wav(path: &Path, spec: &WavSpec, pcm: &[u8]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, spec, pcm.len() as u64)?;
    writer.write_all(pcm)?;
    if pcm.len() % 2 == 1 {
        writer.write_all(&[0])?;
    }
    writer.flush()?;
    Ok(())
}

/// Demuxer over the PCM track of one WAV segment
pub struct WavDemuxer {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    info: WavInfo,
    remaining: u64,
    frames_read: u64,
}

impl WavDemuxer {
    /// Open `path` and select its track if it is of the requested kind
    pub fn open(path: &Path, kind: MediaKind) -> Result<(Self, StreamDescriptor)> {
        let file = File::open(path).map_err(|_| PipelineError::NotFound {
            path: path.to_path_buf(),
        })?;
        let mut reader = BufReader::new(file);
        let info = read_header(&mut reader, path)?;
        if !kind.matches_mime(PCM_MIME) {
            return Err(PipelineError::NoMatchingTrack {
                path: path.to_path_buf(),
                kind,
            });
        }
        reader.seek(SeekFrom::Start(info.data_offset))?;

        let spec = info.spec;
        let descriptor = StreamDescriptor::new(MediaKind::Audio, PCM_MIME)
            .with(FormatKey::SampleRate, spec.sample_rate as i64)
            .with(FormatKey::ChannelCount, spec.channels as i64)
            .with(FormatKey::BitsPerSample, spec.bits_per_sample as i64)
            .with(
                FormatKey::MaxInputSize,
                (FRAMES_PER_SAMPLE * spec.block_align()) as i64,
            )
            .with(FormatKey::Duration, info.duration().as_micros() as i64);
        debug!("Opened {} {}", path.display(), descriptor);

        Ok((
            WavDemuxer {
                path: path.to_path_buf(),
                reader: Some(reader),
                info,
                remaining: info.data_len,
                frames_read: 0,
            },
            descriptor,
        ))
    }
}

impl Demuxer for WavDemuxer {
    fn pull(&mut self, buffer: &mut [u8]) -> Result<Pull> {
        let block_align = self.info.spec.block_align();
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Pull::EndOfSegment);
        };
        if self.remaining < block_align as u64 {
            return Ok(Pull::EndOfSegment);
        }
        let fits = buffer.len() / block_align * block_align;
        if fits == 0 {
            return Err(invalid(
                &self.path,
                format!("buffer of {} bytes cannot hold one sample frame", buffer.len()),
            ));
        }

        let wanted = (FRAMES_PER_SAMPLE * block_align)
            .min(fits)
            .min((self.remaining / block_align as u64 * block_align as u64) as usize);
        reader.read_exact(&mut buffer[..wanted])?;

        let timestamp = self.info.spec.frame_timestamp(self.frames_read);
        self.frames_read += (wanted / block_align) as u64;
        self.remaining -= wanted as u64;
        Ok(Pull::Sample {
            size: wanted,
            timestamp,
        })
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Declaring,
    Started,
    Stopped,
    Released,
}

/// Muxer writing a single PCM track to a WAV file
pub struct WavMuxer {
    path: PathBuf,
    spec: Option<WavSpec>,
    writer: Option<BufWriter<File>>,
    state: MuxerState,
    data_len: u64,
    samples: u64,
}

impl WavMuxer {
    pub fn open(path: &Path, format: ContainerFormat) -> Result<Self> {
        if format != ContainerFormat::Wav {
            return Err(PipelineError::Unsupported(format!(
                "WAV muxer cannot write {} containers",
                format.short_name()
            )));
        }
        Ok(WavMuxer {
            path: path.to_path_buf(),
            spec: None,
            writer: None,
            state: MuxerState::Declaring,
            data_len: 0,
            samples: 0,
        })
    }

    fn finalize(&mut self) -> Result<()> {
        let (Some(writer), Some(spec)) = (self.writer.as_mut(), self.spec) else {
            return Ok(());
        };
        if self.data_len % 2 == 1 {
            writer.write_all(&[0])?;
        }
        writer.seek(SeekFrom::Start(0))?;
        write_header(writer, &spec, self.data_len)?;
        writer.flush()?;
        Ok(())
    }
}

impl Muxer for WavMuxer {
    fn add_track(&mut self, descriptor: &StreamDescriptor) -> Result<usize> {
        if self.state != MuxerState::Declaring {
            return Err(PipelineError::Muxer("tracks must be added before start".into()));
        }
        if self.spec.is_some() {
            return Err(PipelineError::Muxer("WAV holds a single track".into()));
        }
        if descriptor.kind != MediaKind::Audio {
            return Err(PipelineError::Muxer(format!(
                "WAV cannot hold a {} track",
                descriptor.kind
            )));
        }
        self.spec = Some(WavSpec::from_descriptor(descriptor)?);
        Ok(0)
    }

    fn start(&mut self) -> Result<()> {
        if self.state != MuxerState::Declaring {
            return Err(PipelineError::Muxer("muxer already started".into()));
        }
        let spec = self
            .spec
            .ok_or_else(|| PipelineError::Muxer("no track declared before start".into()))?;
        let mut writer = BufWriter::new(File::create(&self.path)?);
        write_header(&mut writer, &spec, 0)?;
        self.writer = Some(writer);
        self.state = MuxerState::Started;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], _info: &BufferInfo) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(PipelineError::Muxer("write before start".into()));
        }
        if track != 0 {
            return Err(PipelineError::Muxer(format!("unknown track {track}")));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::Muxer("output not open".into()))?;
        writer.write_all(data)?;
        self.data_len += data.len() as u64;
        self.samples += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(PipelineError::Muxer("stop without start".into()));
        }
        self.state = MuxerState::Stopped;
        self.finalize()?;
        if self.samples == 0 {
            return Err(PipelineError::Muxer("track 0 received no samples".into()));
        }
        info!(
            "Wrote {} ({} bytes in {} samples)",
            self.path.display(),
            self.data_len,
            self.samples
        );
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        self.state = MuxerState::Released;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(frames: usize, spec: &WavSpec) -> Vec<u8> {
        (0..frames * spec.block_align()).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_demuxer_splits_into_timed_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.wav");
        let spec = WavSpec::pcm16(2, 44_100);
        write_wav(&path, &spec, &pcm(2_500, &spec)).unwrap();

        let (mut demuxer, descriptor) = WavDemuxer::open(&path, MediaKind::Audio).unwrap();
        assert_eq!(descriptor.max_input_size(), Some(4096));
        assert_eq!(descriptor.sample_rate(), Some(44_100));

        let mut buffer = vec![0u8; 4096];
        let mut sizes = Vec::new();
        let mut stamps = Vec::new();
        while let Pull::Sample { size, timestamp } = demuxer.pull(&mut buffer).unwrap() {
            sizes.push(size);
            stamps.push(timestamp.micros);
        }
        assert_eq!(sizes, vec![4096, 4096, 452 * 4]);
        assert_eq!(stamps, vec![0, 23_219, 46_439]);

        demuxer.close();
        demuxer.close();
        assert_eq!(demuxer.pull(&mut buffer).unwrap(), Pull::EndOfSegment);
    }

    #[test]
    fn test_video_track_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.wav");
        write_wav(&path, &WavSpec::pcm16(1, 8_000), &[0; 16]).unwrap();
        assert!(matches!(
            WavDemuxer::open(&path, MediaKind::Video),
            Err(PipelineError::NoMatchingTrack { .. })
        ));
    }

    #[test]
    fn test_missing_file_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WavDemuxer::open(&dir.path().join("nope.wav"), MediaKind::Audio),
            Err(PipelineError::NotFound { .. })
        ));

        let garbage = dir.path().join("2.wav");
        std::fs::write(&garbage, b"definitely not a wave file").unwrap();
        assert!(matches!(
            WavDemuxer::open(&garbage, MediaKind::Audio),
            Err(PipelineError::InvalidContainer { .. })
        ));
    }

    #[test]
    fn test_muxer_patches_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let descriptor = StreamDescriptor::new(MediaKind::Audio, PCM_MIME)
            .with(FormatKey::SampleRate, 48_000)
            .with(FormatKey::ChannelCount, 2);

        let mut muxer = WavMuxer::open(&path, ContainerFormat::Wav).unwrap();
        let track = muxer.add_track(&descriptor).unwrap();
        assert!(muxer.write_sample(track, &[0; 4], &BufferInfo::sample(4, Timestamp::ZERO)).is_err());
        muxer.start().unwrap();
        assert!(muxer.add_track(&descriptor).is_err());
        for i in 0..3 {
            let info = BufferInfo::sample(8, Timestamp::from_micros(i));
            muxer.write_sample(track, &[1; 8], &info).unwrap();
        }
        muxer.stop().unwrap();
        muxer.release().unwrap();

        let info = read_info(&path).unwrap();
        assert_eq!(info.spec, WavSpec::pcm16(2, 48_000));
        assert_eq!(info.data_len, 24);
        assert_eq!(info.frames(), 6);
    }

    #[test]
    fn test_stop_without_samples_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let descriptor = StreamDescriptor::new(MediaKind::Audio, PCM_MIME)
            .with(FormatKey::SampleRate, 8_000)
            .with(FormatKey::ChannelCount, 1);
        let mut muxer = WavMuxer::open(&path, ContainerFormat::Wav).unwrap();
        muxer.add_track(&descriptor).unwrap();
        muxer.start().unwrap();
        assert!(matches!(muxer.stop(), Err(PipelineError::Muxer(_))));
        muxer.release().unwrap();
    }

    #[test]
    fn test_rejects_other_containers() {
        assert!(WavMuxer::open(Path::new("x.mp4"), ContainerFormat::Mpeg4).is_err());
    }
}
