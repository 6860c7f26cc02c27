use log::debug;
use std::path::Path;

use super::MediaBackend;
use crate::codec::CodecEngine;
use crate::container::ffmpeg::{FfmpegDemuxer, FfmpegMuxer, decoder_for_mime, encoder_for_mime};
use crate::container::{ContainerFormat, Demuxer, Muxer};
use crate::decoder::FfmpegAudioDecoder;
use crate::encoder::FfmpegAudioEncoder;
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::StreamDescriptor;
use crate::pipeline::types::MediaKind;

/// libav backend: any container FFmpeg reads in, audio re-encoded out
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

fn ensure_audio(descriptor: &StreamDescriptor) -> Result<()> {
    if descriptor.kind != MediaKind::Audio {
        return Err(PipelineError::Unsupported(format!(
            "no {} codec engines in the ffmpeg backend",
            descriptor.kind
        )));
    }
    Ok(())
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn open_demuxer(
        &self,
        path: &Path,
        kind: MediaKind,
    ) -> Result<(Box<dyn Demuxer>, StreamDescriptor)> {
        let (demuxer, descriptor) = FfmpegDemuxer::open(path, kind)?;
        Ok((Box::new(demuxer), descriptor))
    }

    fn create_decoder(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn CodecEngine>> {
        ensure_audio(descriptor)?;
        if decoder_for_mime(&descriptor.mime).is_none() {
            return Err(PipelineError::Unsupported(format!(
                "no decoder for {}",
                descriptor.mime
            )));
        }
        debug!("Selected libav decoder for {}", descriptor.mime);
        Ok(Box::new(FfmpegAudioDecoder::new()))
    }

    fn create_encoder(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn CodecEngine>> {
        ensure_audio(descriptor)?;
        if encoder_for_mime(&descriptor.mime).is_none() {
            return Err(PipelineError::Unsupported(format!(
                "no encoder for {}",
                descriptor.mime
            )));
        }
        debug!("Selected libav encoder for {}", descriptor.mime);
        Ok(Box::new(FfmpegAudioEncoder::new()))
    }

    fn create_muxer(&self, path: &Path, format: ContainerFormat) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(FfmpegMuxer::open(path, format)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_engines_are_unsupported() {
        let video = StreamDescriptor::new(MediaKind::Video, "video/avc");
        assert!(matches!(
            FfmpegBackend.create_decoder(&video),
            Err(PipelineError::Unsupported(_))
        ));
        let aac = StreamDescriptor::new(MediaKind::Audio, "audio/mp4a-latm");
        assert!(FfmpegBackend.create_encoder(&aac).is_ok());
    }
}
