use log::debug;
use std::path::Path;

use super::MediaBackend;
use crate::codec::{CodecEngine, PcmCodec};
use crate::container::wav::{PCM_MIME, WavDemuxer, WavMuxer};
use crate::container::{ContainerFormat, Demuxer, Muxer};
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::StreamDescriptor;
use crate::pipeline::types::MediaKind;

/// Uncompressed audio backend: WAV segments in, WAV file out
#[derive(Debug, Clone, Copy, Default)]
pub struct WavBackend;

fn ensure_pcm(descriptor: &StreamDescriptor, role: &str) -> Result<()> {
    if descriptor.mime != PCM_MIME {
        return Err(PipelineError::Unsupported(format!(
            "no {role} for {} in the wav backend",
            descriptor.mime
        )));
    }
    Ok(())
}

impl MediaBackend for WavBackend {
    fn name(&self) -> &str {
        "wav"
    }

    fn open_demuxer(
        &self,
        path: &Path,
        kind: MediaKind,
    ) -> Result<(Box<dyn Demuxer>, StreamDescriptor)> {
        let (demuxer, descriptor) = WavDemuxer::open(path, kind)?;
        Ok((Box::new(demuxer), descriptor))
    }

    fn create_decoder(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn CodecEngine>> {
        ensure_pcm(descriptor, "decoder")?;
        debug!("Selected PCM decoder for {}", descriptor.mime);
        Ok(Box::new(PcmCodec::decoder()))
    }

    fn create_encoder(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn CodecEngine>> {
        ensure_pcm(descriptor, "encoder")?;
        debug!("Selected PCM encoder for {}", descriptor.mime);
        Ok(Box::new(PcmCodec::encoder()))
    }

    fn create_muxer(&self, path: &Path, format: ContainerFormat) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(WavMuxer::open(path, format)?))
    }
}
