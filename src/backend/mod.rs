//! Media service backends
//!
//! A backend bundles the four factories the orchestrator needs: demuxer,
//! decoder, encoder and muxer. The pipeline itself never names a concrete
//! implementation.

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod wav;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::codec::CodecEngine;
use crate::container::{ContainerFormat, Demuxer, Muxer};
use crate::error::Result;
use crate::pipeline::descriptor::StreamDescriptor;
use crate::pipeline::types::MediaKind;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegBackend;
pub use wav::WavBackend;

/// Factory for every media service a run uses
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open a segment and select its first track of `kind`
    fn open_demuxer(
        &self,
        path: &Path,
        kind: MediaKind,
    ) -> Result<(Box<dyn Demuxer>, StreamDescriptor)>;

    /// Pick a decoder able to read `descriptor`; it still has to be configured
    fn create_decoder(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn CodecEngine>>;

    /// Pick an encoder producing `descriptor.mime`
    fn create_encoder(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn CodecEngine>>;

    fn create_muxer(&self, path: &Path, format: ContainerFormat) -> Result<Box<dyn Muxer>>;
}

/// Backend selection, as written in the configuration file or on the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Wav,
    Ffmpeg,
}

impl BackendKind {
    pub fn create(&self) -> Result<Arc<dyn MediaBackend>> {
        match self {
            BackendKind::Wav => Ok(Arc::new(WavBackend)),
            #[cfg(feature = "ffmpeg")]
            BackendKind::Ffmpeg => Ok(Arc::new(FfmpegBackend)),
            #[cfg(not(feature = "ffmpeg"))]
            BackendKind::Ffmpeg => Err(crate::error::PipelineError::Unsupported(
                "built without the `ffmpeg` feature".into(),
            )),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Wav => write!(f, "wav"),
            BackendKind::Ffmpeg => write!(f, "ffmpeg"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" | "pcm" => Ok(BackendKind::Wav),
            "ffmpeg" => Ok(BackendKind::Ffmpeg),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}
