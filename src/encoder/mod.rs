//! FFmpeg-backed encode engines
//!
//! Encoders take packed signed 16-bit PCM through the slot contract and
//! emit compressed packets stamped in microseconds.

mod ffmpeg;
mod frame_pool;

pub use ffmpeg::FfmpegAudioEncoder;
pub(crate) use ffmpeg::build_audio_encoder;
