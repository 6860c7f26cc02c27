//! FFmpeg-backed decode engines
//!
//! Decoded audio leaves the engine as packed signed 16-bit PCM, the raw
//! layout the transform hook and every encoder expect.

mod ffmpeg;

pub use ffmpeg::FfmpegAudioDecoder;
