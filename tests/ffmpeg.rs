//! Compressed round trips through the libav backend
#![cfg(feature = "ffmpeg")]

use segmerge::backend::FfmpegBackend;
use segmerge::config::PipelineConfig;
use segmerge::container::wav::{WavSpec, write_wav};
use segmerge::container::ffmpeg::FfmpegDemuxer;
use segmerge::container::{Demuxer, Pull};
use segmerge::pipeline::{MediaKind, Orchestrator, PipelineRunState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn write_tone(path: &Path, spec: &WavSpec, seconds: f64) {
    let frames = (spec.sample_rate as f64 * seconds) as usize;
    let mut pcm = Vec::with_capacity(frames * spec.block_align());
    for frame in 0..frames {
        let phase = frame as f64 * 440.0 / spec.sample_rate as f64;
        let value = ((phase * std::f64::consts::TAU).sin() * 8_000.0) as i16;
        for _ in 0..spec.channels {
            pcm.extend_from_slice(&value.to_le_bytes());
        }
    }
    write_wav(path, spec, &pcm).unwrap();
}

fn aac_config(input: &Path, output: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(input, output);
    config.encoder.mime = Some("audio/mp4a-latm".into());
    config.encoder.bit_rate = 128_000;
    config.stall_timeout_ms = 10_000;
    config
}

/// Last packet timestamp of the audio track
fn last_timestamp(path: &Path) -> Duration {
    let (mut demuxer, _) = FfmpegDemuxer::open(path, MediaKind::Audio).unwrap();
    let mut buffer = vec![0u8; 256 * 1024];
    let mut last = Duration::ZERO;
    while let Pull::Sample { timestamp, .. } = demuxer.pull(&mut buffer).unwrap() {
        last = last.max(timestamp.as_duration());
    }
    demuxer.close();
    last
}

#[test]
fn test_merging_aac_segments_keeps_total_duration() {
    let dir = tempfile::tempdir().unwrap();
    let spec = WavSpec::pcm16(2, 44_100);

    // three one-second AAC segments, each encoded on its own
    let split = dir.path().join("split");
    std::fs::create_dir(&split).unwrap();
    for index in 1..=3 {
        let source = dir.path().join(format!("source_{index}"));
        std::fs::create_dir(&source).unwrap();
        write_tone(&source.join("1.wav"), &spec, 1.0);
        let segment = split.join(format!("{index}.m4a"));
        Orchestrator::new(aac_config(&source, &segment), Arc::new(FfmpegBackend))
            .run()
            .unwrap();
    }

    let merged = dir.path().join("merged.m4a");
    let mut run = Orchestrator::new(aac_config(&split, &merged), Arc::new(FfmpegBackend));
    let report = run.run().unwrap();

    assert_eq!(*run.state(), PipelineRunState::Complete);
    assert_eq!(report.segments, 3);
    let last = last_timestamp(&merged);
    assert!(last > Duration::from_millis(2_800), "{last:?}");
    assert!(last < Duration::from_millis(3_300), "{last:?}");
}
