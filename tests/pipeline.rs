//! End-to-end runs of the segment merger over the WAV backend

use segmerge::PipelineError;
use segmerge::backend::{MediaBackend, WavBackend};
use segmerge::codec::{CodecEngine, CodecRole, InputSlot, OutputSlot, OutputTarget};
use segmerge::config::{PipelineConfig, TransferMode};
use segmerge::container::wav::{WavSpec, read_info, write_wav};
use segmerge::container::{ContainerFormat, Demuxer, Muxer};
use segmerge::pipeline::{
    EventSink, FailureReason, InputFlags, MediaKind, Orchestrator, PcmGain, PipelineEvent,
    PipelineRunState, StreamDescriptor, Timestamp,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Write `seconds` of a ramp signal as a 16-bit PCM segment
fn write_segment(dir: &Path, name: &str, spec: &WavSpec, seconds: f64) {
    let frames = (spec.sample_rate as f64 * seconds) as usize;
    let pcm: Vec<u8> = (0..frames * spec.block_align())
        .map(|i| (i % 251) as u8)
        .collect();
    write_wav(&dir.join(name), spec, &pcm).unwrap();
}

fn config(input: &Path, output: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(input, output);
    config.stall_timeout_ms = 5_000;
    config
}

fn drain_events(rx: &mut tokio::sync::mpsc::Receiver<segmerge::pipeline::TimedEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(timed) = rx.try_recv() {
        events.push(timed.event);
    }
    events
}

/// Backend counting every service it hands out
#[derive(Default)]
struct CountingBackend {
    inner: WavBackend,
    demuxers: AtomicUsize,
    engines: AtomicUsize,
    muxers: AtomicUsize,
}

impl MediaBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn open_demuxer(
        &self,
        path: &Path,
        kind: MediaKind,
    ) -> segmerge::Result<(Box<dyn Demuxer>, StreamDescriptor)> {
        self.demuxers.fetch_add(1, Ordering::SeqCst);
        self.inner.open_demuxer(path, kind)
    }

    fn create_decoder(&self, descriptor: &StreamDescriptor) -> segmerge::Result<Box<dyn CodecEngine>> {
        self.engines.fetch_add(1, Ordering::SeqCst);
        self.inner.create_decoder(descriptor)
    }

    fn create_encoder(&self, descriptor: &StreamDescriptor) -> segmerge::Result<Box<dyn CodecEngine>> {
        self.engines.fetch_add(1, Ordering::SeqCst);
        self.inner.create_encoder(descriptor)
    }

    fn create_muxer(&self, path: &Path, format: ContainerFormat) -> segmerge::Result<Box<dyn Muxer>> {
        self.muxers.fetch_add(1, Ordering::SeqCst);
        self.inner.create_muxer(path, format)
    }
}

/// Encoder that faults after accepting a number of inputs
struct FaultyEncoder {
    inner: Box<dyn CodecEngine>,
    remaining: usize,
}

impl CodecEngine for FaultyEncoder {
    fn name(&self) -> &str {
        "faulty"
    }

    fn role(&self) -> CodecRole {
        CodecRole::Encoder
    }

    fn configure(&mut self, descriptor: &StreamDescriptor, target: OutputTarget) -> segmerge::Result<()> {
        self.inner.configure(descriptor, target)
    }

    fn output_descriptor(&self) -> segmerge::Result<StreamDescriptor> {
        self.inner.output_descriptor()
    }

    fn acquire_input_slot(&mut self, timeout: Duration) -> segmerge::Result<Option<InputSlot>> {
        self.inner.acquire_input_slot(timeout)
    }

    fn submit_input(
        &mut self,
        slot: InputSlot,
        len: usize,
        pts: Timestamp,
        flags: InputFlags,
    ) -> segmerge::Result<()> {
        if self.remaining == 0 {
            return Err(PipelineError::codec("faulty", "hardware reset"));
        }
        self.remaining -= 1;
        self.inner.submit_input(slot, len, pts, flags)
    }

    fn signal_end_of_input_stream(&mut self) -> segmerge::Result<()> {
        self.inner.signal_end_of_input_stream()
    }

    fn acquire_output_slot(&mut self, timeout: Duration) -> segmerge::Result<Option<OutputSlot>> {
        self.inner.acquire_output_slot(timeout)
    }

    fn release_output_slot(&mut self, slot: OutputSlot, render: bool) -> segmerge::Result<()> {
        self.inner.release_output_slot(slot, render)
    }

    fn stop(&mut self) -> segmerge::Result<()> {
        self.inner.stop()
    }

    fn release(&mut self) -> segmerge::Result<()> {
        self.inner.release()
    }
}

struct FaultyBackend {
    inputs_before_fault: usize,
}

impl MediaBackend for FaultyBackend {
    fn name(&self) -> &str {
        "faulty"
    }

    fn open_demuxer(
        &self,
        path: &Path,
        kind: MediaKind,
    ) -> segmerge::Result<(Box<dyn Demuxer>, StreamDescriptor)> {
        WavBackend.open_demuxer(path, kind)
    }

    fn create_decoder(&self, descriptor: &StreamDescriptor) -> segmerge::Result<Box<dyn CodecEngine>> {
        WavBackend.create_decoder(descriptor)
    }

    fn create_encoder(&self, descriptor: &StreamDescriptor) -> segmerge::Result<Box<dyn CodecEngine>> {
        Ok(Box::new(FaultyEncoder {
            inner: WavBackend.create_encoder(descriptor)?,
            remaining: self.inputs_before_fault,
        }))
    }

    fn create_muxer(&self, path: &Path, format: ContainerFormat) -> segmerge::Result<Box<dyn Muxer>> {
        WavBackend.create_muxer(path, format)
    }
}

#[test]
fn test_three_one_second_segments_make_three_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("split");
    std::fs::create_dir(&input).unwrap();
    let spec = WavSpec::pcm16(2, 44_100);
    for name in ["1.wav", "2.wav", "3.wav"] {
        write_segment(&input, name, &spec, 1.0);
    }
    let output = dir.path().join("merged.wav");

    let mut run = Orchestrator::new(config(&input, &output), Arc::new(WavBackend));
    let report = run.run().unwrap();

    assert_eq!(report.state, PipelineRunState::Complete);
    assert_eq!(report.segments, 3);
    let info = read_info(&output).unwrap();
    assert_eq!(info.spec, spec);
    assert_eq!(info.duration(), Duration::from_secs(3));
}

#[test]
fn test_timestamps_continue_across_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let spec = WavSpec::pcm16(1, 8_000);
    // deliberately out of lexical order
    write_segment(dir.path(), "part_10.wav", &spec, 4.0);
    write_segment(dir.path(), "part_1.wav", &spec, 5.0);
    write_segment(dir.path(), "part_2.wav", &spec, 3.0);
    let output = dir.path().join("out").join("merged.wav");

    let (events, mut rx) = EventSink::channel(64);
    let mut run = Orchestrator::new(config(dir.path(), &output), Arc::new(WavBackend)).with_events(events);
    let report = run.run().unwrap();

    assert_eq!(read_info(&output).unwrap().duration(), Duration::from_secs(12));
    // the last chunk of a 12 s run starts within its final 1024 frames
    let last = report.last_timestamp.as_duration();
    assert!(last < Duration::from_secs(12), "{last:?}");
    assert!(last > Duration::from_millis(11_800), "{last:?}");

    let order: Vec<String> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::SegmentAdvanced { path, .. } => {
                Some(path.file_name().unwrap().to_string_lossy().into_owned())
            }
            _ => None,
        })
        .collect();
    assert_eq!(order, ["part_1.wav", "part_2.wav", "part_10.wav"]);
}

#[test]
fn test_event_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let spec = WavSpec::pcm16(2, 8_000);
    write_segment(dir.path(), "1.wav", &spec, 0.5);
    write_segment(dir.path(), "2.wav", &spec, 0.5);

    let (events, mut rx) = EventSink::channel(64);
    let mut run = Orchestrator::new(config(dir.path(), &dir.path().join("o.wav")), Arc::new(WavBackend))
        .with_events(events);
    let report = run.run().unwrap();

    let events = drain_events(&mut rx);
    assert!(matches!(events[0], PipelineEvent::SegmentAdvanced { index: 0, .. }));
    assert_eq!(
        events[1],
        PipelineEvent::EnginesSelected {
            decoder: "pcm.decoder".into(),
            encoder: "pcm.encoder".into(),
        }
    );
    assert!(matches!(events[2], PipelineEvent::SegmentAdvanced { index: 1, .. }));
    assert_eq!(events[3], PipelineEvent::DecodeComplete);
    assert_eq!(
        events[4],
        PipelineEvent::EncodeComplete {
            samples: report.samples_written
        }
    );
    assert_eq!(events.len(), 5);
}

#[test]
fn test_small_encoder_slots_force_chunked_copy() {
    let dir = tempfile::tempdir().unwrap();
    let spec = WavSpec::pcm16(2, 8_000);
    write_segment(dir.path(), "1.wav", &spec, 1.0);
    write_segment(dir.path(), "2.wav", &spec, 1.0);
    let output = dir.path().join("merged.wav");

    let mut config = config(dir.path(), &output);
    // a decoded chunk is 4096 bytes, so every chunk spans five slots
    config.encoder.max_input_size = 1_000;
    let report = Orchestrator::new(config, Arc::new(WavBackend)).run().unwrap();

    assert_eq!(report.bytes_written, report.bytes_decoded);
    assert_eq!(report.health.bytes_encoded_in, report.bytes_decoded);
    assert_eq!(read_info(&output).unwrap().frames(), 16_000);
}

#[test]
fn test_empty_directory_reports_no_input_without_engines() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("split");
    std::fs::create_dir(&input).unwrap();
    let output = dir.path().join("merged.wav");
    std::fs::write(&output, b"stale").unwrap();

    let backend = Arc::new(CountingBackend::default());
    let (events, mut rx) = EventSink::channel(8);
    let mut run = Orchestrator::new(config(&input, &output), backend.clone()).with_events(events);

    assert!(matches!(run.run(), Err(PipelineError::NoInput { .. })));
    assert_eq!(*run.state(), PipelineRunState::Failed(FailureReason::NoInput));
    assert_eq!(drain_events(&mut rx), [PipelineEvent::NoInput]);
    assert_eq!(backend.demuxers.load(Ordering::SeqCst), 0);
    assert_eq!(backend.engines.load(Ordering::SeqCst), 0);
    assert_eq!(backend.muxers.load(Ordering::SeqCst), 0);
    // the previous output is replaced by an empty file
    assert_eq!(std::fs::metadata(&output).unwrap().len(), 0);
}

#[test]
fn test_rerun_replaces_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("split");
    std::fs::create_dir(&input).unwrap();
    write_segment(&input, "1.wav", &WavSpec::pcm16(2, 8_000), 0.25);
    let output = dir.path().join("merged.wav");

    Orchestrator::new(config(&input, &output), Arc::new(WavBackend))
        .run()
        .unwrap();
    let first = std::fs::read(&output).unwrap();
    Orchestrator::new(config(&input, &output), Arc::new(WavBackend))
        .run()
        .unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), first);
}

#[test]
fn test_zero_copy_matches_software_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("split");
    std::fs::create_dir(&input).unwrap();
    let spec = WavSpec::pcm16(2, 8_000);
    write_segment(&input, "1.wav", &spec, 1.0);
    write_segment(&input, "2.wav", &spec, 0.5);

    let software = dir.path().join("software.wav");
    Orchestrator::new(config(&input, &software), Arc::new(WavBackend))
        .run()
        .unwrap();

    let zero_copy = dir.path().join("zero_copy.wav");
    let mut cfg = config(&input, &zero_copy);
    cfg.transfer = TransferMode::ZeroCopy;
    let mut run = Orchestrator::new(cfg, Arc::new(WavBackend));
    let report = run.run().unwrap();

    assert_eq!(*run.state(), PipelineRunState::Complete);
    assert_eq!(report.segments, 2);
    assert_eq!(std::fs::read(&zero_copy).unwrap(), std::fs::read(&software).unwrap());
}

#[test]
fn test_video_request_on_audio_segments() {
    let dir = tempfile::tempdir().unwrap();
    write_segment(dir.path(), "1.wav", &WavSpec::pcm16(1, 8_000), 0.1);
    let mut cfg = config(dir.path(), &dir.path().join("merged.wav"));
    cfg.kind = MediaKind::Video;

    let mut run = Orchestrator::new(cfg, Arc::new(WavBackend));
    assert!(matches!(run.run(), Err(PipelineError::NoMatchingTrack { .. })));
    assert_eq!(
        *run.state(),
        PipelineRunState::Failed(FailureReason::NoMatchingTrack)
    );
}

#[test]
fn test_cancelled_run_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_segment(dir.path(), "1.wav", &WavSpec::pcm16(1, 8_000), 0.1);
    let mut run = Orchestrator::new(config(dir.path(), &dir.path().join("merged.wav")), Arc::new(WavBackend));
    run.cancellation_token().cancel();

    assert!(matches!(run.run(), Err(PipelineError::Cancelled)));
    assert_eq!(*run.state(), PipelineRunState::Failed(FailureReason::Cancelled));
}

#[test]
fn test_codec_fault_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let spec = WavSpec::pcm16(2, 8_000);
    write_segment(dir.path(), "1.wav", &spec, 1.0);
    write_segment(dir.path(), "2.wav", &spec, 1.0);
    let output = dir.path().join("merged.wav");

    let (events, mut rx) = EventSink::channel(64);
    let backend = Arc::new(FaultyBackend {
        inputs_before_fault: 3,
    });
    let mut run = Orchestrator::new(config(dir.path(), &output), backend).with_events(events);

    let err = run.run().unwrap_err();
    assert!(matches!(err, PipelineError::CodecFault { .. }), "{err}");
    assert_eq!(*run.state(), PipelineRunState::Failed(FailureReason::CodecFault));
    assert!(
        drain_events(&mut rx)
            .iter()
            .any(|event| matches!(event, PipelineEvent::Failed { .. }))
    );
    // partial output stays on disk
    assert!(output.exists());
}

#[test]
fn test_gain_transform_applies_on_software_path() {
    let dir = tempfile::tempdir().unwrap();
    write_segment(dir.path(), "1.wav", &WavSpec::pcm16(2, 8_000), 0.5);
    let output = dir.path().join("merged.wav");

    Orchestrator::new(config(dir.path(), &output), Arc::new(WavBackend))
        .with_transform(Box::new(PcmGain::new(0.0)))
        .run()
        .unwrap();

    let info = read_info(&output).unwrap();
    let bytes = std::fs::read(&output).unwrap();
    let data = &bytes[info.data_offset as usize..(info.data_offset + info.data_len) as usize];
    assert!(!data.is_empty());
    assert!(data.iter().all(|b| *b == 0));
}

#[test]
fn test_segment_with_other_format_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    write_segment(dir.path(), "1.wav", &WavSpec::pcm16(2, 44_100), 1.0);
    write_segment(dir.path(), "2.wav", &WavSpec::pcm16(1, 8_000), 1.0);

    let mut run = Orchestrator::new(config(dir.path(), &dir.path().join("merged.wav")), Arc::new(WavBackend));
    let err = run.run().unwrap_err();
    match err {
        PipelineError::FormatMismatch { ref path, key, .. } => {
            assert!(path.ends_with("2.wav"));
            assert_eq!(key, "sample-rate");
        }
        other => panic!("unexpected {other}"),
    }
    assert!(matches!(run.state(), PipelineRunState::Failed(FailureReason::Error(_))));
}

#[test]
fn test_gain_refuses_24_bit_segments() {
    let dir = tempfile::tempdir().unwrap();
    let spec = WavSpec {
        channels: 2,
        sample_rate: 8_000,
        bits_per_sample: 24,
    };
    write_segment(dir.path(), "1.wav", &spec, 0.25);

    let mut run = Orchestrator::new(config(dir.path(), &dir.path().join("merged.wav")), Arc::new(WavBackend))
        .with_transform(Box::new(PcmGain::new(2.0)));
    assert!(matches!(run.run(), Err(PipelineError::Unsupported(_))));
    assert!(matches!(run.state(), PipelineRunState::Failed(_)));
}
