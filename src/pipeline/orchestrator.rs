//! Segment-merging pipeline orchestrator
//!
//! Chains segment source → demuxer → decoder → [transform] → encoder → muxer
//! and drives the run state machine. The software path runs on the calling
//! thread; the zero-copy path splits into a decode-drive and an encode-drain
//! thread sharing the encoder's input surface.

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::continuity::{ContinuityTracker, MonotonicGuard};
use super::descriptor::{StreamDescriptor, encoder_descriptor, fallback_audio_descriptor};
use super::events::{EventSink, PipelineEvent};
use super::health::{HealthSummary, PipelineHealth};
use super::state::{FailureReason, PipelineRunState};
use super::transform::{Passthrough, SampleTransform};
use super::types::{InputFlags, MediaKind, Timestamp};
use crate::backend::MediaBackend;
use crate::codec::{CodecEngine, CodecRole, OutputTarget, Surface};
use crate::config::{PipelineConfig, TransferMode};
use crate::container::{Demuxer, Muxer, Pull};
use crate::error::{PipelineError, Result};
use crate::segment::{Segment, list_segments};

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: PipelineRunState,
    pub segments: usize,
    pub samples_written: u64,
    pub bytes_decoded: u64,
    pub bytes_written: u64,
    /// Timestamp of the last sample handed to the muxer
    pub last_timestamp: Timestamp,
    pub elapsed: Duration,
    pub health: HealthSummary,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} segments, {} samples ({} bytes) written, last timestamp {}, took {:?}",
            self.state,
            self.segments,
            self.samples_written,
            self.bytes_written,
            self.last_timestamp,
            self.elapsed
        )
    }
}

/// Drives one segment-merging run
pub struct Orchestrator {
    config: PipelineConfig,
    backend: Arc<dyn MediaBackend>,
    events: EventSink,
    transform: Box<dyn SampleTransform>,
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
    state: PipelineRunState,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            config,
            backend,
            events: EventSink::disabled(),
            transform: Box::new(Passthrough),
            cancel: CancellationToken::new(),
            health: Arc::new(PipelineHealth::new()),
            state: PipelineRunState::Idle,
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Hook applied to every decoded buffer (software transfer only)
    pub fn with_transform(mut self, transform: Box<dyn SampleTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &PipelineRunState {
        &self.state
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    /// Token that aborts the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline to completion.
    ///
    /// On failure every resource is released on a best-effort basis, the
    /// partial output is left in place and the state ends in `Failed`.
    pub fn run(&mut self) -> Result<RunReport> {
        if self.state != PipelineRunState::Idle {
            return Err(PipelineError::InvalidState(format!(
                "run started from {}",
                self.state
            )));
        }

        let started = Instant::now();
        let mut session = Session::default();
        let result = self.execute(&mut session, started);

        match result {
            Ok(report) => {
                info!("{}", report);
                info!("{}", report.health);
                Ok(report)
            }
            Err(e) => {
                session.abort();
                let reason = FailureReason::from(&e);
                self.state = PipelineRunState::Failed(reason.clone());
                match reason {
                    FailureReason::NoInput => self.events.emit(PipelineEvent::NoInput),
                    _ => {
                        error!("Pipeline failed: {}", e);
                        self.events.emit(PipelineEvent::Failed {
                            reason: e.to_string(),
                        });
                    }
                }
                info!("{}", self.health.summary());
                Err(e)
            }
        }
    }

    fn execute(&mut self, session: &mut Session, started: Instant) -> Result<RunReport> {
        let Orchestrator {
            ref config,
            ref backend,
            ref events,
            ref mut transform,
            ref cancel,
            ref health,
            ref mut state,
        } = *self;

        let driver = Driver {
            poll: config.poll_timeout(),
            stall: config.stall_timeout(),
            health,
            events,
            cancel,
        };

        // Idle: everything that can fail before a service is created
        health.mark_progress();
        driver.check()?;

        if config.transfer == TransferMode::ZeroCopy && !transform.is_passthrough() {
            return Err(PipelineError::Config(format!(
                "transform '{}' needs software transfer",
                transform.name()
            )));
        }
        let format = config.container_format()?;
        prepare_output(&config.output)?;

        let segments = discover_segments(&config.input_dir, &config.extensions, &config.output)?;
        let segment_count = segments.len();
        info!(
            "Merging {} segments from {} into {}",
            segment_count,
            config.input_dir.display(),
            config.output.display()
        );

        transition(state, PipelineRunState::Configuring)?;

        // Configuring: first segment, encoder (and its surface), decoder, muxer
        let (cursor, source) =
            SegmentCursor::open(Arc::clone(backend), config.kind, segments, &driver)?;
        let cursor = session.cursor.insert(cursor);
        info!("Source format: {}", source);

        let encoder = session
            .encoder
            .insert(configure_encoder(&**backend, &source, config)?);
        let surface = match config.transfer {
            TransferMode::ZeroCopy => Some(encoder.create_input_surface()?),
            TransferMode::Software => None,
        };

        let decoder = session.decoder.insert(backend.create_decoder(&source)?);
        ensure_role(&**decoder, CodecRole::Decoder)?;
        let target = surface
            .clone()
            .map(OutputTarget::Surface)
            .unwrap_or_default();
        decoder.configure(&source, target)?;
        if surface.is_none() && !transform.is_passthrough() {
            transform.prepare(&decoder.output_descriptor()?)?;
        }

        let output_format = encoder.output_descriptor()?;
        let muxer = session
            .muxer
            .insert(backend.create_muxer(&config.output, format)?);
        let track = muxer.add_track(&output_format)?;
        muxer.start()?;
        session.muxer_started = true;
        info!("Output format: {}", output_format);

        events.emit(PipelineEvent::EnginesSelected {
            decoder: decoder.name().to_string(),
            encoder: encoder.name().to_string(),
        });

        transition(state, PipelineRunState::Draining)?;
        let mut tracker = ContinuityTracker::new();
        let mut guard = MonotonicGuard::new();
        let mut sink = MuxSink {
            muxer: &mut **muxer,
            track,
            guard: &mut guard,
        };

        match surface {
            None => {
                driver.software_drain(
                    cursor,
                    &mut tracker,
                    &mut **decoder,
                    &mut **encoder,
                    &mut **transform,
                    &mut sink,
                )?;
                transition(state, PipelineRunState::Flushing)?;
                driver.flush_encoder(&mut **encoder, &mut sink)?;
            }
            Some(surface) => {
                driver.zero_copy_drain(
                    cursor,
                    &mut tracker,
                    &mut **decoder,
                    &mut **encoder,
                    &surface,
                    &mut sink,
                    state,
                )?;
            }
        }
        events.emit(PipelineEvent::EncodeComplete {
            samples: health.samples_muxed(),
        });

        session.finish()?;
        transition(state, PipelineRunState::Complete)?;

        Ok(RunReport {
            state: state.clone(),
            segments: segment_count,
            samples_written: health.samples_muxed(),
            bytes_decoded: health.bytes_decoded(),
            bytes_written: health.bytes_muxed(),
            last_timestamp: guard.last().unwrap_or(Timestamp::ZERO),
            elapsed: started.elapsed(),
            health: health.summary(),
        })
    }
}

fn ensure_role(engine: &dyn CodecEngine, role: CodecRole) -> Result<()> {
    if engine.role() != role {
        return Err(PipelineError::InvalidState(format!(
            "{} was handed out as a {} but is a {}",
            engine.name(),
            role,
            engine.role()
        )));
    }
    Ok(())
}

fn transition(state: &mut PipelineRunState, next: PipelineRunState) -> Result<()> {
    if !state.can_transition_to(&next) {
        return Err(PipelineError::InvalidState(format!(
            "cannot go from {} to {}",
            state, next
        )));
    }
    debug!("Pipeline state: {} -> {}", state, next);
    *state = next;
    Ok(())
}

/// Delete a previous output and leave an empty file in its place
fn prepare_output(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    if output.exists() {
        debug!("Removing previous output {}", output.display());
        std::fs::remove_file(output)?;
    }
    std::fs::File::create(output)?;
    Ok(())
}

fn discover_segments(dir: &Path, extensions: &[String], output: &Path) -> Result<Vec<Segment>> {
    if !dir.is_dir() {
        return Err(PipelineError::NoInput {
            dir: dir.to_path_buf(),
        });
    }
    let output = output.canonicalize().unwrap_or_else(|_| output.to_path_buf());
    let segments: Vec<Segment> = list_segments(dir, extensions)?
        .into_iter()
        .filter(|segment| {
            segment
                .path
                .canonicalize()
                .map(|path| path != output)
                .unwrap_or(true)
        })
        .collect();
    if segments.is_empty() {
        return Err(PipelineError::NoInput {
            dir: dir.to_path_buf(),
        });
    }
    Ok(segments)
}

/// Create and configure the encoder, retrying audio once with a minimal format
fn configure_encoder(
    backend: &dyn MediaBackend,
    source: &StreamDescriptor,
    config: &PipelineConfig,
) -> Result<Box<dyn CodecEngine>> {
    let descriptor = encoder_descriptor(source, &config.encoder);
    let mut encoder = backend.create_encoder(&descriptor)?;
    ensure_role(&*encoder, CodecRole::Encoder)?;
    match encoder.configure(&descriptor, OutputTarget::Buffers) {
        Ok(()) => Ok(encoder),
        Err(e) if source.kind == MediaKind::Audio => {
            warn!(
                "{} rejected {} ({}), retrying with the fallback format",
                encoder.name(),
                descriptor,
                e
            );
            if let Err(e) = encoder.release() {
                debug!("Releasing rejected encoder: {}", e);
            }
            let fallback = fallback_audio_descriptor(&descriptor.mime, &config.encoder);
            let mut encoder = backend.create_encoder(&fallback)?;
            ensure_role(&*encoder, CodecRole::Encoder)?;
            encoder.configure(&fallback, OutputTarget::Buffers)?;
            Ok(encoder)
        }
        Err(e) => Err(e),
    }
}

/// Every resource a run owns, released in a fixed order
#[derive(Default)]
struct Session {
    cursor: Option<SegmentCursor>,
    decoder: Option<Box<dyn CodecEngine>>,
    encoder: Option<Box<dyn CodecEngine>>,
    muxer: Option<Box<dyn Muxer>>,
    muxer_started: bool,
}

impl Session {
    /// Orderly shutdown after a successful drain
    fn finish(&mut self) -> Result<()> {
        self.shutdown(true)
    }

    /// Shutdown after a failure; the run already carries its own error
    fn abort(&mut self) {
        if let Err(e) = self.shutdown(self.muxer_started) {
            debug!("Cleanup after failure ended with: {}", e);
        }
    }

    /// Stop and release decoder, encoder, then muxer.
    ///
    /// A failing step does not skip the ones after it; the first error is
    /// returned once every component has been released.
    fn shutdown(&mut self, stop_muxer: bool) -> Result<()> {
        let mut first_error = None;
        let mut note = |step: String, result: Result<()>| {
            if let Err(e) = result {
                warn!("{}: {}", step, e);
                first_error.get_or_insert(e);
            }
        };

        if let Some(cursor) = self.cursor.as_mut() {
            cursor.close();
        }
        for engine in [&mut self.decoder, &mut self.encoder] {
            if let Some(mut engine) = engine.take() {
                note(format!("Stopping {}", engine.name()), engine.stop());
                note(format!("Releasing {}", engine.name()), engine.release());
                debug!("Released {}", engine.name());
            }
        }
        if let Some(mut muxer) = self.muxer.take() {
            if stop_muxer {
                note("Stopping muxer".to_string(), muxer.stop());
            }
            note("Releasing muxer".to_string(), muxer.release());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Walks the ordered segments, one open demuxer at a time
struct SegmentCursor {
    backend: Arc<dyn MediaBackend>,
    kind: MediaKind,
    /// Format of the first segment, which every later one must match
    reference: StreamDescriptor,
    segments: Vec<Segment>,
    index: usize,
    demuxer: Box<dyn Demuxer>,
    finished: bool,
}

impl SegmentCursor {
    fn open(
        backend: Arc<dyn MediaBackend>,
        kind: MediaKind,
        segments: Vec<Segment>,
        driver: &Driver<'_>,
    ) -> Result<(Self, StreamDescriptor)> {
        let first = segments.first().ok_or_else(|| PipelineError::NoInput {
            dir: PathBuf::new(),
        })?;
        let (demuxer, descriptor) = backend.open_demuxer(&first.path, kind)?;
        driver.health.record_segment();
        driver.events.emit(PipelineEvent::SegmentAdvanced {
            index: 0,
            path: first.path.clone(),
        });

        Ok((
            SegmentCursor {
                backend,
                kind,
                reference: descriptor.clone(),
                segments,
                index: 0,
                demuxer,
                finished: false,
            },
            descriptor,
        ))
    }

    /// Pull the next sample with its adjusted timestamp.
    ///
    /// Crosses segment boundaries transparently; `None` means every segment
    /// is exhausted.
    fn next(
        &mut self,
        buffer: &mut [u8],
        tracker: &mut ContinuityTracker,
        driver: &Driver<'_>,
    ) -> Result<Option<(usize, Timestamp)>> {
        while !self.finished {
            match self.demuxer.pull(buffer)? {
                Pull::Sample { size, timestamp } => {
                    driver.health.record_demuxed(size);
                    return Ok(Some((size, tracker.next_timestamp(timestamp, false))));
                }
                Pull::EndOfSegment => {
                    self.demuxer.close();
                    if self.index + 1 >= self.segments.len() {
                        self.finished = true;
                        break;
                    }
                    let offset = tracker.end_segment();
                    self.index += 1;
                    let path = self.segments[self.index].path.clone();
                    let (demuxer, descriptor) = self.backend.open_demuxer(&path, self.kind)?;
                    self.demuxer = demuxer;
                    self.reference.ensure_continues(&descriptor, &path)?;
                    debug!("Segment {} starts at offset {}µs", self.index + 1, offset);
                    driver.health.record_segment();
                    driver.events.emit(PipelineEvent::SegmentAdvanced {
                        index: self.index,
                        path,
                    });
                }
            }
        }
        Ok(None)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn close(&mut self) {
        self.demuxer.close();
    }
}

/// Encoder output side: validates ordering and appends to the muxer
struct MuxSink<'a> {
    muxer: &'a mut dyn Muxer,
    track: usize,
    guard: &'a mut MonotonicGuard,
}

/// What one encoder drain step achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    Idle,
    Progress,
    EndOfStream,
}

/// A decoded buffer being copied into encoder input slots
struct PendingCopy {
    data: Vec<u8>,
    offset: usize,
    pts: Timestamp,
    end_of_stream: bool,
}

/// Shared, thread-safe context of the drive loops
#[derive(Clone, Copy)]
struct Driver<'a> {
    poll: Duration,
    stall: Duration,
    health: &'a PipelineHealth,
    events: &'a EventSink,
    cancel: &'a CancellationToken,
}

impl Driver<'_> {
    /// Fail on cancellation or when nothing moved for too long
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if !self.stall.is_zero() && self.health.is_stalled(self.stall) {
            return Err(PipelineError::Stalled(self.stall));
        }
        Ok(())
    }

    /// Submit one demuxed sample, or end of stream once segments run out
    fn feed_decoder(
        &self,
        cursor: &mut SegmentCursor,
        tracker: &mut ContinuityTracker,
        decoder: &mut dyn CodecEngine,
        input_done: &mut bool,
    ) -> Result<bool> {
        if *input_done {
            return Ok(false);
        }
        let Some(mut slot) = decoder.acquire_input_slot(self.poll)? else {
            self.health.record_backpressure();
            return Ok(false);
        };
        match cursor.next(slot.as_mut_slice(), tracker, self)? {
            Some((size, pts)) => decoder.submit_input(slot, size, pts, InputFlags::NONE)?,
            None => {
                debug_assert!(cursor.is_finished());
                decoder.submit_input(slot, 0, tracker.last_adjusted(), InputFlags::END_OF_STREAM)?;
                *input_done = true;
                info!("All segments queued ({} boundaries)", tracker.boundaries());
            }
        }
        Ok(true)
    }

    /// Take one encoder output and hand it to the muxer
    fn drain_encoder(&self, encoder: &mut dyn CodecEngine, sink: &mut MuxSink<'_>) -> Result<Drain> {
        let Some(output) = encoder.acquire_output_slot(self.poll)? else {
            return Ok(Drain::Idle);
        };
        let info = *output.info();
        if info.is_config_change {
            // codec-specific data travels in the track format
            debug!("{}: skipping {} bytes of codec config", encoder.name(), info.size);
            encoder.release_output_slot(output, false)?;
            return Ok(Drain::Progress);
        }

        if info.size > 0 {
            let data = output.data();
            let written = sink
                .guard
                .check(info.pts)
                .and_then(|_| {
                    sink.muxer
                        .write_sample(sink.track, &data[..info.size.min(data.len())], &info)
                });
            if let Err(e) = written {
                encoder.release_output_slot(output, false)?;
                return Err(e);
            }
            self.health.record_muxed(info.size);
        }
        encoder.release_output_slot(output, false)?;

        if info.is_end_of_stream {
            return Ok(Drain::EndOfStream);
        }
        Ok(Drain::Progress)
    }

    /// Single-threaded decode loop copying decoder output into encoder slots
    fn software_drain(
        &self,
        cursor: &mut SegmentCursor,
        tracker: &mut ContinuityTracker,
        decoder: &mut dyn CodecEngine,
        encoder: &mut dyn CodecEngine,
        transform: &mut dyn SampleTransform,
        sink: &mut MuxSink<'_>,
    ) -> Result<()> {
        let mut input_done = false;
        let mut pending: Option<PendingCopy> = None;

        loop {
            self.check()?;
            self.feed_decoder(cursor, tracker, decoder, &mut input_done)?;

            if pending.is_none()
                && let Some(output) = decoder.acquire_output_slot(self.poll)?
            {
                let info = *output.info();
                let data = output.data();
                let mut bytes = data[..info.size.min(data.len())].to_vec();
                decoder.release_output_slot(output, false)?;
                self.health.record_decoded(bytes.len());
                if !transform.is_passthrough() {
                    transform.apply(&mut bytes, &info)?;
                }
                if !bytes.is_empty() || info.is_end_of_stream {
                    pending = Some(PendingCopy {
                        data: bytes,
                        offset: 0,
                        pts: info.pts,
                        end_of_stream: info.is_end_of_stream,
                    });
                }
            }

            if let Some(copy) = pending.as_mut() {
                match encoder.acquire_input_slot(self.poll)? {
                    Some(mut slot) => {
                        let remaining = copy.data.len() - copy.offset;
                        let len = remaining.min(slot.capacity());
                        slot.as_mut_slice()[..len]
                            .copy_from_slice(&copy.data[copy.offset..copy.offset + len]);
                        copy.offset += len;

                        let last = copy.offset == copy.data.len();
                        let flags = match (last, copy.end_of_stream) {
                            (false, _) => InputFlags::PARTIAL,
                            (true, true) => InputFlags::END_OF_STREAM,
                            (true, false) => InputFlags::NONE,
                        };
                        encoder.submit_input(slot, len, copy.pts, flags)?;
                        self.health.record_encoder_input(len);

                        if last {
                            let end_of_stream = copy.end_of_stream;
                            pending = None;
                            if end_of_stream {
                                self.events.emit(PipelineEvent::DecodeComplete);
                                return Ok(());
                            }
                        }
                    }
                    None => self.health.record_backpressure(),
                }
            }

            if self.drain_encoder(encoder, sink)? == Drain::EndOfStream {
                return Err(PipelineError::codec(
                    encoder.name(),
                    "end of stream before its input ended",
                ));
            }
        }
    }

    /// Drain the encoder until it reports end of stream
    fn flush_encoder(&self, encoder: &mut dyn CodecEngine, sink: &mut MuxSink<'_>) -> Result<()> {
        loop {
            self.check()?;
            match self.drain_encoder(encoder, sink)? {
                Drain::EndOfStream => {
                    debug!("{} flushed", encoder.name());
                    return Ok(());
                }
                Drain::Idle => self.health.record_backpressure(),
                Drain::Progress => {}
            }
        }
    }

    /// Decode-drive half of the zero-copy path: every decoder output is
    /// rendered onto the encoder's surface
    fn drive_to_surface(
        &self,
        cursor: &mut SegmentCursor,
        tracker: &mut ContinuityTracker,
        decoder: &mut dyn CodecEngine,
    ) -> Result<()> {
        let mut input_done = false;
        loop {
            self.check()?;
            self.feed_decoder(cursor, tracker, decoder, &mut input_done)?;

            let Some(output) = decoder.acquire_output_slot(self.poll)? else {
                continue;
            };
            let info = *output.info();
            self.health.record_decoded(info.size);
            decoder.release_output_slot(output, true)?;
            if info.is_end_of_stream {
                self.events.emit(PipelineEvent::DecodeComplete);
                return Ok(());
            }
        }
    }

    /// Encode-drain half of the zero-copy path.
    ///
    /// Ends the surface input through the encoder once `decode_done` is set,
    /// then drains until the encoder reports end of stream.
    fn drain_from_surface(
        &self,
        encoder: &mut dyn CodecEngine,
        sink: &mut MuxSink<'_>,
        decode_done: &AtomicBool,
    ) -> Result<()> {
        let mut input_ended = false;
        loop {
            self.check()?;
            if !input_ended && decode_done.load(Ordering::Acquire) {
                encoder.signal_end_of_input_stream()?;
                input_ended = true;
            }
            match self.drain_encoder(encoder, sink)? {
                Drain::EndOfStream if input_ended => {
                    debug!("{} flushed", encoder.name());
                    return Ok(());
                }
                Drain::EndOfStream => {
                    return Err(PipelineError::codec(
                        encoder.name(),
                        "end of stream before its input ended",
                    ));
                }
                Drain::Idle => self.health.record_backpressure(),
                Drain::Progress => {}
            }
        }
    }

    /// Zero-copy transfer: the decoder renders onto the encoder's surface
    #[allow(clippy::too_many_arguments)]
    fn zero_copy_drain(
        &self,
        cursor: &mut SegmentCursor,
        tracker: &mut ContinuityTracker,
        decoder: &mut dyn CodecEngine,
        encoder: &mut dyn CodecEngine,
        surface: &Surface,
        sink: &mut MuxSink<'_>,
        state: &mut PipelineRunState,
    ) -> Result<()> {
        let child = self.cancel.child_token();
        let local = Driver {
            cancel: &child,
            ..*self
        };
        let decode_done = AtomicBool::new(false);
        let first_error: Mutex<Option<PipelineError>> = Mutex::new(None);
        let fail = |e: PipelineError| {
            if let Ok(mut slot) = first_error.lock()
                && slot.is_none()
            {
                *slot = Some(e);
            }
            child.cancel();
            surface.close();
        };

        std::thread::scope(|scope| {
            let decode = scope.spawn(|| match local.drive_to_surface(cursor, tracker, decoder) {
                Ok(()) => decode_done.store(true, Ordering::Release),
                Err(e) => fail(e),
            });
            let encode = scope.spawn(|| {
                if let Err(e) = local.drain_from_surface(encoder, sink, &decode_done) {
                    fail(e);
                }
            });

            if decode.join().is_err() {
                fail(PipelineError::InvalidState("decode thread panicked".into()));
            } else if let Err(e) = transition(state, PipelineRunState::Flushing) {
                fail(e);
            }
            if encode.join().is_err() {
                fail(PipelineError::InvalidState("encode thread panicked".into()));
            }
        });

        let error = first_error
            .into_inner()
            .map_err(|_| PipelineError::InvalidState("error slot poisoned".into()))?;
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
