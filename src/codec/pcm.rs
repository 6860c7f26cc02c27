use bytes::Bytes;
use log::{debug, warn};
use std::time::Duration;

use super::{
    CodecEngine, CodecRole, DEFAULT_SLOT_CAPACITY, EngineLifecycle, InputSlot, OutputSlot,
    OutputTarget, SLOT_COUNT, SlotExchange, Surface, SurfaceFrame,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::{FormatKey, StreamDescriptor};
use crate::pipeline::types::{BufferInfo, InputFlags, Sample, Timestamp};

/// Capacity of a surface created by an encoder
const SURFACE_CAPACITY: usize = SLOT_COUNT;

/// Raw PCM codec.
///
/// Decoding and encoding linear PCM are identity transforms, so this engine
/// exists to carry the full slot-exchange contract (fixed-capacity slots,
/// bounded output backlog, partial-chunk reassembly, end-of-stream and the
/// zero-copy surface path) for uncompressed streams.
pub struct PcmCodec {
    role: CodecRole,
    lifecycle: EngineLifecycle,
    descriptor: Option<StreamDescriptor>,
    exchange: SlotExchange,
    target: OutputTarget,
    input_surface: Option<Surface>,
}

impl PcmCodec {
    pub fn new(role: CodecRole) -> Self {
        PcmCodec {
            role,
            lifecycle: EngineLifecycle::Unconfigured,
            descriptor: None,
            exchange: SlotExchange::new(format!("pcm.{role}")),
            target: OutputTarget::Buffers,
            input_surface: None,
        }
    }

    pub fn decoder() -> Self {
        Self::new(CodecRole::Decoder)
    }

    pub fn encoder() -> Self {
        Self::new(CodecRole::Encoder)
    }

    /// Move one frame from the input surface to the output queue
    fn pull_from_surface(&mut self, surface: &Surface, timeout: Duration) -> Result<()> {
        match surface.take(timeout)? {
            SurfaceFrame::Frame(frame) => {
                let info = BufferInfo::sample(frame.size(), frame.pts);
                self.exchange.produce(frame.data, info);
            }
            SurfaceFrame::EndOfStream => {
                if !self.exchange.input_ended() {
                    self.exchange.mark_input_ended();
                    self.exchange
                        .produce(Bytes::new(), BufferInfo::end_of_stream(0, Timestamp::ZERO));
                }
            }
            SurfaceFrame::Empty => {}
            SurfaceFrame::Closed => {
                return Err(PipelineError::codec(self.name(), "input surface closed"));
            }
        }
        Ok(())
    }
}

impl CodecEngine for PcmCodec {
    fn name(&self) -> &str {
        self.exchange.name()
    }

    fn role(&self) -> CodecRole {
        self.role
    }

    fn configure(&mut self, descriptor: &StreamDescriptor, target: OutputTarget) -> Result<()> {
        if self.lifecycle != EngineLifecycle::Unconfigured {
            return Err(PipelineError::InvalidState(format!(
                "{} already configured",
                self.name()
            )));
        }
        if self.role == CodecRole::Encoder && matches!(target, OutputTarget::Surface(_)) {
            return Err(PipelineError::codec(self.name(), "an encoder cannot render to a surface"));
        }

        let capacity = descriptor.max_input_size().unwrap_or(DEFAULT_SLOT_CAPACITY);
        if let Some(bits) = descriptor.get(FormatKey::BitsPerSample)
            && bits != 16
        {
            warn!("{}: {} bits per sample passed through untouched", self.name(), bits);
        }

        self.exchange.configure(capacity);
        self.descriptor = Some(descriptor.clone());
        self.target = target;
        self.lifecycle = EngineLifecycle::Running;
        debug!("{}: configured {} (slot capacity {})", self.name(), descriptor, capacity);
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<Surface> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        if self.role != CodecRole::Encoder {
            return Err(PipelineError::Unsupported(
                "input surfaces are created by encoders".into(),
            ));
        }
        let surface = Surface::new(SURFACE_CAPACITY);
        self.input_surface = Some(surface.clone());
        Ok(surface)
    }

    fn output_descriptor(&self) -> Result<StreamDescriptor> {
        let mut descriptor = self.descriptor.clone().ok_or_else(|| {
            PipelineError::InvalidState(format!("{} not configured", self.name()))
        })?;
        // raw PCM carries no compressed profile
        descriptor.parameters.remove(&FormatKey::AacProfile);
        Ok(descriptor)
    }

    fn acquire_input_slot(&mut self, _timeout: Duration) -> Result<Option<InputSlot>> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        if self.input_surface.is_some() {
            return Err(PipelineError::InvalidState(format!(
                "{} input is bound to a surface",
                self.name()
            )));
        }
        Ok(self.exchange.take_input())
    }

    fn submit_input(
        &mut self,
        slot: InputSlot,
        len: usize,
        pts: Timestamp,
        flags: InputFlags,
    ) -> Result<()> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        let Some(payload) = self.exchange.accept(slot, len, flags)? else {
            return Ok(());
        };
        if flags.end_of_stream {
            let info = BufferInfo::end_of_stream(payload.len(), pts);
            self.exchange.produce(payload, info);
        } else if !payload.is_empty() {
            let info = BufferInfo::sample(payload.len(), pts);
            self.exchange.produce(payload, info);
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        match &self.input_surface {
            Some(surface) => surface.end_of_stream(),
            None => Err(PipelineError::InvalidState(format!(
                "{} has no input surface",
                self.name()
            ))),
        }
    }

    fn acquire_output_slot(&mut self, timeout: Duration) -> Result<Option<OutputSlot>> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        if !self.exchange.has_ready()
            && !self.exchange.output_ended()
            && let Some(surface) = self.input_surface.clone()
        {
            self.pull_from_surface(&surface, timeout)?;
        }
        Ok(self.exchange.next_output())
    }

    fn release_output_slot(&mut self, slot: OutputSlot, render: bool) -> Result<()> {
        self.lifecycle.ensure_running(self.exchange.name())?;
        self.exchange.give_back(&slot)?;
        if !render {
            return Ok(());
        }
        match &self.target {
            OutputTarget::Surface(surface) => {
                if slot.info().size > 0 {
                    let frame = Sample::new(slot.data().clone(), slot.info().pts);
                    surface.render(frame)?;
                }
                Ok(())
            }
            OutputTarget::Buffers => {
                debug!("{}: render requested without a surface, ignored", self.name());
                Ok(())
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        match self.lifecycle {
            EngineLifecycle::Running | EngineLifecycle::Unconfigured => {
                // every lent slot is invalid from here on
                self.exchange.reset();
                if let Some(surface) = &self.input_surface {
                    surface.close();
                }
                self.lifecycle = EngineLifecycle::Stopped;
                Ok(())
            }
            EngineLifecycle::Stopped => Ok(()),
            EngineLifecycle::Released => Err(PipelineError::InvalidState(format!(
                "{} already released",
                self.name()
            ))),
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.lifecycle == EngineLifecycle::Released {
            return Err(PipelineError::InvalidState(format!(
                "{} released twice",
                self.name()
            )));
        }
        let outstanding = self.exchange.outstanding();
        if outstanding > 0 {
            return Err(PipelineError::InvalidState(format!(
                "{} has {} outstanding slots",
                self.name(),
                outstanding
            )));
        }
        self.input_surface = None;
        self.target = OutputTarget::Buffers;
        self.lifecycle = EngineLifecycle::Released;
        Ok(())
    }
}
