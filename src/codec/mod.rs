//! Codec engine abstraction
//!
//! Every codec, hardware or software, is driven through the same slot-exchange
//! contract: the caller borrows a fixed-capacity input buffer, fills it and
//! hands it back, then polls for output buffers and returns them once read.
//! Ownership of a slot is expressed by moving the slot value, so a buffer
//! cannot be touched by the caller once it has been submitted.
//!
//! Timeouts on `acquire_*` are routine backpressure: `Ok(None)` means "poll
//! again", never an error. Faults are reported as `PipelineError::CodecFault`
//! and are fatal to the run.

mod exchange;
mod pcm;
mod slot_pool;
mod surface;

use bytes::Bytes;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::StreamDescriptor;
use crate::pipeline::types::{BufferInfo, InputFlags, Timestamp};

pub(crate) use exchange::{DEFAULT_SLOT_CAPACITY, SLOT_COUNT, SlotExchange};
pub use pcm::PcmCodec;
pub use slot_pool::SlotPool;
pub use surface::{Surface, SurfaceFrame};

/// Direction of a codec engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    Decoder,
    Encoder,
}

impl std::fmt::Display for CodecRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecRole::Decoder => write!(f, "decoder"),
            CodecRole::Encoder => write!(f, "encoder"),
        }
    }
}

/// Where a decoder delivers its output
#[derive(Debug, Clone, Default)]
pub enum OutputTarget {
    /// Output buffers are read back by the caller
    #[default]
    Buffers,
    /// Output is rendered onto the input surface of a paired encoder
    Surface(Surface),
}

/// Lifecycle shared by engine implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLifecycle {
    Unconfigured,
    Running,
    Stopped,
    Released,
}

impl EngineLifecycle {
    /// Fail unless the engine is configured and not yet stopped
    pub fn ensure_running(&self, engine: &str) -> Result<()> {
        match self {
            EngineLifecycle::Running => Ok(()),
            other => Err(PipelineError::InvalidState(format!(
                "{engine} is {other:?}, expected Running"
            ))),
        }
    }
}

/// A writable input buffer owned by the caller until submitted
#[derive(Debug)]
pub struct InputSlot {
    index: usize,
    data: Vec<u8>,
}

impl InputSlot {
    pub(crate) fn new(index: usize, data: Vec<u8>) -> Self {
        Self { index, data }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Fixed capacity of the slot
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The whole writable buffer
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn into_parts(self) -> (usize, Vec<u8>) {
        (self.index, self.data)
    }
}

/// A readable output buffer owned by the caller until released
#[derive(Debug)]
pub struct OutputSlot {
    index: usize,
    data: Bytes,
    info: BufferInfo,
}

impl OutputSlot {
    pub(crate) fn new(index: usize, data: Bytes, info: BufferInfo) -> Self {
        Self { index, data, info }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn info(&self) -> &BufferInfo {
        &self.info
    }
}

/// Queue-based, stateful transformation stage
pub trait CodecEngine: Send {
    /// Implementation name, reported to the user when the run starts
    fn name(&self) -> &str;

    fn role(&self) -> CodecRole;

    /// Prepare the engine for `descriptor`; `target` only matters for decoders
    fn configure(&mut self, descriptor: &StreamDescriptor, target: OutputTarget) -> Result<()>;

    /// Create the zero-copy destination a paired decoder renders into.
    ///
    /// Must be called after `configure` on an encoder. Once an input surface
    /// exists, input slots can no longer be acquired.
    fn create_input_surface(&mut self) -> Result<Surface> {
        Err(PipelineError::Unsupported(format!(
            "{} cannot create an input surface",
            self.name()
        )))
    }

    /// Format of the produced stream, used to declare the muxer track
    fn output_descriptor(&self) -> Result<StreamDescriptor>;

    fn acquire_input_slot(&mut self, timeout: Duration) -> Result<Option<InputSlot>>;

    fn submit_input(
        &mut self,
        slot: InputSlot,
        len: usize,
        pts: Timestamp,
        flags: InputFlags,
    ) -> Result<()>;

    /// Mark end of stream on a surface input
    fn signal_end_of_input_stream(&mut self) -> Result<()>;

    fn acquire_output_slot(&mut self, timeout: Duration) -> Result<Option<OutputSlot>>;

    /// Return an output buffer; `render` presents it on the bound surface
    fn release_output_slot(&mut self, slot: OutputSlot, render: bool) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Free the engine; refused while slots are still outstanding
    fn release(&mut self) -> Result<()>;
}
