use bytes::{Bytes, BytesMut};
use std::collections::{HashSet, VecDeque};

use super::{InputSlot, OutputSlot, SlotPool};
use crate::error::{PipelineError, Result};
use crate::pipeline::types::{BufferInfo, InputFlags};

/// Number of input slots lent out by one engine
pub(crate) const SLOT_COUNT: usize = 4;

/// Maximum number of produced buffers waiting before inputs are refused
pub(crate) const OUTPUT_BACKLOG: usize = SLOT_COUNT * 2;

/// Input slot capacity when the format does not negotiate one
pub(crate) const DEFAULT_SLOT_CAPACITY: usize = 64 * 1024;

/// Slot bookkeeping shared by the engine implementations.
///
/// Owns the input slot pool, the queue of produced buffers, the set of output
/// slots lent to the caller and the reassembly buffer for partial inputs.
#[derive(Debug)]
pub(crate) struct SlotExchange {
    name: String,
    inputs: SlotPool,
    ready: VecDeque<(Bytes, BufferInfo)>,
    outstanding_outputs: HashSet<usize>,
    next_output_index: usize,
    pending: BytesMut,
    input_ended: bool,
    output_ended: bool,
}

impl SlotExchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: SlotPool::new(0, 0),
            ready: VecDeque::new(),
            outstanding_outputs: HashSet::new(),
            next_output_index: 0,
            pending: BytesMut::new(),
            input_ended: false,
            output_ended: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn configure(&mut self, capacity: usize) {
        self.inputs = SlotPool::new(SLOT_COUNT, capacity);
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended
    }

    pub fn output_ended(&self) -> bool {
        self.output_ended
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Lend an input slot unless input ended or the output backlog is full
    pub fn take_input(&mut self) -> Option<InputSlot> {
        if self.input_ended || self.ready.len() >= OUTPUT_BACKLOG {
            return None;
        }
        self.inputs.take()
    }

    /// Take back a filled slot.
    ///
    /// Returns the whole logical sample once its final chunk arrived, `None`
    /// while chunks marked partial are still being collected.
    pub fn accept(&mut self, slot: InputSlot, len: usize, flags: InputFlags) -> Result<Option<Bytes>> {
        if self.input_ended {
            return Err(PipelineError::codec(&self.name, "input submitted after end of stream"));
        }
        if len > slot.capacity() {
            return Err(PipelineError::codec(
                &self.name,
                format!("{} bytes exceed slot capacity {}", len, slot.capacity()),
            ));
        }

        self.pending.extend_from_slice(&slot.as_slice()[..len]);
        if !self.inputs.put(slot) {
            return Err(PipelineError::codec(&self.name, "slot does not belong to this engine"));
        }
        if flags.partial && !flags.end_of_stream {
            return Ok(None);
        }
        if flags.end_of_stream {
            self.input_ended = true;
        }
        Ok(Some(self.pending.split().freeze()))
    }

    /// Input ended through another channel than a slot (a surface)
    pub fn mark_input_ended(&mut self) {
        self.input_ended = true;
    }

    pub fn produce(&mut self, data: Bytes, info: BufferInfo) {
        self.ready.push_back((data, info));
    }

    /// Lend the oldest produced buffer
    pub fn next_output(&mut self) -> Option<OutputSlot> {
        let (data, info) = self.ready.pop_front()?;
        if info.is_end_of_stream {
            self.output_ended = true;
        }
        let index = self.next_output_index;
        self.next_output_index = self.next_output_index.wrapping_add(1);
        self.outstanding_outputs.insert(index);
        Some(OutputSlot::new(index, data, info))
    }

    pub fn give_back(&mut self, slot: &OutputSlot) -> Result<()> {
        if !self.outstanding_outputs.remove(&slot.index()) {
            return Err(PipelineError::codec(&self.name, "unknown output slot released"));
        }
        Ok(())
    }

    /// Invalidate every lent slot and drop queued data
    pub fn reset(&mut self) {
        self.inputs = SlotPool::new(0, 0);
        self.outstanding_outputs.clear();
        self.ready.clear();
        self.pending.clear();
    }

    /// Slots currently owned by the caller
    pub fn outstanding(&self) -> usize {
        self.inputs.outstanding() + self.outstanding_outputs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Timestamp;

    #[test]
    fn test_backlog_blocks_inputs() {
        let mut exchange = SlotExchange::new("test");
        exchange.configure(4);
        for i in 0..OUTPUT_BACKLOG {
            exchange.produce(Bytes::new(), BufferInfo::sample(0, Timestamp::from_micros(i as i64)));
        }
        assert!(exchange.take_input().is_none());

        let out = exchange.next_output().unwrap();
        assert!(exchange.take_input().is_some());
        exchange.give_back(&out).unwrap();
        assert!(exchange.give_back(&out).is_err());
    }

    #[test]
    fn test_end_of_stream_flushes_pending() {
        let mut exchange = SlotExchange::new("test");
        exchange.configure(4);
        let mut slot = exchange.take_input().unwrap();
        slot.as_mut_slice()[..2].copy_from_slice(b"ab");
        assert!(exchange.accept(slot, 2, InputFlags::PARTIAL).unwrap().is_none());

        let mut slot = exchange.take_input().unwrap();
        slot.as_mut_slice()[..1].copy_from_slice(b"c");
        let payload = exchange.accept(slot, 1, InputFlags::END_OF_STREAM).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"abc");
        assert!(exchange.input_ended());
        assert!(exchange.take_input().is_none());
    }
}
