use std::collections::VecDeque;

use super::InputSlot;

/// Pool of fixed-capacity input slots.
///
/// All buffers are allocated up front; `take()` lends one out and `put()`
/// takes it back. Unlike a frame pool there is no fallback allocation: an
/// empty pool is the backpressure signal.
#[derive(Debug)]
pub struct SlotPool {
    free: VecDeque<(usize, Vec<u8>)>,
    slots: usize,
    capacity: usize,
}

impl SlotPool {
    pub fn new(slots: usize, capacity: usize) -> Self {
        let free = (0..slots).map(|index| (index, vec![0u8; capacity])).collect();
        Self {
            free,
            slots,
            capacity,
        }
    }

    /// Take a writable slot, if one is free
    #[inline]
    pub fn take(&mut self) -> Option<InputSlot> {
        self.free
            .pop_front()
            .map(|(index, data)| InputSlot::new(index, data))
    }

    /// Put a slot back after its contents were consumed.
    ///
    /// Returns `false` for a slot this pool never lent out.
    pub fn put(&mut self, slot: InputSlot) -> bool {
        let (index, mut data) = slot.into_parts();
        if index >= self.slots || self.free.iter().any(|(i, _)| *i == index) {
            return false;
        }
        data.resize(self.capacity, 0);
        self.free.push_back((index, data));
        true
    }

    /// Number of slots currently lent out
    pub fn outstanding(&self) -> usize {
        self.slots - self.free.len()
    }
}
