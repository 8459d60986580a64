use crate::types::PositionSample;

/// Default number of fixes held for turn detection and averaging
pub const DEFAULT_CAPACITY: usize = 30;

/// Fixed-capacity ring of position samples.
///
/// Slots start out as zero samples. Once the write index wraps for the first
/// time the buffer is flagged full and stays full.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    slots: Vec<PositionSample>,
    index: usize,
    full: bool,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SampleBuffer {
            slots: vec![PositionSample::default(); capacity],
            index: 0,
            full: false,
        }
    }

    /// Write at the current position and advance, overwriting the oldest slot
    pub fn push(&mut self, sample: PositionSample) {
        self.slots[self.index] = sample;
        self.index = (self.index + 1) % self.slots.len();
        if self.index == 0 {
            self.full = true;
        }
    }

    /// Most recent `length` samples, oldest first.
    ///
    /// Before the first wrap this can include zero-valued initial slots.
    pub fn window(&self, length: usize) -> Vec<PositionSample> {
        let capacity = self.slots.len();
        let length = length.min(capacity);
        let start = (self.index + capacity - length) % capacity;
        (0..length)
            .map(|offset| self.slots[(start + offset) % capacity])
            .collect()
    }

    /// Every slot, in storage order
    pub fn all(&self) -> &[PositionSample] {
        &self.slots
    }

    /// The most recently written slot
    pub fn latest(&self) -> &PositionSample {
        let capacity = self.slots.len();
        &self.slots[(self.index + capacity - 1) % capacity]
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn write_index(&self) -> usize {
        self.index
    }

    /// Number of slots holding recorded samples
    pub fn len(&self) -> usize {
        if self.full {
            self.slots.len()
        } else {
            self.index
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
