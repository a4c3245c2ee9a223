use std::{collections::VecDeque, num::NonZeroUsize};

/// The most recent output lines of an instance.
///
/// The buffer is bounded by its capacity: once full, pushing a line evicts the oldest one. A
/// buffer without a capacity keeps every line until it is cleared.
#[derive(Clone, Debug, Default)]
pub struct MessageBuffer {
    lines: VecDeque<String>,
    capacity: Option<NonZeroUsize>,
}

impl MessageBuffer {
    /// Creates a buffer holding at most `capacity` lines, `0` meaning unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: NonZeroUsize::new(capacity),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if let Some(capacity) = self.capacity {
            while self.lines.len() >= capacity.get() {
                self.lines.pop_front();
            }
        }
        self.lines.push_back(line.into());
    }

    /// A copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }
}
