use crate::prelude::StageError;

/// Simple scoped buffer pool that prevents unbounded allocations.
pub struct BufferPool<T> {
    buffers: Vec<Vec<T>>,
    max_capacity: usize,
    outstanding: usize,
}

impl<T: Clone + Default> BufferPool<T> {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_capacity),
            max_capacity,
            outstanding: 0,
        }
    }

    /// Hands out a zeroed buffer, reusing a released one when available.
    pub fn checkout(&mut self, length: usize) -> Result<Vec<T>, StageError> {
        if let Some(mut buffer) = self.buffers.pop() {
            buffer.clear();
            buffer.resize(length, T::default());
            self.outstanding += 1;
            Ok(buffer)
        } else if self.outstanding < self.max_capacity {
            self.outstanding += 1;
            Ok(vec![T::default(); length])
        } else {
            Err(StageError::BufferExhaustion("pool depleted".to_string()))
        }
    }

    /// Returns a buffer back to the pool for reuse.
    pub fn release(&mut self, buffer: Vec<T>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.buffers.len() < self.max_capacity {
            self.buffers.push(buffer);
        }
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
        self.outstanding = 0;
    }
}
