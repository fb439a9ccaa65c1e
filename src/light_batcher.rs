//! Light-sample batching, grounded in `survive_kalman_tracker`'s sync
//! buffering in `integrate_light`/`integrate_saved_light`. Holds samples
//! until a flush condition fires, then hands the batch to the caller (the
//! orchestrator, which stages it onto [`crate::measurement::light::LightModel`]
//! and runs a filter update).

use crate::measurement::light::LightSample;

pub struct LightBatcher {
    buffer: Vec<LightSample>,
    batch_size: usize,
    max_capacity: usize,
}

impl LightBatcher {
    pub fn new(batch_size: usize, max_capacity: usize) -> Self {
        Self { buffer: Vec::with_capacity(batch_size.min(max_capacity)), batch_size, max_capacity }
    }

    /// Pushes one sample. Returns `Some(batch)` — draining the buffer — if
    /// this push crossed `batch_size` or `max_capacity`.
    pub fn push(&mut self, sample: LightSample) -> Option<Vec<LightSample>> {
        self.buffer.push(sample);
        if self.buffer.len() >= self.batch_size || self.buffer.len() >= self.max_capacity {
            Some(self.drain())
        } else {
            None
        }
    }

    /// A SYNC packet arrived: flush whatever has accumulated, if anything.
    pub fn flush_on_sync(&mut self) -> Option<Vec<LightSample>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.drain())
        }
    }

    fn drain(&mut self) -> Vec<LightSample> {
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::light::{Axis, Generation};

    fn sample() -> LightSample {
        LightSample { lighthouse_id: 0, sensor_id: 0, generation: Generation::Gen1, axis: Axis::X, value: 0.0, timecode: 0.0 }
    }

    #[test]
    fn flushes_at_batch_size() {
        let mut batcher = LightBatcher::new(3, 100);
        assert!(batcher.push(sample()).is_none());
        assert!(batcher.push(sample()).is_none());
        let batch = batcher.push(sample()).expect("flush at batch size");
        assert_eq!(batch.len(), 3);
        assert!(batcher.is_empty());
    }

    #[test]
    fn flushes_at_max_capacity_before_batch_size() {
        let mut batcher = LightBatcher::new(100, 2);
        assert!(batcher.push(sample()).is_none());
        let batch = batcher.push(sample()).expect("flush at max capacity");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn sync_flush_drains_partial_buffer() {
        let mut batcher = LightBatcher::new(32, 100);
        batcher.push(sample());
        batcher.push(sample());
        let batch = batcher.flush_on_sync().expect("non-empty flush");
        assert_eq!(batch.len(), 2);
        assert!(batcher.flush_on_sync().is_none());
    }
}
