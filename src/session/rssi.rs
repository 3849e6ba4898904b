//! Signal strength history

use std::collections::VecDeque;

/// Samples averaged into the smoothed reading
const SMOOTHING_WINDOW: usize = 5;

/// Fixed-length RSSI history, one sample per display tick
#[derive(Debug, Clone)]
pub struct RssiHistory {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl RssiHistory {
    /// History of `capacity` samples, pre-filled with `initial`
    pub fn new(capacity: usize, initial: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: std::iter::repeat_n(initial, capacity).collect(),
            capacity,
        }
    }

    pub fn push(&mut self, dbm: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(dbm);
    }

    /// Mean of the most recent samples
    pub fn smoothed(&self) -> f32 {
        let window = SMOOTHING_WINDOW.min(self.samples.len());
        self.samples.iter().rev().take(window).sum::<f32>() / window as f32
    }
}
