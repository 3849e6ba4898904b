//! Jitter buffer
//!
//! Frames are appended at the tail and drained from the head only. Silence
//! padding is appended like any other frame, so it keeps its place in line.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct JitterBuffer {
    frames: VecDeque<Vec<i16>>,
    target: usize,
}

impl JitterBuffer {
    pub fn new(target: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(target + 1),
            target,
        }
    }

    /// Frames currently queued
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// True until the queue holds one frame past the target depth
    pub fn wants_more(&self) -> bool {
        self.frames.len() <= self.target
    }

    pub fn push(&mut self, samples: Vec<i16>) {
        self.frames.push_back(samples);
    }

    /// Append zero frames until the target is exceeded; returns frames added
    pub fn pad_with_silence(&mut self, samples_per_frame: usize) -> usize {
        let mut added = 0;
        while self.wants_more() {
            self.frames.push_back(vec![0; samples_per_frame]);
            added += 1;
        }
        added
    }

    /// Dequeue up to `count` frames and concatenate them
    pub fn drain_chunk(&mut self, count: usize) -> Vec<i16> {
        let take = count.min(self.frames.len());
        let mut chunk = Vec::with_capacity(self.frames.iter().take(take).map(Vec::len).sum());
        for frame in self.frames.drain(..take) {
            chunk.extend_from_slice(&frame);
        }
        chunk
    }
}
