//! Playback pipeline: incoming frames -> jitter buffer -> gain -> resampler
//!
//! The player is owned by the output device callback. Frames reach it through
//! a bounded channel filled by the network task, so nothing on the playback
//! path ever blocks on the socket.

use super::frame::AudioFrame;
use super::jitter::JitterBuffer;
use super::resample::Resampler;
use crate::config::RadioConfig;
use crate::session::SessionSnapshot;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Non-blocking source of raw `SND` frames
pub trait FrameSource {
    /// Next frame if one is ready, `None` otherwise
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

impl FrameSource for mpsc::Receiver<Vec<u8>> {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.try_recv().ok()
    }
}

impl FrameSource for VecDeque<Vec<u8>> {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.pop_front()
    }
}

/// Shared count of render cycles that needed silence padding
#[derive(Debug, Clone, Default)]
pub struct UnderrunCounter(Arc<AtomicU64>);

impl UnderrunCounter {
    pub fn record(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct AudioPlayer<S> {
    source: S,
    jitter: JitterBuffer,
    resampler: Resampler,
    samples_per_frame: usize,
    chunk_frames: usize,
    pending: VecDeque<i16>,
    snapshot: watch::Receiver<SessionSnapshot>,
    rssi: watch::Sender<f32>,
    underruns: UnderrunCounter,
}

impl<S: FrameSource> AudioPlayer<S> {
    pub fn new(
        config: &RadioConfig,
        sink_rate: u32,
        source: S,
        snapshot: watch::Receiver<SessionSnapshot>,
        rssi: watch::Sender<f32>,
    ) -> Self {
        Self {
            source,
            jitter: JitterBuffer::new(config.jitter_depth),
            resampler: Resampler::new(config.native_rate, sink_rate),
            samples_per_frame: config.samples_per_frame,
            chunk_frames: config.chunk_frames,
            pending: VecDeque::new(),
            snapshot,
            rssi,
            underruns: UnderrunCounter::default(),
        }
    }

    pub fn underruns(&self) -> UnderrunCounter {
        self.underruns.clone()
    }

    pub fn depth(&self) -> usize {
        self.jitter.depth()
    }

    /// Take one frame from the source, publishing its RSSI
    ///
    /// Returns `None` when no frame is ready or the frame does not decode.
    pub fn process_incoming(&mut self) -> Option<AudioFrame> {
        let raw = self.source.next_frame()?;
        match AudioFrame::decode(&raw) {
            Ok(frame) => {
                self.rssi.send_replace(frame.rssi_dbm);
                Some(frame)
            }
            Err(e) => {
                trace!(error = %e, "Dropping malformed audio frame");
                None
            }
        }
    }

    /// Pull frames until the buffer is one past its target or the source runs dry
    pub fn fill_target(&mut self) {
        while self.jitter.wants_more() {
            match self.process_incoming() {
                Some(frame) => self.jitter.push(frame.samples),
                None => break,
            }
        }
    }

    /// Exactly `frame_count` output samples
    pub fn pull(&mut self, frame_count: usize) -> Vec<i16> {
        let mut out = vec![0; frame_count];
        self.fill(&mut out);
        out
    }

    /// Fill `out` completely, padding with silence when starved
    pub fn fill(&mut self, out: &mut [i16]) {
        while self.pending.len() < out.len() {
            if self.render_chunk() == 0 {
                // nothing to resample, keep the device fed
                self.pending.resize(out.len(), 0);
            }
        }
        let n = out.len();
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
    }

    /// One refill/drain/resample cycle; returns samples produced
    fn render_chunk(&mut self) -> usize {
        let snapshot = *self.snapshot.borrow();

        self.fill_target();
        let padded = self.jitter.pad_with_silence(self.samples_per_frame);
        if padded > 0 {
            let total = self.underruns.record();
            debug!(padded, total, "Audio underrun, padded with silence");
        }

        let gain = snapshot.volume as f32 / 100.0;
        let scaled: Vec<f32> = self
            .jitter
            .drain_chunk(self.chunk_frames)
            .into_iter()
            .map(|s| s as f32 * gain)
            .collect();
        let resampled = self.resampler.process(&scaled);
        trace!(
            mode = %snapshot.tuning.mode,
            freq_khz = snapshot.tuning.freq_khz,
            samples = resampled.len(),
            depth = self.jitter.depth(),
            "Rendered audio chunk"
        );

        let produced = resampled.len();
        self.pending.extend(resampled);
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::{Mode, TuningState};

    fn config() -> RadioConfig {
        RadioConfig {
            samples_per_frame: 4,
            jitter_depth: 20,
            chunk_frames: 16,
            native_rate: 12000,
            ..RadioConfig::default()
        }
    }

    fn snapshot(volume: u8) -> SessionSnapshot {
        SessionSnapshot {
            tuning: TuningState::new(14060.0, 10, Mode::Cw),
            volume,
        }
    }

    fn frame(smeter: u16, samples: &[i16]) -> Vec<u8> {
        let mut data = b"SND".to_vec();
        data.extend_from_slice(&[0; 5]);
        data.extend_from_slice(&smeter.to_be_bytes());
        for s in samples {
            data.extend_from_slice(&s.to_be_bytes());
        }
        data
    }

    fn player(
        frames: VecDeque<Vec<u8>>,
        volume: u8,
        sink_rate: u32,
    ) -> (AudioPlayer<VecDeque<Vec<u8>>>, watch::Receiver<f32>) {
        let (_snapshot_tx, snapshot_rx) = watch::channel(snapshot(volume));
        let (rssi_tx, rssi_rx) = watch::channel(-127.0);
        let player = AudioPlayer::new(&config(), sink_rate, frames, snapshot_rx, rssi_tx);
        (player, rssi_rx)
    }

    #[test]
    fn test_depth_tracks_incoming_frames() {
        let frames: VecDeque<_> = (0..5).map(|_| frame(0, &[1; 4])).collect();
        let (mut player, _rssi) = player(frames, 100, 12000);
        player.fill_target();
        assert_eq!(player.depth(), 5);
    }

    #[test]
    fn test_fill_stops_one_past_target() {
        let frames: VecDeque<_> = (0..30).map(|_| frame(0, &[1; 4])).collect();
        let (mut player, _rssi) = player(frames, 100, 12000);
        player.fill_target();
        assert_eq!(player.depth(), 21);
    }

    #[test]
    fn test_underrun_returns_exact_silence() {
        let (mut player, _rssi) = player(VecDeque::new(), 100, 48000);
        let out = player.pull(1000);
        assert_eq!(out.len(), 1000);
        assert!(out.iter().all(|&s| s == 0));
        assert!(player.underruns().get() >= 1);
    }

    #[test]
    fn test_pull_plays_frames_in_order_at_unity_gain() {
        let frames: VecDeque<_> = (0..21)
            .map(|i| frame(0, &[i as i16 * 10; 4]))
            .collect();
        let (mut player, _rssi) = player(frames, 100, 12000);
        let out = player.pull(8);
        assert_eq!(out, vec![0, 0, 0, 0, 10, 10, 10, 10]);
        assert_eq!(player.underruns().get(), 0);
    }

    #[test]
    fn test_small_pulls_carry_pending_samples() {
        let frames: VecDeque<_> = (0..21)
            .map(|i| frame(0, &[i as i16 * 10; 4]))
            .collect();
        let (mut player, _rssi) = player(frames, 100, 12000);

        let mut out = [0i16; 3];
        player.fill(&mut out);
        assert_eq!(out, [0, 0, 0]);
        player.fill(&mut out);
        assert_eq!(out, [0, 10, 10]);
        assert_eq!(player.pending.len(), 16 * 4 - 6);
        assert_eq!(player.depth(), 5);
    }

    #[test]
    fn test_volume_scales_and_clamps() {
        let frames: VecDeque<_> = (0..21).map(|_| frame(0, &[30000, -100, 50, 0])).collect();
        let (mut player, _rssi) = player(frames, 150, 12000);
        let out = player.pull(4);
        assert_eq!(out, vec![i16::MAX, -150, 75, 0]);
    }

    #[test]
    fn test_muted_output_is_silent() {
        let frames: VecDeque<_> = (0..21).map(|_| frame(0, &[1234; 4])).collect();
        let (mut player, _rssi) = player(frames, 0, 12000);
        assert!(player.pull(16).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_output_is_resampled_to_sink_rate() {
        let frames: VecDeque<_> = (0..21).map(|_| frame(0, &[100; 4])).collect();
        let (mut player, _rssi) = player(frames, 100, 48000);
        // one cycle drains 16 frames of 4 samples, 4x upsampled
        player.pull(1);
        assert_eq!(player.pending.len(), 16 * 4 * 4 - 1);
    }

    #[test]
    fn test_rssi_published_from_frames() {
        let frames: VecDeque<_> = [frame(470, &[0; 4])].into_iter().collect();
        let (mut player, rssi) = player(frames, 100, 12000);
        assert!(player.process_incoming().is_some());
        assert!((*rssi.borrow() - -80.0).abs() < 1e-4);
    }

    #[test]
    fn test_malformed_frame_ends_fill() {
        let frames: VecDeque<_> = [frame(0, &[1; 4]), b"W/F".to_vec(), frame(0, &[1; 4])]
            .into_iter()
            .collect();
        let (mut player, _rssi) = player(frames, 100, 12000);
        player.fill_target();
        assert_eq!(player.depth(), 1);
    }

    #[tokio::test]
    async fn test_channel_source_is_non_blocking() {
        let (tx, rx) = mpsc::channel(4);
        let (_snapshot_tx, snapshot_rx) = watch::channel(snapshot(100));
        let (rssi_tx, _rssi_rx) = watch::channel(-127.0);
        let mut player = AudioPlayer::new(&config(), 12000, rx, snapshot_rx, rssi_tx);

        assert!(player.process_incoming().is_none());
        tx.send(frame(0, &[5; 4])).await.unwrap();
        assert_eq!(player.process_incoming().map(|f| f.samples), Some(vec![5; 4]));
    }
}
