//! Waterfall frame calibration
//!
//! Each `W/F` frame carries one byte per bin after a 16-byte header. Bytes are
//! converted to dBm, stretched to the interior dynamic range, clipped at
//! percentiles to compress the noise floor, rescaled to 0..=255 and finally
//! dimmed when the frame has little dynamic range so an empty band does not
//! look like a strong signal.

use super::buffer::SpectrumBuffer;
use crate::config::RadioConfig;
use crate::frame::{FrameError, WATERFALL_TAG, strip_header};

/// Bytes before the first bin
const HEADER_LEN: usize = 16;
/// Typical server calibration offset (dB)
const CAL_OFFSET_DB: f32 = 13.0;

/// Decodes waterfall frames into a [`SpectrumBuffer`]
#[derive(Debug)]
pub struct WaterfallDecoder {
    min_dyn_range_db: f32,
    clip_low_pct: f32,
    clip_high_pct: f32,
    buffer: SpectrumBuffer,
}

impl WaterfallDecoder {
    pub fn new(config: &RadioConfig) -> Self {
        Self {
            min_dyn_range_db: config.min_dyn_range_db,
            clip_low_pct: config.clip_low_pct,
            clip_high_pct: config.clip_high_pct,
            buffer: SpectrumBuffer::new(config.display_rows, config.bins),
        }
    }

    pub fn buffer(&self) -> &SpectrumBuffer {
        &self.buffer
    }

    /// Decode one frame and append it to the history
    ///
    /// `marker` replaces the row with full intensity so a retune shows up as
    /// a bright line. On error the buffer is left untouched.
    pub fn decode(&mut self, frame: &[u8], marker: bool) -> Result<(), FrameError> {
        let magnitudes = strip_header(frame, WATERFALL_TAG, HEADER_LEN)?;
        let bins = self.buffer.bins();
        if magnitudes.len() != bins {
            return Err(FrameError::BinCount {
                expected: bins,
                got: magnitudes.len(),
            });
        }
        if magnitudes.len() < 3 {
            return Err(FrameError::Truncated {
                len: frame.len(),
                needed: HEADER_LEN + 3,
            });
        }

        let row = if marker {
            vec![u8::MAX; bins]
        } else {
            self.calibrate(magnitudes)
        };
        self.buffer.push_row(&row);
        Ok(())
    }

    /// Map raw magnitudes to display intensities
    pub fn calibrate(&self, magnitudes: &[u8]) -> Vec<u8> {
        let db: Vec<f32> = magnitudes
            .iter()
            .map(|&raw| raw_to_dbm(raw))
            .collect();

        let (db_min, db_max) = interior_bounds(&db);
        let dyn_range = db_max - db_min;

        // 0..1 over the interior
        let mut row: Vec<f32> = db.iter().map(|v| v - db_min).collect();
        let (_, peak) = interior_bounds(&row);
        scale(&mut row, peak, 1.0);

        let low = percentile(&row, self.clip_low_pct);
        let high = percentile(&row, self.clip_high_pct);
        for v in row.iter_mut() {
            *v = v.clamp(low, high);
        }

        // back to 0..255
        let (floor, _) = interior_bounds(&row);
        for v in row.iter_mut() {
            *v -= floor;
        }
        let (_, peak) = interior_bounds(&row);
        scale(&mut row, peak, 255.0);

        let dim = dyn_range.min(self.min_dyn_range_db) / self.min_dyn_range_db;
        row.iter()
            .map(|v| (v * dim).round().clamp(0.0, 255.0) as u8)
            .collect()
    }
}

/// Convert a raw bin magnitude to calibrated dBm
pub fn raw_to_dbm(raw: u8) -> f32 {
    -(255.0 - raw as f32) - CAL_OFFSET_DB
}

/// Min and max ignoring the first and last bin, which carry edge artifacts
fn interior_bounds(values: &[f32]) -> (f32, f32) {
    let interior = if values.len() > 2 {
        &values[1..values.len() - 1]
    } else {
        values
    };
    interior
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Scale so that `peak` maps to `target`; a flat row stays at zero
fn scale(values: &mut [f32], peak: f32, target: f32) {
    if peak > 0.0 {
        let factor = target / peak;
        for v in values.iter_mut() {
            *v *= factor;
        }
    } else {
        values.fill(0.0);
    }
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bins: usize, rows: usize) -> RadioConfig {
        RadioConfig {
            bins,
            display_rows: rows,
            ..RadioConfig::default()
        }
    }

    fn frame(magnitudes: &[u8]) -> Vec<u8> {
        let mut data = b"W/F".to_vec();
        data.extend_from_slice(&[0; HEADER_LEN - 3]);
        data.extend_from_slice(magnitudes);
        data
    }

    #[test]
    fn test_raw_to_dbm() {
        assert_eq!(raw_to_dbm(200), -68.0);
        assert_eq!(raw_to_dbm(0), -268.0);
        assert_eq!(raw_to_dbm(255), -13.0);
    }

    #[test]
    fn test_flat_frame_is_fully_dimmed() {
        // 200 -> -(255 - 200) - 13 = -68 dBm everywhere, zero range
        let mut decoder = WaterfallDecoder::new(&config(1024, 4));
        decoder.decode(&frame(&[200; 1024]), false).unwrap();
        assert!(decoder.buffer().newest().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_strong_peak_reaches_full_scale() {
        let mut magnitudes = vec![100u8; 1024];
        magnitudes[500] = 240;
        let decoder = WaterfallDecoder::new(&config(1024, 4));
        let row = decoder.calibrate(&magnitudes);
        assert_eq!(row[500], 255);
        assert_eq!(row[10], 0);
    }

    #[test]
    fn test_weak_peak_is_attenuated() {
        // 30 dB range against a 70 dB minimum
        let mut magnitudes = vec![100u8; 1024];
        magnitudes[500] = 130;
        let decoder = WaterfallDecoder::new(&config(1024, 4));
        let row = decoder.calibrate(&magnitudes);
        assert_eq!(row[500], (255.0f32 * 30.0 / 70.0).round() as u8);
    }

    #[test]
    fn test_edge_bins_ignored_for_range() {
        let mut magnitudes = vec![100u8; 16];
        magnitudes[0] = 255;
        magnitudes[15] = 0;
        let decoder = WaterfallDecoder::new(&config(16, 4));
        let row = decoder.calibrate(&magnitudes);
        // interior is flat, so the whole row is dimmed to zero
        assert!(row.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_marker_row() {
        let mut decoder = WaterfallDecoder::new(&config(8, 2));
        decoder.decode(&frame(&[10; 8]), true).unwrap();
        assert_eq!(decoder.buffer().newest(), &[255; 8]);
    }

    #[test]
    fn test_malformed_frames_leave_buffer_unchanged() {
        let mut decoder = WaterfallDecoder::new(&config(8, 2));
        decoder.decode(&frame(&[10; 8]), true).unwrap();
        let before = decoder.buffer().clone();

        assert!(matches!(
            decoder.decode(b"SND\x00\x00", false),
            Err(FrameError::UnexpectedTag(_))
        ));
        assert_eq!(
            decoder.decode(&frame(&[10; 7]), false),
            Err(FrameError::BinCount { expected: 8, got: 7 })
        );
        assert!(matches!(
            decoder.decode(b"W/F\x00\x00", false),
            Err(FrameError::Truncated { .. })
        ));
        assert_eq!(decoder.buffer(), &before);
    }

    #[test]
    fn test_rows_scroll() {
        let mut decoder = WaterfallDecoder::new(&config(8, 3));
        decoder.decode(&frame(&[10; 8]), true).unwrap();
        decoder.decode(&frame(&[10; 8]), false).unwrap();
        assert_eq!(decoder.buffer().row(1), Some(&[255; 8][..]));
        assert_eq!(decoder.buffer().row(2), Some(&[0; 8][..]));
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 40.0) - 2.6).abs() < 1e-6);
    }
}
