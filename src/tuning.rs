//! Frequency, zoom and passband math
//!
//! Pure functions mapping a center frequency and zoom level to the waterfall
//! window the server displays, plus the demodulation mode and passband rules.
//! Nothing here performs I/O.

use crate::config::RadioConfig;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Largest passband adjustment in either direction (Hz)
pub const MAX_PASSBAND_DELTA: i32 = 3000;

/// Offset applied to a clicked frequency in CW so the tone lands in the passband (kHz)
pub const CW_CLICK_OFFSET_KHZ: f64 = 0.5;

/// Demodulation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Usb,
    Lsb,
    Cw,
    Am,
}

impl Mode {
    /// Mode chosen by auto mode: LSB below the threshold, USB at or above it
    pub fn auto_for(freq_khz: f64, threshold_khz: f64) -> Self {
        if freq_khz < threshold_khz {
            Mode::Lsb
        } else {
            Mode::Usb
        }
    }

    /// Lowercase name used in `SET mod=` commands
    pub fn as_command(&self) -> &'static str {
        match self {
            Mode::Usb => "usb",
            Mode::Lsb => "lsb",
            Mode::Cw => "cw",
            Mode::Am => "am",
        }
    }

    /// Uppercase name used by rig control
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Usb => "USB",
            Mode::Lsb => "LSB",
            Mode::Cw => "CW",
            Mode::Am => "AM",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USB" => Ok(Mode::Usb),
            "LSB" => Ok(Mode::Lsb),
            "CW" | "CWR" => Ok(Mode::Cw),
            "AM" => Ok(Mode::Am),
            other => Err(format!("unsupported mode '{}'", other)),
        }
    }
}

/// Low/high audio cutoffs relative to the carrier (Hz)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Passband {
    pub low: i32,
    pub high: i32,
}

impl Passband {
    pub fn derive(mode: Mode, delta_low: i32, delta_high: i32) -> Self {
        match mode {
            Mode::Usb => Passband {
                low: 30 + delta_low,
                high: 3000 + delta_high,
            },
            Mode::Lsb => Passband {
                low: -(3000 + delta_high),
                high: -(30 + delta_low),
            },
            Mode::Cw => Passband {
                low: 300 + delta_low,
                high: 800 + delta_high,
            },
            Mode::Am => Passband {
                low: -(6000 + delta_high),
                high: 6000 + delta_high,
            },
        }
    }

    /// Filter width in Hz
    pub fn width(&self) -> i32 {
        self.high - self.low
    }
}

/// Clamp a passband adjustment to +/- `MAX_PASSBAND_DELTA`
pub fn clamp_delta(delta: i32) -> i32 {
    delta.clamp(-MAX_PASSBAND_DELTA, MAX_PASSBAND_DELTA)
}

/// Authoritative receiver tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningState {
    /// Center frequency (kHz)
    pub freq_khz: f64,
    pub zoom: u8,
    pub mode: Mode,
    /// User adjustment of the low passband edge (Hz)
    pub delta_low: i32,
    /// User adjustment of the high passband edge (Hz)
    pub delta_high: i32,
}

impl TuningState {
    pub fn new(freq_khz: f64, zoom: u8, mode: Mode) -> Self {
        Self {
            freq_khz,
            zoom,
            mode,
            delta_low: 0,
            delta_high: 0,
        }
    }

    pub fn passband(&self) -> Passband {
        Passband::derive(self.mode, self.delta_low, self.delta_high)
    }
}

/// Where the server will actually place the waterfall window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPlacement {
    /// Corrected center frequency (kHz)
    pub center_khz: f64,
    /// Discretized start position sent in `SET zoom=.. start=..`
    pub counter: u64,
    /// Start frequency the counter really selects (kHz)
    pub start_khz: f64,
}

/// Coordinate math for one server's frequency range and bin count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningMath {
    max_freq: f64,
    max_zoom: u8,
    bins: f64,
}

impl TuningMath {
    pub fn new(max_freq_khz: f64, max_zoom: u8, bins: usize) -> Self {
        Self {
            max_freq: max_freq_khz,
            max_zoom,
            bins: bins as f64,
        }
    }

    pub fn from_config(config: &RadioConfig) -> Self {
        Self::new(config.max_freq_khz, config.max_zoom, config.bins)
    }

    /// Clamp a zoom level into `0..=max_zoom`
    pub fn clamp_zoom(&self, zoom: i32) -> u8 {
        zoom.clamp(0, self.max_zoom as i32) as u8
    }

    /// Visible span (kHz) at `zoom`
    pub fn span(&self, zoom: u8) -> f64 {
        self.max_freq / 2f64.powi(zoom.min(self.max_zoom) as i32)
    }

    pub fn start_freq(&self, freq: f64, zoom: u8) -> f64 {
        freq - self.span(zoom) / 2.0
    }

    pub fn end_freq(&self, freq: f64, zoom: u8) -> f64 {
        freq + self.span(zoom) / 2.0
    }

    /// Discretize a start frequency to the server's counter and return the
    /// start frequency that counter really selects
    pub fn start_to_counter(&self, start_khz: f64) -> (u64, f64) {
        let scale = 2f64.powi(self.max_zoom as i32) * self.bins;
        let start = start_khz.clamp(0.0, self.max_freq);
        let counter = (start / self.max_freq * scale).round();
        (counter as u64, counter * self.max_freq / scale)
    }

    /// Display column of a frequency offset from the center
    pub fn offset_to_bin(&self, _freq: f64, offset_khz: f64, zoom: u8) -> f64 {
        let span = self.span(zoom);
        self.bins / span * (offset_khz + span / 2.0)
    }

    /// Frequency offset from the center at a display column
    pub fn bin_to_offset_khz(&self, _freq: f64, bin: f64, zoom: u8) -> f64 {
        let span = self.span(zoom);
        bin * span / self.bins - span / 2.0
    }

    /// Absolute frequency (kHz) at a display column
    pub fn bin_to_khz(&self, freq: f64, bin: f64, zoom: u8) -> f64 {
        freq + self.bin_to_offset_khz(freq, bin, zoom)
    }

    /// Correct a requested center so the window fits the server range and
    /// compute the counter to send
    pub fn clamp_and_set(&self, requested_khz: f64, zoom: u8) -> WindowPlacement {
        let zoom = zoom.min(self.max_zoom);
        let mut freq = requested_khz;

        if zoom == 0 {
            freq = self.max_freq / 2.0;
        } else {
            let start = self.start_freq(freq, zoom);
            let end = self.end_freq(freq, zoom);
            if start < 0.0 {
                freq -= start;
            }
            if end > self.max_freq {
                freq -= end - self.max_freq;
            }
        }

        let (mut counter, mut start_khz) = self.start_to_counter(self.start_freq(freq, zoom));
        if zoom > 0 && start_khz <= 0.0 {
            freq = self.span(zoom);
            (counter, start_khz) = self.start_to_counter(self.start_freq(freq, zoom));
        }

        WindowPlacement {
            center_khz: freq,
            counter,
            start_khz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math() -> TuningMath {
        TuningMath::new(30000.0, 14, 1024)
    }

    #[test]
    fn test_span_halves_per_zoom_level() {
        let math = math();
        for zoom in 0..=14u8 {
            assert_eq!(math.span(zoom), 30000.0 / 2f64.powi(zoom as i32));
            if zoom > 0 {
                assert!(math.span(zoom) < math.span(zoom - 1));
            }
        }
    }

    #[test]
    fn test_window_brackets_center() {
        let math = math();
        for zoom in 0..=14u8 {
            for freq in [100.0, 7074.0, 14060.0, 29000.0] {
                let start = math.start_freq(freq, zoom);
                let end = math.end_freq(freq, zoom);
                assert!(start <= freq && freq <= end);
                assert!((end - start - math.span(zoom)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_bin_offset_roundtrip() {
        let math = math();
        let freq = 14060.0;
        for zoom in [1u8, 6, 10, 14] {
            let half = math.span(zoom) / 2.0;
            for x in [-half, -half / 3.0, 0.0, half / 7.0, half * 0.99] {
                let bin = math.offset_to_bin(freq, x, zoom);
                assert!((math.bin_to_offset_khz(freq, bin, zoom) - x).abs() < 1e-6);
                assert!((math.bin_to_khz(freq, bin, zoom) - (freq + x)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_center_maps_to_middle_column() {
        let math = math();
        assert!((math.offset_to_bin(14060.0, 0.0, 10) - 512.0).abs() < 1e-9);
        assert!((math.bin_to_khz(14060.0, 0.0, 10) - math.start_freq(14060.0, 10)).abs() < 1e-9);
    }

    #[test]
    fn test_counter_is_idempotent() {
        let math = math();
        for start in [0.0, 1.0, 123.456, 7000.1, 14059.0, 29999.99] {
            let (counter, actual) = math.start_to_counter(start);
            let (again, actual_again) = math.start_to_counter(actual);
            assert_eq!(counter, again);
            assert_eq!(actual, actual_again);
        }
    }

    #[test]
    fn test_counter_value() {
        let math = math();
        // 15000 kHz is half the range: half of 2^14 * 1024
        assert_eq!(math.start_to_counter(15000.0), (8_388_608, 15000.0));
    }

    #[test]
    fn test_clamp_and_set_stays_in_range() {
        let math = math();
        for zoom in 0..=14u8 {
            for freq in [-5000.0, 0.0, 10.0, 1000.0, 14060.0, 29990.0, 30000.0, 45000.0] {
                let placement = math.clamp_and_set(freq, zoom);
                let start = math.start_freq(placement.center_khz, zoom);
                let end = math.end_freq(placement.center_khz, zoom);
                assert!(start >= -1e-9, "zoom {} freq {} start {}", zoom, freq, start);
                assert!(end <= 30000.0 + 1e-9, "zoom {} freq {} end {}", zoom, freq, end);
            }
        }
    }

    #[test]
    fn test_zoom_zero_forces_center() {
        let placement = math().clamp_and_set(7100.0, 0);
        assert_eq!(placement.center_khz, 15000.0);
        assert_eq!(placement.counter, 0);
    }

    #[test]
    fn test_shift_not_shrink_at_top_edge() {
        let math = math();
        let placement = math.clamp_and_set(29900.0, 4);
        let span = math.span(4);
        assert!((placement.center_khz - (30000.0 - span / 2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_start_resets_to_one_span() {
        let math = math();
        let placement = math.clamp_and_set(1.0, 6);
        assert_eq!(placement.center_khz, math.span(6));
        assert!(placement.start_khz > 0.0);
    }

    #[test]
    fn test_interior_frequency_unchanged() {
        let placement = math().clamp_and_set(14060.0, 10);
        assert_eq!(placement.center_khz, 14060.0);
    }

    #[test]
    fn test_passbands() {
        assert_eq!(Passband::derive(Mode::Usb, 0, 0), Passband { low: 30, high: 3000 });
        assert_eq!(Passband::derive(Mode::Lsb, 0, 0), Passband { low: -3000, high: -30 });
        assert_eq!(Passband::derive(Mode::Am, 0, 500), Passband { low: -6500, high: 6500 });
        assert_eq!(Passband::derive(Mode::Cw, -100, 200), Passband { low: 200, high: 1000 });
    }

    #[test]
    fn test_delta_clamp_is_symmetric() {
        assert_eq!(clamp_delta(3100), 3000);
        assert_eq!(clamp_delta(-3100), -3000);
        assert_eq!(clamp_delta(-200), -200);
    }

    #[test]
    fn test_auto_mode_boundary() {
        assert_eq!(Mode::auto_for(9999.0, 10000.0), Mode::Lsb);
        assert_eq!(Mode::auto_for(10000.0, 10000.0), Mode::Usb);
        assert_eq!(Mode::auto_for(10001.0, 10000.0), Mode::Usb);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("usb".parse::<Mode>(), Ok(Mode::Usb));
        assert_eq!("LSB\n".parse::<Mode>(), Ok(Mode::Lsb));
        assert!("FM".parse::<Mode>().is_err());
    }
}
