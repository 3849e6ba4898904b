//! Receiver configuration
//!
//! Every protocol and buffering constant lives in [`RadioConfig`] so a server
//! with a different frequency range or audio rate can be targeted from a TOML
//! file without rebuilding. Configuration is only ever read, never written.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Server-side AGC parameters sent on the audio channel at connect
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgcConfig {
    pub on: bool,
    pub hang: bool,
    /// Threshold in dBm
    pub thresh: i32,
    pub slope: i32,
    /// Decay time constant in ms
    pub decay: i32,
    /// Manual gain (0..=100), used when AGC is off
    pub man_gain: i32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            on: true,
            hang: false,
            thresh: -75,
            slope: 6,
            decay: 4000,
            man_gain: 50,
        }
    }
}

/// Protocol, display and audio buffering constants
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RadioConfig {
    /// Highest tunable frequency (kHz)
    pub max_freq_khz: f64,
    /// Deepest zoom level the server accepts
    pub max_zoom: u8,
    /// Waterfall bins per spectrum row
    pub bins: usize,
    /// Rows of waterfall history
    pub display_rows: usize,
    /// Server audio sample rate (Hz)
    pub native_rate: u32,
    /// Audio device sample rate (Hz)
    pub sink_rate: u32,
    /// Samples in one server audio frame, used for synthetic silence
    pub samples_per_frame: usize,
    /// Jitter buffer target depth (frames)
    pub jitter_depth: usize,
    /// Frames consumed per resampling pass
    pub chunk_frames: usize,
    /// Dynamic range (dB) below which waterfall rows are dimmed
    pub min_dyn_range_db: f32,
    /// Lower clip percentile for waterfall intensity
    pub clip_low_pct: f32,
    /// Upper clip percentile for waterfall intensity
    pub clip_high_pct: f32,
    /// Auto mode switches to USB at or above this frequency (kHz)
    pub auto_mode_threshold_khz: f64,
    /// Display ticks per second
    pub display_fps: u32,
    /// Chance per tick of sending a keepalive on both channels
    pub keepalive_probability: f64,
    /// Longest wait for one spectrum frame per tick (ms)
    pub frame_timeout_ms: u64,
    /// Name announced to the server
    pub ident_user: String,
    pub agc: AgcConfig,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            max_freq_khz: 30000.0,
            max_zoom: 14,
            bins: 1024,
            display_rows: 400,
            native_rate: 12000,
            sink_rate: 48000,
            samples_per_frame: 512,
            jitter_depth: 20,
            chunk_frames: 16,
            min_dyn_range_db: 70.0,
            clip_low_pct: 40.0,
            clip_high_pct: 100.0,
            auto_mode_threshold_khz: 10000.0,
            display_fps: 30,
            keepalive_probability: 0.05,
            frame_timeout_ms: 1000,
            ident_user: "kiwirx".to_string(),
            agc: AgcConfig::default(),
        }
    }
}

impl RadioConfig {
    /// Load configuration from an explicit path, the user config directory,
    /// or fall back to defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Time between display ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.display_fps.max(1) as f64)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

/// `<config dir>/kiwirx/config.toml`, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("kiwirx").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_server() {
        let config = RadioConfig::default();
        assert_eq!(config.max_freq_khz, 30000.0);
        assert_eq!(config.max_zoom, 14);
        assert_eq!(config.bins, 1024);
        assert_eq!(config.native_rate, 12000);
        assert_eq!(config.sink_rate, 48000);
        assert_eq!(config.jitter_depth, 20);
        assert_eq!(config.chunk_frames, 16);
        assert_eq!(config.min_dyn_range_db, 70.0);
        assert_eq!((config.clip_low_pct, config.clip_high_pct), (40.0, 100.0));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RadioConfig::from_toml(
            r#"
            max_freq_khz = 32000.0
            sink_rate = 44100

            [agc]
            on = false
            man_gain = 80
            "#,
        )
        .unwrap();

        assert_eq!(config.max_freq_khz, 32000.0);
        assert_eq!(config.sink_rate, 44100);
        assert_eq!(config.bins, 1024);
        assert!(!config.agc.on);
        assert_eq!(config.agc.man_gain, 80);
        assert_eq!(config.agc.thresh, -75);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(RadioConfig::from_toml("bins = \"many\"").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_read_error() {
        let err = RadioConfig::load(Some(Path::new("/nonexistent/kiwirx.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_tick_interval() {
        let config = RadioConfig::default();
        let interval = config.tick_interval();
        assert!((interval.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }
}
