//! Audio playback
//!
//! Decodes `SND` frames, smooths network jitter and resamples from the
//! server's native rate to whatever the output device runs at. Playback uses
//! CPAL (Cross-Platform Audio Library).
//!
//! The audio layer is organized into:
//! - `frame`: `SND` frame decoding
//! - `jitter`: frame queue with silence padding
//! - `resample`: linear-interpolation rate conversion
//! - `player`: the pull-driven pipeline run from the device callback

mod frame;
mod jitter;
mod player;
mod resample;

pub use frame::AudioFrame;
pub use player::{AudioPlayer, FrameSource, UnderrunCounter};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, SampleFormat, SizedSample, StreamConfig, SupportedStreamConfigRange,
};
use tracing::{debug, error, warn};

/// Output device with the configuration chosen for playback
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

/// Information about an available audio output device
#[derive(Debug)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub max_channels: u16,
    /// Inclusive sample rate ranges, one per supported configuration
    pub rate_ranges: Vec<(u32, u32)>,
    /// Distinct sample formats in device order
    pub formats: Vec<SampleFormat>,
}

impl AudioDeviceInfo {
    fn from_configs(
        name: String,
        is_default: bool,
        configs: impl IntoIterator<Item = SupportedStreamConfigRange>,
    ) -> Self {
        let mut info = Self {
            name,
            is_default,
            max_channels: 0,
            rate_ranges: Vec::new(),
            formats: Vec::new(),
        };
        for config in configs {
            info.max_channels = info.max_channels.max(config.channels());
            let range = (config.min_sample_rate().0, config.max_sample_rate().0);
            if !info.rate_ranges.contains(&range) {
                info.rate_ranges.push(range);
            }
            if !info.formats.contains(&config.sample_format()) {
                info.formats.push(config.sample_format());
            }
        }
        info
    }

    /// Lowest and highest rate over all configurations
    pub fn rate_span(&self) -> Option<(u32, u32)> {
        let low = self.rate_ranges.iter().map(|r| r.0).min()?;
        let high = self.rate_ranges.iter().map(|r| r.1).max()?;
        Some((low, high))
    }

    /// True if some configuration runs at exactly `rate`
    pub fn supports_rate(&self, rate: u32) -> bool {
        self.rate_ranges.iter().any(|&(low, high)| (low..=high).contains(&rate))
    }
}

impl AudioOutput {
    /// Open the default output device near `target_sample_rate`
    pub fn new(target_sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device found"))?;

        let (config, sample_format) = Self::get_optimal_config(&device, target_sample_rate)?;
        debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?sample_format,
            "Selected output configuration"
        );

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// Pick a configuration that can run at the target rate, or the closest one
    fn get_optimal_config(
        device: &Device,
        target_sample_rate: u32,
    ) -> Result<(StreamConfig, SampleFormat)> {
        let supported_configs = device.supported_output_configs()?;

        let mut best_config: Option<(u32, SupportedStreamConfigRange)> = None;
        let mut best_diff = u32::MAX;

        for config in supported_configs {
            let rate = target_sample_rate
                .clamp(config.min_sample_rate().0, config.max_sample_rate().0);
            let diff = rate.abs_diff(target_sample_rate);
            // fewer channels wins a tie
            let better = match &best_config {
                Some((_, best)) if diff == best_diff => config.channels() < best.channels(),
                _ => diff < best_diff,
            };
            if better {
                best_diff = diff;
                best_config = Some((rate, config));
            }
        }

        let (rate, config) = best_config
            .ok_or_else(|| anyhow!("No suitable audio output configuration found"))?;

        let config = config.with_sample_rate(cpal::SampleRate(rate));
        let sample_format = config.sample_format();
        Ok((config.into(), sample_format))
    }

    /// Rate the device will actually run at
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Output devices with the rates, channel counts and formats they accept
    ///
    /// Devices whose capabilities cannot be queried are skipped.
    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        for device in host.output_devices()? {
            let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
            let configs = match device.supported_output_configs() {
                Ok(configs) => configs,
                Err(e) => {
                    warn!(device = %name, "Skipping device: {}", e);
                    continue;
                }
            };
            let is_default = default_name.as_deref() == Some(name.as_str());
            devices.push(AudioDeviceInfo::from_configs(name, is_default, configs));
        }

        Ok(devices)
    }

    /// Start playback; audio stops when the returned stream is dropped
    pub fn start<S>(&self, player: AudioPlayer<S>) -> Result<cpal::Stream>
    where
        S: FrameSource + Send + 'static,
    {
        let stream = match self.sample_format {
            SampleFormat::I16 => self.build_stream::<i16, S>(player)?,
            SampleFormat::U16 => self.build_stream::<u16, S>(player)?,
            SampleFormat::I32 => self.build_stream::<i32, S>(player)?,
            SampleFormat::F32 => self.build_stream::<f32, S>(player)?,
            other => return Err(anyhow!("Unsupported output sample format {:?}", other)),
        };
        stream.play()?;
        Ok(stream)
    }

    /// Build an output stream that pulls mono samples from the player and
    /// copies them to every device channel
    fn build_stream<T, S>(&self, mut player: AudioPlayer<S>) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<i16> + Send + 'static,
        S: FrameSource + Send + 'static,
    {
        let channels = self.config.channels.max(1) as usize;
        let mut mono: Vec<i16> = Vec::new();

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0);
                player.fill(&mut mono);
                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(cpal::Sample::from_sample(sample));
                }
            },
            |err| {
                error!("Audio output stream error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }
}
