//! Session orchestration
//!
//! The [`Orchestrator`] is the only owner of the tuning state. It turns
//! intents into correctly paired commands for the two channels, keeps the
//! rig in step, and publishes a [`SessionSnapshot`] for the audio path.
//!
//! The session layer is organized into:
//! - `intent`: user requests and their line-command syntax
//! - `rssi`: smoothed signal strength history
//! - `driver`: the display-rate tick loop and presenters

mod driver;
mod intent;
mod rssi;

pub use driver::{DisplayFrame, Driver, Presenter, SpectrumSource, StatusFormat, StatusPresenter};
pub use intent::{IntentError, TuningIntent};
pub use rssi::RssiHistory;

use crate::channel::{
    Command, CommandSink, audio_init_commands, initialize_session, waterfall_init_commands,
};
use crate::config::RadioConfig;
use crate::rig::{RigReading, RigRequest, khz_to_hz};
use crate::tuning::{CW_CLICK_OFFSET_KHZ, Mode, TuningMath, TuningState, clamp_delta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

/// Highest volume step (percent)
pub const MAX_VOLUME: u8 = 150;
/// Volume restored when unmuting (percent)
pub const UNMUTED_VOLUME: u8 = 100;
/// Retunes below this are not mirrored to the rig (kHz)
const RIG_MIRROR_MIN_KHZ: f64 = 100.0;

/// State the audio path needs, copied once per pull
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub tuning: TuningState,
    /// Output gain in percent
    pub volume: u8,
}

/// Random keepalive timing
pub struct KeepaliveSchedule {
    probability: f64,
    rng: StdRng,
}

impl KeepaliveSchedule {
    pub fn new(probability: f64) -> Self {
        Self::from_rng(probability, StdRng::from_entropy())
    }

    /// Deterministic schedule for tests
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self::from_rng(probability, StdRng::seed_from_u64(seed))
    }

    fn from_rng(probability: f64, rng: StdRng) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn due(&mut self) -> bool {
        self.rng.gen_bool(self.probability)
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// The next spectrum row should be drawn as a retune marker
    pub marker: bool,
    pub quit: bool,
}

pub struct Orchestrator<S> {
    config: RadioConfig,
    math: TuningMath,
    waterfall: S,
    audio: Option<S>,
    state: TuningState,
    auto_mode: bool,
    volume: u8,
    rig_attached: bool,
    rig_requests: Vec<RigRequest>,
    last_rig: Option<RigReading>,
    keepalive: KeepaliveSchedule,
    rssi: RssiHistory,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<S: CommandSink> Orchestrator<S> {
    /// `audio` is `None` when the client runs without sound
    pub fn new(
        config: &RadioConfig,
        waterfall: S,
        audio: Option<S>,
        initial: TuningState,
        volume: u8,
    ) -> Self {
        let volume = volume.min(MAX_VOLUME);
        let (snapshot, _) = watch::channel(SessionSnapshot {
            tuning: initial,
            volume,
        });

        Self {
            config: config.clone(),
            math: TuningMath::from_config(config),
            waterfall,
            audio,
            state: initial,
            auto_mode: true,
            volume,
            rig_attached: false,
            rig_requests: Vec::new(),
            last_rig: None,
            keepalive: KeepaliveSchedule::new(config.keepalive_probability),
            rssi: RssiHistory::new(config.jitter_depth * 2, -127.0),
            snapshot,
        }
    }

    /// Forward mode requests and retunes to a rig instead of applying
    /// modes locally
    pub fn with_rig(mut self) -> Self {
        self.rig_attached = true;
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveSchedule) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn state(&self) -> TuningState {
        self.state
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn math(&self) -> &TuningMath {
        &self.math
    }

    pub fn rssi(&self) -> &RssiHistory {
        &self.rssi
    }

    /// Record the latest signal strength from the audio path
    pub fn observe_rssi(&mut self, dbm: f32) {
        self.rssi.push(dbm);
    }

    /// Send both connect sequences for the current tuning
    pub fn start(&mut self, password: &str) {
        let placement = self.math.clamp_and_set(self.state.freq_khz, self.state.zoom);
        self.state.freq_khz = placement.center_khz;
        info!(
            freq_khz = placement.center_khz,
            start_khz = placement.start_khz,
            zoom = self.state.zoom,
            mode = %self.state.mode,
            "Starting session"
        );

        initialize_session(
            &self.waterfall,
            &waterfall_init_commands(password, self.state.zoom, placement.counter),
        );
        if let Some(audio) = &self.audio {
            initialize_session(
                audio,
                &audio_init_commands(
                    &self.config,
                    password,
                    self.state.mode,
                    self.state.passband(),
                    self.state.freq_khz,
                ),
            );
        }
        self.publish();
    }

    /// Apply one tick worth of intents
    ///
    /// Auto mode is evaluated against the frequency in effect at the start of
    /// the tick, before any intent. A retune or zoom change sends the window
    /// and the audio tuning together; a mode or passband change only resends
    /// the audio tuning.
    pub fn tick<I>(&mut self, intents: I) -> TickOutcome
    where
        I: IntoIterator<Item = TuningIntent>,
    {
        let mut audio_changed = false;
        let mut zoom_changed = false;
        let mut retune: Option<f64> = None;
        let mut quit = false;

        if self.auto_mode {
            let wanted = Mode::auto_for(self.state.freq_khz, self.config.auto_mode_threshold_khz);
            if wanted != self.state.mode {
                debug!(mode = %wanted, "Auto mode switch");
                audio_changed |= self.request_mode(wanted);
            }
        }

        for intent in intents {
            match intent {
                TuningIntent::Tune(khz) => retune = Some(khz),
                TuningIntent::Step(delta) => {
                    let target = retune.unwrap_or(self.state.freq_khz) + delta;
                    retune = Some(if self.state.mode == Mode::Cw {
                        target
                    } else {
                        target.round()
                    });
                }
                TuningIntent::Zoom(delta) => {
                    let zoom = (self.state.zoom as i32).saturating_add(delta);
                    let zoom = self.math.clamp_zoom(zoom);
                    if zoom != self.state.zoom {
                        self.state.zoom = zoom;
                        zoom_changed = true;
                    }
                }
                TuningIntent::SetMode(mode) => {
                    self.auto_mode = false;
                    audio_changed |= self.request_mode(mode);
                }
                TuningIntent::LowCut(delta) => {
                    let delta_low = clamp_delta(self.state.delta_low.saturating_add(delta));
                    audio_changed |= delta_low != self.state.delta_low;
                    self.state.delta_low = delta_low;
                }
                TuningIntent::HighCut(delta) => {
                    let delta_high = clamp_delta(self.state.delta_high.saturating_add(delta));
                    audio_changed |= delta_high != self.state.delta_high;
                    self.state.delta_high = delta_high;
                }
                TuningIntent::ResetPassband => {
                    audio_changed |= self.state.delta_low != 0 || self.state.delta_high != 0;
                    self.state.delta_low = 0;
                    self.state.delta_high = 0;
                }
                TuningIntent::ToggleAutoMode => {
                    self.auto_mode = !self.auto_mode;
                    info!(auto_mode = self.auto_mode, "Auto mode toggled");
                    retune = Some(retune.unwrap_or(self.state.freq_khz));
                }
                TuningIntent::Volume(delta) => {
                    self.volume = (self.volume as i32)
                        .saturating_add(delta)
                        .clamp(0, MAX_VOLUME as i32) as u8;
                }
                TuningIntent::ToggleMute => {
                    self.volume = if self.volume > 0 { 0 } else { UNMUTED_VOLUME };
                }
                TuningIntent::ClickBin(bin) => {
                    let mut center = retune.unwrap_or(self.state.freq_khz);
                    if self.state.mode == Mode::Cw {
                        center -= CW_CLICK_OFFSET_KHZ;
                    }
                    retune = Some(self.math.bin_to_khz(center, bin, self.state.zoom));
                }
                TuningIntent::Quit => quit = true,
            }
        }

        let marker = retune.is_some() || zoom_changed;
        if marker {
            let requested = retune.unwrap_or(self.state.freq_khz);
            self.set_window(requested, true);
            self.send_tuning();
        } else if audio_changed {
            self.send_tuning();
        }

        if self.keepalive.due() {
            self.waterfall.send_command(&Command::Keepalive);
            if let Some(audio) = &self.audio {
                audio.send_command(&Command::Keepalive);
            }
        }

        self.publish();
        TickOutcome { marker, quit }
    }

    /// Adopt what the rig reports, reissuing commands on any mismatch
    ///
    /// A reading identical to the last one adopted is ignored, so a rig
    /// frequency the window cannot center on is followed once.
    pub fn reconcile_rig(&mut self, reading: RigReading) {
        if self.last_rig == Some(reading) {
            return;
        }
        self.last_rig = Some(reading);
        let mut changed = false;

        if reading.mode != self.state.mode {
            debug!(mode = %reading.mode, "Adopting rig mode");
            self.state.mode = reading.mode;
            changed = true;
        }

        if reading.freq_hz != khz_to_hz(self.state.freq_khz) {
            debug!(freq_khz = reading.freq_khz(), "Following rig frequency");
            // mirror only when the window had to move the center
            self.set_window(reading.freq_khz(), false);
            if khz_to_hz(self.state.freq_khz) != reading.freq_hz {
                self.mirror_frequency();
            }
            changed = true;
        }

        if changed {
            self.send_tuning();
            self.publish();
        }
    }

    /// Requests queued for the rig since the last call
    pub fn take_rig_requests(&mut self) -> Vec<RigRequest> {
        std::mem::take(&mut self.rig_requests)
    }

    /// Apply a mode locally, or queue it for the rig; true if the local
    /// mode changed
    fn request_mode(&mut self, mode: Mode) -> bool {
        if self.rig_attached {
            self.rig_requests.push(RigRequest::SetMode(mode));
            false
        } else if mode != self.state.mode {
            self.state.mode = mode;
            true
        } else {
            false
        }
    }

    /// Fit the window around `requested_khz` and send it on the spectrum channel
    fn set_window(&mut self, requested_khz: f64, mirror: bool) {
        let placement = self.math.clamp_and_set(requested_khz, self.state.zoom);
        self.state.freq_khz = placement.center_khz;
        self.waterfall.send_command(&Command::ZoomStart {
            zoom: self.state.zoom,
            counter: placement.counter,
        });
        if mirror {
            self.mirror_frequency();
        }
    }

    fn mirror_frequency(&mut self) {
        if self.rig_attached && self.state.freq_khz >= RIG_MIRROR_MIN_KHZ {
            self.rig_requests.push(RigRequest::SetFrequency {
                hz: khz_to_hz(self.state.freq_khz),
            });
        }
    }

    fn send_tuning(&self) {
        if let Some(audio) = &self.audio {
            audio.send_command(&Command::Tune {
                mode: self.state.mode,
                passband: self.state.passband(),
                freq_khz: self.state.freq_khz,
            });
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            tuning: self.state,
            volume: self.volume,
        });
    }
}
