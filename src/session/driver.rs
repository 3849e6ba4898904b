//! Display-rate driver
//!
//! One task, one fixed-rate interval. Each tick drains pending intents, ticks
//! the orchestrator, keeps the rig in step, reads at most one spectrum frame
//! and hands the result to a [`Presenter`].

use super::{Orchestrator, TuningIntent};
use crate::audio::UnderrunCounter;
use crate::channel::{ChannelError, CommandSink, FrameReader};
use crate::config::RadioConfig;
use crate::rig::RigClient;
use crate::tuning::{Passband, TuningMath, TuningState};
use crate::waterfall::{SpectrumBuffer, WaterfallDecoder};
use anyhow::Result;
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, info, trace, warn};

/// Where spectrum frames come from
pub trait SpectrumSource {
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, ChannelError>>;
}

impl SpectrumSource for FrameReader {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        self.receive_frame().await
    }
}

/// Everything a presentation layer needs for one tick
pub struct DisplayFrame<'a> {
    pub spectrum: &'a SpectrumBuffer,
    pub tuning: TuningState,
    pub passband: Passband,
    pub auto_mode: bool,
    pub volume: u8,
    /// Smoothed signal strength (dBm)
    pub rssi_dbm: f32,
    pub underruns: u64,
    pub math: TuningMath,
}

impl DisplayFrame<'_> {
    /// Column of the tuned frequency
    pub fn center_bin(&self) -> f64 {
        self.math.offset_to_bin(self.tuning.freq_khz, 0.0, self.tuning.zoom)
    }

    /// Frequency under a column, for pointer readouts
    pub fn bin_khz(&self, bin: f64) -> f64 {
        self.math.bin_to_khz(self.tuning.freq_khz, bin, self.tuning.zoom)
    }

    /// Visible frequency range (kHz)
    pub fn window_khz(&self) -> (f64, f64) {
        let freq = self.tuning.freq_khz;
        let zoom = self.tuning.zoom;
        (self.math.start_freq(freq, zoom), self.math.end_freq(freq, zoom))
    }

    /// Frequency of the brightest interior bin of the newest row
    pub fn peak_khz(&self) -> Option<f64> {
        let row = self.spectrum.newest();
        if row.len() < 3 {
            return None;
        }
        let (index, &value) = row[1..row.len() - 1]
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)?;
        (value > 0).then(|| self.bin_khz((index + 1) as f64))
    }
}

/// Receives one [`DisplayFrame`] per tick
pub trait Presenter {
    fn present(&mut self, frame: &DisplayFrame<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct StatusLine {
    freq_khz: f64,
    mode: String,
    zoom: u8,
    low_cut: i32,
    high_cut: i32,
    auto_mode: bool,
    volume: u8,
    rssi_dbm: f32,
    underruns: u64,
    bandwidth_hz: i32,
    window_khz: (f64, f64),
    peak_khz: Option<f64>,
}

/// Writes a status line whenever tuning changes, and periodically otherwise
pub struct StatusPresenter<W> {
    format: StatusFormat,
    out: W,
    refresh_every: u32,
    since_last: u32,
    last: Option<(TuningState, bool, u8)>,
}

impl<W: Write> StatusPresenter<W> {
    pub fn new(format: StatusFormat, out: W, refresh_every: u32) -> Self {
        Self {
            format,
            out,
            refresh_every: refresh_every.max(1),
            since_last: 0,
            last: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Presenter for StatusPresenter<W> {
    fn present(&mut self, frame: &DisplayFrame<'_>) -> Result<()> {
        let key = (frame.tuning, frame.auto_mode, frame.volume);
        self.since_last += 1;
        if self.last == Some(key) && self.since_last < self.refresh_every {
            return Ok(());
        }
        self.last = Some(key);
        self.since_last = 0;

        let status = StatusLine {
            freq_khz: frame.tuning.freq_khz,
            mode: frame.tuning.mode.to_string(),
            zoom: frame.tuning.zoom,
            low_cut: frame.passband.low,
            high_cut: frame.passband.high,
            auto_mode: frame.auto_mode,
            volume: frame.volume,
            rssi_dbm: frame.rssi_dbm.round(),
            underruns: frame.underruns,
            bandwidth_hz: frame.passband.width(),
            window_khz: frame.window_khz(),
            peak_khz: frame.peak_khz(),
        };

        match self.format {
            StatusFormat::Json => {
                serde_json::to_writer(&mut self.out, &status)?;
                writeln!(self.out)?;
            }
            StatusFormat::Text => {
                let peak = status
                    .peak_khz
                    .map(|khz| format!("{:.3} kHz", khz))
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    self.out,
                    "{:.3} kHz {} zoom {} [{}..{} Hz] auto {} | {:.0} dBm | vol {}% | peak {} | underruns {}",
                    status.freq_khz,
                    status.mode,
                    status.zoom,
                    status.low_cut,
                    status.high_cut,
                    if status.auto_mode { "on" } else { "off" },
                    status.rssi_dbm,
                    status.volume,
                    peak,
                    status.underruns,
                )?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Display cadence task state
pub struct Driver<S, W> {
    orchestrator: Orchestrator<S>,
    spectrum: W,
    decoder: WaterfallDecoder,
    intents: mpsc::UnboundedReceiver<TuningIntent>,
    rig: Option<RigClient>,
    rssi: watch::Receiver<f32>,
    underruns: UnderrunCounter,
    tick_interval: Duration,
    frame_timeout: Duration,
}

impl<S: CommandSink, W: SpectrumSource> Driver<S, W> {
    pub fn new(
        config: &RadioConfig,
        orchestrator: Orchestrator<S>,
        spectrum: W,
        intents: mpsc::UnboundedReceiver<TuningIntent>,
    ) -> Self {
        let (_, rssi) = watch::channel(-127.0);
        Self {
            orchestrator,
            spectrum,
            decoder: WaterfallDecoder::new(config),
            intents,
            rig: None,
            rssi,
            underruns: UnderrunCounter::default(),
            tick_interval: config.tick_interval(),
            frame_timeout: config.frame_timeout(),
        }
    }

    pub fn with_rig(mut self, rig: RigClient) -> Self {
        self.rig = Some(rig);
        self
    }

    /// Read RSSI and underruns from a running audio path
    pub fn with_audio(mut self, rssi: watch::Receiver<f32>, underruns: UnderrunCounter) -> Self {
        self.rssi = rssi;
        self.underruns = underruns;
        self
    }

    /// Run until a quit intent or a closed spectrum stream
    pub async fn run<P: Presenter>(mut self, presenter: &mut P) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut marker_pending = false;

        loop {
            ticker.tick().await;

            let mut intents = Vec::new();
            while let Ok(intent) = self.intents.try_recv() {
                intents.push(intent);
            }

            let rssi = *self.rssi.borrow();
            self.orchestrator.observe_rssi(rssi);
            let outcome = self.orchestrator.tick(intents);
            if outcome.quit {
                info!("Quit requested");
                return Ok(());
            }
            marker_pending |= outcome.marker;

            self.sync_rig().await;

            match timeout(self.frame_timeout, self.spectrum.next_frame()).await {
                Err(_) => debug!("No spectrum frame within {:?}", self.frame_timeout),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(None)) => {}
                Ok(Ok(Some(frame))) => match self.decoder.decode(&frame, marker_pending) {
                    Ok(()) => marker_pending = false,
                    Err(e) => trace!(error = %e, "Dropping malformed spectrum frame"),
                },
            }

            let tuning = self.orchestrator.state();
            presenter.present(&DisplayFrame {
                spectrum: self.decoder.buffer(),
                tuning,
                passband: tuning.passband(),
                auto_mode: self.orchestrator.auto_mode(),
                volume: self.orchestrator.volume(),
                rssi_dbm: self.orchestrator.rssi().smoothed(),
                underruns: self.underruns.get(),
                math: *self.orchestrator.math(),
            })?;
        }
    }

    /// Forward queued requests to the rig, then adopt what it reports
    async fn sync_rig(&mut self) {
        let Some(rig) = self.rig.as_mut() else {
            return;
        };

        for request in self.orchestrator.take_rig_requests() {
            if let Err(e) = rig.apply(request).await {
                warn!(rig = %rig.addr(), "Rig request {:?} failed: {}", request, e);
            }
        }

        match rig.read_state().await {
            Ok(reading) => self.orchestrator.reconcile_rig(reading),
            Err(e) => warn!(rig = %rig.addr(), "Rig poll skipped: {}", e),
        }
    }
}
