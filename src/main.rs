mod audio;
mod channel;
mod config;
mod frame;
mod rig;
mod session;
mod tuning;
mod waterfall;

use crate::audio::{AudioOutput, AudioPlayer};
use crate::channel::{ChannelError, Command, CommandSender, CommandSink, FrameReader, StreamKind};
use crate::config::RadioConfig;
use crate::rig::RigClient;
use crate::session::{Driver, Orchestrator, StatusFormat, StatusPresenter, TuningIntent};
use crate::tuning::{Mode, TuningMath, TuningState};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Longest wait for one rigctld exchange
const RIG_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "kiwirx")]
#[command(about = "Headless waterfall and audio client for KiwiSDR-style receivers")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a receiver and stream waterfall and audio
    Listen(ListenArgs),

    /// List available audio output devices
    Devices(DevicesArgs),
}

#[derive(Args)]
struct ListenArgs {
    /// Receiver host
    #[arg(long, default_value = "192.168.1.82")]
    host: String,

    /// Receiver port
    #[arg(long, default_value = "8073")]
    port: u16,

    /// Receiver password
    #[arg(long, default_value = "")]
    password: String,

    /// Initial center frequency in kHz
    #[arg(long, default_value = "14060")]
    freq: f64,

    /// Initial waterfall zoom level
    #[arg(long, default_value = "10")]
    zoom: u8,

    /// Waterfall only, do not open the audio channel
    #[arg(long)]
    no_audio: bool,

    /// rigctld host to keep a transceiver in step
    #[arg(long)]
    rig_host: Option<String>,

    /// rigctld port
    #[arg(long, default_value = "4532")]
    rig_port: u16,

    /// Initial volume in percent
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u8).range(0..=150))]
    volume: u8,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Status output format
    #[arg(long, value_enum, default_value = "text")]
    format: StatusFormat,
}

#[derive(Args)]
struct DevicesArgs {
    /// Configuration file (TOML), used for the sink rate check
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Forward stdin line commands as intents
///
/// Runs on a plain thread: a blocked read must not hold up runtime shutdown.
fn spawn_stdin_reader(intents: mpsc::UnboundedSender<TuningIntent>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<TuningIntent>() {
                Ok(intent) => {
                    if intents.send(intent).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
        debug!("stdin closed");
    });
}

/// Move audio frames from the socket to the playback queue
async fn pump_audio(
    mut frames: FrameReader,
    queue: mpsc::Sender<Vec<u8>>,
) -> Result<(), ChannelError> {
    debug!(kind = %frames.kind(), "Audio pump started");
    loop {
        let Some(frame) = frames.receive_frame().await? else {
            continue;
        };
        match queue.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Playback queue full, dropping audio frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
        }
    }
}

/// Wait until the queue holds a full jitter buffer, or give up after `limit`
async fn prime_audio(
    queue: &mpsc::Receiver<Vec<u8>>,
    depth: usize,
    limit: Duration,
    commands: &CommandSender,
) {
    commands.send_command(&Command::Keepalive);
    let started = Instant::now();
    while queue.len() < depth && started.elapsed() < limit {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    info!(queued = queue.len(), "Audio primed");
}

/// Resolves only if the audio stream fails
async fn watch_audio(pump: Option<JoinHandle<Result<(), ChannelError>>>) -> Result<()> {
    match pump {
        Some(handle) => match handle.await {
            Ok(Ok(())) => std::future::pending().await,
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e).context("Audio pump task failed"),
        },
        None => std::future::pending().await,
    }
}

async fn listen(args: ListenArgs) -> Result<()> {
    let config = RadioConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let math = TuningMath::from_config(&config);

    let mut rig = match &args.rig_host {
        Some(host) => {
            let client = RigClient::connect(host, args.rig_port, RIG_TIMEOUT)
                .await
                .with_context(|| format!("Failed to connect to rigctld at {}:{}", host, args.rig_port))?;
            info!(rig = %client.addr(), "Rig control active");
            Some(client)
        }
        None => None,
    };
    let mode = match rig.as_mut() {
        Some(rig) => rig.get_mode().await.context("Failed to read rig mode")?.0,
        None => Mode::Usb,
    };
    let initial = TuningState::new(args.freq, math.clamp_zoom(args.zoom as i32), mode);

    info!(host = %args.host, port = args.port, "Connecting to receiver");
    let (wf_commands, wf_frames) = channel::connect(&args.host, args.port, StreamKind::Waterfall)
        .await
        .context("Failed to open waterfall channel")?
        .into_parts();
    let audio = if args.no_audio {
        None
    } else {
        Some(
            channel::connect(&args.host, args.port, StreamKind::Audio)
                .await
                .context("Failed to open audio channel")?
                .into_parts(),
        )
    };
    let (audio_commands, audio_frames) = audio.unzip();

    let mut orchestrator = Orchestrator::new(
        &config,
        wf_commands,
        audio_commands.clone(),
        initial,
        args.volume,
    );
    if rig.is_some() {
        orchestrator = orchestrator.with_rig();
    }
    orchestrator.start(&args.password);
    let snapshot = orchestrator.subscribe();

    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(intent_tx);

    let mut driver = Driver::new(&config, orchestrator, wf_frames, intent_rx);
    if let Some(rig) = rig {
        driver = driver.with_rig(rig);
    }

    let mut pump = None;
    let mut _playback = None;
    if let (Some(frames), Some(commands)) = (audio_frames, audio_commands) {
        let output = AudioOutput::new(config.sink_rate).context("Failed to open audio output")?;
        if output.sample_rate() != config.sink_rate {
            warn!(
                requested = config.sink_rate,
                actual = output.sample_rate(),
                "Output device does not support the configured rate"
            );
        }

        let (queue_tx, queue_rx) = mpsc::channel(config.jitter_depth.max(1) * 4);
        pump = Some(tokio::spawn(pump_audio(frames, queue_tx)));
        prime_audio(
            &queue_rx,
            config.jitter_depth,
            config.frame_timeout() * 2,
            &commands,
        )
        .await;

        let (rssi_tx, rssi_rx) = watch::channel(-127.0);
        let player = AudioPlayer::new(&config, output.sample_rate(), queue_rx, snapshot, rssi_tx);
        let underruns = player.underruns();
        _playback = Some(output.start(player).context("Failed to start audio playback")?);
        driver = driver.with_audio(rssi_rx, underruns);
    }

    let mut presenter = StatusPresenter::new(args.format, std::io::stdout(), config.display_fps);
    tokio::select! {
        result = driver.run(&mut presenter) => result,
        result = watch_audio(pump) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    }
}

fn list_devices(args: DevicesArgs) -> Result<()> {
    let config = RadioConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let devices = AudioOutput::list_devices().context("Failed to enumerate audio devices")?;
    if devices.is_empty() {
        println!("No audio output devices found");
        return Ok(());
    }

    let rate_header = format!("{} Hz", config.sink_rate);
    println!(
        "{:<32} {:<8} {:<9} {:<16} {:<9} Formats",
        "Name", "Default", "Channels", "Rates (Hz)", rate_header
    );
    println!("{}", "-".repeat(90));

    for device in devices {
        let rates = device
            .rate_span()
            .map(|(low, high)| format!("{}-{}", low, high))
            .unwrap_or_else(|| "-".to_string());
        let formats = device
            .formats
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<32} {:<8} {:<9} {:<16} {:<9} {}",
            device.name,
            if device.is_default { "*" } else { "" },
            device.max_channels,
            rates,
            if device.supports_rate(config.sink_rate) { "yes" } else { "no" },
            formats
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Listen(args) => listen(args).await,
        Commands::Devices(args) => list_devices(args),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
