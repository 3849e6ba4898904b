//! Text control commands
//!
//! Commands render to the exact strings the server parses. Connect-time
//! sequences are explicit ordered lists because later commands override
//! earlier ones (the second dB range wins).

use crate::config::{AgcConfig, RadioConfig};
use crate::tuning::{Mode, Passband};
use std::fmt;

/// One text command for either channel
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Auth { password: String },
    ZoomStart { zoom: u8, counter: u64 },
    DbRange { max_db: i32, min_db: i32 },
    WaterfallSpeed(u8),
    WaterfallCompression(bool),
    Tune { mode: Mode, passband: Passband, freq_khz: f64 },
    AudioCompression(bool),
    IdentUser(String),
    InactivityTimeout(u32),
    Agc(AgcConfig),
    AudioRate { native: u32, sink: u32 },
    Keepalive,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Auth { password } => write!(f, "SET auth t=kiwi p={}", password),
            Command::ZoomStart { zoom, counter } => {
                write!(f, "SET zoom={} start={}", zoom, counter)
            }
            Command::DbRange { max_db, min_db } => {
                write!(f, "SET maxdb={} mindb={}", max_db, min_db)
            }
            Command::WaterfallSpeed(speed) => write!(f, "SET wf_speed={}", speed),
            Command::WaterfallCompression(on) => write!(f, "SET wf_comp={}", *on as u8),
            Command::Tune {
                mode,
                passband,
                freq_khz,
            } => write!(
                f,
                "SET mod={} low_cut={} high_cut={} freq={:.3}",
                mode.as_command(),
                passband.low,
                passband.high,
                freq_khz
            ),
            Command::AudioCompression(on) => write!(f, "SET compression={}", *on as u8),
            Command::IdentUser(name) => write!(f, "SET ident_user={}", name),
            Command::InactivityTimeout(minutes) => {
                write!(f, "SET OVERRIDE inactivity_timeout={}", minutes)
            }
            Command::Agc(agc) => write!(
                f,
                "SET agc={} hang={} thresh={} slope={} decay={} manGain={}",
                agc.on as u8, agc.hang as u8, agc.thresh, agc.slope, agc.decay, agc.man_gain
            ),
            Command::AudioRate { native, sink } => {
                write!(f, "SET AR OK in={} out={}", native, sink)
            }
            Command::Keepalive => f.write_str("SET keepalive"),
        }
    }
}

/// Anything that accepts one-way text commands
pub trait CommandSink {
    fn send_command(&self, command: &Command);
}

/// Connect sequence for the waterfall channel
pub fn waterfall_init_commands(password: &str, zoom: u8, counter: u64) -> Vec<Command> {
    vec![
        Command::Auth {
            password: password.to_string(),
        },
        Command::ZoomStart { zoom, counter },
        Command::DbRange {
            max_db: 0,
            min_db: -100,
        },
        Command::WaterfallSpeed(4),
        Command::WaterfallCompression(false),
        Command::DbRange {
            max_db: -10,
            min_db: -110,
        },
    ]
}

/// Connect sequence for the audio channel
pub fn audio_init_commands(
    config: &RadioConfig,
    password: &str,
    mode: Mode,
    passband: Passband,
    freq_khz: f64,
) -> Vec<Command> {
    vec![
        Command::Auth {
            password: password.to_string(),
        },
        Command::Tune {
            mode,
            passband,
            freq_khz,
        },
        Command::AudioCompression(false),
        Command::IdentUser(config.ident_user.clone()),
        Command::InactivityTimeout(1000),
        Command::Agc(config.agc.clone()),
        Command::AudioRate {
            native: config.native_rate,
            sink: config.sink_rate,
        },
    ]
}

/// Send a connect sequence in order
pub fn initialize_session<S: CommandSink + ?Sized>(sink: &S, commands: &[Command]) {
    for command in commands {
        sink.send_command(command);
    }
}
