//! Tuning intents and their line-command syntax

use crate::tuning::Mode;
use std::str::FromStr;
use thiserror::Error;

/// A user request handled by the orchestrator on the next tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuningIntent {
    /// Retune to an absolute frequency (kHz)
    Tune(f64),
    /// Move the frequency by a relative amount (kHz)
    Step(f64),
    /// Change zoom by a number of levels
    Zoom(i32),
    SetMode(Mode),
    /// Adjust the low passband edge (Hz)
    LowCut(i32),
    /// Adjust the high passband edge (Hz)
    HighCut(i32),
    ResetPassband,
    ToggleAutoMode,
    /// Adjust volume (percent)
    Volume(i32),
    ToggleMute,
    /// Tune to the frequency under a waterfall column
    ClickBin(f64),
    Quit,
}

#[derive(Error, Debug, PartialEq)]
pub enum IntentError {
    #[error("Unknown command '{0}'")]
    Unknown(String),
    #[error("Command '{0}' needs an argument")]
    MissingArgument(String),
    #[error("Invalid argument '{value}' for '{command}'")]
    InvalidArgument { command: String, value: String },
}

impl FromStr for TuningIntent {
    type Err = IntentError;

    /// Parse one line such as `f 7100`, `z +1`, `m lsb` or `q`
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words
            .next()
            .ok_or_else(|| IntentError::Unknown(String::new()))?
            .to_ascii_lowercase();
        let arg = words.next();

        match command.as_str() {
            "f" | "freq" => Ok(TuningIntent::Tune(parse_arg(&command, arg)?)),
            "+" => Ok(TuningIntent::Step(parse_arg(&command, arg)?)),
            "-" => Ok(TuningIntent::Step(-parse_arg::<f64>(&command, arg)?)),
            "z" | "zoom" => Ok(TuningIntent::Zoom(parse_arg(&command, arg)?)),
            "m" | "mode" => Ok(TuningIntent::SetMode(parse_arg(&command, arg)?)),
            "lo" => Ok(TuningIntent::LowCut(parse_arg(&command, arg)?)),
            "hi" => Ok(TuningIntent::HighCut(parse_arg(&command, arg)?)),
            "o" => Ok(TuningIntent::ResetPassband),
            "x" | "auto" => Ok(TuningIntent::ToggleAutoMode),
            "v" | "vol" => Ok(TuningIntent::Volume(parse_arg(&command, arg)?)),
            "mute" => Ok(TuningIntent::ToggleMute),
            "c" | "click" => Ok(TuningIntent::ClickBin(parse_arg(&command, arg)?)),
            "q" | "quit" => Ok(TuningIntent::Quit),
            _ => Err(IntentError::Unknown(command)),
        }
    }
}

fn parse_arg<T: FromStr>(command: &str, arg: Option<&str>) -> Result<T, IntentError> {
    let value = arg.ok_or_else(|| IntentError::MissingArgument(command.to_string()))?;
    // explicit plus sign reads naturally for relative commands
    value
        .strip_prefix('+')
        .unwrap_or(value)
        .parse()
        .map_err(|_| IntentError::InvalidArgument {
            command: command.to_string(),
            value: value.to_string(),
        })
}
