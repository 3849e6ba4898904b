//! Channel protocol client
//!
//! Each server stream (waterfall or audio) is one WebSocket connection opened
//! with a `/<unix-seconds>/<kind>` handshake URI. Text commands go out through
//! a writer task, binary data frames come back through the frame reader.
//!
//! The channel layer is organized into:
//! - `command`: typed text commands and the ordered connect sequences
//! - `session`: connection setup, command writer and frame reader

use std::fmt;
use thiserror::Error;

mod command;
mod session;

pub use command::{
    Command, CommandSink, audio_init_commands, initialize_session, waterfall_init_commands,
};
pub use session::{ChannelSession, CommandSender, FrameReader, connect, handshake_path};

/// Stream kinds served by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Waterfall,
    Audio,
}

impl StreamKind {
    /// Path segment identifying the stream in the handshake URI
    pub fn path_segment(&self) -> &'static str {
        match self {
            StreamKind::Waterfall => "W/F",
            StreamKind::Audio => "SND",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Waterfall => f.write_str("waterfall"),
            StreamKind::Audio => f.write_str("audio"),
        }
    }
}

/// Channel error types
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to connect {kind} channel to {addr}: {source}")]
    Connect {
        kind: StreamKind,
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Server at {addr} rejected {kind} handshake: {source}")]
    Handshake {
        kind: StreamKind,
        addr: String,
        #[source]
        source: async_tungstenite::tungstenite::Error,
    },
    #[error("{kind} stream closed: {reason}")]
    StreamClosed { kind: StreamKind, reason: String },
}
