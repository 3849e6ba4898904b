//! `SND` frame decoding

use crate::frame::{AUDIO_TAG, FrameError, strip_header};

/// Bytes before the first sample
const HEADER_LEN: usize = 10;
/// Offset of the big-endian S-meter word
const SMETER_OFFSET: usize = 8;

/// One decoded server audio frame
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Signal strength reported with this frame (dBm)
    pub rssi_dbm: f32,
    /// Samples at the server's native rate
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let payload = strip_header(data, AUDIO_TAG, HEADER_LEN)?;

        let smeter = u16::from_be_bytes([data[SMETER_OFFSET], data[SMETER_OFFSET + 1]]);
        let samples = payload
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self {
            rssi_dbm: rssi_from_smeter(smeter),
            samples,
        })
    }
}

/// Convert the raw S-meter word to dBm
pub fn rssi_from_smeter(raw: u16) -> f32 {
    0.1 * raw as f32 - 127.0
}
