//! Binary frame validation shared by the waterfall and audio decoders

use thiserror::Error;

/// Tag of a waterfall data frame
pub const WATERFALL_TAG: &[u8; 3] = b"W/F";
/// Tag of an audio data frame
pub const AUDIO_TAG: &[u8; 3] = b"SND";

/// Why a frame was discarded
///
/// Frames that fail these checks are dropped by the caller; the next frame
/// supersedes them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unexpected frame tag {0:?}")]
    UnexpectedTag(String),
    #[error("Frame truncated: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("Spectrum has {got} bins, expected {expected}")]
    BinCount { expected: usize, got: usize },
}

/// Check the 3-byte tag and minimum length, returning the bytes after `header_len`
pub fn strip_header<'a>(
    data: &'a [u8],
    tag: &[u8; 3],
    header_len: usize,
) -> Result<&'a [u8], FrameError> {
    if data.len() < tag.len() || &data[..tag.len()] != tag {
        let seen = &data[..data.len().min(tag.len())];
        return Err(FrameError::UnexpectedTag(String::from_utf8_lossy(seen).into_owned()));
    }
    if data.len() < header_len {
        return Err(FrameError::Truncated {
            len: data.len(),
            needed: header_len,
        });
    }
    Ok(&data[header_len..])
}
