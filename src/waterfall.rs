//! Waterfall decoding
//!
//! Turns `W/F` frames into calibrated intensity rows and keeps a scrolling
//! history of them for display.

mod buffer;
mod decoder;

pub use buffer::SpectrumBuffer;
pub use decoder::WaterfallDecoder;
