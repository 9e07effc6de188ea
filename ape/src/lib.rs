#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! ### Stream Organization
//!
//! **Container**: header, seek table, frames, stream checksum.
//! **Frame**: checksum, flags, residuals of `blocks_per_frame` blocks (the last
//! frame may be shorter).
//!
//! ### Prediction
//!
//! Stereo input is decorrelated into `X = L - R` and `Y = R + X / 2` before
//! prediction. Each channel then passes through the cascade selected by its
//! [`CompressionLevel`]. All filter arithmetic is integer with wrapping
//! overflow, so encoder and decoder agree bit for bit on every platform.
//!
//! ### Compression Levels
//!
//! - Fast: fixed and adaptive short predictors only
//! - Normal, High: one FIR stage
//! - Extra high: two FIR stages, four times longer frames
//! - Insane: three FIR stages, sixteen times longer frames
//!
//! ## Quick Start
//!
//! 1. Write a stream with [`Encoder`]: open it on a seekable sink, feed
//!    interleaved samples, finalize.
//! 2. Read it back with [`Decoder`]: frame by frame, from any position, or
//!    all at once.
//!
//! ```rust
//! use std::io::Cursor;
//! use ape::{CompressionLevel, Decoder, Encoder};
//!
//! // One second of a stereo 16-bit ramp
//! let samples: Vec<i32> = (0..44_100 * 2).map(|i| (i % 2000) - 1000).collect();
//!
//! let sink = Cursor::new(Vec::new());
//! let mut encoder = Encoder::open(sink, 2, 44_100, 16, CompressionLevel::High)?;
//! encoder.encode_samples(&samples)?;
//! let bytes = encoder.finalize()?.into_inner();
//!
//! let mut decoder = Decoder::open(Cursor::new(bytes))?;
//! assert_eq!(decoder.decode_all()?, samples);
//!
//! // Random access: locate the frame holding block 30 000 and decode it alone
//! let frame = decoder.seek(30_000)?;
//! let decoded = decoder.decode_frame(frame)?;
//! assert_eq!(decoded.first_block, 0);
//! # Ok::<(), ape::Error>(())
//! ```

use std::io::Cursor;

/// Processing functionality for audio streams.
///
/// 1. **Entropy coding** ([`process::entropy`]): Adaptive Rice codes.
///
/// 2. **Prediction** ([`process::predictor`], [`process::nn_filter`]): Filter
///    cascade turning samples into residuals.
///
/// 3. **Frames** ([`process::frame`]): Independent frame coding.
///
/// 4. **Container** ([`process::encode`], [`process::decode`]): Streaming
///    writer and random-access reader.
pub mod process;

/// Data structures representing format components.
///
/// - **Header** ([`structs::header`]): Stream parameters and layout
/// - **Seek Table** ([`structs::seek_table`]): Frame offsets
/// - **Levels** ([`structs::level`]): Compression levels and filter cascades
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading/writing
/// - **Byte Order** ([`utils::byteorder`]): Little-endian container fields
/// - **CRC Validation** ([`utils::crc`]): Error detection
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **History Buffers** ([`utils::roll_buffer`]): Filter input windows
pub mod utils;

pub use process::decode::{DecodedFrame, Decoder};
pub use process::encode::{Encoder, EncoderConfig};
pub use process::frame::{FrameDecoder, FrameEncoder};
pub use structs::header::StreamInfo;
pub use structs::level::CompressionLevel;
pub use utils::errors::{
    ChecksumScope, Error, FormatError, FrameError, HeaderError, Result, ShapeError,
};

/// Encodes a complete stream of interleaved samples into memory.
pub fn encode_to_vec(
    info: &StreamInfo,
    config: &EncoderConfig,
    samples: &[i32],
) -> Result<Vec<u8>> {
    let mut encoder = Encoder::with_config(Cursor::new(Vec::new()), *info, config.clone())?;
    encoder.encode_samples(samples)?;

    Ok(encoder.finalize()?.into_inner())
}

/// Decodes and verifies a complete in-memory stream.
pub fn decode_from_slice(bytes: &[u8]) -> Result<(StreamInfo, Vec<i32>)> {
    let mut decoder = Decoder::open(Cursor::new(bytes))?;
    let samples = decoder.decode_all()?;

    Ok((decoder.info(), samples))
}
