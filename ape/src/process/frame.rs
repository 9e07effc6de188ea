//! Frame coding.
//!
//! ## Frame Layout
//!
//! | Field     | Bits | Description                                        |
//! |-----------|------|----------------------------------------------------|
//! | crc       | 32   | CRC-32 of the frame's decoded samples              |
//! | flags     | 8    | [`flags::SILENCE`], [`flags::PSEUDO_STEREO`]       |
//! | residuals | -    | Rice-coded residuals, block by block               |
//! | padding   | 0-7  | zero bits up to the next byte boundary             |
//!
//! Every frame starts from the same freshly initialized filter and coder
//! state, so it decodes from its own bytes alone.
//!
//! ## Channel Coding
//!
//! Stereo frames are decorrelated into `X = L - R` and `Y = R + X / 2`.
//! Within a block `Y` is coded first, predicted with the previous block's `X`
//! as cross-channel input, then `X`, predicted with the current `Y`. Any other
//! channel count codes each channel on its own, interleaved block by block.

use std::collections::TryReserveError;
use std::io;

use log::trace;

use crate::process::entropy::CoderState;
use crate::process::predictor::Predictor;
use crate::structs::header::{Header, StreamInfo};
use crate::structs::level::CompressionLevel;
use crate::utils::bitstream_io::{BitstreamIoReader, BitstreamIoWriter, BsIoSliceReader};
use crate::utils::crc::SampleCrc;
use crate::utils::errors::{ChecksumScope, Error, FrameError, Result, ShapeError};

pub mod flags {
    /// Every sample of the frame is zero; no residuals follow.
    pub const SILENCE: u8 = 0x01;
    /// Stereo frame whose channels are identical; only `Y` is coded.
    pub const PSEUDO_STEREO: u8 = 0x02;

    pub const KNOWN: u8 = SILENCE | PSEUDO_STEREO;
}

/// Prediction and coding state of one channel within one frame.
struct ChannelCodec {
    predictor: Predictor,
    coder: CoderState,
}

impl ChannelCodec {
    fn new(level: CompressionLevel, bits_per_sample: u16) -> Result<Self, TryReserveError> {
        Ok(Self {
            predictor: Predictor::new(level, bits_per_sample)?,
            coder: CoderState::new(bits_per_sample),
        })
    }

    fn fresh(
        level: CompressionLevel,
        bits_per_sample: u16,
        count: usize,
    ) -> Result<Vec<Self>, TryReserveError> {
        let mut codecs = Vec::new();
        codecs.try_reserve_exact(count)?;
        for _ in 0..count {
            codecs.push(Self::new(level, bits_per_sample)?);
        }

        Ok(codecs)
    }

    #[inline(always)]
    fn encode(&mut self, w: &mut BitstreamIoWriter, sample: i64, cross: i64) -> io::Result<()> {
        let residual = self.predictor.compress(sample, cross);
        self.coder.encode(w, residual)
    }

    #[inline(always)]
    fn decode<R>(&mut self, r: &mut BitstreamIoReader<R>, cross: i64) -> Result<i64, FrameError>
    where
        R: io::Read + io::Seek,
    {
        let residual = self.coder.decode(r)?;
        Ok(self.predictor.decompress(residual, cross))
    }
}

#[inline(always)]
fn decorrelate(left: i64, right: i64) -> (i64, i64) {
    let x = left.wrapping_sub(right);
    (x, right.wrapping_add(x / 2))
}

#[inline(always)]
fn correlate(x: i64, y: i64) -> (i64, i64) {
    let right = y.wrapping_sub(x / 2);
    (x.wrapping_add(right), right)
}

/// Encodes whole frames. Stateless between calls, so one instance can be
/// shared by several threads.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    info: StreamInfo,
    level: CompressionLevel,
}

impl FrameEncoder {
    pub fn new(info: StreamInfo, level: CompressionLevel) -> Self {
        Self { info, level }
    }

    /// Codes one frame of interleaved samples.
    pub fn encode(&self, samples: &[i32]) -> Result<Vec<u8>> {
        let channels = self.info.channels as usize;
        if samples.len() % channels != 0 {
            return Err(ShapeError::Misaligned {
                len: samples.len(),
                channels: self.info.channels,
            }
            .into());
        }

        let bits = self.info.bits_per_sample;
        let flags = self.classify(samples);

        // Residuals rarely take more than half the PCM size.
        let estimate = samples.len() * self.info.bytes_per_sample() / 2 + 8;
        let mut w = BitstreamIoWriter::with_capacity(estimate)?;
        w.put_n(32, SampleCrc::checksum(bits, samples) as u64)?;
        w.put_n(8, flags as u64)?;

        match flags {
            flags::SILENCE => {}
            flags::PSEUDO_STEREO => {
                let mut mid = ChannelCodec::new(self.level, bits)?;
                for block in samples.chunks_exact(2) {
                    mid.encode(&mut w, block[1] as i64, 0)?;
                }
            }
            _ if channels == 2 => {
                let mut codecs = ChannelCodec::fresh(self.level, bits, 2)?;
                let mut last_x = 0;
                for block in samples.chunks_exact(2) {
                    let (x, y) = decorrelate(block[0] as i64, block[1] as i64);
                    codecs[0].encode(&mut w, y, last_x)?;
                    codecs[1].encode(&mut w, x, y)?;
                    last_x = x;
                }
            }
            _ => {
                let mut codecs = ChannelCodec::fresh(self.level, bits, channels)?;
                for block in samples.chunks_exact(channels) {
                    for (codec, &sample) in codecs.iter_mut().zip(block) {
                        codec.encode(&mut w, sample as i64, 0)?;
                    }
                }
            }
        }

        let bytes = w.into_bytes()?;
        trace!(
            "Coded {} blocks into {} bytes, flags {flags:#04X}",
            samples.len() / channels,
            bytes.len()
        );

        Ok(bytes)
    }

    fn classify(&self, samples: &[i32]) -> u8 {
        if samples.iter().all(|&s| s == 0) {
            flags::SILENCE
        } else if self.info.channels == 2 && samples.chunks_exact(2).all(|b| b[0] == b[1]) {
            flags::PSEUDO_STEREO
        } else {
            0
        }
    }
}

/// Decodes single frames of one stream.
///
/// Holds only immutable stream parameters, so it can be cloned or shared
/// across threads and fed frames in any order.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    header: Header,
    info: StreamInfo,
    level: CompressionLevel,
}

impl FrameDecoder {
    pub fn new(header: &Header) -> Result<Self> {
        Ok(Self {
            header: header.clone(),
            info: header.info(),
            level: header.level()?,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.header.total_frames as usize
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Decodes frame `index` from its bytes into interleaved samples.
    ///
    /// On a checksum mismatch the decoded samples are returned inside
    /// [`Error::IntegrityCheckFailed`].
    pub fn decode(&self, index: usize, bytes: &[u8]) -> Result<Vec<i32>> {
        let blocks = self
            .header
            .frame_blocks(index)
            .ok_or(Error::OutOfRange {
                index: index as u64,
                limit: self.header.total_frames as u64,
            })? as usize;

        let channels = self.info.channels as usize;
        let mut samples = Vec::new();
        samples.try_reserve_exact(blocks * channels)?;

        let mut codecs = ChannelCodec::fresh(self.level, self.info.bits_per_sample, channels)?;

        let expected = self
            .decode_into(bytes, blocks, &mut codecs, &mut samples)
            .map_err(|err| Error::in_frame(index, err))?;

        let actual = SampleCrc::checksum(self.info.bits_per_sample, &samples);
        if actual != expected {
            return Err(Error::IntegrityCheckFailed {
                scope: ChecksumScope::Frame(index),
                expected,
                actual,
                samples,
            });
        }

        trace!("Decoded frame {index}: {blocks} blocks from {} bytes", bytes.len());
        Ok(samples)
    }

    /// Returns the stored checksum.
    fn decode_into(
        &self,
        bytes: &[u8],
        blocks: usize,
        codecs: &mut [ChannelCodec],
        samples: &mut Vec<i32>,
    ) -> Result<u32, FrameError> {
        let channels = self.info.channels;
        let mut r = BsIoSliceReader::from_slice(bytes);

        let expected: u32 = r.get_n(32)?;
        let flags: u8 = r.get_n(8)?;

        if flags & !flags::KNOWN != 0 || flags == flags::KNOWN {
            return Err(FrameError::InvalidFlags(flags));
        }

        if flags & flags::SILENCE != 0 {
            samples.resize(blocks * channels as usize, 0);
        } else if flags & flags::PSEUDO_STEREO != 0 {
            if channels != 2 {
                return Err(FrameError::PseudoStereoWithoutStereo(channels));
            }
            for _ in 0..blocks {
                let mid = self.checked(codecs[0].decode(&mut r, 0)?)?;
                samples.extend([mid, mid]);
            }
        } else if channels == 2 {
            let mut last_x = 0;
            for _ in 0..blocks {
                let y = codecs[0].decode(&mut r, last_x)?;
                let x = codecs[1].decode(&mut r, y)?;
                let (left, right) = correlate(x, y);
                samples.extend([self.checked(left)?, self.checked(right)?]);
                last_x = x;
            }
        } else {
            for _ in 0..blocks {
                for codec in codecs.iter_mut() {
                    let sample = codec.decode(&mut r, 0)?;
                    samples.push(self.checked(sample)?);
                }
            }
        }

        if r.skip_to_alignment()? != 0 {
            return Err(FrameError::PaddingNotZero);
        }

        let remaining = r.remaining_bits()?;
        if remaining != 0 {
            return Err(FrameError::TrailingBytes(remaining / 8));
        }

        Ok(expected)
    }

    #[inline(always)]
    fn checked(&self, sample: i64) -> Result<i32, FrameError> {
        if self.info.fits(sample) {
            Ok(sample as i32)
        } else {
            Err(FrameError::SampleOutOfRange {
                value: sample,
                bits: self.info.bits_per_sample,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(info: StreamInfo, level: CompressionLevel, blocks: &[u32]) -> Header {
        let per_frame = blocks.iter().copied().max().unwrap_or(1);
        let mut h = Header::new(&info, level, per_frame, blocks.len() as u32);
        h.total_frames = blocks.len() as u32;
        h.final_frame_blocks = blocks.last().copied().unwrap_or(0);
        h.total_blocks = blocks.iter().map(|&b| b as u64).sum();
        h
    }

    fn round_trip(info: StreamInfo, level: CompressionLevel, samples: &[i32]) -> Vec<u8> {
        let blocks = (samples.len() / info.channels as usize) as u32;
        let bytes = FrameEncoder::new(info, level).encode(samples).unwrap();
        let decoder = FrameDecoder::new(&header(info, level, &[blocks])).unwrap();
        assert_eq!(decoder.decode(0, &bytes).unwrap(), samples);
        bytes
    }

    fn noise(len: usize, bits: u16, seed: u64) -> Vec<i32> {
        let mut state = seed | 1;
        let shift = 64 - bits as u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state as i64) >> shift) as i32
            })
            .collect()
    }

    #[test]
    fn stereo_decorrelation_is_invertible() {
        for (l, r) in [(0, 0), (5, -3), (-7, 8), (i32::MAX, i32::MIN), (i32::MIN, i32::MAX)] {
            let (x, y) = decorrelate(l as i64, r as i64);
            assert_eq!(correlate(x, y), (l as i64, r as i64));
        }
        assert_eq!(decorrelate(10, 4), (6, 7));
        assert_eq!(decorrelate(4, 10), (-6, 7));
    }

    #[test]
    fn silent_frame_is_header_only() {
        let info = StreamInfo::new(2, 48_000, 24);
        let bytes = round_trip(info, CompressionLevel::High, &[0; 2048]);
        assert_eq!(bytes.len(), 5);
        assert_eq!(bytes[4], flags::SILENCE);
    }

    #[test]
    fn pseudo_stereo_codes_one_channel() {
        let info = StreamInfo::new(2, 44_100, 16);
        let mono: Vec<i32> = noise(1000, 12, 7);
        let dual: Vec<i32> = mono.iter().flat_map(|&s| [s, s]).collect();

        let bytes = round_trip(info, CompressionLevel::Normal, &dual);
        assert_eq!(bytes[4], flags::PSEUDO_STEREO);

        let mut split = dual.clone();
        split[501] += 1;
        let bytes = round_trip(info, CompressionLevel::Normal, &split);
        assert_eq!(bytes[4], 0);
    }

    #[test]
    fn round_trips_channel_layouts() {
        for channels in [1u16, 2, 3, 6] {
            for bits in [8u16, 16, 24, 32] {
                let info = StreamInfo::new(channels, 44_100, bits);
                let seed = channels as u64 * 31 + bits as u64;
                let samples = noise(channels as usize * 700, bits, seed);
                round_trip(info, CompressionLevel::ExtraHigh, &samples);
            }
        }
    }

    #[test]
    fn full_scale_values() {
        let info = StreamInfo::new(2, 96_000, 32);
        let samples: Vec<i32> = (0..512)
            .flat_map(|i| match i % 4 {
                0 => [i32::MAX, i32::MIN],
                1 => [i32::MIN, i32::MAX],
                2 => [i32::MIN, i32::MIN + 1],
                _ => [0, -1],
            })
            .collect();
        for level in CompressionLevel::ALL {
            round_trip(info, level, &samples);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let info = StreamInfo::new(2, 44_100, 16);
        let samples = noise(4000, 16, 99);
        let encoder = FrameEncoder::new(info, CompressionLevel::Insane);
        assert_eq!(encoder.encode(&samples).unwrap(), encoder.encode(&samples).unwrap());
    }

    #[test]
    fn rejects_misaligned_block() {
        let encoder = FrameEncoder::new(StreamInfo::new(2, 44_100, 16), CompressionLevel::Fast);
        assert!(matches!(
            encoder.encode(&[1, 2, 3]),
            Err(Error::InvalidSampleShape(ShapeError::Misaligned { len: 3, channels: 2 }))
        ));
    }

    #[test]
    fn rejects_unknown_flags() {
        let info = StreamInfo::new(1, 44_100, 16);
        let decoder = FrameDecoder::new(&header(info, CompressionLevel::Fast, &[4])).unwrap();
        for flags in [0x04u8, 0x03, 0x80] {
            let bytes = [0, 0, 0, 0, flags];
            assert!(matches!(
                decoder.decode(0, &bytes),
                Err(Error::CorruptStream {
                    frame: 0,
                    source: FrameError::InvalidFlags(f)
                }) if f == flags
            ));
        }
    }

    #[test]
    fn pseudo_stereo_needs_two_channels() {
        let info = StreamInfo::new(1, 44_100, 16);
        let decoder = FrameDecoder::new(&header(info, CompressionLevel::Fast, &[4])).unwrap();
        assert!(matches!(
            decoder.decode(0, &[0, 0, 0, 0, flags::PSEUDO_STEREO]),
            Err(Error::CorruptStream {
                source: FrameError::PseudoStereoWithoutStereo(1),
                ..
            })
        ));
    }

    #[test]
    fn detects_trailing_bytes_and_padding() {
        let info = StreamInfo::new(1, 44_100, 16);
        let samples = noise(300, 16, 5);
        let bytes = FrameEncoder::new(info, CompressionLevel::Normal)
            .encode(&samples)
            .unwrap();
        let decoder = FrameDecoder::new(&header(info, CompressionLevel::Normal, &[300])).unwrap();

        let mut longer = bytes.clone();
        longer.extend([0, 0]);
        assert!(matches!(
            decoder.decode(0, &longer),
            Err(Error::CorruptStream {
                source: FrameError::TrailingBytes(2),
                ..
            })
        ));

        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            decoder.decode(0, truncated),
            Err(Error::TruncatedStream { frame: 0, .. })
                | Err(Error::CorruptStream { frame: 0, .. })
        ));
    }

    #[test]
    fn checksum_mismatch_returns_samples() {
        let info = StreamInfo::new(1, 44_100, 16);
        let samples = noise(64, 16, 3);
        let mut bytes = FrameEncoder::new(info, CompressionLevel::Fast)
            .encode(&samples)
            .unwrap();
        bytes[0] ^= 0xFF;

        let decoder = FrameDecoder::new(&header(info, CompressionLevel::Fast, &[64])).unwrap();
        match decoder.decode(0, &bytes) {
            Err(Error::IntegrityCheckFailed {
                scope: ChecksumScope::Frame(0),
                samples: decoded,
                ..
            }) => assert_eq!(decoded, samples),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn frame_index_out_of_range() {
        let info = StreamInfo::new(1, 44_100, 16);
        let decoder = FrameDecoder::new(&header(info, CompressionLevel::Fast, &[4, 4])).unwrap();
        assert!(matches!(
            decoder.decode(2, &[]),
            Err(Error::OutOfRange { index: 2, limit: 2 })
        ));
        assert!(matches!(
            decoder.decode(1, &[]),
            Err(Error::TruncatedStream {
                frame: 1,
                frames_completed: 0
            })
        ));
    }

    #[test]
    fn small_mono_frames() {
        let info = StreamInfo::new(1, 44_100, 16);
        let frames = [
            [0, 0, 0, 0],
            [100, 100, 100, 100],
            [-50, 50, -50, 50],
            [32767, -32768, 0, 1],
        ];
        for frame in frames {
            round_trip(info, CompressionLevel::Normal, &frame);
        }
    }
}
