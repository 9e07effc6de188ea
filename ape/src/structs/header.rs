//! Container header and stream parameters.
//!
//! ## Layout
//!
//! Every field is little-endian. The header is followed by the seek table,
//! the frames and a trailing CRC-32 over all decoded samples.
//!
//! | Offset | Field                | Type      |
//! |--------|----------------------|-----------|
//! | 0      | magic `"MAC "`       | `[u8; 4]` |
//! | 4      | version              | u16       |
//! | 6      | checksum algorithm   | u16       |
//! | 8      | channels             | u16       |
//! | 10     | bits per sample      | u16       |
//! | 12     | sample rate          | u32       |
//! | 16     | compression level id | u16       |
//! | 18     | format flags         | u16       |
//! | 20     | blocks per frame     | u32       |
//! | 24     | final frame blocks   | u32       |
//! | 28     | total frames         | u32       |
//! | 32     | seek table entries   | u32       |
//! | 36     | total blocks         | u64       |
//! | 44     | frame data bytes     | u64       |
//! | 52     | CRC-32 of bytes 0-51 | u32       |

use ape_macros::ToBytes;
use log::trace;

use crate::structs::level::CompressionLevel;
use crate::utils::byteorder::{ReadBytesLe, WriteBytesLe};
use crate::utils::crc::CRC32;
use crate::utils::errors::{FormatError, HeaderError, Result, ShapeError};

pub const MAGIC: [u8; 4] = *b"MAC ";

pub const FORMAT_VERSION: u16 = 1;

/// Checksum algorithm tag for reflected IEEE CRC-32.
pub const CHECKSUM_CRC32: u16 = 1;

/// Header length without the trailing CRC.
pub const HEADER_FIELDS_LEN: usize = 52;

pub const HEADER_LEN: usize = HEADER_FIELDS_LEN + 4;

/// Length of the CRC-32 that closes the stream.
pub const TRAILER_LEN: usize = 4;

pub const SEEK_ENTRY_LEN: usize = 8;

pub const MAX_CHANNELS: u16 = 32;

pub const MAX_BLOCKS_PER_FRAME: u32 = 1 << 22;

pub const SUPPORTED_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

/// Format parameters fixed for the lifetime of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl StreamInfo {
    pub fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
        }
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        if !(1..=MAX_CHANNELS).contains(&self.channels) {
            return Err(ShapeError::ChannelCount {
                actual: self.channels,
                max: MAX_CHANNELS,
            });
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bits_per_sample) {
            return Err(ShapeError::BitDepth(self.bits_per_sample));
        }
        if self.sample_rate == 0 {
            return Err(ShapeError::SampleRate);
        }

        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Smallest and largest sample value representable at this bit depth.
    pub fn sample_bounds(&self) -> (i64, i64) {
        let half = 1i64 << (self.bits_per_sample.clamp(1, 32) - 1);
        (-half, half - 1)
    }

    #[inline(always)]
    pub fn fits(&self, sample: i64) -> bool {
        let (min, max) = self.sample_bounds();
        (min..=max).contains(&sample)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ToBytes)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u16,
    pub checksum_algorithm: u16,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub compression_level: u16,
    pub format_flags: u16,
    pub blocks_per_frame: u32,
    pub final_frame_blocks: u32,
    pub total_frames: u32,
    pub seek_table_entries: u32,
    pub total_blocks: u64,
    pub frame_data_bytes: u64,
}

impl Header {
    /// Header for a stream that has no frames yet.
    pub fn new(
        info: &StreamInfo,
        level: CompressionLevel,
        blocks_per_frame: u32,
        seek_table_entries: u32,
    ) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            checksum_algorithm: CHECKSUM_CRC32,
            channels: info.channels,
            bits_per_sample: info.bits_per_sample,
            sample_rate: info.sample_rate,
            compression_level: level.id(),
            format_flags: 0,
            blocks_per_frame,
            final_frame_blocks: 0,
            total_frames: 0,
            seek_table_entries,
            total_blocks: 0,
            frame_data_bytes: 0,
        }
    }

    /// Serializes the header followed by its CRC.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        self.write_le(&mut bytes);
        let crc = CRC32.checksum(&bytes);
        crc.write_le(&mut bytes);

        bytes
    }

    /// Parses and validates a header from the first [`HEADER_LEN`] bytes of
    /// `src`.
    pub fn read(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(HeaderError::Truncated(HEADER_LEN).into());
        }

        let mut r = &src[..HEADER_LEN];

        let magic = <[u8; 4]>::read_le(&mut r)?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic).into());
        }

        let version = u16::read_le(&mut r)?;
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version).into());
        }

        let checksum_algorithm = u16::read_le(&mut r)?;
        if checksum_algorithm != CHECKSUM_CRC32 {
            return Err(FormatError::UnsupportedChecksum(checksum_algorithm).into());
        }

        let header = Self {
            magic,
            version,
            checksum_algorithm,
            channels: u16::read_le(&mut r)?,
            bits_per_sample: u16::read_le(&mut r)?,
            sample_rate: u32::read_le(&mut r)?,
            compression_level: u16::read_le(&mut r)?,
            format_flags: u16::read_le(&mut r)?,
            blocks_per_frame: u32::read_le(&mut r)?,
            final_frame_blocks: u32::read_le(&mut r)?,
            total_frames: u32::read_le(&mut r)?,
            seek_table_entries: u32::read_le(&mut r)?,
            total_blocks: u64::read_le(&mut r)?,
            frame_data_bytes: u64::read_le(&mut r)?,
        };

        let read = u32::read_le(&mut r)?;
        let calculated = CRC32.checksum(&src[..HEADER_FIELDS_LEN]);
        if read != calculated {
            return Err(HeaderError::CrcMismatch { calculated, read }.into());
        }

        header.validate()?;
        trace!("{header:?}");

        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        self.level()?;
        if self.format_flags != 0 {
            return Err(FormatError::ReservedFlags(self.format_flags).into());
        }

        self.info().validate().map_err(HeaderError::from)?;

        if !(1..=MAX_BLOCKS_PER_FRAME).contains(&self.blocks_per_frame) {
            return Err(HeaderError::from(ShapeError::BlocksPerFrame {
                actual: self.blocks_per_frame,
                max: MAX_BLOCKS_PER_FRAME,
            })
            .into());
        }

        if self.total_frames > self.seek_table_entries {
            return Err(HeaderError::FrameCountExceedsTable {
                frames: self.total_frames,
                entries: self.seek_table_entries,
            }
            .into());
        }

        let final_range = if self.total_frames == 0 {
            0..=0
        } else {
            1..=self.blocks_per_frame
        };
        if !final_range.contains(&self.final_frame_blocks) {
            return Err(HeaderError::FinalFrameBlocks {
                final_blocks: self.final_frame_blocks,
                per_frame: self.blocks_per_frame,
            }
            .into());
        }

        let expected = self.layout_blocks();
        if expected != self.total_blocks {
            return Err(HeaderError::TotalBlocksMismatch {
                expected,
                read: self.total_blocks,
            }
            .into());
        }

        Ok(())
    }

    /// Total blocks implied by the frame count and frame lengths.
    fn layout_blocks(&self) -> u64 {
        match self.total_frames {
            0 => 0,
            n => (n as u64 - 1) * self.blocks_per_frame as u64 + self.final_frame_blocks as u64,
        }
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo::new(self.channels, self.sample_rate, self.bits_per_sample)
    }

    pub fn level(&self) -> Result<CompressionLevel, FormatError> {
        CompressionLevel::from_id(self.compression_level)
    }

    /// Blocks held by frame `index`, or `None` past the last frame.
    pub fn frame_blocks(&self, index: usize) -> Option<u32> {
        let frames = self.total_frames as usize;
        if index + 1 < frames {
            Some(self.blocks_per_frame)
        } else if index + 1 == frames {
            Some(self.final_frame_blocks)
        } else {
            None
        }
    }

    /// Absolute offset of the first frame.
    pub fn data_start(&self) -> u64 {
        (HEADER_LEN + self.seek_table_entries as usize * SEEK_ENTRY_LEN) as u64
    }

    /// Absolute offset of the trailing stream checksum.
    pub fn data_end(&self) -> u64 {
        self.data_start().saturating_add(self.frame_data_bytes)
    }

    /// Total container length implied by the header.
    pub fn stream_len(&self) -> u64 {
        self.data_end().saturating_add(TRAILER_LEN as u64)
    }
}
