//! Frame offset table stored between the header and the frames.

use log::Level::Warn;

use crate::log_or_err;
use crate::process::decode::DecoderState;
use crate::structs::header::{Header, SEEK_ENTRY_LEN};
use crate::utils::byteorder::{ReadBytesLe, WriteBytesLe};
use crate::utils::errors::{HeaderError, Result};

/// Absolute byte offsets of every frame, plus the number of entries the
/// container reserves for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeekTable {
    offsets: Vec<u64>,
    capacity: u32,
}

impl SeekTable {
    /// Builds a table from frame offsets relative to the start of the frame
    /// data.
    pub fn from_relative(relative: &[u64], data_start: u64, capacity: u32) -> Result<Self> {
        let mut offsets = Vec::new();
        offsets.try_reserve_exact(relative.len())?;
        offsets.extend(relative.iter().map(|offset| data_start + offset));

        Ok(Self { offsets, capacity })
    }

    /// Parses the table that follows `header`, where `src` holds exactly
    /// `header.seek_table_entries` entries.
    pub fn read(state: &DecoderState, header: &Header, mut src: &[u8]) -> Result<Self> {
        let capacity = header.seek_table_entries;
        let frames = header.total_frames as usize;
        let start = header.data_start();
        let end = header.data_end();

        let mut offsets = Vec::new();
        offsets.try_reserve_exact(frames)?;

        for index in 0..capacity as usize {
            let offset = u64::read_le(&mut src)?;

            if index >= frames {
                if offset != 0 {
                    log_or_err!(state, Warn, HeaderError::UnusedSeekEntry { index, offset });
                }
                continue;
            }

            if offset < start || offset >= end {
                return Err(HeaderError::SeekOffsetOutOfBounds {
                    index,
                    offset,
                    start,
                    end,
                }
                .into());
            }
            if offsets.last().is_some_and(|&prev| offset <= prev) {
                return Err(HeaderError::SeekOffsetOutOfOrder { index, offset }.into());
            }

            offsets.push(offset);
        }

        Ok(Self { offsets, capacity })
    }

    /// Serializes every reserved entry; unused entries are zero.
    pub fn write_le(&self, dst: &mut Vec<u8>) {
        self.offsets.write_le(dst);
        for _ in self.offsets.len()..self.capacity as usize {
            0u64.write_le(dst);
        }
    }

    pub fn byte_len(&self) -> usize {
        self.capacity as usize * SEEK_ENTRY_LEN
    }

    pub fn get(&self, frame: usize) -> Option<u64> {
        self.offsets.get(frame).copied()
    }

    /// Byte span `[start, end)` of `frame`, where `data_end` closes the last
    /// frame.
    pub fn span(&self, frame: usize, data_end: u64) -> Option<(u64, u64)> {
        let start = self.get(frame)?;
        let end = self.get(frame + 1).unwrap_or(data_end);

        Some((start, end))
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
