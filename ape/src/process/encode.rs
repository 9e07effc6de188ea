use std::io::{self, Read, Seek, SeekFrom, Write};
use std::thread;

use log::{debug, info};

use crate::process::frame::FrameEncoder;
use crate::structs::header::{Header, MAX_BLOCKS_PER_FRAME, SEEK_ENTRY_LEN, StreamInfo};
use crate::structs::level::CompressionLevel;
use crate::structs::seek_table::SeekTable;
use crate::utils::crc::SampleCrc;
use crate::utils::errors::{Result, ShapeError};

/// Upper bound for [`EncoderConfig::threads`].
pub const MAX_THREADS: usize = 256;

/// Encoder settings that do not change the stream format parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EncoderConfig {
    pub level: CompressionLevel,
    /// Overrides the level's default frame length.
    pub blocks_per_frame: Option<u32>,
    /// Number of frames encoded concurrently, clamped to
    /// `1..=`[`MAX_THREADS`].
    pub threads: usize,
    /// Announced stream length in blocks.
    ///
    /// When set, the seek table is reserved up front and frames go straight
    /// to the sink instead of being held in memory until
    /// [`Encoder::finalize`]. Encoding more blocks than announced fails with
    /// [`ShapeError::CapacityExceeded`].
    pub expected_blocks: Option<u64>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            level: CompressionLevel::default(),
            blocks_per_frame: None,
            threads: 1,
            expected_blocks: None,
        }
    }
}

impl EncoderConfig {
    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_blocks_per_frame(mut self, blocks: u32) -> Self {
        self.blocks_per_frame = Some(blocks);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_expected_blocks(mut self, blocks: u64) -> Self {
        self.expected_blocks = Some(blocks);
        self
    }

    pub fn blocks_per_frame(&self) -> u32 {
        self.blocks_per_frame
            .unwrap_or(self.level.default_blocks_per_frame())
    }
}

/// Streaming encoder writing one container to `sink`.
///
/// Samples are buffered until a frame is complete. [`Encoder::finalize`]
/// flushes the last, possibly shorter, frame and backpatches the header and
/// seek table.
pub struct Encoder<W: Write + Seek> {
    sink: W,
    base: u64,
    info: StreamInfo,
    header: Header,
    frames: FrameEncoder,
    threads: usize,
    /// Seek table capacity reserved in the sink, if any.
    reserved: Option<u32>,
    /// Frame offsets relative to the start of the frame data.
    offsets: Vec<u64>,
    /// Frame data held back until the table size is known.
    spool: Vec<u8>,
    pending: Vec<i32>,
    stream_crc: SampleCrc,
    frame_data_bytes: u64,
    final_frame_blocks: u32,
}

impl<W: Write + Seek> Encoder<W> {
    pub fn open(
        sink: W,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        level: CompressionLevel,
    ) -> Result<Self> {
        Self::with_config(
            sink,
            StreamInfo::new(channels, sample_rate, bits_per_sample),
            EncoderConfig::default().with_level(level),
        )
    }

    pub fn with_config(mut sink: W, info: StreamInfo, config: EncoderConfig) -> Result<Self> {
        info.validate()?;

        let blocks_per_frame = config.blocks_per_frame();
        if !(1..=MAX_BLOCKS_PER_FRAME).contains(&blocks_per_frame) {
            return Err(ShapeError::BlocksPerFrame {
                actual: blocks_per_frame,
                max: MAX_BLOCKS_PER_FRAME,
            }
            .into());
        }

        let reserved = config
            .expected_blocks
            .map(|blocks| {
                u32::try_from(blocks.div_ceil(blocks_per_frame as u64)).map_err(|_| {
                    ShapeError::CapacityExceeded {
                        capacity: u32::MAX,
                    }
                })
            })
            .transpose()?;

        let header = Header::new(&info, config.level, blocks_per_frame, reserved.unwrap_or(0));
        let base = sink.stream_position()?;

        if let Some(capacity) = reserved {
            // Placeholder header and empty table, rewritten by finalize.
            sink.write_all(&header.to_bytes())?;
            let table_len = capacity as u64 * SEEK_ENTRY_LEN as u64;
            io::copy(&mut io::repeat(0).take(table_len), &mut sink)?;
        }

        info!(
            "Encoding {} ch, {} Hz, {} bit at level {}, {} blocks per frame",
            info.channels, info.sample_rate, info.bits_per_sample, config.level, blocks_per_frame
        );

        Ok(Self {
            sink,
            base,
            info,
            header,
            frames: FrameEncoder::new(info, config.level),
            threads: config.threads.clamp(1, MAX_THREADS),
            reserved,
            offsets: Vec::new(),
            spool: Vec::new(),
            pending: Vec::new(),
            stream_crc: SampleCrc::new(info.bits_per_sample),
            frame_data_bytes: 0,
            final_frame_blocks: 0,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Blocks accepted so far.
    pub fn total_blocks(&self) -> u64 {
        self.header.total_blocks
    }

    fn frame_len(&self) -> usize {
        self.header.blocks_per_frame as usize * self.info.channels as usize
    }

    /// Appends interleaved samples, a whole number of blocks.
    ///
    /// The block is validated as a whole; on error nothing is consumed.
    pub fn encode_samples(&mut self, samples: &[i32]) -> Result<()> {
        let channels = self.info.channels as usize;
        if samples.len() % channels != 0 {
            return Err(ShapeError::Misaligned {
                len: samples.len(),
                channels: self.info.channels,
            }
            .into());
        }

        if let Some((index, &value)) = samples
            .iter()
            .enumerate()
            .find(|&(_, &s)| !self.info.fits(s as i64))
        {
            return Err(ShapeError::SampleOutOfRange {
                index,
                value,
                bits: self.info.bits_per_sample,
            }
            .into());
        }

        let blocks = (samples.len() / channels) as u64;
        if let Some(capacity) = self.reserved {
            let limit = capacity as u64 * self.header.blocks_per_frame as u64;
            if self.header.total_blocks + blocks > limit {
                return Err(ShapeError::CapacityExceeded { capacity }.into());
            }
        }

        self.pending.try_reserve(samples.len())?;
        self.pending.extend_from_slice(samples);
        self.stream_crc.update(samples);
        self.header.total_blocks += blocks;

        let batch = self.frame_len().saturating_mul(self.threads);
        while self.pending.len() >= batch {
            self.flush_frames(self.threads)?;
        }

        Ok(())
    }

    /// Encodes up to `count` frames from the front of the pending samples,
    /// concurrently when there is more than one.
    ///
    /// Samples leave the pending buffer frame by frame as their frame is
    /// written, so a failed write leaves that frame and the ones after it
    /// pending for the next call.
    fn flush_frames(&mut self, count: usize) -> Result<()> {
        let frame_len = self.frame_len();
        let take = count.saturating_mul(frame_len).min(self.pending.len());
        if take == 0 {
            return Ok(());
        }

        let encoder = &self.frames;
        let pending = &self.pending[..take];
        let encoded: Vec<Result<Vec<u8>>> = if take > frame_len {
            thread::scope(|s| {
                let handles: Vec<_> = pending
                    .chunks(frame_len)
                    .map(|frame| s.spawn(move || encoder.encode(frame)))
                    .collect();

                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            })
        } else {
            vec![encoder.encode(pending)]
        };

        let channels = self.info.channels as usize;
        let blocks: Vec<u32> = pending
            .chunks(frame_len)
            .map(|frame| (frame.len() / channels) as u32)
            .collect();

        let mut written = 0;
        let mut result = Ok(());
        for (bytes, blocks) in encoded.into_iter().zip(blocks) {
            result = bytes.and_then(|bytes| self.write_frame(bytes, blocks));
            if result.is_err() {
                break;
            }
            written += blocks as usize * channels;
        }

        self.pending.drain(..written);
        result
    }

    fn write_frame(&mut self, bytes: Vec<u8>, blocks: u32) -> Result<()> {
        let capacity = self.reserved.unwrap_or(u32::MAX);
        if self.offsets.len() >= capacity as usize {
            return Err(ShapeError::CapacityExceeded { capacity }.into());
        }

        self.offsets.try_reserve(1)?;
        if self.reserved.is_some() {
            self.sink.write_all(&bytes)?;
        } else {
            self.spool.try_reserve(bytes.len())?;
            self.spool.extend_from_slice(&bytes);
        }
        self.offsets.push(self.frame_data_bytes);

        debug!(
            "Frame {}: {blocks} blocks, {} bytes",
            self.offsets.len() - 1,
            bytes.len()
        );

        self.frame_data_bytes += bytes.len() as u64;
        self.final_frame_blocks = blocks;

        Ok(())
    }

    /// Encodes the remaining samples, writes the seek table and the final
    /// header, and hands back the sink.
    pub fn finalize(mut self) -> Result<W> {
        while !self.pending.is_empty() {
            self.flush_frames(self.threads)?;
        }

        let frames = self.offsets.len() as u32;
        let header = &mut self.header;
        header.total_frames = frames;
        header.final_frame_blocks = if frames == 0 { 0 } else { self.final_frame_blocks };
        header.frame_data_bytes = self.frame_data_bytes;
        header.seek_table_entries = self.reserved.unwrap_or(frames);

        let table = SeekTable::from_relative(
            &self.offsets,
            header.data_start(),
            header.seek_table_entries,
        )?;

        let mut head = header.to_bytes();
        head.try_reserve(table.byte_len())?;
        table.write_le(&mut head);

        let trailer = self.stream_crc.value().to_le_bytes();

        if self.reserved.is_some() {
            self.sink.write_all(&trailer)?;
            let end = self.sink.stream_position()?;
            self.sink.seek(SeekFrom::Start(self.base))?;
            self.sink.write_all(&head)?;
            self.sink.seek(SeekFrom::Start(end))?;
        } else {
            self.sink.write_all(&head)?;
            self.sink.write_all(&self.spool)?;
            self.sink.write_all(&trailer)?;
        }
        self.sink.flush()?;

        info!(
            "Finalized {} blocks in {} frames, {} bytes of frame data",
            self.header.total_blocks, frames, self.frame_data_bytes
        );

        Ok(self.sink)
    }
}
