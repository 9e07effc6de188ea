use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::thread;

use log::Level::Warn;
use log::{debug, info, warn};

use crate::log_or_err;
use crate::process::frame::FrameDecoder;
use crate::structs::header::{HEADER_LEN, Header, SEEK_ENTRY_LEN, StreamInfo, TRAILER_LEN};
use crate::structs::level::CompressionLevel;
use crate::structs::seek_table::SeekTable;
use crate::utils::byteorder::ReadBytesLe;
use crate::utils::crc::SampleCrc;
use crate::utils::errors::{ChecksumScope, Error, HeaderError, Result};

/// Validation policy shared by the container readers.
#[derive(Debug, Clone)]
pub struct DecoderState {
    pub fail_level: log::Level,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub index: usize,
    /// Position of the frame's first block within the stream.
    pub first_block: u64,
    /// Interleaved samples, `blocks * channels` of them.
    pub samples: Vec<i32>,
}

/// Random-access reader for a compressed stream.
///
/// The header and seek table are parsed and validated by [`Decoder::open`].
/// Frames are then read on demand, in any order, each from a fresh filter
/// state.
pub struct Decoder<R> {
    source: R,
    base: u64,
    source_len: u64,
    header: Header,
    seek_table: SeekTable,
    frames: FrameDecoder,
    state: DecoderState,
}

impl<R: Read + Seek> Decoder<R> {
    /// Opens a stream that starts at the current position of `source`.
    pub fn open(source: R) -> Result<Self> {
        Self::open_with_fail_level(source, log::Level::Error)
    }

    /// Opens a stream, promoting soft validation failures at or above
    /// `fail_level` to errors.
    pub fn open_with_fail_level(mut source: R, fail_level: log::Level) -> Result<Self> {
        let state = DecoderState { fail_level };

        let base = source.stream_position()?;
        let source_len = source.seek(SeekFrom::End(0))?.saturating_sub(base);
        source.seek(SeekFrom::Start(base))?;

        if source_len < HEADER_LEN as u64 {
            return Err(HeaderError::Truncated(HEADER_LEN).into());
        }
        let mut head = [0u8; HEADER_LEN];
        source.read_exact(&mut head)?;
        let header = Header::read(&head)?;

        let table_len = header.seek_table_entries as usize * SEEK_ENTRY_LEN;
        if source_len < (HEADER_LEN + table_len) as u64 {
            return Err(HeaderError::Truncated(HEADER_LEN + table_len).into());
        }
        let table = read_vec(&mut source, table_len)?;
        let seek_table = SeekTable::read(&state, &header, &table)?;

        let frames = FrameDecoder::new(&header)?;

        let decoder = Self {
            source,
            base,
            source_len,
            header,
            seek_table,
            frames,
            state,
        };
        decoder.check_length()?;

        let info = decoder.info();
        info!(
            "Opened stream: {} ch, {} Hz, {} bit, level {}, {} blocks in {} frames",
            info.channels,
            info.sample_rate,
            info.bits_per_sample,
            decoder.level(),
            decoder.total_blocks(),
            decoder.total_frames()
        );

        Ok(decoder)
    }

    fn check_length(&self) -> Result<()> {
        let expected = self.header.stream_len();

        if self.source_len < expected {
            warn!(
                "Stream is {} bytes shorter than declared; trailing frames are truncated",
                expected - self.source_len
            );
        } else if self.source_len > expected {
            log_or_err!(
                self.state,
                Warn,
                HeaderError::TrailingData(self.source_len - expected)
            );
        }

        Ok(())
    }

    /// Sets the failure level for validation errors.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    ///
    /// Applies to the checks run by [`Decoder::verify`].
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }

    pub fn info(&self) -> StreamInfo {
        self.header.info()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn seek_table(&self) -> &SeekTable {
        &self.seek_table
    }

    pub fn level(&self) -> CompressionLevel {
        self.header.level().unwrap_or_default()
    }

    pub fn total_frames(&self) -> usize {
        self.header.total_frames as usize
    }

    /// Samples per channel.
    pub fn total_blocks(&self) -> u64 {
        self.header.total_blocks
    }

    pub fn blocks_per_frame(&self) -> u32 {
        self.header.blocks_per_frame
    }

    /// Index of the frame holding block `position`.
    pub fn seek(&self, position: u64) -> Result<usize> {
        if position >= self.header.total_blocks {
            return Err(Error::OutOfRange {
                index: position,
                limit: self.header.total_blocks,
            });
        }

        Ok((position / self.header.blocks_per_frame as u64) as usize)
    }

    /// A decoder for single frames that can be moved to other threads.
    pub fn frame_decoder(&self) -> FrameDecoder {
        self.frames.clone()
    }

    /// Raw bytes of frame `index`. A frame cut short by the end of the
    /// source yields only the bytes that are present.
    pub fn frame_bytes(&mut self, index: usize) -> Result<Vec<u8>> {
        let (start, end) = self
            .seek_table
            .span(index, self.header.data_end())
            .ok_or(Error::OutOfRange {
                index: index as u64,
                limit: self.header.total_frames as u64,
            })?;

        let end = end.min(self.source_len);
        let len = end.saturating_sub(start) as usize;

        self.source.seek(SeekFrom::Start(self.base + start))?;
        read_vec(&mut self.source, len)
    }

    pub fn decode_frame(&mut self, index: usize) -> Result<DecodedFrame> {
        Ok(DecodedFrame {
            index,
            first_block: index as u64 * self.header.blocks_per_frame as u64,
            samples: self.decode_frame_samples(index)?,
        })
    }

    fn decode_frame_samples(&mut self, index: usize) -> Result<Vec<i32>> {
        let bytes = self.frame_bytes(index)?;
        let samples = self.frames.decode(index, &bytes)?;
        debug!("Frame {index}: {} bytes, {} samples", bytes.len(), samples.len());

        Ok(samples)
    }

    /// Decodes `len` blocks starting at block `start`.
    ///
    /// Decoding begins at the frame holding `start`; the blocks in front of
    /// `start` are decoded and dropped. Frame checksum mismatches are handled
    /// as in [`Decoder::decode_all`].
    pub fn decode_range(&mut self, start: u64, len: u64) -> Result<Vec<i32>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let total = self.header.total_blocks;
        let end = start.checked_add(len).filter(|&end| end <= total).ok_or(
            Error::OutOfRange {
                index: start.saturating_add(len - 1),
                limit: total,
            },
        )?;

        let channels = self.header.channels as usize;
        let mut out = Vec::new();
        out.try_reserve_exact(len as usize * channels)?;
        let mut mismatch = None;

        let first = self.seek(start)?;
        for index in first..=self.seek(end - 1)? {
            let result = self.decode_frame_samples(index);
            let samples = recover_samples(result, &mut mismatch)
                .map_err(|err| err.with_frames_completed(index - first))?;

            let first_block = index as u64 * self.header.blocks_per_frame as u64;
            let frame_end = first_block + (samples.len() / channels) as u64;
            let from = (start.max(first_block) - first_block) as usize;
            let to = (end.min(frame_end) - first_block) as usize;
            out.extend_from_slice(&samples[from * channels..to * channels]);
        }

        finish_frames(out, mismatch)
    }

    /// Decodes the whole stream and checks the trailing stream checksum.
    ///
    /// A frame whose checksum fails does not stop decoding. Once every frame
    /// is decoded, the first such frame is reported as
    /// [`Error::IntegrityCheckFailed`] carrying the samples of the whole
    /// stream.
    pub fn decode_all(&mut self) -> Result<Vec<i32>> {
        let mut out = self.output_buffer()?;
        let mut mismatch = None;

        for index in 0..self.total_frames() {
            let result = self.decode_frame_samples(index);
            let samples = recover_samples(result, &mut mismatch)
                .map_err(|err| err.with_frames_completed(index))?;
            out.extend_from_slice(&samples);
        }

        let out = finish_frames(out, mismatch)?;
        self.check_stream_checksum(out)
    }

    /// Like [`Decoder::decode_all`], with frames decoded on up to `threads`
    /// threads. `0` uses the available parallelism.
    ///
    /// Frame bytes are read sequentially from the source first. The first
    /// failing frame, in stream order, determines the error.
    pub fn decode_all_parallel(&mut self, threads: usize) -> Result<Vec<i32>> {
        let threads = match threads {
            0 => thread::available_parallelism().map_or(1, NonZeroUsize::get),
            n => n,
        };

        let frame_count = self.total_frames();
        let mut frames = Vec::new();
        frames.try_reserve_exact(frame_count)?;
        for index in 0..frame_count {
            frames.push(self.frame_bytes(index)?);
        }

        let decoder = &self.frames;
        let per_thread = frame_count.div_ceil(threads.max(1)).max(1);
        let decoded: Vec<Result<Vec<i32>>> = thread::scope(|s| {
            let handles: Vec<_> = frames
                .chunks(per_thread)
                .enumerate()
                .map(|(chunk, bytes)| {
                    s.spawn(move || {
                        bytes
                            .iter()
                            .enumerate()
                            .map(|(i, frame)| decoder.decode(chunk * per_thread + i, frame))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });
        drop(frames);

        let mut out = self.output_buffer()?;
        let mut mismatch = None;
        for (index, result) in decoded.into_iter().enumerate() {
            let samples = recover_samples(result, &mut mismatch)
                .map_err(|err| err.with_frames_completed(index))?;
            out.extend_from_slice(&samples);
        }

        let out = finish_frames(out, mismatch)?;
        self.check_stream_checksum(out)
    }

    /// Re-runs the container checks at the current fail level and decodes
    /// every frame, verifying all checksums.
    pub fn verify(&mut self) -> Result<()> {
        self.check_length()?;

        self.source
            .seek(SeekFrom::Start(self.base + HEADER_LEN as u64))?;
        let table = read_vec(&mut self.source, self.seek_table.byte_len())?;
        SeekTable::read(&self.state, &self.header, &table)?;

        self.decode_all()?;
        info!("Verified {} frames", self.total_frames());

        Ok(())
    }

    /// Stored CRC-32 of all decoded samples.
    ///
    /// A missing trailer is reported as a truncation inside the frame past the
    /// last one.
    pub fn stream_checksum(&mut self) -> Result<u32> {
        let data_end = self.header.data_end();
        if self.source_len < data_end + TRAILER_LEN as u64 {
            return Err(Error::TruncatedStream {
                frame: self.total_frames(),
                frames_completed: 0,
            });
        }

        self.source.seek(SeekFrom::Start(self.base + data_end))?;
        Ok(u32::read_le(&mut self.source)?)
    }

    fn check_stream_checksum(&mut self, samples: Vec<i32>) -> Result<Vec<i32>> {
        let frames = self.total_frames();
        let expected = self
            .stream_checksum()
            .map_err(|err| err.with_frames_completed(frames))?;
        let actual = SampleCrc::checksum(self.header.bits_per_sample, &samples);

        if expected != actual {
            return Err(Error::IntegrityCheckFailed {
                scope: ChecksumScope::Stream,
                expected,
                actual,
                samples,
            });
        }

        Ok(samples)
    }

    fn output_buffer(&self) -> Result<Vec<i32>> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.header.total_blocks as usize * self.header.channels as usize)?;
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

/// Stored and calculated checksum of the first frame that failed its check.
struct FrameMismatch {
    frame: usize,
    expected: u32,
    actual: u32,
}

/// Takes the samples of a decoded frame, including those of a frame whose
/// checksum failed; the first such failure is kept in `mismatch`.
fn recover_samples(
    result: Result<Vec<i32>>,
    mismatch: &mut Option<FrameMismatch>,
) -> Result<Vec<i32>> {
    match result {
        Err(Error::IntegrityCheckFailed {
            scope: ChecksumScope::Frame(frame),
            expected,
            actual,
            samples,
        }) => {
            warn!("Frame {frame} checksum mismatch, keeping its samples");
            mismatch.get_or_insert(FrameMismatch {
                frame,
                expected,
                actual,
            });
            Ok(samples)
        }
        other => other,
    }
}

fn finish_frames(samples: Vec<i32>, mismatch: Option<FrameMismatch>) -> Result<Vec<i32>> {
    match mismatch {
        Some(FrameMismatch {
            frame,
            expected,
            actual,
        }) => Err(Error::IntegrityCheckFailed {
            scope: ChecksumScope::Frame(frame),
            expected,
            actual,
            samples,
        }),
        None => Ok(samples),
    }
}

fn read_vec<R: Read>(source: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, 0);
    source.read_exact(&mut buf)?;

    Ok(buf)
}

impl<R> std::fmt::Debug for Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("header", &self.header)
            .field("source_len", &self.source_len)
            .finish_non_exhaustive()
    }
}
