use std::collections::TryReserveError;
use std::fmt;
use std::io;

/// Logs a soft validation failure, or returns it as an error when its level is
/// at or above the configured fail level.
#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which checksum failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumScope {
    Frame(usize),
    Stream,
}

impl fmt::Display for ChecksumScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumScope::Frame(i) => write!(f, "frame {i}"),
            ChecksumScope::Stream => write!(f, "stream"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid sample shape: {0}")]
    InvalidSampleShape(#[from] ShapeError),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(#[from] FormatError),

    #[error("Corrupt header: {0}")]
    CorruptHeader(#[from] HeaderError),

    #[error("Stream truncated inside frame {frame} after {frames_completed} decoded frames")]
    TruncatedStream {
        frame: usize,
        frames_completed: usize,
    },

    #[error("Corrupt stream in frame {frame}: {source}")]
    CorruptStream {
        frame: usize,
        #[source]
        source: FrameError,
    },

    #[error(
        "Integrity check failed for {scope}. Stored {expected:#010X}, calculated {actual:#010X}"
    )]
    IntegrityCheckFailed {
        scope: ChecksumScope,
        expected: u32,
        actual: u32,
        /// The decoded samples, interleaved. They are delivered as-is so the
        /// caller can decide whether a checksum mismatch is fatal.
        samples: Vec<i32>,
    },

    #[error("Index {index} out of range, limit is {limit}")]
    OutOfRange { index: u64, limit: u64 },

    #[error("Allocation failed: {0}")]
    ResourceExhausted(#[from] TryReserveError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Attaches a frame index to a frame-local failure. A truncation found by
    /// a single-frame decode has no completed frames before it.
    pub(crate) fn in_frame(frame: usize, err: FrameError) -> Self {
        match err {
            FrameError::Truncated => Error::TruncatedStream {
                frame,
                frames_completed: 0,
            },
            source => Error::CorruptStream { frame, source },
        }
    }

    /// Sets the number of frames a multi-frame decode finished before it ran
    /// into a truncation. Other errors pass through.
    pub(crate) fn with_frames_completed(self, completed: usize) -> Self {
        match self {
            Error::TruncatedStream { frame, .. } => Error::TruncatedStream {
                frame,
                frames_completed: completed,
            },
            other => other,
        }
    }

    /// Whether the failure is confined to a single frame, leaving the other
    /// frames of the stream decodable.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Error::TruncatedStream { .. }
                | Error::CorruptStream { .. }
                | Error::IntegrityCheckFailed {
                    scope: ChecksumScope::Frame(_),
                    ..
                }
        )
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ShapeError {
    #[error("channel count must be between 1 and {max}. Got {actual}")]
    ChannelCount { actual: u16, max: u16 },

    #[error("bits per sample must be 8, 16, 24 or 32. Got {0}")]
    BitDepth(u16),

    #[error("sample rate must be non-zero")]
    SampleRate,

    #[error("blocks per frame must be between 1 and {max}. Got {actual}")]
    BlocksPerFrame { actual: u32, max: u32 },

    #[error("block of {len} samples is not a multiple of {channels} channels")]
    Misaligned { len: usize, channels: u16 },

    #[error("sample {index} = {value} does not fit in {bits} bits")]
    SampleOutOfRange { index: usize, value: i32, bits: u16 },

    #[error("more than {capacity} frames; the reserved seek table is full")]
    CapacityExceeded { capacity: u32 },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid magic. Read {0:02X?}")]
    BadMagic([u8; 4]),

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("Unsupported checksum algorithm tag {0}")]
    UnsupportedChecksum(u16),

    #[error("Unknown compression level {0}")]
    UnknownCompressionLevel(u16),

    #[error("Reserved format flags must be 0. Read {0:#06X}")]
    ReservedFlags(u16),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header is shorter than {0} bytes")]
    Truncated(usize),

    #[error("Header CRC mismatch. Calculated {calculated:#010X}, Read {read:#010X}")]
    CrcMismatch { calculated: u32, read: u32 },

    #[error("{0}")]
    Shape(ShapeError),

    #[error(
        "final_frame_blocks = {final_blocks} must be between 1 and blocks_per_frame = {per_frame}"
    )]
    FinalFrameBlocks { final_blocks: u32, per_frame: u32 },

    #[error("total_frames = {frames} exceeds seek table capacity {entries}")]
    FrameCountExceedsTable { frames: u32, entries: u32 },

    #[error("total_blocks = {read} does not match the frame layout ({expected})")]
    TotalBlocksMismatch { expected: u64, read: u64 },

    #[error("Seek table entry {index} = {offset} is not after the previous entry")]
    SeekOffsetOutOfOrder { index: usize, offset: u64 },

    #[error("Seek table entry {index} = {offset} lies outside the frame data [{start}, {end})")]
    SeekOffsetOutOfBounds {
        index: usize,
        offset: u64,
        start: u64,
        end: u64,
    },

    #[error("Unused seek table entry {index} should be zero. Read {offset}")]
    UnusedSeekEntry { index: usize, offset: u64 },

    #[error("{0} bytes follow the trailing checksum")]
    TrailingData(u64),
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("frame data ends before all samples are decoded")]
    Truncated,

    #[error("unary run longer than {limit} bits")]
    UnaryOverrun { limit: u32 },

    #[error("escape code carries {value}, which fits the regular code at k = {k}")]
    NonCanonicalEscape { value: u64, k: u32 },

    #[error("escape code declares {declared} bits but the value has {actual}")]
    EscapeLengthMismatch { declared: u32, actual: u32 },

    #[error("Invalid frame flags {0:#04X}")]
    InvalidFlags(u8),

    #[error("pseudo-stereo flag set in a {0}-channel stream")]
    PseudoStereoWithoutStereo(u16),

    #[error("decoded sample {value} does not fit in {bits} bits")]
    SampleOutOfRange { value: i64, bits: u16 },

    #[error("padding bits after the last residual should be all zeros")]
    PaddingNotZero,

    #[error("{0} bytes of frame data left after the last residual")]
    TrailingBytes(u64),

    #[error("bitstream error: {0}")]
    Bitstream(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Bitstream(err)
        }
    }
}

impl From<ShapeError> for HeaderError {
    fn from(err: ShapeError) -> Self {
        HeaderError::Shape(err)
    }
}
