//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, CRC validation, little-endian serialization, error
//! handling and the rolling history buffers used by the adaptive filters.

pub mod bitstream_io;
pub mod byteorder;
pub mod crc;
pub mod errors;
pub mod roll_buffer;
