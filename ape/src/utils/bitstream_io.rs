//! Bitstream I/O utilities for frame coding.
//!
//! Thin wrappers over `bitstream_io` that add the operations the residual
//! coder needs: bounded unary runs, alignment padding and bit accounting.
//! Bits are packed most significant first.

use std::collections::TryReserveError;
use std::io;

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    /// Reads an `n`-bit unsigned value, `0 <= n <= I::BITS_SIZE`.
    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        if n == 0 {
            return Ok(I::ZERO);
        }

        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // Only call position() on error path to avoid overhead
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "get_n({}): out of bounds bits at {}",
                        n,
                        self.bs.position_in_bits().unwrap_or(0)
                    ),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Counts a run of one bits closed by a zero bit.
    ///
    /// Returns `None` as soon as the run grows past `limit` without a
    /// terminating zero; the reader is then left inside the run.
    #[inline(always)]
    pub fn get_unary_max(&mut self, limit: u32) -> io::Result<Option<u32>> {
        let mut run = 0;
        while self.get()? {
            run += 1;
            if run > limit {
                return Ok(None);
            }
        }

        Ok(Some(run))
    }

    /// Consumes the bits up to the next byte boundary and returns them.
    #[inline(always)]
    pub fn skip_to_alignment(&mut self) -> io::Result<u8> {
        let partial = (self.position()? & 7) as u32;
        if partial == 0 {
            return Ok(0);
        }

        self.get_n::<u8>(8 - partial)
    }

    #[inline(always)]
    pub fn remaining_bits(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

/// Bit writer backed by a growable byte buffer.
pub struct BitstreamIoWriter {
    bs: BitWriter<Vec<u8>, BigEndian>,
    bits: u64,
}

impl BitstreamIoWriter {
    pub fn new() -> Self {
        Self {
            bs: BitWriter::new(Vec::new()),
            bits: 0,
        }
    }

    /// Creates a writer whose buffer can hold `bytes` without reallocating.
    pub fn with_capacity(bytes: usize) -> Result<Self, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve(bytes)?;

        Ok(Self {
            bs: BitWriter::new(buf),
            bits: 0,
        })
    }

    #[inline(always)]
    pub fn put(&mut self, bit: bool) -> io::Result<()> {
        self.bits += 1;
        self.bs.write_bit(bit)
    }

    /// Writes the low `n` bits of `value`, `0 <= n <= 64`.
    #[inline(always)]
    pub fn put_n(&mut self, n: u32, value: u64) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }

        let value = if n < 64 { value & ((1 << n) - 1) } else { value };
        self.bits += n as u64;
        self.bs.write_unsigned_var(n, value)
    }

    /// Writes `run` one bits followed by a terminating zero.
    #[inline(always)]
    pub fn put_unary(&mut self, mut run: u32) -> io::Result<()> {
        while run >= 32 {
            self.put_n(32, u32::MAX as u64)?;
            run -= 32;
        }
        self.put_n(run + 1, ((1u64 << run) - 1) << 1)
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align(&mut self) -> io::Result<()> {
        let partial = (self.bits & 7) as u32;
        if partial != 0 {
            self.put_n(8 - partial, 0)?;
        }

        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.bits
    }

    /// Aligns and returns the written bytes.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        self.align()?;
        Ok(self.bs.into_writer())
    }
}

impl Default for BitstreamIoWriter {
    fn default() -> Self {
        Self::new()
    }
}
