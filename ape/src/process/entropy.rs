//! Adaptive Golomb-Rice coding of prediction residuals.
//!
//! A residual is zig-zag mapped to an unsigned value `u` and split at the
//! current parameter `k` into a quotient `q = u >> k` and `k` low bits.
//!
//! - `q < 32`: `q` one bits, a zero bit, then the `k` low bits.
//! - otherwise (escape): 32 one bits, a zero bit, `len - 1` in 6 bits and
//!   `u` in `len` bits, where `len` is the bit length of `u`.
//!
//! After every value `k_sum` tracks a decaying sum of `ceil(u / 2)` and `k`
//! becomes `floor(log2(k_sum / 16))`, clamped to `0..=bits_per_sample + 2`.

use crate::utils::bitstream_io::{BitstreamIoReader, BitstreamIoWriter};
use crate::utils::errors::FrameError;
use std::io;

/// Quotient at which the regular code gives way to the escape code.
pub const ESCAPE_RUN: u32 = 32;

/// Width of the length field that follows an escape.
pub const ESCAPE_LEN_BITS: u32 = 6;

pub const INITIAL_K: u32 = 10;

pub const INITIAL_K_SUM: u64 = 16_384;

const K_SUM_INCREMENT_MAX: u64 = u32::MAX as u64;

#[inline(always)]
pub fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline(always)]
pub fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

/// Per-channel coder state, reset at every frame start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoderState {
    k: u32,
    k_sum: u64,
    k_max: u32,
}

impl CoderState {
    pub fn new(bits_per_sample: u16) -> Self {
        let k_max = bits_per_sample as u32 + 2;
        Self {
            k: INITIAL_K.min(k_max),
            k_sum: INITIAL_K_SUM,
            k_max,
        }
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn k_max(&self) -> u32 {
        self.k_max
    }

    #[inline(always)]
    fn update(&mut self, u: u64) {
        let increment = ((u >> 1) + (u & 1)).min(K_SUM_INCREMENT_MAX);
        self.k_sum += increment;
        self.k_sum -= (self.k_sum + 16) >> 5;

        self.k = (self.k_sum >> 4).max(1).ilog2().min(self.k_max);
    }

    pub fn encode(&mut self, w: &mut BitstreamIoWriter, residual: i64) -> io::Result<()> {
        let u = zigzag(residual);
        let q = u >> self.k;

        if q < ESCAPE_RUN as u64 {
            w.put_unary(q as u32)?;
            w.put_n(self.k, u)?;
        } else {
            // q >= 32 implies u > 0
            let len = u64::BITS - u.leading_zeros();
            w.put_unary(ESCAPE_RUN)?;
            w.put_n(ESCAPE_LEN_BITS, (len - 1) as u64)?;
            w.put_n(len, u)?;
        }

        self.update(u);
        Ok(())
    }

    pub fn decode<R>(&mut self, r: &mut BitstreamIoReader<R>) -> Result<i64, FrameError>
    where
        R: io::Read + io::Seek,
    {
        let run = r
            .get_unary_max(ESCAPE_RUN)?
            .ok_or(FrameError::UnaryOverrun { limit: ESCAPE_RUN })?;

        let u = if run < ESCAPE_RUN {
            let low: u64 = r.get_n(self.k)?;
            ((run as u64) << self.k) | low
        } else {
            let declared = r.get_n::<u32>(ESCAPE_LEN_BITS)? + 1;
            let u: u64 = r.get_n(declared)?;

            let actual = u64::BITS - u.leading_zeros();
            if actual != declared {
                return Err(FrameError::EscapeLengthMismatch { declared, actual });
            }
            if u >> self.k < ESCAPE_RUN as u64 {
                return Err(FrameError::NonCanonicalEscape { value: u, k: self.k });
            }
            u
        };

        self.update(u);
        Ok(unzigzag(u))
    }
}
