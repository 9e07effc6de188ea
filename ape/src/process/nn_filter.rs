//! Sign-adaptive FIR stage ("neural network" filter).
//!
//! Each stage predicts its input from the last `order` inputs and passes the
//! prediction error on. Coefficients move by a small step every sample, in
//! the direction that would have reduced the error; the step for each tap is
//! remembered alongside the input history and decays as it ages.

use std::collections::TryReserveError;

use crate::structs::level::NnStage;
use crate::utils::roll_buffer::RollBuffer;

#[derive(Debug, Clone)]
pub struct NnFilter {
    shift: u32,
    round: i64,
    wide: bool,
    coeffs: Vec<i32>,
    input: RollBuffer<i32>,
    delta: RollBuffer<i32>,
    running_average: i64,
}

impl NnFilter {
    /// Stored history saturates to `i16` below 32 bits per sample and to
    /// `i32` at 32 bits.
    pub fn new(stage: NnStage, bits_per_sample: u16) -> Result<Self, TryReserveError> {
        let mut coeffs = Vec::new();
        coeffs.try_reserve_exact(stage.order)?;
        coeffs.resize(stage.order, 0);

        Ok(Self {
            shift: stage.shift,
            round: 1 << (stage.shift - 1),
            wide: bits_per_sample >= 32,
            coeffs,
            input: RollBuffer::new(stage.order)?,
            delta: RollBuffer::new(stage.order)?,
            running_average: 0,
        })
    }

    /// Returns the prediction error for `input`.
    #[inline]
    pub fn compress(&mut self, input: i64) -> i64 {
        let output = input.wrapping_sub(self.prediction());
        self.adapt(output);
        self.push(input);

        output
    }

    /// Inverse of [`NnFilter::compress`].
    #[inline]
    pub fn decompress(&mut self, residual: i64) -> i64 {
        let output = residual.wrapping_add(self.prediction());
        self.adapt(residual);
        self.push(output);

        output
    }

    #[inline(always)]
    fn prediction(&self) -> i64 {
        let dot = self
            .input
            .window()
            .iter()
            .zip(&self.coeffs)
            .fold(0i64, |acc, (&x, &m)| {
                acc.wrapping_add((x as i64).wrapping_mul(m as i64))
            });

        dot.wrapping_add(self.round) >> self.shift
    }

    #[inline(always)]
    fn adapt(&mut self, error: i64) {
        let deltas = self.delta.window();
        if error > 0 {
            for (m, &d) in self.coeffs.iter_mut().zip(deltas) {
                *m = m.wrapping_sub(d);
            }
        } else if error < 0 {
            for (m, &d) in self.coeffs.iter_mut().zip(deltas) {
                *m = m.wrapping_add(d);
            }
        }
    }

    #[inline(always)]
    fn push(&mut self, value: i64) {
        let magnitude = value.saturating_abs();
        let avg = self.running_average;

        let step = if magnitude > avg.saturating_mul(3) {
            32
        } else if magnitude > avg.saturating_mul(4) / 3 {
            16
        } else if magnitude > 0 {
            8
        } else {
            0
        };
        self.delta.push(if value < 0 { step } else { -step });

        self.running_average = avg.wrapping_add(magnitude.wrapping_sub(avg) / 16);

        for lag in [1, 2, 8] {
            if lag < self.delta.history() {
                *self.delta.back_mut(lag) >>= 1;
            }
        }

        self.input.push(self.saturate(value));
    }

    #[inline(always)]
    fn saturate(&self, value: i64) -> i32 {
        if self.wide {
            value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
        } else {
            value.clamp(i16::MIN as i64, i16::MAX as i64) as i32
        }
    }
}
