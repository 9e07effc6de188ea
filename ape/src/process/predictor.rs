//! Per-channel prediction cascade.
//!
//! Encoding runs three kinds of stages, each on the output of the previous
//! one:
//!
//! 1. a fixed first-order filter, `out = in - ((last * 31) >> 5)`, applied to
//!    both the channel's own input and the cross-channel input;
//! 2. an adaptive predictor over the last three own values and the current
//!    and last two cross-channel values, with sign-sign coefficient updates;
//! 3. the [`NnFilter`] stages of the compression level, shortest first.
//!
//! Decoding runs the same stages in reverse and performs identical updates,
//! so both sides follow the same state trajectory. All arithmetic wraps on
//! `i64`.

use std::collections::TryReserveError;

use crate::process::nn_filter::NnFilter;
use crate::structs::level::CompressionLevel;

/// Stage 2 coefficients for the own-channel features at every frame start.
pub const STAGE2_INITIAL_OWN: [i64; 4] = [360, 317, -109, 98];

/// Stage 2 coefficients for the cross-channel features at every frame start.
pub const STAGE2_INITIAL_CROSS: [i64; 5] = [0; 5];

pub const STAGE2_SHIFT: u32 = 10;

/// Fixed order-1 filter.
#[derive(Debug, Clone, Copy, Default)]
struct FirstOrder {
    last: i64,
}

impl FirstOrder {
    #[inline(always)]
    fn prediction(&self) -> i64 {
        self.last.wrapping_mul(31) >> 5
    }

    #[inline(always)]
    fn compress(&mut self, input: i64) -> i64 {
        let output = input.wrapping_sub(self.prediction());
        self.last = input;
        output
    }

    #[inline(always)]
    fn decompress(&mut self, residual: i64) -> i64 {
        self.last = residual.wrapping_add(self.prediction());
        self.last
    }
}

#[inline(always)]
fn dot<const N: usize>(features: &[i64; N], coeffs: &[i64; N]) -> i64 {
    features
        .iter()
        .zip(coeffs)
        .fold(0i64, |acc, (&f, &m)| acc.wrapping_add(f.wrapping_mul(m)))
}

#[inline(always)]
fn adapt<const N: usize>(coeffs: &mut [i64; N], features: &[i64; N], error: i64) {
    let direction = error.signum();
    if direction != 0 {
        for (m, &f) in coeffs.iter_mut().zip(features) {
            *m = m.wrapping_add(direction * f.signum());
        }
    }
}

/// Adaptive stage-2 predictor state.
#[derive(Debug, Clone)]
struct Stage2 {
    own: [i64; 3],
    cross: [i64; 2],
    own_coeffs: [i64; 4],
    cross_coeffs: [i64; 5],
}

impl Default for Stage2 {
    fn default() -> Self {
        Self {
            own: [0; 3],
            cross: [0; 2],
            own_coeffs: STAGE2_INITIAL_OWN,
            cross_coeffs: STAGE2_INITIAL_CROSS,
        }
    }
}

impl Stage2 {
    #[inline(always)]
    fn features(&self, b0: i64) -> ([i64; 4], [i64; 5]) {
        let [a1, a2, a3] = self.own;
        let [b1, b2] = self.cross;
        (
            [a1, a1.wrapping_sub(a2), a2, a2.wrapping_sub(a3)],
            [b0, b0.wrapping_sub(b1), b1, b1.wrapping_sub(b2), b2],
        )
    }

    #[inline(always)]
    fn prediction(&self, own: &[i64; 4], cross: &[i64; 5]) -> i64 {
        dot(own, &self.own_coeffs).wrapping_add(dot(cross, &self.cross_coeffs) >> 1)
            >> STAGE2_SHIFT
    }

    /// Adapts on `error` and shifts `a0` and `b0` into the history.
    #[inline(always)]
    fn update(&mut self, own: &[i64; 4], cross: &[i64; 5], error: i64, a0: i64, b0: i64) {
        adapt(&mut self.own_coeffs, own, error);
        adapt(&mut self.cross_coeffs, cross, error);

        self.own = [a0, self.own[0], self.own[1]];
        self.cross = [b0, self.cross[0]];
    }

    #[inline(always)]
    fn compress(&mut self, a0: i64, b0: i64) -> i64 {
        let (own, cross) = self.features(b0);
        let error = a0.wrapping_sub(self.prediction(&own, &cross));
        self.update(&own, &cross, error, a0, b0);
        error
    }

    #[inline(always)]
    fn decompress(&mut self, error: i64, b0: i64) -> i64 {
        let (own, cross) = self.features(b0);
        let a0 = error.wrapping_add(self.prediction(&own, &cross));
        self.update(&own, &cross, error, a0, b0);
        a0
    }
}

/// Complete filter state of one channel for one frame.
#[derive(Debug, Clone)]
pub struct Predictor {
    own_filter: FirstOrder,
    cross_filter: FirstOrder,
    stage2: Stage2,
    nn: Vec<NnFilter>,
}

impl Predictor {
    /// Creates the checkpoint state every frame starts from.
    pub fn new(level: CompressionLevel, bits_per_sample: u16) -> Result<Self, TryReserveError> {
        let stages = level.nn_stages();
        let mut nn = Vec::new();
        nn.try_reserve_exact(stages.len())?;
        for &stage in stages {
            nn.push(NnFilter::new(stage, bits_per_sample)?);
        }

        Ok(Self {
            own_filter: FirstOrder::default(),
            cross_filter: FirstOrder::default(),
            stage2: Stage2::default(),
            nn,
        })
    }

    /// Returns the residual of `sample`, given the cross-channel input
    /// `cross` (0 when there is none).
    pub fn compress(&mut self, sample: i64, cross: i64) -> i64 {
        let a0 = self.own_filter.compress(sample);
        let b0 = self.cross_filter.compress(cross);

        let residual = self.stage2.compress(a0, b0);
        self.nn
            .iter_mut()
            .fold(residual, |value, filter| filter.compress(value))
    }

    /// Reconstructs a sample from its residual and the same cross-channel
    /// input the encoder saw.
    pub fn decompress(&mut self, residual: i64, cross: i64) -> i64 {
        let residual = self
            .nn
            .iter_mut()
            .rev()
            .fold(residual, |value, filter| filter.decompress(value));

        let b0 = self.cross_filter.compress(cross);
        let a0 = self.stage2.decompress(residual, b0);
        self.own_filter.decompress(a0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, amplitude: f64, period: f64) -> Vec<i64> {
        (0..len)
            .map(|i| (amplitude * (i as f64 * std::f64::consts::TAU / period).sin()) as i64)
            .collect()
    }

    #[test]
    fn first_order_filter() {
        let mut f = FirstOrder::default();
        assert_eq!(f.compress(100), 100);
        assert_eq!(f.compress(100), 100 - 96);
        assert_eq!(f.compress(-7), -7 - 96);

        let mut g = FirstOrder::default();
        assert_eq!(g.decompress(100), 100);
        assert_eq!(g.decompress(4), 100);
        assert_eq!(g.decompress(-103), -7);
    }

    #[test]
    fn stage2_starts_from_seeded_coefficients() {
        let mut s = Stage2::default();
        s.own = [1000, 800, 600];
        let (own, cross) = s.features(0);
        assert_eq!(own, [1000, 200, 800, 200]);
        // (1000*360 + 200*317 - 800*109 + 200*98) >> 10
        assert_eq!(s.prediction(&own, &cross), 355_800 >> 10);
        assert_eq!(cross, [0; 5]);
    }

    #[test]
    fn sign_sign_adaptation() {
        let mut s = Stage2::default();
        s.own = [10, 20, -5];
        s.cross = [3, 0];
        s.compress(10_000, -4);
        assert_eq!(s.own_coeffs, [361, 316, -108, 99]);
        assert_eq!(s.cross_coeffs, [-1, -1, 1, 1, 0]);
        assert_eq!(s.own, [10_000, 10, 20]);
        assert_eq!(s.cross, [-4, 3]);
    }

    #[test]
    fn round_trip_every_level() {
        let own = tone(6000, 12_000.0, 90.0);
        let cross = tone(6000, 3_000.0, 37.0);

        for level in CompressionLevel::ALL {
            let mut enc = Predictor::new(level, 16).unwrap();
            let mut dec = Predictor::new(level, 16).unwrap();
            for (&a, &b) in own.iter().zip(&cross) {
                let residual = enc.compress(a, b);
                assert_eq!(dec.decompress(residual, b), a, "{level}");
            }
        }
    }

    #[test]
    fn prediction_shrinks_smooth_signal() {
        let input = tone(8000, 20_000.0, 200.0);
        let mut p = Predictor::new(CompressionLevel::Normal, 16).unwrap();
        let residual: Vec<i64> = input.iter().map(|&x| p.compress(x, 0)).collect();

        let peak = |v: &[i64]| v.iter().map(|x| x.unsigned_abs()).max().unwrap_or(0);
        assert!(peak(&residual[4000..]) * 4 < peak(&input[4000..]));
    }

    #[test]
    fn wrapping_on_extreme_values() {
        let mut enc = Predictor::new(CompressionLevel::Insane, 32).unwrap();
        let mut dec = Predictor::new(CompressionLevel::Insane, 32).unwrap();
        for i in 0..3000i64 {
            let a = if i % 3 == 0 { i32::MAX as i64 } else { i32::MIN as i64 + i };
            let b = -a;
            let residual = enc.compress(a, b);
            assert_eq!(dec.decompress(residual, b), a);
        }
    }
}
