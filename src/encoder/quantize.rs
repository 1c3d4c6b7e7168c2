//! Coefficient quantization.
//!
//! Quantization runs in fixed point: each step has a reciprocal with
//! [`QFIX`] bits of precision and a per-plane rounding bias. Luma AC
//! coefficients get a frequency-dependent sharpening boost before rounding.

use crate::common::quant::Dequantizer;
use crate::common::tables::{MAX_LEVEL, ZIGZAG};

/// Fixed-point precision for quantization
pub(crate) const QFIX: u32 = 17;

/// Rounding bias for a bias value expressed in 1/256.
#[inline]
pub(crate) const fn quantization_bias(b: u32) -> u32 {
    ((b << QFIX) + 128) >> 8
}

/// Quantization division: (coeff * iq + bias) >> QFIX
#[inline]
pub(crate) fn quantdiv(coeff: u32, iq: u32, bias: u32) -> u32 {
    ((u64::from(coeff) * u64::from(iq) + u64::from(bias)) >> QFIX) as u32
}

/// Sharpening boost per coefficient position, in 1/2048 of the step.
const FREQ_SHARPENING: [u16; 16] = [0, 30, 60, 90, 30, 60, 90, 90, 60, 90, 90, 90, 90, 90, 90, 90];

/// Second-order blocks whose dequantized levels sum below this are dropped.
const SUM_Y2_THRESHOLD: i32 = 35;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatrixType {
    Y1,
    Y2,
    UV,
}

/// Quantization parameters for one block type.
#[derive(Clone, Debug)]
pub(crate) struct QuantMatrix {
    /// Quantizer step for each coefficient position
    pub q: [u16; 16],
    /// Reciprocals (1 << QFIX) / q
    pub iq: [u32; 16],
    pub bias: [u32; 16],
    /// Magnitudes at or below this quantize to zero
    pub zthresh: [u32; 16],
    pub sharpen: [u16; 16],
}

impl QuantMatrix {
    /// Builds a matrix from `[dc, ac]` dequantization steps.
    pub(crate) fn new(steps: [u16; 2], kind: MatrixType) -> Self {
        let (dc_bias, ac_bias) = match kind {
            MatrixType::Y1 => (96, 110),
            MatrixType::Y2 => (96, 108),
            MatrixType::UV => (110, 115),
        };

        let mut m = Self {
            q: [0; 16],
            iq: [0; 16],
            bias: [0; 16],
            zthresh: [0; 16],
            sharpen: [0; 16],
        };
        for i in 0..16 {
            let (step, bias) = if i == 0 {
                (steps[0], dc_bias)
            } else {
                (steps[1], ac_bias)
            };
            let step = step.max(1);
            m.q[i] = step;
            m.iq[i] = ((1u64 << QFIX) / u64::from(step)) as u32;
            m.bias[i] = quantization_bias(bias);
            m.zthresh[i] = ((1 << QFIX) - 1 - m.bias[i]) / m.iq[i];
        }

        if kind == MatrixType::Y1 {
            const SHARPEN_BITS: u32 = 11;
            for (i, &freq) in FREQ_SHARPENING.iter().enumerate() {
                m.sharpen[i] = ((u32::from(freq) * u32::from(m.q[i])) >> SHARPEN_BITS) as u16;
            }
        }
        m
    }

    /// Quantizes one coefficient at natural position `pos`.
    #[inline]
    pub(crate) fn quantize_coeff(&self, coeff: i32, pos: usize) -> i16 {
        let magnitude = coeff.unsigned_abs() + u32::from(self.sharpen[pos]);
        if magnitude <= self.zthresh[pos] {
            return 0;
        }
        let level = quantdiv(magnitude, self.iq[pos], self.bias[pos]).min(u32::from(MAX_LEVEL)) as i16;
        if coeff < 0 {
            -level
        } else {
            level
        }
    }

    /// Quantizes a block in natural order, leaving positions before the
    /// zigzag index `first` at zero.
    pub(crate) fn quantize(&self, coeffs: &[i32; 16], first: usize) -> [i16; 16] {
        let mut levels = [0i16; 16];
        for &pos in &ZIGZAG[first..] {
            let pos = usize::from(pos);
            levels[pos] = self.quantize_coeff(coeffs[pos], pos);
        }
        levels
    }
}

/// Matrices of every block type for one quantizer setting.
#[derive(Clone, Debug)]
pub(crate) struct QuantMatrices {
    pub y1: QuantMatrix,
    pub y2: QuantMatrix,
    pub uv: QuantMatrix,
}

impl QuantMatrices {
    pub(crate) fn new(dq: &Dequantizer) -> Self {
        Self {
            y1: QuantMatrix::new(dq.y, MatrixType::Y1),
            y2: QuantMatrix::new(dq.y2, MatrixType::Y2),
            uv: QuantMatrix::new(dq.uv, MatrixType::UV),
        }
    }
}

/// Drops a second-order block whose content is too small to be worth coding
/// at fine quantizers. Returns whether the block was cleared.
pub(crate) fn check_reset_y2(levels: &mut [i16; 16], steps: [u16; 2]) -> bool {
    if i32::from(steps[0]) >= SUM_Y2_THRESHOLD && i32::from(steps[1]) >= SUM_Y2_THRESHOLD {
        return false;
    }
    let sum: i32 = Dequantizer::dequantize(steps, levels).iter().map(|c| c.abs()).sum();
    if sum == 0 || sum >= SUM_Y2_THRESHOLD {
        return false;
    }
    *levels = [0; 16];
    true
}
