//! Residual coding: transform, quantization, rate and reconstruction error
//! of the blocks of one macroblock candidate.
//!
//! Rates are measured against the nonzero contexts the macroblock starts
//! with and advance block by block exactly as the token writer will, so a
//! candidate's rate is what its coefficients cost in place.

use super::{FrameEncoder, SourceMacroblock};
use crate::common::inter_prediction::InterPrediction;
use crate::common::prediction::add_residue;
use crate::common::tables::{MAX_LEVEL, ZIGZAG};
use crate::common::tokens::{
    to_zigzag, NonzeroContext, TYPE_CHROMA, TYPE_Y2, TYPE_Y_AFTER_Y2, TYPE_Y_WITH_DC,
};
use crate::common::transform::{forward_dct, forward_wht};
use crate::decoder::reconstruct::{add_residuals, inverse_block, whole_luma_residuals};
use crate::encoder::cost::sse;
use crate::encoder::quantize::{check_reset_y2, QuantMatrix};
use crate::encoder::trellis::{trellis_quantize, TrellisParams};
use crate::frame::Y2_BLOCK;

/// Nonzero contexts around the macroblock being coded.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct BlockContexts {
    pub above: NonzeroContext,
    pub left: NonzeroContext,
}

/// Whole-block luma levels with their rate and reconstruction error.
pub(super) struct CodedLuma {
    pub blocks: [[i16; 16]; 16],
    pub y2: [i16; 16],
    pub rate: u32,
    pub distortion: u64,
}

/// Levels of the four U then four V blocks.
pub(super) struct CodedChroma {
    pub blocks: [[i16; 16]; 8],
    pub rate: u32,
    pub distortion: u64,
}

/// One 4x4 luma subblock coded with its own DC.
pub(super) struct CodedSubblock {
    pub levels: [i16; 16],
    pub reconstructed: [u8; 16],
    pub rate: u32,
    pub distortion: u64,
    pub nonzero: bool,
}

/// Difference between a source and a prediction over one 4x4 block of a
/// packed `stride`-wide area.
fn residual_block(source: &[u8], pred: &[u8], stride: usize, x0: usize, y0: usize) -> [i32; 16] {
    core::array::from_fn(|k| {
        let idx = (y0 + k / 4) * stride + x0 + k % 4;
        i32::from(source[idx]) - i32::from(pred[idx])
    })
}

/// Whether every pixel of `source` differs from `pred` by the same amount.
fn is_flat_residual(source: &[u8], pred: &[u8]) -> bool {
    let mut diffs = source.iter().zip(pred).map(|(&s, &p)| i32::from(s) - i32::from(p));
    diffs.next().map_or(true, |first| diffs.all(|d| d == first))
}

/// Whether every coefficient from zigzag index `first` on is smaller than
/// two of its quantizer steps.
fn within_two_steps(coeffs: &[i32; 16], mtx: &QuantMatrix, first: usize) -> bool {
    ZIGZAG[first..].iter().all(|&pos| {
        let pos = usize::from(pos);
        coeffs[pos].unsigned_abs() < 2 * u32::from(mtx.q[pos])
    })
}

/// Squared error of one 4x4 block of a packed `stride`-wide area once
/// `residual` is added to the prediction.
fn window_sse(source: &[u8], pred: &[u8], stride: usize, x0: usize, y0: usize, residual: &[i32; 16]) -> u32 {
    (0..16)
        .map(|k| {
            let idx = (y0 + k / 4) * stride + x0 + k % 4;
            let reconstructed = (i32::from(pred[idx]) + residual[k]).clamp(0, 255);
            let d = (i32::from(source[idx]) - reconstructed).unsigned_abs();
            d * d
        })
        .sum()
}

/// DC level for a flat residual. Biased rounding can leave such a block a
/// step short, which clamping at 0 or 255 would have absorbed; the levels
/// next to `rounded` are tried and the one reconstructing closest wins.
/// Ties keep `current`.
fn closest_dc_level(current: i16, rounded: i16, distortion: impl Fn(i16) -> u32) -> i16 {
    let max = MAX_LEVEL as i16;
    let mut best = (current, distortion(current));
    for level in [rounded - 1, rounded, rounded + 1] {
        let level = level.clamp(-max, max);
        let d = distortion(level);
        if d < best.1 {
            best = (level, d);
        }
    }
    best.0
}

impl FrameEncoder<'_> {
    /// Quantizes one block, trellis-optimized when enabled. Falls back to
    /// plain rounding when the trellis finds nothing to search.
    pub(super) fn quantize_block(
        &self,
        coeffs: &[i32; 16],
        mtx: &QuantMatrix,
        first: usize,
        ctx0: usize,
        ctype: usize,
        lambda: u32,
    ) -> [i16; 16] {
        if self.config.trellis {
            let params = TrellisParams {
                costs: &self.level_costs,
                ctype,
                lambda,
                distortion: self.lambdas.distortion,
            };
            if let Some(levels) = trellis_quantize(coeffs, mtx, first, ctx0, &params) {
                return levels;
            }
        }
        mtx.quantize(coeffs, first)
    }

    /// Codes a 16x16 luma residual through the Y2 block.
    pub(super) fn code_whole_luma(&self, pred: &[u8], source: &[u8; 256], ctx: &BlockContexts) -> CodedLuma {
        let mut coeffs = [[0i32; 16]; 16];
        for (i, block) in coeffs.iter_mut().enumerate() {
            *block = residual_block(source, pred, 16, (i % 4) * 4, (i / 4) * 4);
            forward_dct(block);
        }

        let mut dc: [i32; 16] = core::array::from_fn(|i| coeffs[i][0]);
        forward_wht(&mut dc);
        let mut y2 = self.matrices.y2.quantize(&dc, 0);
        check_reset_y2(&mut y2, self.dq.y2);
        if is_flat_residual(source, pred) {
            // Only the second-order DC survives a flat residual.
            let rounded = self.matrices.y2.quantize_coeff(dc[0], 0);
            let level = closest_dc_level(y2[0], rounded, |level| {
                let mut all = [[0i16; 16]; 25];
                all[Y2_BLOCK] = y2;
                all[Y2_BLOCK][0] = level;
                sse(source, &add_residuals(pred, 16, &whole_luma_residuals(&all, &self.dq)))
            });
            y2[0] = level;
        }

        let y2_ctx = usize::from(ctx.above.y2) + usize::from(ctx.left.y2);
        let mut rate = self.level_costs.block_rate(TYPE_Y2, &to_zigzag(&y2), 0, y2_ctx);

        let mut above = ctx.above.y;
        let mut left = ctx.left.y;
        let mut blocks = [[0i16; 16]; 16];
        for (i, block) in coeffs.iter().enumerate() {
            let (row, col) = (i / 4, i % 4);
            let ctx0 = usize::from(above[col]) + usize::from(left[row]);
            let levels = self.quantize_block(
                block,
                &self.matrices.y1,
                1,
                ctx0,
                TYPE_Y_AFTER_Y2,
                self.lambdas.trellis_i16,
            );
            let zigzag = to_zigzag(&levels);
            rate += self.level_costs.block_rate(TYPE_Y_AFTER_Y2, &zigzag, 1, ctx0);
            let nonzero = zigzag[1..].iter().any(|&l| l != 0);
            above[col] = nonzero;
            left[row] = nonzero;
            blocks[i] = levels;
        }

        let mut all = [[0i16; 16]; 25];
        all[..16].copy_from_slice(&blocks);
        all[Y2_BLOCK] = y2;
        let reconstructed = add_residuals(pred, 16, &whole_luma_residuals(&all, &self.dq));

        CodedLuma {
            blocks,
            y2,
            rate,
            distortion: u64::from(sse(source, &reconstructed)),
        }
    }

    /// Codes both 8x8 chroma residuals.
    pub(super) fn code_chroma(
        &self,
        pred_u: &[u8],
        pred_v: &[u8],
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> CodedChroma {
        let mut blocks = [[0i16; 16]; 8];
        let mut rate = 0;
        let mut distortion = 0u64;
        let planes = [
            (pred_u, &source.u, ctx.above.u, ctx.left.u),
            (pred_v, &source.v, ctx.above.v, ctx.left.v),
        ];

        for (p, (pred, src, mut above, mut left)) in planes.into_iter().enumerate() {
            let mut residuals = [[0i32; 16]; 4];
            for (i, residual) in residuals.iter_mut().enumerate() {
                let (row, col) = (i / 2, i % 2);
                let (x0, y0) = (col * 4, row * 4);
                let difference = residual_block(src, pred, 8, x0, y0);
                let mut coeffs = difference;
                forward_dct(&mut coeffs);
                let ctx0 = usize::from(above[col]) + usize::from(left[row]);
                let mut levels = self.quantize_block(
                    &coeffs,
                    &self.matrices.uv,
                    0,
                    ctx0,
                    TYPE_CHROMA,
                    self.lambdas.trellis_uv,
                );
                if difference.iter().all(|&d| d == difference[0]) {
                    let rounded = self.matrices.uv.quantize_coeff(coeffs[0], 0);
                    let dc = closest_dc_level(levels[0], rounded, |dc| {
                        let mut trial = levels;
                        trial[0] = dc;
                        window_sse(src, pred, 8, x0, y0, &inverse_block(self.dq.uv, &trial, None))
                    });
                    levels[0] = dc;
                }
                let zigzag = to_zigzag(&levels);
                rate += self.level_costs.block_rate(TYPE_CHROMA, &zigzag, 0, ctx0);
                let nonzero = zigzag.iter().any(|&l| l != 0);
                above[col] = nonzero;
                left[row] = nonzero;
                *residual = inverse_block(self.dq.uv, &levels, None);
                blocks[p * 4 + i] = levels;
            }
            let reconstructed = add_residuals(pred, 8, &residuals);
            distortion += u64::from(sse(src, &reconstructed));
        }

        CodedChroma {
            blocks,
            rate,
            distortion,
        }
    }

    /// Whether the residual left by `pred` stays under two quantizer steps
    /// in every coefficient. A reference coded at this quantizer leaves its
    /// source no further off, even where the trellis dropped a level, so
    /// such a residual is requantization noise rather than content.
    pub(super) fn is_requantization_noise(&self, pred: &InterPrediction, source: &SourceMacroblock) -> bool {
        let mut dc = [0i32; 16];
        for (i, dc) in dc.iter_mut().enumerate() {
            let mut coeffs = residual_block(&source.y, &pred.y, 16, (i % 4) * 4, (i / 4) * 4);
            forward_dct(&mut coeffs);
            *dc = coeffs[0];
            if !within_two_steps(&coeffs, &self.matrices.y1, 1) {
                return false;
            }
        }
        forward_wht(&mut dc);
        if !within_two_steps(&dc, &self.matrices.y2, 0) {
            return false;
        }

        [(&pred.u, &source.u), (&pred.v, &source.v)]
            .into_iter()
            .all(|(pred, src)| {
                (0..4).all(|i| {
                    let mut coeffs = residual_block(src, pred, 8, (i % 2) * 4, (i / 2) * 4);
                    forward_dct(&mut coeffs);
                    within_two_steps(&coeffs, &self.matrices.uv, 0)
                })
            })
    }

    /// Codes one luma subblock against its own prediction.
    pub(super) fn code_subblock(&self, source: &[u8; 16], pred: &[u8; 16], ctx0: usize) -> CodedSubblock {
        let difference = residual_block(source, pred, 4, 0, 0);
        let mut coeffs = difference;
        forward_dct(&mut coeffs);
        let mut levels = self.quantize_block(
            &coeffs,
            &self.matrices.y1,
            0,
            ctx0,
            TYPE_Y_WITH_DC,
            self.lambdas.trellis_i4,
        );
        if is_flat_residual(source, pred) {
            let rounded = self.matrices.y1.quantize_coeff(coeffs[0], 0);
            let dc = closest_dc_level(levels[0], rounded, |dc| {
                let mut trial = levels;
                trial[0] = dc;
                window_sse(source, pred, 4, 0, 0, &inverse_block(self.dq.y, &trial, None))
            });
            levels[0] = dc;
        }
        let zigzag = to_zigzag(&levels);
        let reconstructed = add_residue(pred, &inverse_block(self.dq.y, &levels, None));
        CodedSubblock {
            levels,
            reconstructed,
            rate: self.level_costs.block_rate(TYPE_Y_WITH_DC, &zigzag, 0, ctx0),
            distortion: u64::from(sse(source, &reconstructed)),
            nonzero: zigzag.iter().any(|&l| l != 0),
        }
    }
}

/// Source pixels of luma subblock `i` of a packed macroblock.
pub(super) fn subblock_source(y: &[u8; 256], i: usize) -> [u8; 16] {
    let (x0, y0) = ((i % 4) * 4, (i / 4) * 4);
    core::array::from_fn(|k| y[(y0 + k / 4) * 16 + x0 + k % 4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_block_reads_the_right_window() {
        let source: Vec<u8> = (0..64).collect();
        let pred = vec![1u8; 64];
        let block = residual_block(&source, &pred, 8, 4, 4);
        assert_eq!(block[0], 36 - 1);
        assert_eq!(block[5], 45 - 1);
        assert_eq!(block[15], 63 - 1);
    }

    #[test]
    fn flat_dc_prefers_the_level_that_clamps_onto_the_source() {
        // Prediction 128, source 0: level -5 leaves 8, level -6 clamps to 0.
        let source = [0u8; 16];
        let pred = [128u8; 16];
        assert!(is_flat_residual(&source, &pred));
        let distortion = |level: i16| {
            let residual = [i32::from(level) * 24; 16];
            window_sse(&source, &pred, 4, 0, 0, &residual)
        };
        assert_eq!(distortion(-6), 0);
        assert_eq!(closest_dc_level(-5, -5, distortion), -6);
        // A tie keeps the current level.
        assert_eq!(closest_dc_level(-6, -5, |_| 0), -6);
    }

    #[test]
    fn two_step_window_skips_positions_before_first() {
        let mtx = QuantMatrix::new([10, 20], crate::encoder::quantize::MatrixType::UV);
        let mut coeffs = [0i32; 16];
        coeffs[0] = 500;
        coeffs[5] = -39;
        assert!(within_two_steps(&coeffs, &mtx, 1));
        assert!(!within_two_steps(&coeffs, &mtx, 0));
        coeffs[5] = -40;
        assert!(!within_two_steps(&coeffs, &mtx, 1));
    }

    #[test]
    fn flat_residual_detection() {
        assert!(is_flat_residual(&[10, 20, 30], &[5, 15, 25]));
        assert!(!is_flat_residual(&[10, 20, 30], &[5, 15, 26]));
        assert!(is_flat_residual(&[], &[]));
    }

    #[test]
    fn subblock_source_follows_raster_order() {
        let y: [u8; 256] = core::array::from_fn(|i| i as u8);
        let block = subblock_source(&y, 5);
        assert_eq!(block[0], (4 * 16 + 4) as u8);
        assert_eq!(block[3], (4 * 16 + 7) as u8);
        assert_eq!(block[4], (5 * 16 + 4) as u8);
    }
}
