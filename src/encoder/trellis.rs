//! Trellis quantization for rate-distortion optimized coefficient selection.
//!
//! Uses dynamic programming over the zigzag positions of a block. At each
//! position the level is either the truncated quotient or one above it (when
//! rounding allows), and the context each choice leaves decides the token
//! costs of the next position. Terminating after any nonzero level adds the
//! end-of-block cost, so trailing zeros are never paid for.

use super::cost::LevelCosts;
use super::quantize::{quantdiv, quantization_bias, QuantMatrix};
use crate::common::tables::{MAX_LEVEL, ZIGZAG};
use crate::common::tokens::context_after;

/// Candidate levels per position: `[level0, level0 + 1]`.
const NUM_NODES: usize = 2;

/// Maximum cost value for RD optimization
const MAX_COST: i64 = i64::MAX / 2;

/// Distortion weight per natural position; low frequencies matter more.
const WEIGHT_TRELLIS: [i64; 16] = [30, 27, 19, 11, 27, 24, 17, 10, 19, 17, 12, 8, 11, 10, 8, 6];

#[derive(Clone, Copy, Default)]
struct TrellisNode {
    /// Best node at the previous position.
    prev: u8,
    level: u16,
}

/// Rate weight, distortion weight and the cost tables of one block type.
#[derive(Clone, Copy)]
pub(crate) struct TrellisParams<'a> {
    pub costs: &'a LevelCosts,
    /// Token type of the block.
    pub ctype: usize,
    pub lambda: u32,
    pub distortion: u32,
}

impl TrellisParams<'_> {
    #[inline]
    fn score(&self, rate: u32, distortion: i64) -> i64 {
        i64::from(rate) * i64::from(self.lambda) + i64::from(self.distortion) * distortion
    }
}

/// Trellis-optimized levels of a block, in natural order.
///
/// `coeffs` are the transform coefficients; positions before zigzag index
/// `first` are left at zero. Returns `None` when no position is significant
/// enough to search, in which case plain quantization should be used.
pub(crate) fn trellis_quantize(
    coeffs: &[i32; 16],
    mtx: &QuantMatrix,
    first: usize,
    ctx0: usize,
    params: &TrellisParams<'_>,
) -> Option<[i16; 16]> {
    let ctype = params.ctype;
    let costs = params.costs;

    // Last position whose coefficient is worth a look, plus one.
    let thresh = i64::from(mtx.q[1]) * i64::from(mtx.q[1]) / 4;
    let last = (first..16).rev().find(|&n| {
        let c = i64::from(coeffs[usize::from(ZIGZAG[n])]);
        c * c > thresh
    })?;
    let last = (last + 1).min(15);

    let mut nodes = [[TrellisNode::default(); NUM_NODES]; 16];
    let mut prev_scores = [MAX_COST; NUM_NODES];
    let neutral_bias = quantization_bias(0x00);
    let round_bias = quantization_bias(0x80);

    // Ending the block right away.
    let mut best_score = params.score(costs.eob(ctype, first, ctx0), 0);
    let mut best_end: Option<(usize, usize)> = None;

    for n in first..=last {
        let j = usize::from(ZIGZAG[n]);
        let q = i64::from(mtx.q[j]);
        let magnitude = coeffs[j].unsigned_abs() + u32::from(mtx.sharpen[j]);
        let level0 = quantdiv(magnitude, mtx.iq[j], neutral_bias).min(u32::from(MAX_LEVEL));
        let thresh_level = quantdiv(magnitude, mtx.iq[j], round_bias).min(u32::from(MAX_LEVEL));
        let orig_error = i64::from(magnitude) * i64::from(magnitude);

        let mut scores = [MAX_COST; NUM_NODES];
        for delta in 0..NUM_NODES {
            let level = level0 + delta as u32;
            if level > thresh_level {
                continue;
            }
            let level = level as u16;
            let error = i64::from(magnitude) - i64::from(level) * q;
            let distortion = WEIGHT_TRELLIS[j] * (error * error - orig_error);

            // Best predecessor given the context its level leaves.
            let (best_prev, prev_score) = if n == first {
                (0, params.score(costs.level(ctype, n, ctx0, false, level), 0))
            } else {
                let mut best = (0u8, MAX_COST);
                for p in 0..NUM_NODES {
                    if prev_scores[p] >= MAX_COST {
                        continue;
                    }
                    let prev_level = nodes[n - 1][p].level;
                    let rate = costs.level(ctype, n, context_after(prev_level), prev_level == 0, level);
                    let score = prev_scores[p] + params.score(rate, 0);
                    if score < best.1 {
                        best = (p as u8, score);
                    }
                }
                best
            };
            if prev_score >= MAX_COST {
                continue;
            }

            let score = prev_score + params.score(0, distortion);
            nodes[n][delta] = TrellisNode {
                prev: best_prev,
                level,
            };
            scores[delta] = score;

            if level != 0 {
                let eob = if n < 15 {
                    costs.eob(ctype, n + 1, context_after(level))
                } else {
                    0
                };
                let terminal = score + params.score(eob, 0);
                if terminal < best_score {
                    best_score = terminal;
                    best_end = Some((n, delta));
                }
            }
        }
        prev_scores = scores;
    }

    let mut levels = [0i16; 16];
    let Some((mut n, mut delta)) = best_end else {
        return Some(levels);
    };
    loop {
        let node = nodes[n][delta];
        let j = usize::from(ZIGZAG[n]);
        let level = node.level as i16;
        levels[j] = if coeffs[j] < 0 { -level } else { level };
        if n == first {
            break;
        }
        delta = usize::from(node.prev);
        n -= 1;
    }
    Some(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tables::COEFF_PROBS;
    use crate::common::tokens::to_zigzag;
    use crate::encoder::quantize::MatrixType;

    fn params(costs: &LevelCosts, lambda: u32) -> TrellisParams<'_> {
        TrellisParams {
            costs,
            ctype: 3,
            lambda,
            distortion: 256,
        }
    }

    fn rd(coeffs: &[i32; 16], levels: &[i16; 16], mtx: &QuantMatrix, p: &TrellisParams<'_>) -> i64 {
        let rate = p.costs.block_rate(p.ctype, &to_zigzag(levels), 0, 0);
        let distortion: i64 = (0..16)
            .map(|j| {
                let m = i64::from(coeffs[j].unsigned_abs() + u32::from(mtx.sharpen[j]));
                let e = m - i64::from(levels[j].unsigned_abs()) * i64::from(mtx.q[j]);
                WEIGHT_TRELLIS[j] * (e * e - m * m)
            })
            .sum();
        p.score(rate, distortion)
    }

    #[test]
    fn flat_block_is_left_to_plain_quantization() {
        let costs = LevelCosts::new(&COEFF_PROBS);
        let mtx = QuantMatrix::new([20, 24], MatrixType::Y1);
        assert_eq!(trellis_quantize(&[1; 16], &mtx, 0, 0, &params(&costs, 100)), None);
    }

    #[test]
    fn never_worse_than_plain_quantization() {
        let costs = LevelCosts::new(&COEFF_PROBS);
        let mtx = QuantMatrix::new([20, 24], MatrixType::Y1);
        let blocks: [[i32; 16]; 3] = [
            [300, -90, 40, 12, -13, 30, 0, 0, 14, 0, -2, 0, 13, 0, 0, 25],
            [-500, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 13],
            [60, 59, -61, 58, 13, 12, -12, 14, 35, 36, 11, 11, 13, 13, 13, 13],
        ];
        for lambda in [1, 50, 2000] {
            let p = params(&costs, lambda);
            for coeffs in &blocks {
                let plain = mtx.quantize(coeffs, 0);
                let trellis = trellis_quantize(coeffs, &mtx, 0, 0, &p).unwrap();
                assert!(rd(coeffs, &trellis, &mtx, &p) <= rd(coeffs, &plain, &mtx, &p));
            }
        }
    }

    #[test]
    fn expensive_rate_zeroes_small_tails() {
        let costs = LevelCosts::new(&COEFF_PROBS);
        let mtx = QuantMatrix::new([20, 24], MatrixType::Y1);
        let coeffs = [400, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 20];
        let cheap = trellis_quantize(&coeffs, &mtx, 0, 0, &params(&costs, 1)).unwrap();
        let dear = trellis_quantize(&coeffs, &mtx, 0, 0, &params(&costs, 100_000)).unwrap();
        assert_eq!(cheap[15], 1);
        assert_eq!(dear[15], 0);
        assert!(dear[0] != 0 || dear == [0; 16]);
    }
}
