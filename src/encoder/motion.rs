//! Motion estimation by diamond search.
//!
//! Candidates are scored with the SAD of the motion-compensated luma block
//! plus the estimated cost of coding the vector, weighed by the luma lambda.

use super::cost::{bit_cost, rdcost, sad, tree_cost};
use crate::common::inter_prediction::predict_block;
use crate::common::mv_prediction::MvBounds;
use crate::common::tables::{
    MVP_IS_SHORT, MVP_LONG, MVP_SHORT, MVP_SIGN, MV_LONG_BIT_ORDER, MV_MAX, MV_SHORT_COUNT,
    SMALL_MV_TREE,
};
use crate::frame::MotionVector;
use crate::raster::Plane;

/// Neighbour scan order: up, down, left, right. Ties keep the earlier one.
const DIAMOND: [(i16, i16); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];

/// Cost in 1/256 bit of one coded vector component.
pub(crate) fn mv_component_rate(v: i16, p: &[u8]) -> u32 {
    let x = v.unsigned_abs();
    let mut rate = if (x as i16) < MV_SHORT_COUNT {
        u32::from(bit_cost(false, p[MVP_IS_SHORT]))
            + tree_cost(&SMALL_MV_TREE, &p[MVP_SHORT..MVP_LONG], x as i8, 0)
    } else {
        let mut rate = u32::from(bit_cost(true, p[MVP_IS_SHORT]));
        for &bit in &MV_LONG_BIT_ORDER {
            rate += u32::from(bit_cost((x >> bit) & 1 == 1, p[MVP_LONG + bit]));
        }
        if x & 0xFFF0 != 0 {
            rate += u32::from(bit_cost((x >> 3) & 1 == 1, p[MVP_LONG + 3]));
        }
        rate
    };
    if x != 0 {
        rate += u32::from(bit_cost(v < 0, p[MVP_SIGN]));
    }
    rate
}

/// Cost of coding `delta` as a new vector, row first.
pub(crate) fn mv_rate(delta: MotionVector, probs: &[[u8; 19]; 2]) -> u32 {
    mv_component_rate(delta.y, &probs[0]) + mv_component_rate(delta.x, &probs[1])
}

/// What one macroblock's search needs to know.
pub(crate) struct MotionSearch<'a> {
    /// Source luma of the macroblock, 16x16 packed.
    pub original: &'a [u8; 256],
    pub reference: &'a Plane,
    pub mbx: usize,
    pub mby: usize,
    pub bounds: MvBounds,
    /// Vector new motion is coded against.
    pub best: MotionVector,
    pub mv_probs: &'a [[u8; 19]; 2],
    pub lambda: u32,
    pub distortion: u32,
}

impl MotionSearch<'_> {
    /// Whether `mv` stays in the extended frame and is codable against `best`.
    fn admissible(&self, mv: MotionVector) -> bool {
        let delta = mv - self.best;
        self.bounds.contains(mv) && delta.x.abs() <= MV_MAX && delta.y.abs() <= MV_MAX
    }

    /// Clips `mv` to the admissible range.
    fn clip(&self, mv: MotionVector) -> MotionVector {
        let max = MV_MAX;
        let lo = MotionVector::new(
            self.bounds.min.x.max(self.best.x.saturating_sub(max)),
            self.bounds.min.y.max(self.best.y.saturating_sub(max)),
        );
        let hi = MotionVector::new(
            self.bounds.max.x.min(self.best.x.saturating_add(max)),
            self.bounds.max.y.min(self.best.y.saturating_add(max)),
        );
        MotionVector::new(mv.x.clamp(lo.x, hi.x.max(lo.x)), mv.y.clamp(lo.y, hi.y.max(lo.y)))
    }

    /// Prediction error and vector rate of a candidate.
    pub(crate) fn score(&self, mv: MotionVector) -> u64 {
        let mut pred = [0u8; 256];
        let (col, row) = mv.as_col_row();
        predict_block(
            self.reference,
            self.mbx * 16,
            self.mby * 16,
            16,
            i32::from(col) * 2,
            i32::from(row) * 2,
            &mut pred,
        );
        let distortion = sad(self.original, &pred);
        let rate = if mv == self.best {
            0
        } else {
            mv_rate(mv - self.best, self.mv_probs)
        };
        rdcost(rate, u64::from(distortion), self.lambda, self.distortion)
    }
}

/// One diamond round: scores the four neighbours of `center` at `step` and
/// returns the cheapest of them if it beats `center_score`.
fn diamond_round(
    search: &MotionSearch<'_>,
    center: MotionVector,
    center_score: u64,
    step: i16,
) -> (MotionVector, u64) {
    let mut best = (center, center_score);
    for (dx, dy) in DIAMOND {
        let candidate = search.clip(center + MotionVector::new(dx * step, dy * step));
        if candidate == center {
            continue;
        }
        let score = search.score(candidate);
        if score < best.1 {
            best = (candidate, score);
        }
    }
    best
}

/// Diamond search from `base + origin`, starting at `step` quarter pixels.
///
/// The step halves once a round finds no better neighbour. Every scored
/// vector is clipped first, so the result always lies inside the search
/// bounds. Returns the best vector with its score.
pub(crate) fn diamond_search(
    search: &MotionSearch<'_>,
    base: MotionVector,
    origin: MotionVector,
    step: usize,
) -> (MotionVector, u64) {
    let mut best_mv = search.clip(base + origin);
    let mut best_score = search.score(best_mv);
    let mut step = step.min(MV_MAX as usize) as i16;

    while step > 0 {
        let (mv, score) = diamond_round(search, best_mv, best_score, step);
        if mv == best_mv {
            step /= 2;
        }
        (best_mv, best_score) = (mv, score);
    }
    debug_assert!(search.admissible(best_mv));
    (best_mv, best_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tables::DEFAULT_MV_PROBS;

    fn textured(width: usize, height: usize, shift: usize) -> Plane {
        let mut plane = Plane::new(width, height, 0);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (x + shift, y);
                plane.set(x, y, ((sx * 37 + sy * 11) ^ (sx * sy)) as u8);
            }
        }
        plane
    }

    fn block(plane: &Plane, x0: usize, y0: usize) -> [u8; 256] {
        let mut out = [0u8; 256];
        plane.copy_block(x0, y0, 16, &mut out);
        out
    }

    #[test]
    fn short_vectors_are_cheaper() {
        let p = &DEFAULT_MV_PROBS[0];
        assert!(mv_component_rate(0, p) < mv_component_rate(3, p));
        assert!(mv_component_rate(3, p) < mv_component_rate(200, p));
        assert_eq!(
            mv_component_rate(-5, p) + u32::from(bit_cost(false, p[MVP_SIGN])),
            mv_component_rate(5, p) + u32::from(bit_cost(true, p[MVP_SIGN]))
        );
    }

    #[test]
    fn finds_a_full_pixel_shift() {
        let reference = textured(64, 64, 0);
        // Content at (16 + 4, 16) in the reference shows up at (16, 16).
        let original = block(&reference, 20, 16);
        let search = MotionSearch {
            original: &original,
            reference: &reference,
            mbx: 1,
            mby: 1,
            bounds: MvBounds::new(1, 1, 4, 4),
            best: MotionVector::ZERO,
            mv_probs: &DEFAULT_MV_PROBS,
            lambda: 1,
            distortion: 256,
        };
        let (mv, score) = diamond_search(&search, MotionVector::ZERO, MotionVector::ZERO, 16);
        assert_eq!(mv, MotionVector::new(16, 0));
        assert!(score < search.score(MotionVector::ZERO));
    }

    #[test]
    fn round_moves_to_the_cheapest_neighbour() {
        // A ramp whose content at (x + 1, y) shows up at (x, y): one pixel
        // up improves a little, one pixel right matches exactly.
        let mut reference = Plane::new(48, 48, 0);
        for y in 0..48 {
            for x in 0..48 {
                reference.set(x, y, (4 * x + 40 - y.min(40)) as u8);
            }
        }
        let original = block(&reference, 17, 16);
        let search = MotionSearch {
            original: &original,
            reference: &reference,
            mbx: 1,
            mby: 1,
            bounds: MvBounds::new(1, 1, 3, 3),
            best: MotionVector::ZERO,
            mv_probs: &DEFAULT_MV_PROBS,
            lambda: 0,
            distortion: 1,
        };
        let center = search.score(MotionVector::ZERO);
        let up = search.score(MotionVector::new(0, -4));
        assert_eq!(center, 4 * 256);
        assert_eq!(up, 3 * 256);

        let (mv, score) = diamond_round(&search, MotionVector::ZERO, center, 4);
        assert_eq!(mv, MotionVector::new(4, 0));
        assert_eq!(score, 0);
    }

    #[test]
    fn results_stay_in_bounds_at_frame_edges() {
        let reference = textured(32, 32, 3);
        let original = [255u8; 256];
        for (mbx, mby) in [(0, 0), (1, 1), (0, 1)] {
            let bounds = MvBounds::new(mbx, mby, 2, 2);
            let search = MotionSearch {
                original: &original,
                reference: &reference,
                mbx,
                mby,
                bounds,
                best: MotionVector::ZERO,
                mv_probs: &DEFAULT_MV_PROBS,
                lambda: 1,
                distortion: 256,
            };
            for origin in [MotionVector::new(-4000, 900), MotionVector::new(500, -500)] {
                let (mv, _) = diamond_search(&search, MotionVector::ZERO, origin, 64);
                assert!(bounds.contains(mv), "{mv:?} outside {bounds:?}");
            }
        }
    }
}
