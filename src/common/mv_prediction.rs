//! Motion-vector prediction from neighbouring macroblocks (RFC 6386, 18.3).
//!
//! The above, left and above-left macroblocks vote for up to three distinct
//! vectors. The votes select the probabilities of the inter-mode tree and the
//! vectors that `Nearest`, `Near` and `New` are coded against.

use super::tables::MODE_CONTEXTS;
use crate::frame::{InterHeader, Macroblock, MotionVector, ReferenceFrame};

/// Candidate vectors and mode probabilities for one macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NearMvs {
    /// Base of an explicitly coded (`New`) vector.
    pub best: MotionVector,
    pub nearest: MotionVector,
    pub near: MotionVector,
    /// Probabilities of the four inter-mode tree nodes.
    pub mode_probs: [u8; 4],
}

/// Margin, in quarter pixels, a predicted block may extend past the frame.
const MARGIN: i32 = 16 << 2;

/// Narrows a quarter-pixel offset, saturating on very large frames.
fn saturate(v: i32) -> i16 {
    v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Range of vectors that keep a macroblock's block within the extended frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MvBounds {
    pub min: MotionVector,
    pub max: MotionVector,
}

impl MvBounds {
    pub(crate) fn new(mbx: usize, mby: usize, mb_cols: usize, mb_rows: usize) -> Self {
        let edge = |pos: usize, count: usize| {
            let before = -(pos as i32 * 64) - MARGIN;
            let after = (count as i32 - 1 - pos as i32) * 64 + MARGIN;
            (saturate(before), saturate(after))
        };
        let (min_x, max_x) = edge(mbx, mb_cols);
        let (min_y, max_y) = edge(mby, mb_rows);
        Self {
            min: MotionVector::new(min_x, min_y),
            max: MotionVector::new(max_x, max_y),
        }
    }

    pub(crate) fn clamp(&self, mv: MotionVector) -> MotionVector {
        MotionVector::new(
            mv.x.clamp(self.min.x, self.max.x),
            mv.y.clamp(self.min.y, self.max.y),
        )
    }

    pub(crate) fn contains(&self, mv: MotionVector) -> bool {
        self.clamp(mv) == mv
    }
}

/// Finds the candidate vectors for the macroblock at `(mbx, mby)`.
///
/// `macroblocks` holds the frame being coded in raster order; only entries
/// before the current one are read.
pub(crate) fn find_near_mvs(
    macroblocks: &[Macroblock],
    mb_cols: usize,
    mb_rows: usize,
    mbx: usize,
    mby: usize,
    reference: ReferenceFrame,
    header: &InterHeader,
) -> NearMvs {
    let neighbour = |dx: isize, dy: isize| -> Option<(ReferenceFrame, MotionVector)> {
        let x = mbx.checked_add_signed(dx)?;
        let y = mby.checked_add_signed(dy)?;
        if x >= mb_cols {
            return None;
        }
        let (neighbour_ref, mv) = macroblocks.get(y * mb_cols + x)?.prediction.motion()?;
        let mv = if header.sign_bias(neighbour_ref) != header.sign_bias(reference) {
            MotionVector::new(-mv.x, -mv.y)
        } else {
            mv
        };
        Some((neighbour_ref, mv))
    };

    let mut mvs = [MotionVector::ZERO; 4];
    let mut counts = [0u8; 4];
    let mut slot = 0;

    for (dx, dy, weight) in [(0, -1, 2), (-1, 0, 2), (-1, -1, 1)] {
        let Some((_, mv)) = neighbour(dx, dy) else {
            continue;
        };
        if mv.is_zero() {
            counts[0] += weight;
            continue;
        }
        // The above vector always opens a new slot; later ones only when they
        // differ from the most recent.
        if slot == 0 || mvs[slot] != mv {
            slot += 1;
            mvs[slot] = mv;
        }
        counts[slot] += weight;
    }

    // Three distinct vectors where the last equals the first: merge.
    if counts[3] > 0 && mvs[3] == mvs[1] {
        counts[1] += 1;
    }
    // Split macroblocks are never produced.
    counts[3] = 0;

    if counts[2] > counts[1] {
        counts.swap(1, 2);
        mvs.swap(1, 2);
    }
    if counts[1] >= counts[0] {
        mvs[0] = mvs[1];
    }

    let bounds = MvBounds::new(mbx, mby, mb_cols, mb_rows);
    NearMvs {
        best: bounds.clamp(mvs[0]),
        nearest: bounds.clamp(mvs[1]),
        near: bounds.clamp(mvs[2]),
        mode_probs: core::array::from_fn(|i| MODE_CONTEXTS[usize::from(counts[i])][i]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::InterMode;
    use crate::frame::MacroblockPrediction;

    fn inter(mv: MotionVector) -> Macroblock {
        Macroblock::new(MacroblockPrediction::Inter {
            reference: ReferenceFrame::Last,
            mode: InterMode::New,
            mv,
        })
    }

    #[test]
    fn first_macroblock_has_no_candidates() {
        let header = InterHeader::default();
        let near = find_near_mvs(&[], 2, 2, 0, 0, ReferenceFrame::Last, &header);
        assert_eq!(near.best, MotionVector::ZERO);
        assert_eq!(near.nearest, MotionVector::ZERO);
        assert_eq!(near.mode_probs, MODE_CONTEXTS[0]);
    }

    #[test]
    fn agreeing_neighbours_vote_nearest() {
        let mv = MotionVector::new(8, -4);
        let mbs = vec![inter(mv), inter(mv), inter(mv)];
        let header = InterHeader::default();
        let near = find_near_mvs(&mbs, 2, 2, 1, 1, ReferenceFrame::Last, &header);
        assert_eq!(near.nearest, mv);
        assert_eq!(near.best, mv);
        assert_eq!(near.near, MotionVector::ZERO);
        assert_eq!(near.mode_probs[1], MODE_CONTEXTS[5][1]);
    }

    #[test]
    fn intra_neighbours_are_ignored() {
        let mbs = vec![
            Macroblock::new(MacroblockPrediction::DC),
            inter(MotionVector::new(4, 4)),
        ];
        let header = InterHeader::default();
        let near = find_near_mvs(&mbs, 2, 2, 0, 1, ReferenceFrame::Last, &header);
        assert_eq!(near.nearest, MotionVector::ZERO);
        assert_eq!(near.mode_probs[0], MODE_CONTEXTS[0][0]);
    }

    #[test]
    fn sign_bias_negates() {
        let mbs = vec![inter(MotionVector::new(8, 12))];
        let header = InterHeader {
            sign_bias_golden: true,
            ..InterHeader::default()
        };
        let near = find_near_mvs(&mbs, 1, 2, 0, 1, ReferenceFrame::Golden, &header);
        assert_eq!(near.nearest, MotionVector::new(-8, -12));
    }

    #[test]
    fn candidates_are_clamped() {
        let mbs = vec![inter(MotionVector::new(-1000, 0))];
        let header = InterHeader::default();
        let near = find_near_mvs(&mbs, 1, 2, 0, 1, ReferenceFrame::Last, &header);
        assert_eq!(near.nearest, MotionVector::new(-MARGIN as i16, 0));
        let bounds = MvBounds::new(0, 1, 1, 2);
        assert!(bounds.contains(near.nearest));
        assert_eq!(bounds.max.y, MARGIN as i16);
        assert_eq!(bounds.min.y, -64 - MARGIN as i16);
    }

    #[test]
    fn bounds_saturate_on_wide_frames() {
        let first = MvBounds::new(0, 0, 1024, 1);
        assert_eq!(first.min.x, -MARGIN as i16);
        assert_eq!(first.max.x, i16::MAX);
        let last = MvBounds::new(1023, 0, 1024, 1);
        assert_eq!(last.min.x, i16::MIN);
        assert_eq!(last.max.x, MARGIN as i16);
        for bounds in [first, last] {
            assert!(bounds.min.x <= bounds.max.x);
            assert!(bounds.contains(bounds.clamp(MotionVector::new(i16::MAX, i16::MIN))));
        }
    }
}
