//! Coefficient tokens, boolean tree paths and the per-block token walk.
//!
//! Every consumer of the token syntax (the bitstream writer, the rate
//! estimator and the statistics collector) is driven by [`walk_block`] so
//! they can never disagree about which booleans a block produces.

use std::sync::OnceLock;

use super::tables::{
    COEFF_BANDS, DCT_CAT_BASE, DCT_EOB, DCT_TOKEN_TREE, PROB_DCT_CAT, ZIGZAG,
};
use crate::frame::{Macroblock, U_BLOCKS, V_BLOCKS, Y2_BLOCK};

/// Steps from a tree node to one of its leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TreePath {
    steps: [(u8, bool); 12],
    len: u8,
}

impl TreePath {
    /// `(probability index, bit)` pairs in coding order.
    pub(crate) fn steps(&self) -> &[(u8, bool)] {
        &self.steps[..usize::from(self.len)]
    }

    fn push(&mut self, node: usize, bit: bool) {
        self.steps[usize::from(self.len)] = ((node >> 1) as u8, bit);
        self.len += 1;
    }
}

/// Finds the path from node `start` to the leaf holding `value`.
///
/// Leaves are stored as `-value` (so `0` is a leaf too); positive entries
/// index the next node pair.
pub(crate) fn tree_path(tree: &[i8], value: i8, start: usize) -> TreePath {
    fn search(tree: &[i8], node: usize, value: i8, path: &mut TreePath) -> bool {
        for bit in [false, true] {
            let next = tree[node + usize::from(bit)];
            path.push(node, bit);
            if next <= 0 {
                if -next == value {
                    return true;
                }
            } else if search(tree, next as usize, value, path) {
                return true;
            }
            path.len -= 1;
        }
        false
    }

    let mut path = TreePath::default();
    let found = search(tree, start, value, &mut path);
    debug_assert!(found, "value {value} not in tree {tree:?}");
    path
}

/// Paths of every token from the root of the coefficient tree.
fn token_paths() -> &'static [TreePath; 12] {
    static PATHS: OnceLock<[TreePath; 12]> = OnceLock::new();
    PATHS.get_or_init(|| core::array::from_fn(|t| tree_path(&DCT_TOKEN_TREE, t as i8, 0)))
}

/// Token coding a level magnitude, with the extra-bits category if any.
#[inline]
pub(crate) fn token_for_level(v: u16) -> (usize, Option<usize>) {
    match v {
        0..=4 => (usize::from(v), None),
        5..=6 => (5, Some(0)),
        7..=10 => (6, Some(1)),
        11..=18 => (7, Some(2)),
        19..=34 => (8, Some(3)),
        35..=66 => (9, Some(4)),
        _ => (10, Some(5)),
    }
}

/// Extra-bit probabilities of a category (without the terminating zero).
pub(crate) fn category_probs(cat: usize) -> &'static [u8] {
    let probs = &PROB_DCT_CAT[cat];
    let len = probs.iter().position(|&p| p == 0).unwrap_or(probs.len());
    &probs[..len]
}

/// Context for the next block from a token magnitude.
#[inline]
pub(crate) fn context_after(v: u16) -> usize {
    usize::from(v.min(2))
}

/// One boolean produced while coding a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenBit {
    /// A token-tree decision using the adaptive probability at
    /// `[band][ctx][node]`.
    Tree {
        band: usize,
        ctx: usize,
        node: usize,
        bit: bool,
    },
    /// An extra bit or sign with a fixed probability.
    Fixed { prob: u8, bit: bool },
}

/// Visits every boolean coded for one block of zigzag-ordered levels.
///
/// Returns whether any level from `first` on is nonzero, which becomes the
/// neighbour context of the following blocks.
pub(crate) fn walk_block(
    levels: &[i16; 16],
    first: usize,
    ctx0: usize,
    mut visit: impl FnMut(TokenBit),
) -> bool {
    let paths = token_paths();
    let last = (first..16).rev().find(|&i| levels[i] != 0);
    let mut ctx = ctx0;
    let mut after_zero = false;

    for n in first..16 {
        let band = usize::from(COEFF_BANDS[n]);
        if last.map_or(true, |l| n > l) {
            debug_assert!(!after_zero);
            let eob = paths[DCT_EOB as usize].steps();
            for &(node, bit) in eob {
                visit(TokenBit::Tree {
                    band,
                    ctx,
                    node: usize::from(node),
                    bit,
                });
            }
            break;
        }

        let v = levels[n].unsigned_abs();
        let (token, category) = token_for_level(v);
        // The end-of-block decision is not coded right after a zero.
        let steps = &paths[token].steps()[usize::from(after_zero)..];
        for &(node, bit) in steps {
            visit(TokenBit::Tree {
                band,
                ctx,
                node: usize::from(node),
                bit,
            });
        }
        if let Some(cat) = category {
            let probs = category_probs(cat);
            let extra = v - DCT_CAT_BASE[cat];
            for (i, &prob) in probs.iter().enumerate() {
                let shift = probs.len() - 1 - i;
                visit(TokenBit::Fixed {
                    prob,
                    bit: (extra >> shift) & 1 == 1,
                });
            }
        }
        if v > 0 {
            visit(TokenBit::Fixed {
                prob: 128,
                bit: levels[n] < 0,
            });
        }
        ctx = context_after(v);
        after_zero = v == 0;
    }

    last.is_some()
}

/// Reorders a natural-order block into zigzag order.
#[inline]
pub(crate) fn to_zigzag(natural: &[i16; 16]) -> [i16; 16] {
    core::array::from_fn(|i| natural[usize::from(ZIGZAG[i])])
}

/// Coefficient plane types.
pub(crate) const TYPE_Y_AFTER_Y2: usize = 0;
pub(crate) const TYPE_Y2: usize = 1;
pub(crate) const TYPE_CHROMA: usize = 2;
pub(crate) const TYPE_Y_WITH_DC: usize = 3;

/// Which neighbouring blocks held nonzero coefficients, along one edge of a
/// macroblock (the bottom edge for the above context, the right edge for
/// the left context).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct NonzeroContext {
    pub y: [bool; 4],
    pub u: [bool; 2],
    pub v: [bool; 2],
    pub y2: bool,
}

impl NonzeroContext {
    /// Resets the contexts for a macroblock without coefficients. The Y2
    /// context only changes when the macroblock has a Y2 block.
    pub(crate) fn clear(&mut self, has_y2: bool) {
        self.y = [false; 4];
        self.u = [false; 2];
        self.v = [false; 2];
        if has_y2 {
            self.y2 = false;
        }
    }
}

/// Visits every token boolean of a macroblock in bitstream order, tagged with
/// its plane type, and updates the neighbour contexts.
///
/// Skipped macroblocks produce no booleans.
pub(crate) fn walk_macroblock(
    mb: &Macroblock,
    above: &mut NonzeroContext,
    left: &mut NonzeroContext,
    mut visit: impl FnMut(usize, TokenBit),
) {
    let has_y2 = mb.prediction.has_y2();
    if mb.skip {
        above.clear(has_y2);
        left.clear(has_y2);
        return;
    }

    let (y_type, y_first) = if has_y2 {
        let ctx = usize::from(above.y2) + usize::from(left.y2);
        let levels = to_zigzag(&mb.coefficients[Y2_BLOCK]);
        let nz = walk_block(&levels, 0, ctx, |bit| visit(TYPE_Y2, bit));
        above.y2 = nz;
        left.y2 = nz;
        (TYPE_Y_AFTER_Y2, 1)
    } else {
        (TYPE_Y_WITH_DC, 0)
    };

    for (i, block) in mb.coefficients[..U_BLOCKS].iter().enumerate() {
        let (row, col) = (i / 4, i % 4);
        let ctx = usize::from(above.y[col]) + usize::from(left.y[row]);
        let nz = walk_block(&to_zigzag(block), y_first, ctx, |bit| visit(y_type, bit));
        above.y[col] = nz;
        left.y[row] = nz;
    }

    for (start, plane) in [(U_BLOCKS, 0), (V_BLOCKS, 1)] {
        for i in 0..4 {
            let (row, col) = (i / 2, i % 2);
            let (a, l) = if plane == 0 {
                (&mut above.u[col], &mut left.u[row])
            } else {
                (&mut above.v[col], &mut left.v[row])
            };
            let ctx = usize::from(*a) + usize::from(*l);
            let levels = to_zigzag(&mb.coefficients[start + i]);
            let nz = walk_block(&levels, 0, ctx, |bit| visit(TYPE_CHROMA, bit));
            *a = nz;
            *l = nz;
        }
    }
}
