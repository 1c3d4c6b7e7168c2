//! Level cost tables for coefficient rate estimation.
//!
//! The cost of a level depends on its position (through the band), the
//! context left by the previous token, and whether the end-of-block decision
//! is coded in front of it (it is not right after a zero). Tree costs are
//! tabulated per probability context for levels up to [`MAX_VARIABLE_LEVEL`];
//! larger levels share the last token and differ only in their extra bits,
//! which cost the same in every context.

use std::sync::OnceLock;

use super::{bit_cost, ONE_BIT};
use crate::common::tables::{COEFF_BANDS, DCT_CAT_BASE, DCT_TOKEN_TREE, MAX_LEVEL};
use crate::common::tokens::{category_probs, context_after, token_for_level, tree_path, TreePath};
use crate::common::types::{TokenProbTables, NUM_BANDS, NUM_CTX, NUM_TYPES};

/// Smallest level coded with the largest token.
pub(crate) const MAX_VARIABLE_LEVEL: usize = 67;

/// Tree costs for levels `0..=MAX_VARIABLE_LEVEL`.
pub(crate) type LevelCostArray = [u16; MAX_VARIABLE_LEVEL + 1];

/// Extra-bit and sign cost of every level, independent of context.
fn fixed_costs() -> &'static [u16] {
    static TABLE: OnceLock<Vec<u16>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..=MAX_LEVEL)
            .map(|v| {
                if v == 0 {
                    return 0;
                }
                let mut cost = ONE_BIT as u16;
                if let (_, Some(cat)) = token_for_level(v) {
                    let probs = category_probs(cat);
                    let extra = v - DCT_CAT_BASE[cat];
                    for (i, &p) in probs.iter().enumerate() {
                        let bit = (extra >> (probs.len() - 1 - i)) & 1 == 1;
                        cost += bit_cost(bit, p);
                    }
                }
                cost
            })
            .collect()
    })
}

/// Precomputed token costs for one set of probabilities.
#[derive(Clone)]
pub(crate) struct LevelCosts {
    /// Cost from the root of the tree, indexed \[type\]\[band\]\[ctx\].
    full: Box<[[[LevelCostArray; NUM_CTX]; NUM_BANDS]; NUM_TYPES]>,
    /// Cost right after a zero (no end-of-block decision, context 0).
    after_zero: Box<[[LevelCostArray; NUM_BANDS]; NUM_TYPES]>,
    /// Cost of ending the block, indexed \[type\]\[band\]\[ctx\].
    eob: [[[u16; NUM_CTX]; NUM_BANDS]; NUM_TYPES],
}

impl LevelCosts {
    pub(crate) fn new(probs: &TokenProbTables) -> Self {
        let paths: [TreePath; MAX_VARIABLE_LEVEL + 1] =
            core::array::from_fn(|v| tree_path(&DCT_TOKEN_TREE, token_for_level(v as u16).0 as i8, 0));

        let path_cost = |p: &[u8; 11], path: &TreePath, skip: usize| -> u16 {
            path.steps()[skip..]
                .iter()
                .map(|&(node, bit)| bit_cost(bit, p[usize::from(node)]))
                .sum()
        };

        let mut full = Box::new([[[[0u16; MAX_VARIABLE_LEVEL + 1]; NUM_CTX]; NUM_BANDS]; NUM_TYPES]);
        let mut after_zero = Box::new([[[0u16; MAX_VARIABLE_LEVEL + 1]; NUM_BANDS]; NUM_TYPES]);
        let mut eob = [[[0u16; NUM_CTX]; NUM_BANDS]; NUM_TYPES];

        for t in 0..NUM_TYPES {
            for band in 0..NUM_BANDS {
                for ctx in 0..NUM_CTX {
                    let p = &probs[t][band][ctx];
                    for (v, path) in paths.iter().enumerate() {
                        full[t][band][ctx][v] = path_cost(p, path, 0);
                        if ctx == 0 {
                            after_zero[t][band][v] = path_cost(p, path, 1);
                        }
                    }
                    eob[t][band][ctx] = bit_cost(false, p[0]);
                }
            }
        }

        Self {
            full,
            after_zero,
            eob,
        }
    }

    /// Cost of coding level magnitude `v` at zigzag position `n`.
    #[inline]
    pub(crate) fn level(&self, t: usize, n: usize, ctx: usize, after_zero: bool, v: u16) -> u32 {
        let band = usize::from(COEFF_BANDS[n]);
        let idx = usize::from(v).min(MAX_VARIABLE_LEVEL);
        let tree = if after_zero {
            self.after_zero[t][band][idx]
        } else {
            self.full[t][band][ctx][idx]
        };
        u32::from(tree) + u32::from(fixed_costs()[usize::from(v.min(MAX_LEVEL))])
    }

    /// Cost of ending a block at zigzag position `n` (`n < 16`).
    #[inline]
    pub(crate) fn eob(&self, t: usize, n: usize, ctx: usize) -> u32 {
        u32::from(self.eob[t][usize::from(COEFF_BANDS[n])][ctx])
    }

    /// Rate of a whole block of zigzag-ordered levels.
    pub(crate) fn block_rate(&self, t: usize, levels: &[i16; 16], first: usize, ctx0: usize) -> u32 {
        let Some(last) = (first..16).rev().find(|&i| levels[i] != 0) else {
            return self.eob(t, first, ctx0);
        };

        let mut rate = 0;
        let mut ctx = ctx0;
        let mut after_zero = false;
        for n in first..=last {
            let v = levels[n].unsigned_abs();
            rate += self.level(t, n, ctx, after_zero, v);
            ctx = context_after(v);
            after_zero = v == 0;
        }
        if last < 15 {
            rate += self.eob(t, last + 1, ctx);
        }
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tables::COEFF_PROBS;
    use crate::common::tokens::{walk_block, TokenBit};

    fn walked_rate(probs: &TokenProbTables, t: usize, levels: &[i16; 16], first: usize, ctx0: usize) -> u32 {
        let mut rate = 0u32;
        walk_block(levels, first, ctx0, |bit| {
            rate += u32::from(match bit {
                TokenBit::Tree {
                    band,
                    ctx,
                    node,
                    bit,
                } => bit_cost(bit, probs[t][band][ctx][node]),
                TokenBit::Fixed { prob, bit } => bit_cost(bit, prob),
            });
        });
        rate
    }

    #[test]
    fn table_rate_matches_token_walk() {
        let costs = LevelCosts::new(&COEFF_PROBS);
        let blocks: [[i16; 16]; 4] = [
            [0; 16],
            [3, 0, -1, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, -90],
            [1500, -40, 12, 2, 1, 1, 0, 0, 25, 0, 0, 0, 0, 0, 0, 0],
        ];
        for t in 0..NUM_TYPES {
            for levels in &blocks {
                for first in [0, 1] {
                    for ctx0 in 0..3 {
                        assert_eq!(
                            costs.block_rate(t, levels, first, ctx0),
                            walked_rate(&COEFF_PROBS, t, levels, first, ctx0),
                            "type {t} first {first} ctx {ctx0} block {levels:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn larger_levels_cost_more() {
        let costs = LevelCosts::new(&COEFF_PROBS);
        assert!(costs.level(3, 0, 0, false, 1) < costs.level(3, 0, 0, false, 40));
        assert!(costs.level(3, 0, 0, false, 67) < costs.level(3, 0, 0, false, 2000));
    }
}
