//! Token statistics for adaptive probabilities.
//!
//! Counts are gathered by replaying the exact booleans the writer will code
//! (see [`walk_macroblock`]), so the probabilities derived from them
//! minimize the size of the frame they were measured on.

use super::bit_cost;
use crate::common::tokens::{walk_macroblock, NonzeroContext, TokenBit};
use crate::common::types::{NUM_BANDS, NUM_CTX, NUM_PROBAS, NUM_TYPES};
use crate::frame::Macroblock;

/// Zero/one counts per token-tree node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TokenStats {
    /// \[type\]\[band\]\[context\]\[node\] = \[zeros, ones\]
    counts: Box<[[[[[u32; 2]; NUM_PROBAS]; NUM_CTX]; NUM_BANDS]; NUM_TYPES]>,
}

impl Default for TokenStats {
    fn default() -> Self {
        Self {
            counts: Box::new([[[[[0; 2]; NUM_PROBAS]; NUM_CTX]; NUM_BANDS]; NUM_TYPES]),
        }
    }
}

impl TokenStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record(&mut self, t: usize, band: usize, ctx: usize, node: usize, bit: bool) {
        let c = &mut self.counts[t][band][ctx][node][usize::from(bit)];
        *c = c.saturating_add(1);
    }

    /// Records every token boolean of a frame's macroblocks, in raster order.
    pub(crate) fn record_frame(&mut self, macroblocks: &[Macroblock], mb_cols: usize) {
        let mut above = vec![NonzeroContext::default(); mb_cols];
        for row in macroblocks.chunks(mb_cols) {
            let mut left = NonzeroContext::default();
            for (mb, above) in row.iter().zip(above.iter_mut()) {
                walk_macroblock(mb, above, &mut left, |t, bit| {
                    if let TokenBit::Tree {
                        band,
                        ctx,
                        node,
                        bit,
                    } = bit
                    {
                        self.record(t, band, ctx, node, bit);
                    }
                });
            }
        }
    }

    /// `[zeros, ones]` observed at one node.
    #[inline]
    pub(crate) fn counts(&self, t: usize, band: usize, ctx: usize, node: usize) -> [u32; 2] {
        self.counts[t][band][ctx][node]
    }

}

/// Cost of coding `counts` (zeros, ones) with probability `prob`.
#[inline]
pub(crate) fn branch_cost(counts: [u32; 2], prob: u8) -> u64 {
    u64::from(counts[0]) * u64::from(bit_cost(false, prob))
        + u64::from(counts[1]) * u64::from(bit_cost(true, prob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tokens::TYPE_CHROMA;
    use crate::frame::{MacroblockPrediction, U_BLOCKS};

    #[test]
    fn skipped_macroblocks_record_nothing() {
        let mbs = vec![Macroblock::new(MacroblockPrediction::DC); 4];
        let mut stats = TokenStats::new();
        stats.record_frame(&mbs, 2);
        assert!(stats.counts.iter().flatten().flatten().flatten().all(|c| *c == [0, 0]));
    }

    #[test]
    fn coded_macroblock_records_every_block() {
        let mut mb = Macroblock::new(MacroblockPrediction::DC);
        mb.coefficients[U_BLOCKS][0] = 3;
        mb.update_skip();
        let mut stats = TokenStats::new();
        stats.record_frame(core::slice::from_ref(&mb), 1);

        // Luma blocks start at position 1 (band 1) behind the Y2 block.
        let first_eob: u32 = (0..NUM_TYPES)
            .flat_map(|t| (0..NUM_CTX).map(move |ctx| (t, ctx)))
            .map(|(t, ctx)| {
                let [z, o] = stats.counts(t, 0, ctx, 0);
                z + o
            })
            .sum();
        assert_eq!(first_eob, 9);
        let [_, not_eob] = stats.counts(TYPE_CHROMA, 0, 0, 0);
        assert_eq!(not_eob, 1);
    }

    #[test]
    fn branch_cost_prefers_matching_probability() {
        let counts = [90, 10];
        assert!(branch_cost(counts, 230) < branch_cost(counts, 30));
        assert_eq!(branch_cost([0, 0], 17), 0);
    }
}
