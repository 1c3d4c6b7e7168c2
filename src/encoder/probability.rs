//! Probability adaptation from the statistics of a coded frame.
//!
//! Every header field carrying a probability is set to the value the frame's
//! own counts suggest, but a persistent table entry is only updated when the
//! bits saved in the frame outweigh the cost of signalling the update.

use super::cost::stats::branch_cost;
use super::cost::{bit_cost, TokenStats, ONE_BIT};
use crate::common::tables::{
    COEFF_UPDATE_PROBS, MVP_IS_SHORT, MVP_LONG, MVP_SHORT, MVP_SIGN, MV_LONG_BIT_ORDER,
    MV_SHORT_COUNT, MV_UPDATE_PROBS, SMALL_MV_TREE, UV_MODE_TREE, YMODE_TREE,
};
use crate::common::tokens::tree_path;
use crate::common::types::{
    MvProbTables, TokenProbTables, TokenProbUpdates, B_PRED, MV_PROB_COUNT, NUM_BANDS, NUM_CTX,
    NUM_PROBAS, NUM_TYPES,
};
use crate::frame::{InterHeader, LumaPrediction, Macroblock, MacroblockPrediction, MotionVector, ReferenceFrame};
use crate::state::ProbabilityTables;

/// Branch counts `(zeros, ones)` of every motion vector probability, row
/// component first.
pub(crate) type MvComponentCounts = [[[u32; 2]; MV_PROB_COUNT]; 2];

/// Probability of a zero given `zeros` out of `total` events.
///
/// An empty branch gets the neutral 128.
pub(crate) fn calc_prob(zeros: u32, total: u32) -> u8 {
    if total == 0 {
        return 128;
    }
    let p = (u64::from(zeros) * 256 + u64::from(total) / 2) / u64::from(total);
    p.clamp(1, 255) as u8
}

/// Whether coding `counts` with `new` instead of `old` pays for an update
/// flagged with `update_prob` and carrying `payload_bits` bits.
fn update_pays(counts: [u32; 2], old: u8, new: u8, update_prob: u8, payload_bits: u32) -> bool {
    if new == old || counts == [0, 0] {
        return false;
    }
    let keep = branch_cost(counts, old) + u64::from(bit_cost(false, update_prob));
    let update = branch_cost(counts, new)
        + u64::from(bit_cost(true, update_prob))
        + u64::from(payload_bits * ONE_BIT);
    update < keep
}

/// Token probability updates worth sending given the frame's statistics,
/// relative to the tables `current` in effect before the frame.
pub(crate) fn optimize_probability_tables(
    stats: &TokenStats,
    current: &TokenProbTables,
) -> Box<TokenProbUpdates> {
    let mut updates = Box::new([[[[None; NUM_PROBAS]; NUM_CTX]; NUM_BANDS]; NUM_TYPES]);
    for t in 0..NUM_TYPES {
        for b in 0..NUM_BANDS {
            for c in 0..NUM_CTX {
                for p in 0..NUM_PROBAS {
                    let counts = stats.counts(t, b, c, p);
                    let optimal = calc_prob(counts[0], counts[0] + counts[1]);
                    let old = current[t][b][c][p];
                    if update_pays(counts, old, optimal, COEFF_UPDATE_PROBS[t][b][c][p], 8) {
                        updates[t][b][c][p] = Some(optimal);
                    }
                }
            }
        }
    }
    updates
}

/// Skip-flag probability for the frame; the flag is coded as `skip`.
pub(crate) fn optimize_prob_skip(macroblocks: &[Macroblock]) -> u8 {
    let coded = macroblocks.iter().filter(|mb| !mb.skip).count() as u32;
    calc_prob(coded, macroblocks.len() as u32).clamp(1, 254)
}

/// Branch counts of the nodes of `tree` for the leaves in `values`.
fn tree_counts<const N: usize>(tree: &[i8], values: impl Iterator<Item = i8>) -> [[u32; 2]; N] {
    let mut counts = [[0u32; 2]; N];
    for value in values {
        for &(node, bit) in tree_path(tree, value, 0).steps() {
            counts[usize::from(node)][usize::from(bit)] += 1;
        }
    }
    counts
}

/// Candidate table for `counts`, or `None` when keeping `current` is at least
/// as cheap once the 8-bit-per-entry update is paid for.
fn optimize_mode_probs<const N: usize>(counts: &[[u32; 2]; N], current: &[u8; N]) -> Option<[u8; N]> {
    let new: [u8; N] = core::array::from_fn(|i| calc_prob(counts[i][0], counts[i][0] + counts[i][1]));
    if new == *current {
        return None;
    }
    let keep: u64 = counts.iter().zip(current).map(|(&c, &p)| branch_cost(c, p)).sum();
    let update: u64 = counts.iter().zip(&new).map(|(&c, &p)| branch_cost(c, p)).sum::<u64>()
        + u64::from(8 * N as u32 * ONE_BIT);
    (update < keep).then_some(new)
}

/// Sets the reference-selection probabilities of an inter frame and decides
/// whether to replace the intra mode tables.
pub(crate) fn optimize_interframe_probs(
    macroblocks: &[Macroblock],
    current: &ProbabilityTables,
    header: &mut InterHeader,
) {
    let mut intra = 0u32;
    let mut last = 0u32;
    let mut golden = 0u32;
    let mut alt_ref = 0u32;
    for mb in macroblocks {
        match mb.prediction.motion() {
            None => intra += 1,
            Some((ReferenceFrame::Last, _)) => last += 1,
            Some((ReferenceFrame::Golden, _)) => golden += 1,
            Some((ReferenceFrame::AltRef, _)) => alt_ref += 1,
        }
    }
    header.prob_intra = calc_prob(intra, macroblocks.len() as u32);
    header.prob_last = calc_prob(last, last + golden + alt_ref);
    header.prob_golden = calc_prob(golden, golden + alt_ref);

    let intra_modes = || {
        macroblocks.iter().filter_map(|mb| match mb.prediction {
            MacroblockPrediction::Intra { luma, chroma } => Some((luma, chroma)),
            MacroblockPrediction::Inter { .. } => None,
        })
    };
    let y_counts: [[u32; 2]; 4] = tree_counts(
        &YMODE_TREE,
        intra_modes().map(|(luma, _)| match luma {
            LumaPrediction::Whole(mode) => mode.into_i8(),
            LumaPrediction::Subblocks(_) => B_PRED,
        }),
    );
    let uv_counts: [[u32; 2]; 3] =
        tree_counts(&UV_MODE_TREE, intra_modes().map(|(_, chroma)| chroma.into_i8()));
    header.y_mode_probs = optimize_mode_probs(&y_counts, &current.y_modes);
    header.uv_mode_probs = optimize_mode_probs(&uv_counts, &current.uv_modes);
}

/// Adds the branches coding one vector component to `counts`.
pub(crate) fn update_mv_component_counts(v: i16, counts: &mut [[u32; 2]; MV_PROB_COUNT]) {
    let mut record = |index: usize, bit: bool| counts[index][usize::from(bit)] += 1;
    let x = v.unsigned_abs();
    if (x as i16) < MV_SHORT_COUNT {
        record(MVP_IS_SHORT, false);
        for &(node, bit) in tree_path(&SMALL_MV_TREE, x as i8, 0).steps() {
            record(MVP_SHORT + usize::from(node), bit);
        }
    } else {
        record(MVP_IS_SHORT, true);
        for &bit in &MV_LONG_BIT_ORDER {
            record(MVP_LONG + bit, (x >> bit) & 1 == 1);
        }
        if x & 0xFFF0 != 0 {
            record(MVP_LONG + 3, (x >> 3) & 1 == 1);
        }
    }
    if x != 0 {
        record(MVP_SIGN, v < 0);
    }
}

/// Adds a coded vector delta to `counts`, row first.
pub(crate) fn update_mv_counts(delta: MotionVector, counts: &mut MvComponentCounts) {
    update_mv_component_counts(delta.y, &mut counts[0]);
    update_mv_component_counts(delta.x, &mut counts[1]);
}

/// Motion vector probability updates worth sending.
///
/// Updated values are carried in 7 bits, so candidates are snapped to even
/// values with 1 standing in for zero.
pub(crate) fn optimize_mv_probs(
    counts: &MvComponentCounts,
    current: &MvProbTables,
) -> [[Option<u8>; MV_PROB_COUNT]; 2] {
    let mut updates = [[None; MV_PROB_COUNT]; 2];
    for (i, component) in counts.iter().enumerate() {
        for (j, &branch) in component.iter().enumerate() {
            let optimal = (calc_prob(branch[0], branch[0] + branch[1]) & !1).max(1);
            if update_pays(branch, current[i][j], optimal, MV_UPDATE_PROBS[i][j], 7) {
                updates[i][j] = Some(optimal);
            }
        }
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tables::{COEFF_PROBS, DEFAULT_MV_PROBS};
    use crate::common::types::{BlockMode, InterMode};
    use crate::frame::{FrameHeader, FrameKind, U_BLOCKS};
    use crate::common::quant::QuantIndices;

    fn apply(current: &TokenProbTables, updates: &TokenProbUpdates) -> TokenProbTables {
        let mut tables = *current;
        for (p, u) in tables
            .iter_mut()
            .flatten()
            .flatten()
            .flatten()
            .zip(updates.iter().flatten().flatten().flatten())
        {
            if let Some(u) = u {
                *p = *u;
            }
        }
        tables
    }

    fn busy_macroblocks() -> Vec<Macroblock> {
        (0..24)
            .map(|i| {
                let mut mb = Macroblock::new(MacroblockPrediction::DC);
                for b in 0..16 {
                    mb.coefficients[b][1] = ((i + b) % 5) as i16;
                    mb.coefficients[b][4] = -(((i * b) % 3) as i16);
                }
                mb.coefficients[U_BLOCKS][0] = 40;
                mb.update_skip();
                mb
            })
            .collect()
    }

    #[test]
    fn calc_prob_rounds_and_clamps() {
        assert_eq!(calc_prob(0, 0), 128);
        assert_eq!(calc_prob(1, 2), 128);
        assert_eq!(calc_prob(0, 10), 1);
        assert_eq!(calc_prob(10, 10), 255);
        assert_eq!(calc_prob(3, 4), 192);
    }

    #[test]
    fn token_adaptation_is_idempotent() {
        let mut stats = TokenStats::new();
        stats.record_frame(&busy_macroblocks(), 6);

        let first = optimize_probability_tables(&stats, &COEFF_PROBS);
        assert!(first.iter().flatten().flatten().flatten().any(Option::is_some));
        let adapted = apply(&COEFF_PROBS, &first);

        let second = optimize_probability_tables(&stats, &adapted);
        assert!(second.iter().flatten().flatten().flatten().all(Option::is_none));
        assert_eq!(apply(&adapted, &second), adapted);
    }

    #[test]
    fn empty_statistics_update_nothing() {
        let updates = optimize_probability_tables(&TokenStats::new(), &COEFF_PROBS);
        assert!(updates.iter().flatten().flatten().flatten().all(Option::is_none));
    }

    #[test]
    fn skip_probability_follows_counts() {
        let mut mbs = vec![Macroblock::new(MacroblockPrediction::DC); 10];
        assert_eq!(optimize_prob_skip(&mbs), 1);
        for mb in &mut mbs {
            mb.skip = false;
        }
        assert_eq!(optimize_prob_skip(&mbs), 254);
    }

    #[test]
    fn mv_counts_follow_the_coded_branches() {
        let mut counts = [[[0u32; 2]; MV_PROB_COUNT]; 2];
        update_mv_counts(MotionVector::new(3, 0), &mut counts);
        update_mv_counts(MotionVector::new(-100, 0), &mut counts);

        // Rows: two zero components, short, no sign.
        assert_eq!(counts[0][MVP_IS_SHORT], [2, 0]);
        assert_eq!(counts[0][MVP_SIGN], [0, 0]);
        // Columns: one short, one long and negative.
        assert_eq!(counts[1][MVP_IS_SHORT], [1, 1]);
        assert_eq!(counts[1][MVP_SIGN], [1, 1]);
        // 100 = 0b110_0100 has its bit 3 coded.
        assert_eq!(counts[1][MVP_LONG + 3], [1, 0]);
    }

    #[test]
    fn mv_updates_are_even_and_idempotent() {
        let mut counts = [[[0u32; 2]; MV_PROB_COUNT]; 2];
        for i in 0..400 {
            update_mv_counts(MotionVector::new(40 + (i % 7), -2), &mut counts);
        }
        let updates = optimize_mv_probs(&counts, &DEFAULT_MV_PROBS);
        assert!(updates.iter().flatten().any(Option::is_some));

        let mut adapted = DEFAULT_MV_PROBS;
        for (p, u) in adapted.iter_mut().flatten().zip(updates.iter().flatten()) {
            if let Some(u) = u {
                assert!(*u == 1 || u % 2 == 0);
                *p = *u;
            }
        }
        let again = optimize_mv_probs(&counts, &adapted);
        assert!(again.iter().flatten().all(Option::is_none));
    }

    #[test]
    fn interframe_probabilities_track_references() {
        let inter = |reference| {
            Macroblock::new(MacroblockPrediction::Inter {
                reference,
                mode: InterMode::Zero,
                mv: MotionVector::ZERO,
            })
        };
        let mut mbs = vec![inter(ReferenceFrame::Last); 30];
        mbs.extend(vec![inter(ReferenceFrame::Golden); 10]);
        mbs.extend(vec![Macroblock::new(MacroblockPrediction::Intra {
            luma: LumaPrediction::Whole(BlockMode::TM),
            chroma: BlockMode::TM,
        }); 40]);

        let mut header = InterHeader::default();
        optimize_interframe_probs(&mbs, &ProbabilityTables::default(), &mut header);
        assert_eq!(header.prob_intra, 128);
        assert_eq!(header.prob_last, 192);
        assert_eq!(header.prob_golden, 255);
        // Forty TM macroblocks are far from the default mode tables.
        assert!(header.y_mode_probs.is_some());
        assert!(header.uv_mode_probs.is_some());

        let frame = FrameHeader::new(FrameKind::Inter(header), 16, 16, QuantIndices::uniform(10));
        let adapted = ProbabilityTables::default().for_frame(&frame);
        let mut again = InterHeader::default();
        optimize_interframe_probs(&mbs, &adapted, &mut again);
        assert_eq!(again.y_mode_probs, None);
        assert_eq!(again.uv_mode_probs, None);
    }
}
