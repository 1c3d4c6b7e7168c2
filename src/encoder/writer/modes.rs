//! Per-macroblock mode and motion vector syntax of the first partition.

use super::arithmetic::ArithmeticEncoder;
use crate::common::mv_prediction::{find_near_mvs, NearMvs};
use crate::common::tables::{
    BPRED_MODE_TREE, INTER_BPRED_MODE_PROBS, KEYFRAME_BPRED_MODE_PROBS, KEYFRAME_UV_MODE_PROBS,
    KEYFRAME_YMODE_PROBS, KEYFRAME_YMODE_TREE, MVP_IS_SHORT, MVP_LONG, MVP_SHORT, MVP_SIGN,
    MV_LONG_BIT_ORDER, MV_REF_TREE, MV_SHORT_COUNT, SMALL_MV_TREE, UV_MODE_TREE, YMODE_TREE,
};
use crate::common::types::{InterMode, IntraMode, B_PRED};
use crate::frame::{Frame, InterHeader, LumaPrediction, Macroblock, MacroblockPrediction, MotionVector, ReferenceFrame};
use crate::state::ProbabilityTables;

/// The cheapest way to code `mv` given its neighbours' candidates.
pub(crate) fn inter_mode_for(mv: MotionVector, near: &NearMvs) -> InterMode {
    if mv.is_zero() {
        InterMode::Zero
    } else if mv == near.nearest {
        InterMode::Nearest
    } else if mv == near.near {
        InterMode::Near
    } else {
        InterMode::New
    }
}

/// Subblock modes as seen by the neighbours of a macroblock, for key-frame
/// mode contexts.
pub(crate) fn context_modes(prediction: &MacroblockPrediction) -> [IntraMode; 16] {
    match prediction {
        MacroblockPrediction::Intra {
            luma: LumaPrediction::Subblocks(modes),
            ..
        } => *modes,
        MacroblockPrediction::Intra {
            luma: LumaPrediction::Whole(mode),
            ..
        } => [mode.implied_subblock_mode(); 16],
        MacroblockPrediction::Inter { .. } => [IntraMode::DC; 16],
    }
}

/// Probabilities of each subblock mode of a key-frame macroblock, given the
/// modes of the blocks above and to the left.
pub(crate) fn keyframe_subblock_probs(
    above: &[IntraMode; 4],
    left: &[IntraMode; 4],
    modes: &[IntraMode; 16],
) -> [&'static [u8; 9]; 16] {
    core::array::from_fn(|i| {
        let (row, col) = (i / 4, i % 4);
        let a = if row == 0 { above[col] } else { modes[i - 4] };
        let l = if col == 0 { left[row] } else { modes[i - 1] };
        &KEYFRAME_BPRED_MODE_PROBS[a as usize][l as usize]
    })
}

/// Bottom row and right column of the macroblock at `index`, or DC outside
/// the frame.
pub(crate) fn neighbour_contexts(
    macroblocks: &[Macroblock],
    mb_cols: usize,
    mbx: usize,
    mby: usize,
) -> ([IntraMode; 4], [IntraMode; 4]) {
    let above = if mby > 0 {
        let m = context_modes(&macroblocks[(mby - 1) * mb_cols + mbx].prediction);
        [m[12], m[13], m[14], m[15]]
    } else {
        [IntraMode::DC; 4]
    };
    let left = if mbx > 0 {
        let m = context_modes(&macroblocks[mby * mb_cols + mbx - 1].prediction);
        [m[3], m[7], m[11], m[15]]
    } else {
        [IntraMode::DC; 4]
    };
    (above, left)
}

pub(super) fn write_macroblock_modes(enc: &mut ArithmeticEncoder, frame: &Frame, probs: &ProbabilityTables) {
    let header = &frame.header;
    for mby in 0..frame.mb_rows {
        for mbx in 0..frame.mb_cols {
            let mb = frame.macroblock(mbx, mby);
            enc.write_bool(mb.skip, header.prob_skip);
            match header.kind.inter_header() {
                None => write_keyframe_modes(enc, frame, mbx, mby),
                Some(inter) => write_interframe_modes(enc, frame, mbx, mby, inter, probs),
            }
        }
    }
}

fn write_keyframe_modes(enc: &mut ArithmeticEncoder, frame: &Frame, mbx: usize, mby: usize) {
    let mb = frame.macroblock(mbx, mby);
    let MacroblockPrediction::Intra { luma, chroma } = mb.prediction else {
        debug_assert!(false, "inter macroblock in a key frame");
        return;
    };
    match luma {
        LumaPrediction::Whole(mode) => {
            enc.write_with_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, mode.into_i8());
        }
        LumaPrediction::Subblocks(modes) => {
            enc.write_with_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, B_PRED);
            let (above, left) = neighbour_contexts(&frame.macroblocks, frame.mb_cols, mbx, mby);
            let probs = keyframe_subblock_probs(&above, &left, &modes);
            for (mode, p) in modes.iter().zip(probs) {
                enc.write_with_tree(&BPRED_MODE_TREE, p, mode.into_i8());
            }
        }
    }
    enc.write_with_tree(&UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS, chroma.into_i8());
}

fn write_interframe_modes(
    enc: &mut ArithmeticEncoder,
    frame: &Frame,
    mbx: usize,
    mby: usize,
    inter: &InterHeader,
    probs: &ProbabilityTables,
) {
    let mb = frame.macroblock(mbx, mby);
    match mb.prediction {
        MacroblockPrediction::Intra { luma, chroma } => {
            enc.write_bool(false, inter.prob_intra);
            match luma {
                LumaPrediction::Whole(mode) => {
                    enc.write_with_tree(&YMODE_TREE, &probs.y_modes, mode.into_i8());
                }
                LumaPrediction::Subblocks(modes) => {
                    enc.write_with_tree(&YMODE_TREE, &probs.y_modes, B_PRED);
                    for mode in modes {
                        enc.write_with_tree(&BPRED_MODE_TREE, &INTER_BPRED_MODE_PROBS, mode.into_i8());
                    }
                }
            }
            enc.write_with_tree(&UV_MODE_TREE, &probs.uv_modes, chroma.into_i8());
        }
        MacroblockPrediction::Inter { reference, mv, .. } => {
            enc.write_bool(true, inter.prob_intra);
            enc.write_bool(reference != ReferenceFrame::Last, inter.prob_last);
            if reference != ReferenceFrame::Last {
                enc.write_bool(reference == ReferenceFrame::AltRef, inter.prob_golden);
            }

            let near = find_near_mvs(
                &frame.macroblocks,
                frame.mb_cols,
                frame.mb_rows,
                mbx,
                mby,
                reference,
                inter,
            );
            let mode = inter_mode_for(mv, &near);
            enc.write_with_tree(&MV_REF_TREE, &near.mode_probs, mode.into_i8());
            if mode == InterMode::New {
                write_mv(enc, mv - near.best, probs);
            }
        }
    }
}

/// Writes a vector delta, row component first.
pub(super) fn write_mv(enc: &mut ArithmeticEncoder, delta: MotionVector, probs: &ProbabilityTables) {
    write_mv_component(enc, delta.y, &probs.motion_vectors[0]);
    write_mv_component(enc, delta.x, &probs.motion_vectors[1]);
}

fn write_mv_component(enc: &mut ArithmeticEncoder, v: i16, p: &[u8]) {
    let x = v.unsigned_abs();
    if (x as i16) < MV_SHORT_COUNT {
        enc.write_bool(false, p[MVP_IS_SHORT]);
        enc.write_with_tree(&SMALL_MV_TREE, &p[MVP_SHORT..MVP_LONG], x as i8);
    } else {
        enc.write_bool(true, p[MVP_IS_SHORT]);
        for &bit in &MV_LONG_BIT_ORDER {
            enc.write_bool((x >> bit) & 1 == 1, p[MVP_LONG + bit]);
        }
        if x & 0xFFF0 != 0 {
            enc.write_bool((x >> 3) & 1 == 1, p[MVP_LONG + 3]);
        }
    }
    if x != 0 {
        enc.write_bool(v < 0, p[MVP_SIGN]);
    }
}
