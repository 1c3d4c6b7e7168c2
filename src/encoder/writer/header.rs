//! Frame header fields of the first partition (RFC 6386, section 9).

use super::arithmetic::ArithmeticEncoder;
use crate::common::tables::{COEFF_UPDATE_PROBS, MV_UPDATE_PROBS};
use crate::frame::{FilterDeltas, FrameHeader, FrameKind, InterHeader, LoopFilter, ReferenceFrame};

/// Deltas are coded as 6-bit magnitudes.
const MAX_FILTER_DELTA: i8 = 63;

pub(super) fn write_frame_header(enc: &mut ArithmeticEncoder, header: &FrameHeader) {
    if header.kind.is_key() {
        // color space, clamping required
        enc.write_literal(1, 0);
        enc.write_literal(1, 0);
    }

    // segmentation disabled
    enc.write_flag(false);

    write_loop_filter(enc, &header.loop_filter);

    // one token partition
    enc.write_literal(2, 0);

    let q = &header.quantizer;
    enc.write_literal(7, u32::from(q.y_ac));
    for delta in q.deltas() {
        enc.write_optional_signed_value(4, (delta != 0).then_some(delta));
    }

    match &header.kind {
        FrameKind::Key => enc.write_flag(header.refresh_entropy_probs),
        FrameKind::Inter(inter) => {
            write_reference_updates(enc, inter);
            enc.write_flag(header.refresh_entropy_probs);
            enc.write_flag(inter.refresh_last);
        }
    }

    for (updates, update_probs) in header
        .token_prob_updates
        .iter()
        .flatten()
        .flatten()
        .flatten()
        .zip(COEFF_UPDATE_PROBS.iter().flatten().flatten().flatten())
    {
        enc.write_bool(updates.is_some(), *update_probs);
        if let Some(p) = updates {
            enc.write_literal(8, u32::from(*p));
        }
    }

    // skip flags are always coded
    enc.write_flag(true);
    enc.write_literal(8, u32::from(header.prob_skip));

    if let FrameKind::Inter(inter) = &header.kind {
        enc.write_literal(8, u32::from(inter.prob_intra));
        enc.write_literal(8, u32::from(inter.prob_last));
        enc.write_literal(8, u32::from(inter.prob_golden));

        enc.write_flag(inter.y_mode_probs.is_some());
        for p in inter.y_mode_probs.iter().flatten() {
            enc.write_literal(8, u32::from(*p));
        }
        enc.write_flag(inter.uv_mode_probs.is_some());
        for p in inter.uv_mode_probs.iter().flatten() {
            enc.write_literal(8, u32::from(*p));
        }

        for (updates, update_probs) in inter.mv_prob_updates.iter().zip(&MV_UPDATE_PROBS) {
            for (update, &update_prob) in updates.iter().zip(update_probs) {
                enc.write_bool(update.is_some(), update_prob);
                if let Some(p) = update {
                    enc.write_literal(7, u32::from(p >> 1));
                }
            }
        }
    }
}

fn write_loop_filter(enc: &mut ArithmeticEncoder, filter: &LoopFilter) {
    // normal filter
    enc.write_flag(false);
    enc.write_literal(6, u32::from(filter.level.min(63)));
    enc.write_literal(3, u32::from(filter.sharpness.min(7)));

    enc.write_flag(filter.deltas.is_some());
    if let Some(FilterDeltas { reference, mode }) = filter.deltas {
        // Every delta is sent so the decoder never relies on earlier frames.
        enc.write_flag(true);
        for delta in reference.iter().chain(&mode) {
            enc.write_optional_signed_value(6, Some((*delta).clamp(-MAX_FILTER_DELTA, MAX_FILTER_DELTA)));
        }
    }
}

fn write_reference_updates(enc: &mut ArithmeticEncoder, inter: &InterHeader) {
    enc.write_flag(inter.refresh_golden);
    enc.write_flag(inter.refresh_alt_ref);
    if !inter.refresh_golden {
        let copy = match inter.copy_to_golden {
            Some(ReferenceFrame::Last) => 1,
            Some(ReferenceFrame::AltRef) => 2,
            _ => 0,
        };
        enc.write_literal(2, copy);
    }
    if !inter.refresh_alt_ref {
        let copy = match inter.copy_to_alt_ref {
            Some(ReferenceFrame::Last) => 1,
            Some(ReferenceFrame::Golden) => 2,
            _ => 0,
        };
        enc.write_literal(2, copy);
    }
    enc.write_flag(inter.sign_bias_golden);
    enc.write_flag(inter.sign_bias_alt_ref);
}
