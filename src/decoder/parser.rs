//! Parsing of VP8 frame payloads into symbolic [`Frame`]s.
//!
//! Supports the subset of the format the writer produces: no segmentation,
//! the normal loop filter, one token partition and no split motion vectors.

use byteorder_lite::{ByteOrder, LittleEndian};

use super::bool_decoder::BoolDecoder;
use super::DecodeError;
use crate::common::mv_prediction::find_near_mvs;
use crate::common::quant::QuantIndices;
use crate::common::tables::{
    BPRED_MODE_TREE, COEFF_BANDS, COEFF_UPDATE_PROBS, DCT_CAT_BASE, DCT_EOB, DCT_TOKEN_TREE,
    INTER_BPRED_MODE_PROBS, KEYFRAME_UV_MODE_PROBS, KEYFRAME_YMODE_PROBS, KEYFRAME_YMODE_TREE,
    MVP_IS_SHORT, MVP_LONG, MVP_SHORT, MVP_SIGN, MV_LONG_BIT_ORDER, MV_REF_TREE, MV_UPDATE_PROBS,
    SMALL_MV_TREE, UV_MODE_TREE, YMODE_TREE, ZIGZAG,
};
use crate::common::tokens::{
    category_probs, context_after, NonzeroContext, TYPE_CHROMA, TYPE_Y2, TYPE_Y_AFTER_Y2,
    TYPE_Y_WITH_DC,
};
use crate::common::types::{BlockMode, InterMode, IntraMode, B_PRED, NUM_BANDS, NUM_CTX, NUM_PROBAS};
use crate::encoder::writer::modes::{keyframe_subblock_probs, neighbour_contexts};
use crate::frame::{
    FilterDeltas, Frame, FrameHeader, FrameKind, InterHeader, LoopFilter, LumaPrediction,
    Macroblock, MacroblockPrediction, MotionVector, ReferenceFrame, U_BLOCKS, V_BLOCKS, Y2_BLOCK,
};
use crate::raster::macroblock_dimensions;
use crate::state::{DecoderState, ProbabilityTables};

const KEYFRAME_START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// Parses one frame payload. `state` supplies the probabilities in effect
/// before the frame and, for inter frames, the dimensions.
pub fn parse_frame(data: &[u8], state: &DecoderState) -> Result<Frame, DecodeError> {
    if data.len() < 3 {
        return Err(DecodeError::Truncated);
    }
    let tag = LittleEndian::read_u24(data);
    let key = tag & 1 == 0;
    if (tag >> 1) & 7 != 0 {
        return Err(DecodeError::Malformed("unsupported bitstream version"));
    }
    let first_size = (tag >> 5) as usize;

    let (width, height, rest) = if key {
        let header = data.get(3..10).ok_or(DecodeError::Truncated)?;
        if header[..3] != KEYFRAME_START_CODE {
            return Err(DecodeError::Malformed("missing key frame start code"));
        }
        let width = LittleEndian::read_u16(&header[3..5]) & 0x3FFF;
        let height = LittleEndian::read_u16(&header[5..7]) & 0x3FFF;
        (width, height, &data[10..])
    } else {
        (state.width as u16, state.height as u16, &data[3..])
    };
    if width == 0 || height == 0 {
        return Err(DecodeError::Malformed("zero frame dimensions"));
    }
    if rest.len() < first_size {
        return Err(DecodeError::Truncated);
    }
    let (first, tokens) = rest.split_at(first_size);

    let mut dec = BoolDecoder::new(first);
    let (header, skip_coded) = parse_frame_header(&mut dec, key, width, height)?;
    let (mb_cols, mb_rows) = macroblock_dimensions(usize::from(width), usize::from(height));
    let probs = state.probabilities.for_frame(&header);

    let mut macroblocks: Vec<Macroblock> = Vec::with_capacity(mb_cols * mb_rows);
    for mby in 0..mb_rows {
        for mbx in 0..mb_cols {
            let skip = skip_coded && dec.read_bool(header.prob_skip);
            let prediction = match header.kind.inter_header() {
                None => read_keyframe_modes(&mut dec, &macroblocks, mb_cols, mbx, mby),
                Some(inter) => read_interframe_modes(
                    &mut dec,
                    &macroblocks,
                    (mb_cols, mb_rows),
                    (mbx, mby),
                    inter,
                    &probs,
                )?,
            };
            let mut mb = Macroblock::new(prediction);
            mb.skip = skip;
            macroblocks.push(mb);
        }
    }
    dec.check(())?;

    let mut dec = BoolDecoder::new(tokens);
    let mut above = vec![NonzeroContext::default(); mb_cols];
    for row in macroblocks.chunks_mut(mb_cols) {
        let mut left = NonzeroContext::default();
        for (mb, above) in row.iter_mut().zip(above.iter_mut()) {
            read_macroblock_tokens(&mut dec, mb, above, &mut left, &probs);
        }
    }
    dec.check(())?;

    Ok(Frame {
        header,
        mb_cols,
        mb_rows,
        macroblocks,
    })
}

fn parse_frame_header(
    dec: &mut BoolDecoder<'_>,
    key: bool,
    width: u16,
    height: u16,
) -> Result<(FrameHeader, bool), DecodeError> {
    if key {
        // color space, clamping type
        dec.read_literal(2);
    }
    if dec.read_flag() {
        return Err(DecodeError::Malformed("segmentation is not supported"));
    }

    if dec.read_flag() {
        return Err(DecodeError::Malformed("simple loop filter is not supported"));
    }
    let mut loop_filter = LoopFilter {
        level: dec.read_literal(6) as u8,
        sharpness: dec.read_literal(3) as u8,
        deltas: None,
    };
    if dec.read_flag() {
        let mut deltas = FilterDeltas::default();
        if dec.read_flag() {
            for delta in deltas.reference.iter_mut().chain(deltas.mode.iter_mut()) {
                *delta = dec.read_optional_signed_value(6) as i8;
            }
        }
        loop_filter.deltas = Some(deltas);
    }

    if dec.read_literal(2) != 0 {
        return Err(DecodeError::Malformed("multiple token partitions are not supported"));
    }

    let y_ac = dec.read_literal(7) as u8;
    let deltas: [i8; 5] = core::array::from_fn(|_| dec.read_optional_signed_value(4) as i8);
    let quantizer = QuantIndices::from_deltas(y_ac, deltas);

    let (kind, refresh_entropy_probs) = if key {
        (FrameKind::Key, dec.read_flag())
    } else {
        let mut inter = InterHeader {
            refresh_golden: dec.read_flag(),
            refresh_alt_ref: dec.read_flag(),
            ..InterHeader::default()
        };
        if !inter.refresh_golden {
            inter.copy_to_golden = match dec.read_literal(2) {
                1 => Some(ReferenceFrame::Last),
                2 => Some(ReferenceFrame::AltRef),
                _ => None,
            };
        }
        if !inter.refresh_alt_ref {
            inter.copy_to_alt_ref = match dec.read_literal(2) {
                1 => Some(ReferenceFrame::Last),
                2 => Some(ReferenceFrame::Golden),
                _ => None,
            };
        }
        inter.sign_bias_golden = dec.read_flag();
        inter.sign_bias_alt_ref = dec.read_flag();
        let refresh = dec.read_flag();
        inter.refresh_last = dec.read_flag();
        (FrameKind::Inter(inter), refresh)
    };

    let mut header = FrameHeader::new(kind, width, height, quantizer);
    header.loop_filter = loop_filter;
    header.refresh_entropy_probs = refresh_entropy_probs;

    for t in 0..COEFF_UPDATE_PROBS.len() {
        for b in 0..NUM_BANDS {
            for c in 0..NUM_CTX {
                for p in 0..NUM_PROBAS {
                    if dec.read_bool(COEFF_UPDATE_PROBS[t][b][c][p]) {
                        header.token_prob_updates[t][b][c][p] = Some(dec.read_literal(8) as u8);
                    }
                }
            }
        }
    }

    // Without coded skip flags every macroblock carries tokens.
    let skip_coded = dec.read_flag();
    if skip_coded {
        header.prob_skip = dec.read_literal(8) as u8;
    }

    if let FrameKind::Inter(inter) = &mut header.kind {
        inter.prob_intra = dec.read_literal(8) as u8;
        inter.prob_last = dec.read_literal(8) as u8;
        inter.prob_golden = dec.read_literal(8) as u8;
        if dec.read_flag() {
            inter.y_mode_probs = Some(core::array::from_fn(|_| dec.read_literal(8) as u8));
        }
        if dec.read_flag() {
            inter.uv_mode_probs = Some(core::array::from_fn(|_| dec.read_literal(8) as u8));
        }
        for (updates, update_probs) in inter.mv_prob_updates.iter_mut().zip(&MV_UPDATE_PROBS) {
            for (update, &update_prob) in updates.iter_mut().zip(update_probs) {
                if dec.read_bool(update_prob) {
                    let v = dec.read_literal(7) as u8;
                    *update = Some(if v == 0 { 1 } else { v << 1 });
                }
            }
        }
    }

    dec.check((header, skip_coded))
}

fn block_mode(value: i8) -> BlockMode {
    BlockMode::from_i8(value).unwrap_or_default()
}

fn intra_mode(value: i8) -> IntraMode {
    IntraMode::from_i8(value).unwrap_or_default()
}

fn read_keyframe_modes(
    dec: &mut BoolDecoder<'_>,
    macroblocks: &[Macroblock],
    mb_cols: usize,
    mbx: usize,
    mby: usize,
) -> MacroblockPrediction {
    let y = dec.read_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, 0);
    let luma = if y == B_PRED {
        // Neighbours for context: the frame so far plus this macroblock's
        // earlier subblocks.
        let (above, left) = neighbour_contexts(macroblocks, mb_cols, mbx, mby);
        let mut modes = [IntraMode::DC; 16];
        for i in 0..16 {
            let probs = keyframe_subblock_probs(&above, &left, &modes)[i];
            modes[i] = intra_mode(dec.read_tree(&BPRED_MODE_TREE, probs, 0));
        }
        LumaPrediction::Subblocks(modes)
    } else {
        LumaPrediction::Whole(block_mode(y))
    };
    let chroma = block_mode(dec.read_tree(&UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS, 0));
    MacroblockPrediction::Intra { luma, chroma }
}

fn read_interframe_modes(
    dec: &mut BoolDecoder<'_>,
    macroblocks: &[Macroblock],
    (mb_cols, mb_rows): (usize, usize),
    (mbx, mby): (usize, usize),
    inter: &InterHeader,
    probs: &ProbabilityTables,
) -> Result<MacroblockPrediction, DecodeError> {
    if !dec.read_bool(inter.prob_intra) {
        let y = dec.read_tree(&YMODE_TREE, &probs.y_modes, 0);
        let luma = if y == B_PRED {
            LumaPrediction::Subblocks(core::array::from_fn(|_| {
                intra_mode(dec.read_tree(&BPRED_MODE_TREE, &INTER_BPRED_MODE_PROBS, 0))
            }))
        } else {
            LumaPrediction::Whole(block_mode(y))
        };
        let chroma = block_mode(dec.read_tree(&UV_MODE_TREE, &probs.uv_modes, 0));
        return Ok(MacroblockPrediction::Intra { luma, chroma });
    }

    let reference = if !dec.read_bool(inter.prob_last) {
        ReferenceFrame::Last
    } else if dec.read_bool(inter.prob_golden) {
        ReferenceFrame::AltRef
    } else {
        ReferenceFrame::Golden
    };

    let near = find_near_mvs(macroblocks, mb_cols, mb_rows, mbx, mby, reference, inter);
    let mode = InterMode::from_i8(dec.read_tree(&MV_REF_TREE, &near.mode_probs, 0))
        .ok_or(DecodeError::Malformed("split motion vectors are not supported"))?;
    let mv = match mode {
        InterMode::Zero => MotionVector::ZERO,
        InterMode::Nearest => near.nearest,
        InterMode::Near => near.near,
        InterMode::New => {
            let row = read_mv_component(dec, &probs.motion_vectors[0]);
            let col = read_mv_component(dec, &probs.motion_vectors[1]);
            near.best + MotionVector::new(col, row)
        }
    };
    Ok(MacroblockPrediction::Inter {
        reference,
        mode,
        mv,
    })
}

fn read_mv_component(dec: &mut BoolDecoder<'_>, p: &[u8]) -> i16 {
    let x = if dec.read_bool(p[MVP_IS_SHORT]) {
        let mut x = 0i16;
        for &bit in &MV_LONG_BIT_ORDER {
            x += i16::from(dec.read_bool(p[MVP_LONG + bit])) << bit;
        }
        if x & !0xF == 0 || dec.read_bool(p[MVP_LONG + 3]) {
            x += 8;
        }
        x
    } else {
        i16::from(dec.read_tree(&SMALL_MV_TREE, &p[MVP_SHORT..MVP_LONG], 0))
    };
    if x != 0 && dec.read_bool(p[MVP_SIGN]) {
        -x
    } else {
        x
    }
}

/// Reads one block of tokens; returns the levels in natural order and
/// whether any was nonzero.
fn read_block(
    dec: &mut BoolDecoder<'_>,
    probs: &[[[u8; NUM_PROBAS]; NUM_CTX]; NUM_BANDS],
    first: usize,
    ctx0: usize,
) -> ([i16; 16], bool) {
    let mut levels = [0i16; 16];
    let mut ctx = ctx0;
    let mut after_zero = false;
    let mut nonzero = false;

    for n in first..16 {
        let p = &probs[usize::from(COEFF_BANDS[n])][ctx];
        let token = dec.read_tree(&DCT_TOKEN_TREE, p, if after_zero { 2 } else { 0 });
        if token == DCT_EOB {
            break;
        }
        let v = match token {
            0..=4 => token as u16,
            _ => {
                let cat = token as usize - 5;
                let extra = category_probs(cat)
                    .iter()
                    .fold(0u16, |v, &prob| (v << 1) | u16::from(dec.read_bool(prob)));
                DCT_CAT_BASE[cat] + extra
            }
        };
        if v > 0 {
            let level = v.min(i16::MAX as u16) as i16;
            levels[usize::from(ZIGZAG[n])] = if dec.read_flag() { -level } else { level };
            nonzero = true;
        }
        ctx = context_after(v);
        after_zero = v == 0;
    }
    (levels, nonzero)
}

fn read_macroblock_tokens(
    dec: &mut BoolDecoder<'_>,
    mb: &mut Macroblock,
    above: &mut NonzeroContext,
    left: &mut NonzeroContext,
    probs: &ProbabilityTables,
) {
    let has_y2 = mb.prediction.has_y2();
    if mb.skip {
        above.clear(has_y2);
        left.clear(has_y2);
        return;
    }
    let coeffs = &probs.coefficients;

    let (y_type, first) = if has_y2 {
        let ctx = usize::from(above.y2) + usize::from(left.y2);
        let (levels, nz) = read_block(dec, &coeffs[TYPE_Y2], 0, ctx);
        mb.coefficients[Y2_BLOCK] = levels;
        above.y2 = nz;
        left.y2 = nz;
        (TYPE_Y_AFTER_Y2, 1)
    } else {
        (TYPE_Y_WITH_DC, 0)
    };

    for i in 0..16 {
        let (row, col) = (i / 4, i % 4);
        let ctx = usize::from(above.y[col]) + usize::from(left.y[row]);
        let (levels, nz) = read_block(dec, &coeffs[y_type], first, ctx);
        mb.coefficients[i] = levels;
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
            let (levels, nz) = read_block(dec, &coeffs[TYPE_CHROMA], 0, usize::from(*a) + usize::from(*l));
            mb.coefficients[start + i] = levels;
            *a = nz;
            *l = nz;
        }
    }
}
