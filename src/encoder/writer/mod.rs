//! Serialization of a symbolic [`Frame`] into a VP8 frame payload.
//!
//! Layout: the uncompressed frame tag (plus start code and dimensions on key
//! frames), the first partition holding the header and per-macroblock modes,
//! then a single token partition.

pub(crate) mod arithmetic;
mod header;
pub(crate) mod modes;

use byteorder_lite::{ByteOrder, LittleEndian};

use self::arithmetic::ArithmeticEncoder;
use crate::common::tokens::{walk_macroblock, NonzeroContext, TokenBit};
use crate::frame::Frame;
use crate::state::ProbabilityTables;

const KEYFRAME_START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// Serializes `frame`. `probabilities` are the tables in effect before the
/// frame; its header updates are applied on top of them.
pub fn write_frame(frame: &Frame, probabilities: &ProbabilityTables) -> Vec<u8> {
    let probs = probabilities.for_frame(&frame.header);

    let mut first = ArithmeticEncoder::with_capacity(256 + frame.macroblocks.len());
    header::write_frame_header(&mut first, &frame.header);
    modes::write_macroblock_modes(&mut first, frame, &probs);
    let first = first.flush_and_get_buffer();

    let tokens = write_tokens(frame, &probs);

    let key = frame.is_key();
    let mut out = Vec::with_capacity(10 + first.len() + tokens.len());
    // key frame bit is 0, version 0, shown
    let tag = ((first.len() as u32) << 5) | (1 << 4) | u32::from(!key);
    let mut tag_bytes = [0u8; 3];
    LittleEndian::write_u24(&mut tag_bytes, tag);
    out.extend_from_slice(&tag_bytes);
    if key {
        out.extend_from_slice(&KEYFRAME_START_CODE);
        let mut dims = [0u8; 4];
        LittleEndian::write_u16(&mut dims[..2], frame.header.width & 0x3FFF);
        LittleEndian::write_u16(&mut dims[2..], frame.header.height & 0x3FFF);
        out.extend_from_slice(&dims);
    }
    out.extend_from_slice(&first);
    out.extend_from_slice(&tokens);
    out
}

fn write_tokens(frame: &Frame, probs: &ProbabilityTables) -> Vec<u8> {
    let mut enc = ArithmeticEncoder::with_capacity(frame.macroblocks.len() * 32);
    let mut above = vec![NonzeroContext::default(); frame.mb_cols];
    for row in frame.macroblocks.chunks(frame.mb_cols) {
        let mut left = NonzeroContext::default();
        for (mb, above) in row.iter().zip(above.iter_mut()) {
            walk_macroblock(mb, above, &mut left, |t, bit| match bit {
                TokenBit::Tree {
                    band,
                    ctx,
                    node,
                    bit,
                } => enc.write_bool(bit, probs.coefficients[t][band][ctx][node]),
                TokenBit::Fixed { prob, bit } => enc.write_bool(bit, prob),
            });
        }
    }
    enc.flush_and_get_buffer()
}

/// Size in bytes `frame` would take, without keeping the payload.
pub(crate) fn frame_size(frame: &Frame, probabilities: &ProbabilityTables) -> usize {
    write_frame(frame, probabilities).len()
}
