//! Macroblock reconstruction from prediction and quantized levels.
//!
//! The encoder rebuilds its reference frames through the same functions, so
//! its reconstruction and the decoder's output agree bit for bit.

use crate::common::inter_prediction::InterPrediction;
use crate::common::prediction::{
    add_residue, chroma_workspace, luma_workspace, predict_subblock, predict_whole,
    store_subblock, workspace_block, SubblockEdges, CHROMA_STRIDE, LUMA_STRIDE,
};
use crate::common::quant::Dequantizer;
use crate::common::transform::{inverse_dct, inverse_wht};
use crate::common::types::{BlockMode, IntraMode};
use crate::frame::{
    LumaPrediction, Macroblock, MacroblockPrediction, ReferenceFrame, U_BLOCKS, V_BLOCKS,
    Y2_BLOCK,
};
use crate::raster::{Plane, Raster};
use crate::state::References;

/// Residual of one block. `dc` replaces the DC level when it comes from Y2.
pub(crate) fn inverse_block(steps: [u16; 2], levels: &[i16; 16], dc: Option<i32>) -> [i32; 16] {
    let mut coeffs = Dequantizer::dequantize(steps, levels);
    if let Some(dc) = dc {
        coeffs[0] = dc;
    }
    if coeffs.iter().any(|&c| c != 0) {
        inverse_dct(&mut coeffs);
    }
    coeffs
}

/// Luma DC values carried by the Y2 block.
pub(crate) fn y2_dc_values(dq: &Dequantizer, levels: &[i16; 16]) -> [i32; 16] {
    let mut dc = Dequantizer::dequantize(dq.y2, levels);
    if dc.iter().any(|&c| c != 0) {
        inverse_wht(&mut dc);
    }
    dc
}

/// Residuals of the 16 luma blocks of a macroblock predicted as a whole.
pub(crate) fn whole_luma_residuals(mb_coeffs: &[[i16; 16]; 25], dq: &Dequantizer) -> [[i32; 16]; 16] {
    let dc = y2_dc_values(dq, &mb_coeffs[Y2_BLOCK]);
    core::array::from_fn(|i| inverse_block(dq.y, &mb_coeffs[i], Some(dc[i])))
}

/// Adds 4x4 residuals to a packed `size`x`size` prediction.
pub(crate) fn add_residuals(pred: &[u8], size: usize, residuals: &[[i32; 16]]) -> Vec<u8> {
    let per_row = size / 4;
    let mut out = pred.to_vec();
    for (i, residual) in residuals.iter().enumerate() {
        let (bx, by) = ((i % per_row) * 4, (i / per_row) * 4);
        for y in 0..4 {
            for x in 0..4 {
                let idx = (by + y) * size + bx + x;
                out[idx] = (i32::from(pred[idx]) + residual[y * 4 + x]).clamp(0, 255) as u8;
            }
        }
    }
    out
}

/// Intra prediction of a whole 16x16 luma or 8x8 chroma block from the
/// reconstruction so far.
pub(crate) fn predict_intra_whole(plane: &Plane, mbx: usize, mby: usize, mode: BlockMode, size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size * size];
    if size == 16 {
        let mut ws = luma_workspace(plane, mbx, mby);
        predict_whole(&mut ws, 16, LUMA_STRIDE, mode, mby > 0, mbx > 0);
        workspace_block(&ws, 16, LUMA_STRIDE, &mut out);
    } else {
        let mut ws = chroma_workspace(plane, mbx, mby);
        predict_whole(&mut ws, 8, CHROMA_STRIDE, mode, mby > 0, mbx > 0);
        workspace_block(&ws, 8, CHROMA_STRIDE, &mut out);
    }
    out
}

/// Reconstructs macroblock `(mbx, mby)` into `out`.
///
/// `out` must already hold the reconstruction of every earlier macroblock
/// (intra prediction reads them unfiltered). Fails with the missing slot if
/// an inter macroblock refers to an empty reference.
pub(crate) fn reconstruct_macroblock(
    out: &mut Raster,
    mb: &Macroblock,
    mbx: usize,
    mby: usize,
    dq: &Dequantizer,
    references: &References,
) -> Result<(), ReferenceFrame> {
    let c = &mb.coefficients;
    let chroma_residuals = |start: usize| -> [[i32; 16]; 4] {
        core::array::from_fn(|i| inverse_block(dq.uv, &c[start + i], None))
    };

    let (luma, u_pred, v_pred) = match mb.prediction {
        MacroblockPrediction::Intra { luma, chroma } => {
            let luma = match luma {
                LumaPrediction::Whole(mode) => {
                    let pred = predict_intra_whole(&out.y, mbx, mby, mode, 16);
                    add_residuals(&pred, 16, &whole_luma_residuals(c, dq))
                }
                LumaPrediction::Subblocks(modes) => reconstruct_subblocks(&out.y, mbx, mby, &modes, c, dq),
            };
            (
                luma,
                predict_intra_whole(&out.u, mbx, mby, chroma, 8),
                predict_intra_whole(&out.v, mbx, mby, chroma, 8),
            )
        }
        MacroblockPrediction::Inter { reference, mv, .. } => {
            let frame = references.get(reference).ok_or(reference)?;
            let pred = InterPrediction::build(frame, mbx, mby, mv.as_col_row());
            (
                add_residuals(&pred.y, 16, &whole_luma_residuals(c, dq)),
                pred.u.to_vec(),
                pred.v.to_vec(),
            )
        }
    };

    out.y.store_block(mbx * 16, mby * 16, 16, &luma);
    let u = add_residuals(&u_pred, 8, &chroma_residuals(U_BLOCKS));
    let v = add_residuals(&v_pred, 8, &chroma_residuals(V_BLOCKS));
    out.u.store_block(mbx * 8, mby * 8, 8, &u);
    out.v.store_block(mbx * 8, mby * 8, 8, &v);
    Ok(())
}

/// Progressive subblock reconstruction: each 4x4 block is predicted from its
/// already reconstructed neighbours inside the macroblock.
fn reconstruct_subblocks(
    plane: &Plane,
    mbx: usize,
    mby: usize,
    modes: &[IntraMode; 16],
    c: &[[i16; 16]; 25],
    dq: &Dequantizer,
) -> Vec<u8> {
    let mut ws = luma_workspace(plane, mbx, mby);
    for (i, &mode) in modes.iter().enumerate() {
        let (x0, y0) = (1 + (i % 4) * 4, 1 + (i / 4) * 4);
        let edges = SubblockEdges::gather(&ws, x0, y0, LUMA_STRIDE);
        let pred = predict_subblock(mode, &edges);
        let block = add_residue(&pred, &inverse_block(dq.y, &c[i], None));
        store_subblock(&mut ws, x0, y0, LUMA_STRIDE, &block);
    }
    let mut out = vec![0u8; 256];
    workspace_block(&ws, 16, LUMA_STRIDE, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::quant::QuantIndices;
    use crate::common::types::InterMode;
    use crate::frame::MotionVector;

    #[test]
    fn empty_dc_macroblock_is_flat_128() {
        let mut out = Raster::new(32, 32);
        let dq = Dequantizer::new(&QuantIndices::uniform(40));
        let mb = Macroblock::new(MacroblockPrediction::DC);
        reconstruct_macroblock(&mut out, &mb, 0, 0, &dq, &References::default()).unwrap();
        assert_eq!(out.y.get(7, 9), 128);
        assert_eq!(out.u.get(3, 3), 128);
    }

    #[test]
    fn y2_dc_shifts_every_luma_block() {
        let mut out = Raster::new(16, 16);
        let dq = Dequantizer::new(&QuantIndices::uniform(0));
        let mut mb = Macroblock::new(MacroblockPrediction::DC);
        mb.coefficients[Y2_BLOCK][0] = 20;
        mb.update_skip();
        reconstruct_macroblock(&mut out, &mb, 0, 0, &dq, &References::default()).unwrap();
        let first = out.y.get(0, 0);
        assert!(first > 128);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(out.y.get(x, y), first);
            }
        }
    }

    #[test]
    fn inter_without_reference_fails() {
        let mut out = Raster::new(16, 16);
        let dq = Dequantizer::new(&QuantIndices::uniform(10));
        let mb = Macroblock::new(MacroblockPrediction::Inter {
            reference: ReferenceFrame::Golden,
            mode: InterMode::Zero,
            mv: MotionVector::ZERO,
        });
        assert_eq!(
            reconstruct_macroblock(&mut out, &mb, 0, 0, &dq, &References::default()),
            Err(ReferenceFrame::Golden)
        );
    }

    #[test]
    fn zero_vector_copies_reference() {
        let mut reference = Raster::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                reference.y.set(x, y, (x * 7 + y * 3) as u8);
            }
        }
        let refs = References {
            last: Some(reference.clone()),
            ..References::default()
        };
        let mut out = Raster::new(32, 32);
        let dq = Dequantizer::new(&QuantIndices::uniform(10));
        let mb = Macroblock::new(MacroblockPrediction::Inter {
            reference: ReferenceFrame::Last,
            mode: InterMode::Zero,
            mv: MotionVector::ZERO,
        });
        reconstruct_macroblock(&mut out, &mb, 1, 1, &dq, &refs).unwrap();
        assert_eq!(out.y.get(20, 21), reference.y.get(20, 21));
    }

    #[test]
    fn subblocks_use_reconstructed_neighbours() {
        let mut out = Raster::new(16, 16);
        let dq = Dequantizer::new(&QuantIndices::uniform(0));
        let mut mb = Macroblock::new(MacroblockPrediction::Intra {
            luma: LumaPrediction::Subblocks([IntraMode::HE; 16]),
            chroma: BlockMode::DC,
        });
        // Brighten the first subblock; horizontal prediction carries it right.
        mb.coefficients[0][0] = 20;
        mb.update_skip();
        reconstruct_macroblock(&mut out, &mb, 0, 0, &dq, &References::default()).unwrap();
        let first = out.y.get(3, 1);
        assert!(first > 129);
        assert_eq!(out.y.get(15, 1), first);
    }
}
