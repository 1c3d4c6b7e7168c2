//! Apply phase: codes the chosen prediction of a macroblock into its final
//! levels.
//!
//! The levels are recomputed from scratch against the same reconstruction
//! and contexts the search saw, so they are exactly what the search scored.

use super::residuals::{BlockContexts, CodedLuma};
use super::{FrameEncoder, SourceMacroblock};
use crate::common::inter_prediction::InterPrediction;
use crate::common::types::{BlockMode, IntraMode};
use crate::decoder::reconstruct::predict_intra_whole;
use crate::encoder::api::EncodeError;
use crate::encoder::writer::modes::inter_mode_for;
use crate::frame::{LumaPrediction, Macroblock, MacroblockPrediction, U_BLOCKS, Y2_BLOCK};

impl FrameEncoder<'_> {
    /// Codes `prediction` for the macroblock at `(mbx, mby)`.
    ///
    /// Inter vectors get the cheapest coding their neighbours allow, so the
    /// `mode` of an inter prediction is only a placeholder here.
    pub(super) fn apply_prediction(
        &self,
        mbx: usize,
        mby: usize,
        prediction: MacroblockPrediction,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> Result<Macroblock, EncodeError> {
        let mut mb = match prediction {
            MacroblockPrediction::Intra { luma, chroma } => {
                let mut mb = Macroblock::new(prediction);
                match luma {
                    LumaPrediction::Whole(mode) => {
                        self.luma_mb_apply_intra_prediction(&mut mb, mbx, mby, mode, source, ctx)
                    }
                    LumaPrediction::Subblocks(modes) => {
                        self.luma_sb_apply_intra_prediction(&mut mb, mbx, mby, &modes, source, ctx)
                    }
                }
                self.chroma_mb_apply_intra_prediction(&mut mb, mbx, mby, chroma, source, ctx);
                mb
            }
            MacroblockPrediction::Inter { reference, mv, .. } => {
                let near = self
                    .near_mvs(mbx, mby, reference)
                    .ok_or(EncodeError::ReferenceUnavailable(reference))?;
                let frame = self
                    .references
                    .get(reference)
                    .ok_or(EncodeError::ReferenceUnavailable(reference))?;
                let mut mb = Macroblock::new(MacroblockPrediction::Inter {
                    reference,
                    mode: inter_mode_for(mv, &near),
                    mv,
                });
                let pred = InterPrediction::build(frame, mbx, mby, mv.as_col_row());
                self.luma_mb_apply_inter_prediction(&mut mb, &pred, source, ctx);
                self.chroma_mb_apply_inter_prediction(&mut mb, &pred, source, ctx);
                log::trace!("mb ({mbx}, {mby}) {reference:?} {mv:?}");
                mb
            }
        };
        mb.update_skip();
        Ok(mb)
    }

    /// Repeats `prediction` with no residue at all.
    pub(super) fn apply_skipped_prediction(
        &self,
        mbx: usize,
        mby: usize,
        prediction: MacroblockPrediction,
    ) -> Result<Macroblock, EncodeError> {
        let mut mb = Macroblock::new(prediction);
        if let MacroblockPrediction::Inter { reference, mode, mv } = &mut mb.prediction {
            let near = self
                .near_mvs(mbx, mby, *reference)
                .ok_or(EncodeError::ReferenceUnavailable(*reference))?;
            *mode = inter_mode_for(*mv, &near);
        }
        mb.update_skip();
        Ok(mb)
    }

    fn luma_mb_apply_intra_prediction(
        &self,
        mb: &mut Macroblock,
        mbx: usize,
        mby: usize,
        mode: BlockMode,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) {
        let pred = predict_intra_whole(&self.reconstructed.y, mbx, mby, mode, 16);
        store_whole_luma(mb, &self.code_whole_luma(&pred, &source.y, ctx));
    }

    fn luma_sb_apply_intra_prediction(
        &self,
        mb: &mut Macroblock,
        mbx: usize,
        mby: usize,
        modes: &[IntraMode; 16],
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) {
        let coded = self.code_subblocks(mbx, mby, source, ctx, Some(modes));
        mb.coefficients[..16].copy_from_slice(&coded.levels);
    }

    fn chroma_mb_apply_intra_prediction(
        &self,
        mb: &mut Macroblock,
        mbx: usize,
        mby: usize,
        mode: BlockMode,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) {
        let pred_u = predict_intra_whole(&self.reconstructed.u, mbx, mby, mode, 8);
        let pred_v = predict_intra_whole(&self.reconstructed.v, mbx, mby, mode, 8);
        let coded = self.code_chroma(&pred_u, &pred_v, source, ctx);
        mb.coefficients[U_BLOCKS..Y2_BLOCK].copy_from_slice(&coded.blocks);
    }

    fn luma_mb_apply_inter_prediction(
        &self,
        mb: &mut Macroblock,
        pred: &InterPrediction,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) {
        store_whole_luma(mb, &self.code_whole_luma(&pred.y, &source.y, ctx));
    }

    fn chroma_mb_apply_inter_prediction(
        &self,
        mb: &mut Macroblock,
        pred: &InterPrediction,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) {
        let coded = self.code_chroma(&pred.u, &pred.v, source, ctx);
        mb.coefficients[U_BLOCKS..Y2_BLOCK].copy_from_slice(&coded.blocks);
    }
}

fn store_whole_luma(mb: &mut Macroblock, coded: &CodedLuma) {
    mb.coefficients[..16].copy_from_slice(&coded.blocks);
    mb.coefficients[Y2_BLOCK] = coded.y2;
}

#[cfg(test)]
mod tests {
    use enough::Unstoppable;

    use super::super::{encode_raster, FrameRequest, Modes};
    use super::*;
    use crate::common::types::InterMode;
    use crate::encoder::EncoderConfig;
    use crate::frame::{FrameKind, MotionVector, ReferenceFrame};
    use crate::raster::Raster;
    use crate::state::DecoderState;

    #[test]
    fn whole_luma_keeps_dc_positions_in_y2() {
        let config = EncoderConfig::new();
        let mut original = Raster::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                original.y.set(x, y, (x * 12 + y * 3) as u8);
            }
        }
        let state = DecoderState::new(16, 16);
        let request = FrameRequest {
            original: &original,
            state: &state,
            kind: FrameKind::Key,
            quantizer: 10,
            estimate: None,
            modes: Modes::Search,
        };
        let encoder = FrameEncoder::new(&config, &request).unwrap();
        let source = SourceMacroblock::load(&original, 0, 0);
        let mb = encoder
            .apply_prediction(0, 0, MacroblockPrediction::DC, &source, &BlockContexts::default())
            .unwrap();
        assert!(mb.coefficients[..16].iter().all(|b| b[0] == 0));
        assert!(mb.coefficients[Y2_BLOCK].iter().any(|&c| c != 0));
        assert!(!mb.skip);
        let _ = encode_raster(&config, &request, &Unstoppable).unwrap();
    }

    #[test]
    fn inter_prediction_without_reference_fails() {
        let config = EncoderConfig::new();
        let original = Raster::filled(16, 16, 90, 120, 130);
        let state = DecoderState::new(16, 16);
        let request = FrameRequest {
            original: &original,
            state: &state,
            kind: FrameKind::Key,
            quantizer: 10,
            estimate: None,
            modes: Modes::Search,
        };
        let encoder = FrameEncoder::new(&config, &request).unwrap();
        let source = SourceMacroblock::load(&original, 0, 0);
        let result = encoder.apply_prediction(
            0,
            0,
            MacroblockPrediction::Inter {
                reference: ReferenceFrame::Golden,
                mode: InterMode::Zero,
                mv: MotionVector::ZERO,
            },
            &source,
            &BlockContexts::default(),
        );
        assert!(matches!(
            result,
            Err(EncodeError::ReferenceUnavailable(ReferenceFrame::Golden))
        ));
    }
}
