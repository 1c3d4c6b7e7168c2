//! Prediction mode selection for macroblocks.
//!
//! Every candidate is coded for real (transform, quantization, token rate)
//! and reconstructed, and ranked by `rdcost` of its rate including the mode
//! syntax against the squared error of its reconstruction. Nothing here
//! touches the frame's reconstruction; the apply phase does that for the
//! winner only.

use super::residuals::{subblock_source, BlockContexts, CodedSubblock};
use super::{FrameEncoder, SourceMacroblock};
use crate::common::inter_prediction::{predict_block, InterPrediction};
use crate::common::mv_prediction::{MvBounds, NearMvs};
use crate::common::prediction::{
    luma_workspace, predict_subblock, store_subblock, SubblockEdges, LUMA_STRIDE,
};
use crate::common::tables::{
    BPRED_MODE_TREE, INTER_BPRED_MODE_PROBS, KEYFRAME_BPRED_MODE_PROBS, KEYFRAME_UV_MODE_PROBS,
    KEYFRAME_YMODE_PROBS, KEYFRAME_YMODE_TREE, MV_REF_TREE, UV_MODE_TREE, YMODE_TREE,
};
use crate::common::types::{BlockMode, InterMode, IntraMode, B_PRED};
use crate::decoder::reconstruct::predict_intra_whole;
use crate::encoder::cost::{bit_cost, is_flat_source, rdcost, sse, tree_cost};
use crate::encoder::motion::{diamond_search, mv_rate, MotionSearch};
use crate::encoder::writer::modes::{inter_mode_for, neighbour_contexts};
use crate::frame::{InterHeader, LumaPrediction, MacroblockPrediction, MotionVector, ReferenceFrame};

/// Luma candidate of a macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LumaMode {
    Whole(BlockMode),
    Subblocks([IntraMode; 16]),
    Inter {
        reference: ReferenceFrame,
        mv: MotionVector,
    },
}

/// Chroma candidate of a macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ChromaMode {
    Intra(BlockMode),
    /// Motion compensated with the luma vector.
    Inter {
        reference: ReferenceFrame,
        mv: MotionVector,
    },
}

/// A scored candidate: the mode and the rate-distortion cost it achieved.
#[derive(Debug, Clone, Copy)]
pub(super) struct MbPrediction<M> {
    pub mode: M,
    pub cost: u64,
}

/// What the search settled on for one macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct MacroblockDecision {
    pub prediction: MacroblockPrediction,
    /// Repeat the prediction without coding any residue.
    pub skip: bool,
}

/// The uncoded zero-motion repeat of the last reference.
struct Repeat {
    cost: u64,
    /// The residual is only what quantizing at this step leaves behind.
    noise: bool,
}

impl<M> MbPrediction<M> {
    fn keep_better(&mut self, other: Self) {
        if other.cost < self.cost {
            *self = other;
        }
    }
}

/// Subblock modes with their coded levels.
pub(super) struct CodedSubblocks {
    pub modes: [IntraMode; 16],
    pub levels: [[i16; 16]; 16],
    pub rate: u32,
    pub distortion: u64,
}

impl FrameEncoder<'_> {
    fn scored<M>(&self, mode: M, rate: u32, distortion: u64, lambda: u32) -> MbPrediction<M> {
        MbPrediction {
            mode,
            cost: rdcost(rate, distortion, lambda, self.lambdas.distortion),
        }
    }

    /// Whether intra prediction at `(mbx, mby)` should stay on DC: the source
    /// is flat and the block touches the top or left frame edge, where the
    /// directional modes would extrapolate the fixed border values.
    fn force_dc(mbx: usize, mby: usize, planes: &[&[u8]]) -> bool {
        (mbx == 0 || mby == 0) && planes.iter().all(|plane| is_flat_source(plane))
    }

    /// Mode rate of an intra luma mode (`B_PRED` for subblocks), including
    /// the intra flag of inter frames.
    fn luma_mode_rate(&self, mode: i8) -> u32 {
        match self.frame.header.kind.inter_header() {
            None => tree_cost(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, mode, 0),
            Some(inter) => {
                u32::from(bit_cost(false, inter.prob_intra))
                    + tree_cost(&YMODE_TREE, &self.estimate.y_modes, mode, 0)
            }
        }
    }

    fn chroma_mode_rate(&self, mode: BlockMode) -> u32 {
        let probs = if self.frame.is_key() {
            &KEYFRAME_UV_MODE_PROBS
        } else {
            &self.estimate.uv_modes
        };
        tree_cost(&UV_MODE_TREE, probs, mode.into_i8(), 0)
    }

    /// Subblock modes are coded in context of their neighbours on key
    /// frames only.
    fn subblock_mode_rate(&self, mode: IntraMode, above: IntraMode, left: IntraMode) -> u32 {
        let probs = if self.frame.is_key() {
            &KEYFRAME_BPRED_MODE_PROBS[above as usize][left as usize]
        } else {
            &INTER_BPRED_MODE_PROBS
        };
        tree_cost(&BPRED_MODE_TREE, probs, mode.into_i8(), 0)
    }

    /// Rate of the reference and vector syntax of an inter macroblock.
    fn inter_mode_rate(
        &self,
        inter: &InterHeader,
        reference: ReferenceFrame,
        mv: MotionVector,
        near: &NearMvs,
    ) -> u32 {
        let mut rate = u32::from(bit_cost(true, inter.prob_intra))
            + u32::from(bit_cost(reference != ReferenceFrame::Last, inter.prob_last));
        if reference != ReferenceFrame::Last {
            rate += u32::from(bit_cost(reference == ReferenceFrame::AltRef, inter.prob_golden));
        }
        let mode = inter_mode_for(mv, near);
        rate += tree_cost(&MV_REF_TREE, &near.mode_probs, mode.into_i8(), 0);
        if mode == InterMode::New {
            rate += mv_rate(mv - near.best, &self.estimate.motion_vectors);
        }
        rate
    }

    /// Best prediction for the macroblock at `(mbx, mby)`. Chroma follows
    /// the luma decision: inter luma means inter chroma with the same vector.
    ///
    /// In inter frames the uncoded zero-motion repeat of the last reference
    /// competes with the coded winner, and is taken outright when its
    /// residual is requantization noise.
    pub(super) fn choose_macroblock_prediction(
        &self,
        mbx: usize,
        mby: usize,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> MacroblockDecision {
        let luma = self.luma_mb_best_prediction_mode(mbx, mby, source, ctx);
        let chroma = self.chroma_mb_best_prediction_mode(mbx, mby, &luma.mode, source, ctx);

        if let Some(repeat) = self.zero_motion_repeat(mbx, mby, source) {
            let coded = luma.cost.saturating_add(chroma.cost);
            if repeat.noise || repeat.cost <= coded {
                log::trace!("mb ({mbx}, {mby}) repeats last (noise {})", repeat.noise);
                return MacroblockDecision {
                    prediction: MacroblockPrediction::Inter {
                        reference: ReferenceFrame::Last,
                        mode: InterMode::Zero,
                        mv: MotionVector::ZERO,
                    },
                    skip: true,
                };
            }
        }

        let prediction = match (luma.mode, chroma.mode) {
            (LumaMode::Inter { reference, mv }, _) => MacroblockPrediction::Inter {
                reference,
                // Replaced by the cheapest coding when the prediction is applied.
                mode: InterMode::New,
                mv,
            },
            (LumaMode::Whole(mode), ChromaMode::Intra(chroma)) => MacroblockPrediction::Intra {
                luma: LumaPrediction::Whole(mode),
                chroma,
            },
            (LumaMode::Subblocks(modes), ChromaMode::Intra(chroma)) => MacroblockPrediction::Intra {
                luma: LumaPrediction::Subblocks(modes),
                chroma,
            },
            (LumaMode::Whole(_) | LumaMode::Subblocks(_), ChromaMode::Inter { .. }) => {
                debug_assert!(false, "inter chroma under intra luma");
                MacroblockPrediction::DC
            }
        };
        MacroblockDecision { prediction, skip: false }
    }

    /// Prices repeating the last reference with a zero vector and no
    /// residue: mode syntax and skip flag against the prediction error.
    fn zero_motion_repeat(&self, mbx: usize, mby: usize, source: &SourceMacroblock) -> Option<Repeat> {
        if !self.inter_references.contains(&ReferenceFrame::Last) {
            return None;
        }
        let frame = self.references.get(ReferenceFrame::Last)?;
        let inter = self.frame.header.kind.inter_header()?;
        let near = self.near_mvs(mbx, mby, ReferenceFrame::Last)?;

        let pred = InterPrediction::build(frame, mbx, mby, MotionVector::ZERO.as_col_row());
        let rate = self.inter_mode_rate(inter, ReferenceFrame::Last, MotionVector::ZERO, &near)
            + u32::from(bit_cost(true, self.frame.header.prob_skip));
        let luma = u64::from(sse(&source.y, &pred.y));
        let chroma = u64::from(sse(&source.u, &pred.u)) + u64::from(sse(&source.v, &pred.v));
        let cost = rdcost(rate, luma, self.lambdas.luma, self.lambdas.distortion)
            .saturating_add(rdcost(0, chroma, self.lambdas.chroma, self.lambdas.distortion));
        Some(Repeat {
            cost,
            noise: self.is_requantization_noise(&pred, source),
        })
    }

    /// Evaluates the whole-block intra modes, the subblock modes and, in
    /// inter frames, motion-compensated candidates from every distinct
    /// reference. DC is evaluated first and only replaced by a strictly
    /// cheaper candidate.
    pub(super) fn luma_mb_best_prediction_mode(
        &self,
        mbx: usize,
        mby: usize,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> MbPrediction<LumaMode> {
        let mut best = self.luma_mb_intra_predict(mbx, mby, BlockMode::DC, source, ctx);
        if !Self::force_dc(mbx, mby, &[&source.y[..]]) {
            for mode in [BlockMode::V, BlockMode::H, BlockMode::TM] {
                best.keep_better(self.luma_mb_intra_predict(mbx, mby, mode, source, ctx));
            }
            best.keep_better(self.luma_sb_intra_predict(mbx, mby, source, ctx));
        }
        for &reference in &self.inter_references {
            if let Some(candidate) = self.luma_mb_inter_predict(mbx, mby, reference, source, ctx) {
                best.keep_better(candidate);
            }
        }
        best
    }

    fn luma_mb_intra_predict(
        &self,
        mbx: usize,
        mby: usize,
        mode: BlockMode,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> MbPrediction<LumaMode> {
        let pred = predict_intra_whole(&self.reconstructed.y, mbx, mby, mode, 16);
        let coded = self.code_whole_luma(&pred, &source.y, ctx);
        let rate = coded.rate + self.luma_mode_rate(mode.into_i8());
        self.scored(
            LumaMode::Whole(mode),
            rate,
            coded.distortion,
            self.lambdas.luma,
        )
    }

    /// Motion search against `reference`, then a full evaluation of the
    /// found vector and the zero, nearest and near vectors.
    fn luma_mb_inter_predict(
        &self,
        mbx: usize,
        mby: usize,
        reference: ReferenceFrame,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> Option<MbPrediction<LumaMode>> {
        let frame = self.references.get(reference)?;
        let inter = self.frame.header.kind.inter_header()?;
        let near = self.near_mvs(mbx, mby, reference)?;

        let search = MotionSearch {
            original: &source.y,
            reference: &frame.y,
            mbx,
            mby,
            bounds: MvBounds::new(mbx, mby, self.frame.mb_cols, self.frame.mb_rows),
            best: near.best,
            mv_probs: &self.estimate.motion_vectors,
            lambda: self.lambdas.luma,
            distortion: self.lambdas.distortion,
        };
        let (found, _) = diamond_search(&search, near.best, MotionVector::ZERO, self.config.search_step * 4);

        let mut candidates: Vec<MotionVector> = Vec::with_capacity(4);
        for mv in [found, MotionVector::ZERO, near.nearest, near.near] {
            if !candidates.contains(&mv) {
                candidates.push(mv);
            }
        }

        let mut best: Option<MbPrediction<LumaMode>> = None;
        for mv in candidates {
            let mut pred = [0u8; 256];
            predict_block(
                &frame.y,
                mbx * 16,
                mby * 16,
                16,
                i32::from(mv.x) * 2,
                i32::from(mv.y) * 2,
                &mut pred,
            );
            let coded = self.code_whole_luma(&pred, &source.y, ctx);
            let rate = coded.rate + self.inter_mode_rate(inter, reference, mv, &near);
            let candidate = self.scored(
                LumaMode::Inter { reference, mv },
                rate,
                coded.distortion,
                self.lambdas.luma,
            );
            match &mut best {
                Some(best) => best.keep_better(candidate),
                None => best = Some(candidate),
            }
        }
        best
    }

    /// Subblock search: every 4x4 block tries all ten modes, predicted from
    /// the reconstruction of the blocks chosen before it.
    pub(super) fn luma_sb_intra_predict(
        &self,
        mbx: usize,
        mby: usize,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> MbPrediction<LumaMode> {
        let coded = self.code_subblocks(mbx, mby, source, ctx, None);
        self.scored(
            LumaMode::Subblocks(coded.modes),
            coded.rate,
            coded.distortion,
            self.lambdas.luma,
        )
    }

    /// Codes the 16 subblocks in raster order, either searching each mode
    /// or using `fixed`. The rate includes the mode syntax.
    pub(super) fn code_subblocks(
        &self,
        mbx: usize,
        mby: usize,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
        fixed: Option<&[IntraMode; 16]>,
    ) -> CodedSubblocks {
        let (above_modes, left_modes) = neighbour_contexts(&self.frame.macroblocks, self.frame.mb_cols, mbx, mby);
        let mut ws = luma_workspace(&self.reconstructed.y, mbx, mby);
        let mut nz_above = ctx.above.y;
        let mut nz_left = ctx.left.y;
        let mut result = CodedSubblocks {
            modes: [IntraMode::DC; 16],
            levels: [[0; 16]; 16],
            rate: self.luma_mode_rate(B_PRED),
            distortion: 0,
        };

        for i in 0..16 {
            let (row, col) = (i / 4, i % 4);
            let (x0, y0) = (1 + col * 4, 1 + row * 4);
            let edges = SubblockEdges::gather(&ws, x0, y0, LUMA_STRIDE);
            let src = subblock_source(&source.y, i);
            let ctx0 = usize::from(nz_above[col]) + usize::from(nz_left[row]);
            let above = if row == 0 { above_modes[col] } else { result.modes[i - 4] };
            let left = if col == 0 { left_modes[row] } else { result.modes[i - 1] };

            let evaluate = |mode: IntraMode| -> (CodedSubblock, u32, u64) {
                let coded = self.code_subblock(&src, &predict_subblock(mode, &edges), ctx0);
                let rate = coded.rate + self.subblock_mode_rate(mode, above, left);
                let cost = rdcost(rate, coded.distortion, self.lambdas.luma, self.lambdas.distortion);
                (coded, rate, cost)
            };

            let (mode, (coded, rate, _)) = match fixed {
                Some(modes) => (modes[i], evaluate(modes[i])),
                None => {
                    let mut best = (IntraMode::ALL[0], evaluate(IntraMode::ALL[0]));
                    for mode in IntraMode::ALL.into_iter().skip(1) {
                        let candidate = evaluate(mode);
                        if candidate.2 < best.1 .2 {
                            best = (mode, candidate);
                        }
                    }
                    best
                }
            };

            store_subblock(&mut ws, x0, y0, LUMA_STRIDE, &coded.reconstructed);
            nz_above[col] = coded.nonzero;
            nz_left[row] = coded.nonzero;
            result.modes[i] = mode;
            result.levels[i] = coded.levels;
            result.rate += rate;
            result.distortion += coded.distortion;
        }
        result
    }

    /// Intra chroma search over the four whole-block modes, or the inter
    /// prediction that goes with an inter luma candidate.
    pub(super) fn chroma_mb_best_prediction_mode(
        &self,
        mbx: usize,
        mby: usize,
        luma: &LumaMode,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> MbPrediction<ChromaMode> {
        if let LumaMode::Inter { reference, mv } = *luma {
            if let Some(frame) = self.references.get(reference) {
                let pred = InterPrediction::build(frame, mbx, mby, mv.as_col_row());
                let coded = self.code_chroma(&pred.u, &pred.v, source, ctx);
                return self.scored(
                    ChromaMode::Inter { reference, mv },
                    coded.rate,
                    coded.distortion,
                    self.lambdas.chroma,
                );
            }
        }

        let mut best = self.chroma_mb_intra_predict(mbx, mby, BlockMode::DC, source, ctx);
        if !Self::force_dc(mbx, mby, &[&source.u[..], &source.v[..]]) {
            for mode in [BlockMode::V, BlockMode::H, BlockMode::TM] {
                best.keep_better(self.chroma_mb_intra_predict(mbx, mby, mode, source, ctx));
            }
        }
        best
    }

    fn chroma_mb_intra_predict(
        &self,
        mbx: usize,
        mby: usize,
        mode: BlockMode,
        source: &SourceMacroblock,
        ctx: &BlockContexts,
    ) -> MbPrediction<ChromaMode> {
        let pred_u = predict_intra_whole(&self.reconstructed.u, mbx, mby, mode, 8);
        let pred_v = predict_intra_whole(&self.reconstructed.v, mbx, mby, mode, 8);
        let coded = self.code_chroma(&pred_u, &pred_v, source, ctx);
        self.scored(
            ChromaMode::Intra(mode),
            coded.rate + self.chroma_mode_rate(mode),
            coded.distortion,
            self.lambdas.chroma,
        )
    }
}

#[cfg(test)]
mod tests {
    use enough::Unstoppable;

    use super::super::{encode_raster, FrameRequest, Modes};
    use super::*;
    use crate::encoder::EncoderConfig;
    use crate::frame::FrameKind;
    use crate::raster::Raster;
    use crate::state::DecoderState;

    #[test]
    fn best_mode_never_costs_more_than_dc() {
        let config = EncoderConfig::new();
        let mut original = Raster::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                original.y.set(x, y, ((x * 9) ^ (y * 5)) as u8);
            }
        }
        let state = DecoderState::new(32, 32);
        let request = FrameRequest {
            original: &original,
            state: &state,
            kind: FrameKind::Key,
            quantizer: 45,
            estimate: None,
            modes: Modes::Search,
        };
        let encoder = FrameEncoder::new(&config, &request).unwrap();
        let source = SourceMacroblock::load(&original, 0, 0);
        let ctx = BlockContexts::default();
        let best = encoder.luma_mb_best_prediction_mode(0, 0, &source, &ctx);
        let dc = encoder.luma_mb_intra_predict(0, 0, BlockMode::DC, &source, &ctx);
        assert!(best.cost <= dc.cost);
        assert!(!matches!(best.mode, LumaMode::Inter { .. }));

        let chroma = encoder.chroma_mb_best_prediction_mode(0, 0, &best.mode, &source, &ctx);
        assert!(matches!(chroma.mode, ChromaMode::Intra(_)));
        let _ = encode_raster(&config, &request, &Unstoppable).unwrap();
    }

    #[test]
    fn fixed_subblocks_reproduce_the_search() {
        let config = EncoderConfig::new();
        let mut original = Raster::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                original.y.set(x, y, if (x / 4 + y / 4) % 2 == 0 { 30 } else { 220 });
            }
        }
        let state = DecoderState::new(16, 16);
        let request = FrameRequest {
            original: &original,
            state: &state,
            kind: FrameKind::Key,
            quantizer: 20,
            estimate: None,
            modes: Modes::Search,
        };
        let encoder = FrameEncoder::new(&config, &request).unwrap();
        let source = SourceMacroblock::load(&original, 0, 0);
        let ctx = BlockContexts::default();
        let searched = encoder.code_subblocks(0, 0, &source, &ctx, None);
        let fixed = encoder.code_subblocks(0, 0, &source, &ctx, Some(&searched.modes));
        assert_eq!(searched.levels, fixed.levels);
        assert_eq!(searched.rate, fixed.rate);
        assert_eq!(searched.distortion, fixed.distortion);
    }
}
