//! One frame at one quantizer.
//!
//! [`encode_raster`] walks the macroblocks in raster order. Each one is
//! decided by rate-distortion cost over the intra and inter candidates,
//! coded, and reconstructed right away through the decoder's own
//! reconstruction, so later macroblocks predict from exactly the pixels a
//! decoder will hold. After the last macroblock the loop filter level is
//! searched and the entropy probabilities are adapted to the frame.
//!
//! The work is split across submodules that each extend [`FrameEncoder`]:
//!
//! - `mode_selection`: candidate search for luma and chroma
//! - `prediction`: apply phase for the chosen candidates
//! - `residuals`: transform, quantization and rate of residual blocks
//! - `header`: empty frame construction and header adaptation

mod header;
mod mode_selection;
mod prediction;
mod residuals;

use enough::Stop;

pub(crate) use header::make_empty_frame;

use super::api::EncodeError;
use super::config::EncoderConfig;
use super::cost::{Lambdas, LevelCosts, TokenStats};
use super::probability::{update_mv_counts, MvComponentCounts};
use super::quantize::QuantMatrices;
use crate::common::loop_filter::{filter_frame, MAX_FILTER_LEVEL};
use crate::common::mv_prediction::{find_near_mvs, NearMvs};
use crate::common::quant::Dequantizer;
use crate::common::tokens::{walk_macroblock, NonzeroContext};
use crate::common::types::{InterMode, MV_PROB_COUNT};
use crate::decoder::reconstruct::reconstruct_macroblock;
use crate::frame::{Frame, FrameKind, LoopFilter, MacroblockPrediction, ReferenceFrame};
use crate::metrics::ssim;
use crate::raster::Raster;
use crate::state::{DecoderState, ProbabilityTables, References};

use self::residuals::BlockContexts;

/// Filter levels tried before refinement.
const COARSE_FILTER_LEVELS: [u8; 9] = [0, 8, 16, 24, 32, 40, 48, 56, MAX_FILTER_LEVEL];

/// A coded frame with everything the caller may want to keep from the pass.
#[derive(Debug, Clone)]
pub(crate) struct EncodedFrame {
    pub frame: Frame,
    /// Loop-filtered reconstruction, identical to a paired decoder's output.
    pub reconstructed: Raster,
    /// Similarity of `reconstructed` to the source.
    pub ssim: f64,
    pub tokens: TokenStats,
    /// Branch counts of the explicitly coded motion vectors.
    pub mv_counts: MvComponentCounts,
}

/// Where macroblock predictions come from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Modes<'a> {
    /// Rate-distortion search.
    Search,
    /// Keep the predictions and loop filter of an existing frame and only
    /// recompute the residuals.
    Fixed(&'a Frame),
}

/// Inputs of one frame encode.
pub(crate) struct FrameRequest<'a> {
    pub original: &'a Raster,
    /// Decoder state the frame is coded against.
    pub state: &'a DecoderState,
    pub kind: FrameKind,
    pub quantizer: u8,
    /// Tables rates are estimated with. `None` uses the tables the frame
    /// starts from.
    pub estimate: Option<&'a ProbabilityTables>,
    pub modes: Modes<'a>,
}

/// Source pixels of one macroblock, packed.
pub(super) struct SourceMacroblock {
    pub y: [u8; 256],
    pub u: [u8; 64],
    pub v: [u8; 64],
}

impl SourceMacroblock {
    fn load(raster: &Raster, mbx: usize, mby: usize) -> Self {
        let mut source = Self {
            y: [0; 256],
            u: [0; 64],
            v: [0; 64],
        };
        raster.y.copy_block(mbx * 16, mby * 16, 16, &mut source.y);
        raster.u.copy_block(mbx * 8, mby * 8, 8, &mut source.u);
        raster.v.copy_block(mbx * 8, mby * 8, 8, &mut source.v);
        source
    }
}

/// Per-frame encoder state.
struct FrameEncoder<'a> {
    config: &'a EncoderConfig,
    original: &'a Raster,
    references: &'a References,
    /// Reference slots worth searching, without duplicates.
    inter_references: Vec<ReferenceFrame>,
    frame: Frame,
    /// Tables the frame's probability updates are relative to.
    baseline: ProbabilityTables,
    /// Tables rates are estimated with.
    estimate: ProbabilityTables,
    level_costs: LevelCosts,
    dq: Dequantizer,
    matrices: QuantMatrices,
    lambdas: Lambdas,
    /// Unfiltered reconstruction of the macroblocks coded so far.
    reconstructed: Raster,
    top_nz: Vec<NonzeroContext>,
    left_nz: NonzeroContext,
    mv_counts: MvComponentCounts,
}

/// Outcome of one loop filter trial.
struct FilterTrial {
    level: u8,
    raster: Raster,
    ssim: f64,
}

/// Encodes `request.original` as one frame on top of `request.state`.
///
/// The state itself is not advanced; committing the result is up to the
/// caller. Polls `stop` once per macroblock row.
pub(crate) fn encode_raster(
    config: &EncoderConfig,
    request: &FrameRequest<'_>,
    stop: &dyn Stop,
) -> Result<EncodedFrame, EncodeError> {
    let mut encoder = FrameEncoder::new(config, request)?;
    for mby in 0..encoder.frame.mb_rows {
        stop.check()?;
        encoder.left_nz = NonzeroContext::default();
        for mbx in 0..encoder.frame.mb_cols {
            let fixed = match request.modes {
                Modes::Search => None,
                Modes::Fixed(frame) => Some(frame.macroblock(mbx, mby).prediction),
            };
            encoder.encode_macroblock(mbx, mby, fixed)?;
        }
    }

    let best = match request.modes {
        Modes::Search => encoder.apply_best_loopfilter_settings(),
        Modes::Fixed(frame) => {
            encoder.frame.header.loop_filter = frame.header.loop_filter;
            encoder.filtered(frame.header.loop_filter)
        }
    };
    Ok(encoder.finish(best))
}

impl<'a> FrameEncoder<'a> {
    fn new(config: &'a EncoderConfig, request: &FrameRequest<'a>) -> Result<Self, EncodeError> {
        let original = request.original;
        let state = request.state;
        let (width, height) = (original.width(), original.height());
        if !request.kind.is_key() && (width, height) != (state.width, state.height) {
            return Err(EncodeError::InvalidDimensions {
                expected: (state.width, state.height),
                actual: (width, height),
            });
        }

        let frame = make_empty_frame(request.kind.clone(), width, height, request.quantizer)?;
        if let Modes::Fixed(fixed) = request.modes {
            if fixed.dimensions() != (width, height) {
                return Err(EncodeError::InvalidDimensions {
                    expected: fixed.dimensions(),
                    actual: (width, height),
                });
            }
        }

        let baseline = state.probabilities.for_frame(&frame.header);
        let estimate = request.estimate.cloned().unwrap_or_else(|| baseline.clone());
        let dq = Dequantizer::new(&frame.header.quantizer);
        let references = &state.references;

        let mut inter_references: Vec<ReferenceFrame> = Vec::new();
        if frame.header.kind.allows_inter() {
            for reference in ReferenceFrame::ALL {
                let Some(raster) = references.get(reference) else {
                    continue;
                };
                let duplicate = inter_references
                    .iter()
                    .any(|&seen| references.get(seen) == Some(raster));
                if !duplicate && raster.same_geometry(original) {
                    inter_references.push(reference);
                }
            }
        }

        Ok(Self {
            config,
            original,
            references,
            inter_references,
            level_costs: LevelCosts::new(&estimate.coefficients),
            matrices: QuantMatrices::new(&dq),
            lambdas: Lambdas::new(&dq, config.rate_multiplier, config.distortion_multiplier),
            dq,
            baseline,
            estimate,
            reconstructed: Raster::new(width, height),
            top_nz: vec![NonzeroContext::default(); frame.mb_cols],
            left_nz: NonzeroContext::default(),
            mv_counts: [[[0; 2]; MV_PROB_COUNT]; 2],
            frame,
        })
    }

    /// Decides (unless `fixed` is given), codes and reconstructs one
    /// macroblock.
    fn encode_macroblock(
        &mut self,
        mbx: usize,
        mby: usize,
        fixed: Option<MacroblockPrediction>,
    ) -> Result<(), EncodeError> {
        let source = SourceMacroblock::load(self.original, mbx, mby);
        let contexts = BlockContexts {
            above: self.top_nz[mbx],
            left: self.left_nz,
        };
        let mb = match fixed {
            Some(prediction) => self.apply_prediction(mbx, mby, prediction, &source, &contexts)?,
            None => {
                let decision = self.choose_macroblock_prediction(mbx, mby, &source, &contexts);
                if decision.skip {
                    self.apply_skipped_prediction(mbx, mby, decision.prediction)?
                } else {
                    self.apply_prediction(mbx, mby, decision.prediction, &source, &contexts)?
                }
            }
        };

        reconstruct_macroblock(&mut self.reconstructed, &mb, mbx, mby, &self.dq, self.references)
            .map_err(EncodeError::ReferenceUnavailable)?;
        walk_macroblock(&mb, &mut self.top_nz[mbx], &mut self.left_nz, |_, _| {});

        if let MacroblockPrediction::Inter {
            reference,
            mode: InterMode::New,
            mv,
        } = mb.prediction
        {
            if let Some(near) = self.near_mvs(mbx, mby, reference) {
                update_mv_counts(mv - near.best, &mut self.mv_counts);
            }
        }

        let index = mby * self.frame.mb_cols + mbx;
        self.frame.macroblocks[index] = mb;
        Ok(())
    }

    /// Motion vector candidates from the macroblocks coded so far, or `None`
    /// in a key frame.
    fn near_mvs(&self, mbx: usize, mby: usize, reference: ReferenceFrame) -> Option<NearMvs> {
        let inter = self.frame.header.kind.inter_header()?;
        Some(find_near_mvs(
            &self.frame.macroblocks,
            self.frame.mb_cols,
            self.frame.mb_rows,
            mbx,
            mby,
            reference,
            inter,
        ))
    }

    /// Loop-filtered copy of the reconstruction and its similarity.
    fn filtered(&self, filter: LoopFilter) -> FilterTrial {
        let mut raster = self.reconstructed.clone();
        filter_frame(
            &mut raster,
            &self.frame.macroblocks,
            self.frame.mb_cols,
            &filter,
            self.frame.is_key(),
        );
        let ssim = ssim(self.original, &raster);
        FilterTrial {
            level: filter.level,
            raster,
            ssim,
        }
    }

    /// Replaces `best` with the trial at `level` if that looks closer to the
    /// source. Ties keep the lower level.
    fn consider_filter_level(&self, best: &mut FilterTrial, level: u8, sharpness: u8) {
        if level == best.level {
            return;
        }
        let trial = self.filtered(LoopFilter {
            level,
            sharpness,
            deltas: None,
        });
        if trial.ssim > best.ssim || (trial.ssim == best.ssim && trial.level < best.level) {
            *best = trial;
        }
    }

    /// Picks the loop filter level whose output is most similar to the source.
    ///
    /// Levels are tried on a coarse grid, then refined around the best one
    /// with halving steps.
    fn apply_best_loopfilter_settings(&mut self) -> FilterTrial {
        let sharpness = self.config.loop_filter_sharpness;
        let mut best = self.filtered(LoopFilter {
            level: 0,
            sharpness,
            deltas: None,
        });
        for level in COARSE_FILTER_LEVELS.into_iter().skip(1) {
            self.consider_filter_level(&mut best, level, sharpness);
        }
        for step in [4u8, 2, 1] {
            let center = best.level;
            self.consider_filter_level(&mut best, center.saturating_sub(step), sharpness);
            let up = center.saturating_add(step).min(MAX_FILTER_LEVEL);
            self.consider_filter_level(&mut best, up, sharpness);
        }

        log::trace!(
            "loop filter level {} sharpness {} (ssim {:.5})",
            best.level,
            sharpness,
            best.ssim
        );
        self.frame.header.loop_filter = LoopFilter {
            level: best.level,
            sharpness,
            deltas: None,
        };
        best
    }

    fn finish(mut self, filtered: FilterTrial) -> EncodedFrame {
        let mut tokens = TokenStats::new();
        tokens.record_frame(&self.frame.macroblocks, self.frame.mb_cols);
        self.adapt_probabilities(&tokens);
        EncodedFrame {
            frame: self.frame,
            reconstructed: filtered.raster,
            ssim: filtered.ssim,
            tokens,
            mv_counts: self.mv_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use enough::Unstoppable;

    use super::*;
    use crate::decoder::{reconstruct_frame, Decoder};
    use crate::encoder::writer::write_frame;
    use crate::frame::{InterHeader, MotionVector, U_BLOCKS, Y2_BLOCK};

    fn textured(width: usize, height: usize, seed: usize) -> Raster {
        let mut raster = Raster::new(width, height);
        for y in 0..raster.y.height() {
            for x in 0..raster.y.width() {
                let v = (x * 7 + y * 3 + seed) ^ ((x / 5) * (y / 3));
                raster.y.set(x, y, (v & 0xFF) as u8);
            }
        }
        for y in 0..raster.u.height() {
            for x in 0..raster.u.width() {
                raster.u.set(x, y, (100 + (x * 3 + y) % 40) as u8);
                raster.v.set(x, y, (140 - (x + y * 2) % 30) as u8);
            }
        }
        raster
    }

    fn key_request<'a>(original: &'a Raster, state: &'a DecoderState, quantizer: u8) -> FrameRequest<'a> {
        FrameRequest {
            original,
            state,
            kind: FrameKind::Key,
            quantizer,
            estimate: None,
            modes: Modes::Search,
        }
    }

    #[test]
    fn flat_macroblock_uses_dc_at_every_quantizer() {
        let config = EncoderConfig::new();
        let state = DecoderState::new(16, 16);
        let colours = [
            (77, 90, 200),
            (200, 128, 128),
            (128, 64, 180),
            (60, 200, 70),
            (0, 128, 128),
            (255, 255, 0),
            (0, 0, 255),
            (255, 128, 0),
        ];
        for (y, u, v) in colours {
            let original = Raster::filled(16, 16, y, u, v);
            for quantizer in (0..=126).step_by(9).chain([127]) {
                let request = key_request(&original, &state, quantizer);
                let encoded = encode_raster(&config, &request, &Unstoppable).unwrap();
                let mb = &encoded.frame.macroblocks[0];
                let colour = (y, u, v);
                assert_eq!(mb.prediction, MacroblockPrediction::DC, "{colour:?} q {quantizer}");
                assert!(mb.coefficients[..U_BLOCKS].iter().all(|b| b == &[0; 16]));
                assert!(mb.coefficients[U_BLOCKS..Y2_BLOCK]
                    .iter()
                    .all(|b| b[1..].iter().all(|&c| c == 0)));
                assert!(
                    encoded.ssim >= 0.99,
                    "{colour:?} q {quantizer}: {}",
                    encoded.ssim
                );
            }
        }
    }

    #[test]
    fn extreme_flat_planes_reconstruct_exactly() {
        let config = EncoderConfig::new();
        let state = DecoderState::new(16, 16);
        let original = Raster::filled(16, 16, 0, 255, 0);
        for quantizer in [20, 54, 90, 117, 127] {
            let encoded = encode_raster(&config, &key_request(&original, &state, quantizer), &Unstoppable).unwrap();
            assert_eq!(encoded.reconstructed, original, "q {quantizer}");
        }
    }

    #[test]
    fn reconstruction_matches_decoder() {
        let config = EncoderConfig::new().with_trellis(false);
        let original = textured(40, 24, 0);
        let state = DecoderState::new(40, 24);
        let request = key_request(&original, &state, 30);
        let encoded = encode_raster(&config, &request, &Unstoppable).unwrap();

        let mut decoder = Decoder::new(40, 24);
        let decoded = decoder
            .decode(&write_frame(&encoded.frame, &state.probabilities))
            .unwrap();
        assert_eq!(decoded, encoded.reconstructed);
        assert_eq!(
            reconstruct_frame(&encoded.frame, &state).unwrap(),
            encoded.reconstructed
        );
    }

    #[test]
    fn mode_decision_is_deterministic() {
        let config = EncoderConfig::new();
        let original = textured(48, 32, 5);
        let state = DecoderState::new(48, 32);
        let a = encode_raster(&config, &key_request(&original, &state, 50), &Unstoppable).unwrap();
        let b = encode_raster(&config, &key_request(&original, &state, 50), &Unstoppable).unwrap();
        assert_eq!(a.frame, b.frame);
        assert_eq!(a.ssim, b.ssim);
    }

    #[test]
    fn repeated_source_is_skipped_with_zero_motion() {
        let config = EncoderConfig::new();
        let original = textured(48, 48, 9);
        for quantizer in [0, 10, 40, 80, 120, 127] {
            let mut state = DecoderState::new(48, 48);
            let key = encode_raster(&config, &key_request(&original, &state, quantizer), &Unstoppable).unwrap();
            crate::decoder::commit_frame(&mut state, &key.frame.header, &key.reconstructed);

            let second = FrameRequest {
                kind: FrameKind::Inter(InterHeader::default()),
                ..key_request(&original, &state, quantizer)
            };
            let encoded = encode_raster(&config, &second, &Unstoppable).unwrap();
            for mb in &encoded.frame.macroblocks {
                assert_eq!(
                    mb.prediction.motion(),
                    Some((ReferenceFrame::Last, MotionVector::ZERO)),
                    "q {quantizer}"
                );
                assert!(mb.skip, "q {quantizer}");
            }
        }
    }

    #[test]
    fn changed_content_is_not_skipped() {
        let config = EncoderConfig::new();
        let mut state = DecoderState::new(32, 32);
        let key = encode_raster(&config, &key_request(&textured(32, 32, 0), &state, 20), &Unstoppable).unwrap();
        crate::decoder::commit_frame(&mut state, &key.frame.header, &key.reconstructed);

        let other = Raster::filled(32, 32, 10, 240, 20);
        let request = FrameRequest {
            kind: FrameKind::Inter(InterHeader::default()),
            ..key_request(&other, &state, 20)
        };
        let encoded = encode_raster(&config, &request, &Unstoppable).unwrap();
        let repeated = |mb: &crate::frame::Macroblock| {
            mb.skip && mb.prediction.motion() == Some((ReferenceFrame::Last, MotionVector::ZERO))
        };
        assert!(!encoded.frame.macroblocks.iter().any(repeated));
    }

    #[test]
    fn fixed_modes_are_kept() {
        let config = EncoderConfig::new();
        let state = DecoderState::new(32, 32);
        let first = textured(32, 32, 1);
        let encoded = encode_raster(&config, &key_request(&first, &state, 60), &Unstoppable).unwrap();

        let second = textured(32, 32, 40);
        let request = FrameRequest {
            modes: Modes::Fixed(&encoded.frame),
            ..key_request(&second, &state, 20)
        };
        let recoded = encode_raster(&config, &request, &Unstoppable).unwrap();
        for (a, b) in encoded.frame.macroblocks.iter().zip(&recoded.frame.macroblocks) {
            assert_eq!(a.prediction, b.prediction);
        }
        assert_eq!(recoded.frame.header.loop_filter, encoded.frame.header.loop_filter);
    }

    #[test]
    fn key_frames_only_use_intra() {
        let config = EncoderConfig::new();
        let original = textured(32, 16, 3);
        let state = DecoderState::new(32, 16);
        let encoded = encode_raster(&config, &key_request(&original, &state, 10), &Unstoppable).unwrap();
        assert!(encoded.frame.macroblocks.iter().all(|mb| !mb.prediction.is_inter()));
        assert!(encoded.mv_counts.iter().flatten().all(|&[zeros, ones]| zeros + ones == 0));
    }

    #[test]
    fn inter_frame_needs_matching_dimensions() {
        let config = EncoderConfig::new();
        let original = textured(32, 32, 0);
        let state = DecoderState::new(16, 16);
        let request = FrameRequest {
            kind: FrameKind::Inter(InterHeader::default()),
            ..key_request(&original, &state, 10)
        };
        assert!(matches!(
            encode_raster(&config, &request, &Unstoppable),
            Err(EncodeError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn rejects_quantizer_out_of_range() {
        let config = EncoderConfig::new();
        let original = textured(16, 16, 0);
        let state = DecoderState::new(16, 16);
        assert!(matches!(
            encode_raster(&config, &key_request(&original, &state, 128), &Unstoppable),
            Err(EncodeError::InvalidQuantizer(128))
        ));
    }
}
