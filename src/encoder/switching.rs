//! Switching frames: moving a decoder from one stream onto another.
//!
//! A decoder that has followed one encoding of a video can be handed over to
//! a different encoding by a switching frame. It is an inter frame coded
//! against the decoder's current references whose output is made to match
//! the other stream's picture, and which refreshes every reference slot with
//! that output. Header probabilities can then be rewritten so the decoder's
//! entropy tables also line up with the other stream.

use enough::{Stop, Unstoppable};

use super::api::{EncodeError, Encoder};
use super::vp8::{encode_raster, make_empty_frame, EncodedFrame, FrameRequest, Modes};
use super::writer::write_frame;
use crate::common::types::InterMode;
use crate::frame::{
    Frame, FrameKind, InterHeader, LoopFilter, Macroblock, MacroblockPrediction, MotionVector, ReferenceFrame,
};
use crate::mux::ContainerWriter;
use crate::raster::Raster;
use crate::state::{DecoderState, ProbabilityTables};

/// Inter header of a switching frame: every slot takes the output.
fn switching_header() -> InterHeader {
    InterHeader {
        refresh_golden: true,
        refresh_alt_ref: true,
        refresh_last: true,
        ..InterHeader::default()
    }
}

impl<W: ContainerWriter> Encoder<W> {
    /// An inter frame that repeats the last reference: every macroblock
    /// predicts from it with a zero vector and carries no residue. The loop
    /// filter is off.
    pub fn create_switching_frame(&self, quantizer: u8) -> Result<Frame, EncodeError> {
        let mut frame = make_empty_frame(
            FrameKind::Inter(switching_header()),
            self.state.width,
            self.state.height,
            quantizer,
        )?;
        let repeat = Macroblock::new(MacroblockPrediction::Inter {
            reference: ReferenceFrame::Last,
            mode: InterMode::Zero,
            mv: MotionVector::ZERO,
        });
        frame.macroblocks.fill(repeat);
        frame.header.loop_filter = LoopFilter::default();
        Ok(frame)
    }

    /// Keeps the predictions, loop filter and quantizer of `frame` and
    /// recomputes its residues so that, applied on top of `state`, it
    /// reconstructs `target` as closely as possible.
    pub fn update_residues(&self, target: &Raster, frame: &Frame, state: &DecoderState) -> Result<Frame, EncodeError> {
        self.recode(target, frame, state, &Unstoppable).map(|encoded| encoded.frame)
    }

    pub(super) fn recode(
        &self,
        target: &Raster,
        frame: &Frame,
        state: &DecoderState,
        stop: &dyn Stop,
    ) -> Result<EncodedFrame, EncodeError> {
        let request = FrameRequest {
            original: target,
            state,
            kind: frame.header.kind.clone(),
            quantizer: frame.header.quantizer.y_ac,
            estimate: None,
            modes: Modes::Fixed(frame),
        };
        encode_raster(&self.config, &request, stop)
    }

    /// Re-derives the modes and residues of `frame` so that, applied on top
    /// of `predecessor`, its output matches `target` as closely as possible.
    /// The reference refresh flags and quantizer of `frame` are kept.
    pub fn refine_switching_frame(
        &self,
        frame: &mut Frame,
        predecessor: &DecoderState,
        target: &Raster,
    ) -> Result<(), EncodeError> {
        self.refine(frame, predecessor, target, &Unstoppable)
            .map(|encoded| *frame = encoded.frame)
    }

    pub(super) fn refine(
        &self,
        frame: &Frame,
        predecessor: &DecoderState,
        target: &Raster,
        stop: &dyn Stop,
    ) -> Result<EncodedFrame, EncodeError> {
        if predecessor.references.last.is_none() {
            return Err(EncodeError::ReferenceUnavailable(ReferenceFrame::Last));
        }
        let request = FrameRequest {
            original: target,
            state: predecessor,
            kind: frame.header.kind.clone(),
            quantizer: frame.header.quantizer.y_ac,
            estimate: None,
            modes: Modes::Search,
        };
        let encoded = encode_raster(&self.config, &request, stop)?;
        log::debug!("refined switching frame: ssim {:.5}", encoded.ssim);
        Ok(encoded)
    }

    /// Writes `frame` coded relative to `probabilities` without advancing the
    /// encoder's state. Returns the payload size.
    pub fn write_switching_frame(
        &mut self,
        frame: &Frame,
        probabilities: &ProbabilityTables,
    ) -> Result<usize, EncodeError> {
        let payload = write_frame(frame, probabilities);
        self.output.write_frame(&payload)?;
        Ok(payload.len())
    }
}

/// Rewrites the probability updates of `frame` so that a decoder holding
/// `current` holds `expected` after the frame.
///
/// Every update is sent explicitly and the frame refreshes its tables, so the
/// result does not depend on which updates `frame` carried before. Motion
/// vector probabilities travel in 7 bits; odd values other than 1 cannot be
/// sent and are approximated. Key frames cannot carry mode or motion vector
/// updates. Returns whether `expected` is reached exactly.
pub fn fix_probability_tables(frame: &mut Frame, current: &ProbabilityTables, expected: &ProbabilityTables) -> bool {
    let header = &mut frame.header;
    let base = match header.kind {
        FrameKind::Key => ProbabilityTables::default(),
        FrameKind::Inter(_) => current.clone(),
    };
    header.refresh_entropy_probs = true;

    for ((update, &from), &to) in header
        .token_prob_updates
        .iter_mut()
        .flatten()
        .flatten()
        .flatten()
        .zip(base.coefficients.iter().flatten().flatten().flatten())
        .zip(expected.coefficients.iter().flatten().flatten().flatten())
    {
        *update = (from != to).then_some(to);
    }

    let FrameKind::Inter(inter) = &mut header.kind else {
        return base.motion_vectors == expected.motion_vectors
            && base.y_modes == expected.y_modes
            && base.uv_modes == expected.uv_modes;
    };

    inter.y_mode_probs = (base.y_modes != expected.y_modes).then_some(expected.y_modes);
    inter.uv_mode_probs = (base.uv_modes != expected.uv_modes).then_some(expected.uv_modes);

    let mut exact = true;
    for ((update, &from), &to) in inter
        .mv_prob_updates
        .iter_mut()
        .flatten()
        .zip(base.motion_vectors.iter().flatten())
        .zip(expected.motion_vectors.iter().flatten())
    {
        *update = if from == to {
            None
        } else if to == 1 || to % 2 == 0 {
            Some(to)
        } else {
            exact = false;
            let sendable = (to & !1).max(1);
            (sendable != from).then_some(sendable)
        };
    }
    if !exact {
        log::warn!("motion vector probabilities cannot be matched exactly");
    }
    exact
}
