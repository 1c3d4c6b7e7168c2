//! Frame header construction and per-frame probability adaptation.

use super::FrameEncoder;
use crate::common::quant::QuantIndices;
use crate::common::tables::MAX_QUANTIZER_INDEX;
use crate::encoder::api::EncodeError;
use crate::encoder::cost::TokenStats;
use crate::encoder::probability::{
    optimize_interframe_probs, optimize_mv_probs, optimize_prob_skip, optimize_probability_tables,
};
use crate::frame::{Frame, FrameHeader, FrameKind, Macroblock, MacroblockPrediction};

/// Largest width or height a frame header can carry.
pub(crate) const MAX_DIMENSION: usize = 0x3FFF;

/// A frame of `kind` with a uniform quantizer, no probability updates and
/// every macroblock intra DC without coefficients.
pub(crate) fn make_empty_frame(
    kind: FrameKind,
    width: usize,
    height: usize,
    quantizer: u8,
) -> Result<Frame, EncodeError> {
    if !(1..=MAX_DIMENSION).contains(&width) || !(1..=MAX_DIMENSION).contains(&height) {
        return Err(EncodeError::InvalidDimensions {
            expected: (MAX_DIMENSION, MAX_DIMENSION),
            actual: (width, height),
        });
    }
    if quantizer > MAX_QUANTIZER_INDEX {
        return Err(EncodeError::InvalidQuantizer(quantizer));
    }

    let mb_cols = width.div_ceil(16);
    let mb_rows = height.div_ceil(16);
    Ok(Frame {
        header: FrameHeader::new(
            kind,
            width as u16,
            height as u16,
            QuantIndices::uniform(quantizer),
        ),
        mb_cols,
        mb_rows,
        macroblocks: vec![Macroblock::new(MacroblockPrediction::DC); mb_cols * mb_rows],
    })
}

impl FrameEncoder<'_> {
    /// Fills in the probability updates of the frame header from what the
    /// frame actually coded. Updates are relative to the tables the frame
    /// started from and are only sent where they pay for themselves.
    pub(super) fn adapt_probabilities(&mut self, tokens: &TokenStats) {
        let Frame {
            header, macroblocks, ..
        } = &mut self.frame;
        header.token_prob_updates = optimize_probability_tables(tokens, &self.baseline.coefficients);
        header.prob_skip = optimize_prob_skip(macroblocks);
        header.refresh_entropy_probs = true;

        if let FrameKind::Inter(inter) = &mut header.kind {
            optimize_interframe_probs(macroblocks, &self.baseline, inter);
            inter.mv_prob_updates = optimize_mv_probs(&self.mv_counts, &self.baseline.motion_vectors);
        }

        let token_updates = header
            .token_prob_updates
            .iter()
            .flatten()
            .flatten()
            .flatten()
            .filter(|u| u.is_some())
            .count();
        log::trace!(
            "{token_updates} token probability updates, skip probability {}",
            header.prob_skip
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::InterHeader;

    #[test]
    fn empty_frame_covers_partial_macroblocks() {
        let frame = make_empty_frame(FrameKind::Key, 33, 17, 40).unwrap();
        assert_eq!((frame.mb_cols, frame.mb_rows), (3, 2));
        assert_eq!(frame.macroblocks.len(), 6);
        assert_eq!(frame.dimensions(), (33, 17));
        assert!(frame.macroblocks.iter().all(|mb| mb.skip));
        assert_eq!(frame.header.quantizer, QuantIndices::uniform(40));
    }

    #[test]
    fn empty_frame_rejects_bad_parameters() {
        assert!(matches!(
            make_empty_frame(FrameKind::Key, 0, 16, 0),
            Err(EncodeError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            make_empty_frame(FrameKind::Key, MAX_DIMENSION + 1, 16, 0),
            Err(EncodeError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            make_empty_frame(FrameKind::Inter(InterHeader::default()), 16, 16, 200),
            Err(EncodeError::InvalidQuantizer(200))
        ));
        assert!(make_empty_frame(FrameKind::Key, MAX_DIMENSION, 1, MAX_QUANTIZER_INDEX).is_ok());
    }
}
