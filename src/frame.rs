//! Symbolic representation of a coded frame.
//!
//! A [`Frame`] holds every decision the bitstream carries (header fields,
//! probability updates, per-macroblock modes, motion vectors and quantized
//! coefficients) without any byte-level framing. The writer serializes it and
//! the paired decoder reconstructs pixels from it.

use core::ops::{Add, Sub};

use crate::common::quant::QuantIndices;
use crate::common::types::{BlockMode, InterMode, IntraMode, TokenProbUpdates, MV_PROB_COUNT};

/// A motion vector in quarter luma pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MotionVector {
    /// Horizontal displacement (columns).
    pub x: i16,
    /// Vertical displacement (rows).
    pub y: i16,
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector { x: 0, y: 0 };

    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    pub(crate) fn as_col_row(self) -> (i16, i16) {
        (self.x, self.y)
    }
}

impl Add for MotionVector {
    type Output = MotionVector;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x.saturating_add(rhs.x), self.y.saturating_add(rhs.y))
    }
}

impl Sub for MotionVector {
    type Output = MotionVector;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x.saturating_sub(rhs.x), self.y.saturating_sub(rhs.y))
    }
}

/// Reference slots an inter macroblock may predict from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceFrame {
    Last = 1,
    Golden = 2,
    AltRef = 3,
}

impl ReferenceFrame {
    pub const ALL: [ReferenceFrame; 3] = [
        ReferenceFrame::Last,
        ReferenceFrame::Golden,
        ReferenceFrame::AltRef,
    ];

    /// Index used by loop-filter deltas, where 0 stands for intra.
    pub(crate) fn delta_index(self) -> usize {
        self as usize
    }
}

/// How the luma plane of an intra macroblock is predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LumaPrediction {
    /// One 16x16 prediction; the luma DC values go through the Y2 block.
    Whole(BlockMode),
    /// Sixteen independently predicted 4x4 subblocks in raster order.
    Subblocks([IntraMode; 16]),
}

/// Prediction of one macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroblockPrediction {
    Intra {
        luma: LumaPrediction,
        chroma: BlockMode,
    },
    Inter {
        reference: ReferenceFrame,
        /// How the vector is coded relative to its neighbours.
        mode: InterMode,
        mv: MotionVector,
    },
}

impl MacroblockPrediction {
    /// Intra DC everywhere.
    pub const DC: MacroblockPrediction = MacroblockPrediction::Intra {
        luma: LumaPrediction::Whole(BlockMode::DC),
        chroma: BlockMode::DC,
    };

    /// Whether the luma DC coefficients are carried by a Y2 block.
    pub fn has_y2(&self) -> bool {
        match self {
            MacroblockPrediction::Intra { luma, .. } => matches!(luma, LumaPrediction::Whole(_)),
            MacroblockPrediction::Inter { .. } => true,
        }
    }

    pub fn is_inter(&self) -> bool {
        matches!(self, MacroblockPrediction::Inter { .. })
    }

    /// Reference and vector of an inter macroblock.
    pub fn motion(&self) -> Option<(ReferenceFrame, MotionVector)> {
        match *self {
            MacroblockPrediction::Inter { reference, mv, .. } => Some((reference, mv)),
            MacroblockPrediction::Intra { .. } => None,
        }
    }
}

/// First chroma U block index in [`Macroblock::coefficients`].
pub const U_BLOCKS: usize = 16;
/// First chroma V block index.
pub const V_BLOCKS: usize = 20;
/// Index of the Y2 block.
pub const Y2_BLOCK: usize = 24;

/// One coded macroblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macroblock {
    pub prediction: MacroblockPrediction,
    /// Quantized levels in natural (row-major) order: 16 luma blocks in
    /// raster order, 4 U, 4 V, then Y2. When a Y2 block is present the luma
    /// DC positions are unused and zero.
    pub coefficients: [[i16; 16]; 25],
    /// No coefficient is coded for this macroblock.
    pub skip: bool,
}

impl Macroblock {
    pub fn new(prediction: MacroblockPrediction) -> Self {
        Self {
            prediction,
            coefficients: [[0; 16]; 25],
            skip: true,
        }
    }

    /// Whether any coded block holds a nonzero level.
    pub fn has_nonzero(&self) -> bool {
        let blocks = if self.prediction.has_y2() { 25 } else { 24 };
        self.coefficients[..blocks]
            .iter()
            .any(|b| b.iter().any(|&c| c != 0))
    }

    /// Recomputes [`Macroblock::skip`] from the coefficients.
    pub fn update_skip(&mut self) {
        self.skip = !self.has_nonzero();
    }
}

/// Loop-filter adjustments by reference frame and prediction mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterDeltas {
    /// Indexed by intra, last, golden, alt-ref.
    pub reference: [i8; 4],
    /// Indexed by subblock intra, zero mv, other mv, split mv.
    pub mode: [i8; 4],
}

/// Frame-level loop-filter settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopFilter {
    /// 0..=63; zero disables filtering.
    pub level: u8,
    /// 0..=7.
    pub sharpness: u8,
    pub deltas: Option<FilterDeltas>,
}

/// Header fields that only exist on inter frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterHeader {
    pub refresh_golden: bool,
    pub refresh_alt_ref: bool,
    /// Buffer copied into golden when it is not refreshed: last or alt-ref.
    pub copy_to_golden: Option<ReferenceFrame>,
    /// Buffer copied into alt-ref when it is not refreshed: last or golden.
    pub copy_to_alt_ref: Option<ReferenceFrame>,
    pub sign_bias_golden: bool,
    pub sign_bias_alt_ref: bool,
    pub refresh_last: bool,
    /// Probability that a macroblock is intra.
    pub prob_intra: u8,
    /// Probability that an inter macroblock uses the last frame.
    pub prob_last: u8,
    /// Probability that a non-last inter macroblock uses golden.
    pub prob_golden: u8,
    /// New luma mode probabilities, if updated.
    pub y_mode_probs: Option<[u8; 4]>,
    /// New chroma mode probabilities, if updated.
    pub uv_mode_probs: Option<[u8; 3]>,
    /// Motion-vector probability updates, row component first.
    pub mv_prob_updates: [[Option<u8>; MV_PROB_COUNT]; 2],
}

impl Default for InterHeader {
    fn default() -> Self {
        Self {
            refresh_golden: false,
            refresh_alt_ref: false,
            copy_to_golden: None,
            copy_to_alt_ref: None,
            sign_bias_golden: false,
            sign_bias_alt_ref: false,
            refresh_last: true,
            prob_intra: 128,
            prob_last: 128,
            prob_golden: 128,
            y_mode_probs: None,
            uv_mode_probs: None,
            mv_prob_updates: [[None; MV_PROB_COUNT]; 2],
        }
    }
}

impl InterHeader {
    /// Motion vectors from `reference` are negated relative to last.
    pub(crate) fn sign_bias(&self, reference: ReferenceFrame) -> bool {
        match reference {
            ReferenceFrame::Last => false,
            ReferenceFrame::Golden => self.sign_bias_golden,
            ReferenceFrame::AltRef => self.sign_bias_alt_ref,
        }
    }
}

/// Key or inter frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Intra only; resets every reference.
    Key,
    Inter(InterHeader),
}

impl FrameKind {
    /// Whether macroblocks of this frame may use inter prediction.
    pub fn allows_inter(&self) -> bool {
        matches!(self, FrameKind::Inter(_))
    }

    pub fn is_key(&self) -> bool {
        matches!(self, FrameKind::Key)
    }

    pub fn inter_header(&self) -> Option<&InterHeader> {
        match self {
            FrameKind::Key => None,
            FrameKind::Inter(header) => Some(header),
        }
    }
}

/// Frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    /// Display width.
    pub width: u16,
    /// Display height.
    pub height: u16,
    pub quantizer: QuantIndices,
    pub loop_filter: LoopFilter,
    /// When false the probabilities in effect after this frame revert to
    /// those before it.
    pub refresh_entropy_probs: bool,
    pub token_prob_updates: Box<TokenProbUpdates>,
    /// Probability that a macroblock is not skipped.
    pub prob_skip: u8,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, width: u16, height: u16, quantizer: QuantIndices) -> Self {
        Self {
            kind,
            width,
            height,
            quantizer,
            loop_filter: LoopFilter::default(),
            refresh_entropy_probs: true,
            token_prob_updates: Box::new([[[[None; 11]; 3]; 8]; 4]),
            prob_skip: 128,
        }
    }
}

/// A complete coded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub mb_cols: usize,
    pub mb_rows: usize,
    /// Macroblocks in raster order.
    pub macroblocks: Vec<Macroblock>,
}

impl Frame {
    pub fn macroblock(&self, mbx: usize, mby: usize) -> &Macroblock {
        &self.macroblocks[mby * self.mb_cols + mbx]
    }

    pub fn is_key(&self) -> bool {
        self.header.kind.is_key()
    }

    /// Display dimensions.
    pub fn dimensions(&self) -> (usize, usize) {
        (
            usize::from(self.header.width),
            usize::from(self.header.height),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn y2_presence_follows_prediction() {
        assert!(MacroblockPrediction::DC.has_y2());
        let sub = MacroblockPrediction::Intra {
            luma: LumaPrediction::Subblocks([IntraMode::DC; 16]),
            chroma: BlockMode::DC,
        };
        assert!(!sub.has_y2());
        let inter = MacroblockPrediction::Inter {
            reference: ReferenceFrame::Last,
            mode: InterMode::New,
            mv: MotionVector::new(3, -5),
        };
        assert!(inter.has_y2());
    }

    #[test]
    fn skip_ignores_unused_y2() {
        let mut mb = Macroblock::new(MacroblockPrediction::Intra {
            luma: LumaPrediction::Subblocks([IntraMode::TM; 16]),
            chroma: BlockMode::V,
        });
        mb.coefficients[Y2_BLOCK][0] = 4;
        mb.update_skip();
        assert!(mb.skip);
        mb.coefficients[V_BLOCKS + 3][15] = -1;
        mb.update_skip();
        assert!(!mb.skip);
    }
}
