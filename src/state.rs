//! Persistent decoding state: entropy probabilities and reference frames.
//!
//! The same value is carried by the encoder and its paired decoder; after
//! every frame both sides must hold identical state.

use crate::common::tables::{
    COEFF_PROBS, DEFAULT_MV_PROBS, DEFAULT_UV_MODE_PROBS, DEFAULT_YMODE_PROBS,
};
use crate::common::types::{MvProbTables, TokenProbTables};
use crate::frame::{FrameHeader, FrameKind, ReferenceFrame};
use crate::raster::Raster;

/// Entropy-coding probabilities that persist from frame to frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbabilityTables {
    /// Token tree probabilities per plane type, band and context.
    pub coefficients: TokenProbTables,
    /// Motion vector component probabilities, row first.
    pub motion_vectors: MvProbTables,
    /// Luma mode probabilities of inter frames.
    pub y_modes: [u8; 4],
    /// Chroma mode probabilities of inter frames.
    pub uv_modes: [u8; 3],
}

impl Default for ProbabilityTables {
    fn default() -> Self {
        Self {
            coefficients: COEFF_PROBS,
            motion_vectors: DEFAULT_MV_PROBS,
            y_modes: DEFAULT_YMODE_PROBS,
            uv_modes: DEFAULT_UV_MODE_PROBS,
        }
    }
}

impl ProbabilityTables {
    /// Tables in effect while `header`'s frame is coded, starting from `self`.
    ///
    /// Key frames start over from the defaults.
    pub fn for_frame(&self, header: &FrameHeader) -> Self {
        let mut probs = match header.kind {
            FrameKind::Key => Self::default(),
            FrameKind::Inter(_) => self.clone(),
        };
        probs.apply_updates(header);
        probs
    }

    /// Tables that persist after `header`'s frame.
    pub fn after_frame(&self, header: &FrameHeader) -> Self {
        if header.refresh_entropy_probs {
            self.for_frame(header)
        } else if header.kind.is_key() {
            Self::default()
        } else {
            self.clone()
        }
    }

    fn apply_updates(&mut self, header: &FrameHeader) {
        for (probs, updates) in self
            .coefficients
            .iter_mut()
            .flatten()
            .flatten()
            .flatten()
            .zip(header.token_prob_updates.iter().flatten().flatten().flatten())
        {
            if let Some(p) = updates {
                *probs = *p;
            }
        }

        if let Some(inter) = header.kind.inter_header() {
            if let Some(y) = inter.y_mode_probs {
                self.y_modes = y;
            }
            if let Some(uv) = inter.uv_mode_probs {
                self.uv_modes = uv;
            }
            for (probs, updates) in self
                .motion_vectors
                .iter_mut()
                .flatten()
                .zip(inter.mv_prob_updates.iter().flatten())
            {
                if let Some(p) = updates {
                    *probs = *p;
                }
            }
        }
    }
}

/// Reference frames available to inter prediction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub last: Option<Raster>,
    pub golden: Option<Raster>,
    pub alt_ref: Option<Raster>,
}

impl References {
    pub fn get(&self, reference: ReferenceFrame) -> Option<&Raster> {
        match reference {
            ReferenceFrame::Last => self.last.as_ref(),
            ReferenceFrame::Golden => self.golden.as_ref(),
            ReferenceFrame::AltRef => self.alt_ref.as_ref(),
        }
    }

    /// Whether every slot holds a frame.
    pub fn is_complete(&self) -> bool {
        self.last.is_some() && self.golden.is_some() && self.alt_ref.is_some()
    }

    /// Updates the slots after a frame whose loop-filtered output is `frame`.
    ///
    /// Buffer copies use the slots as they were before this frame, alt-ref
    /// first, then golden (which may read the updated alt-ref).
    pub fn update(&mut self, kind: &FrameKind, frame: &Raster) {
        let FrameKind::Inter(header) = kind else {
            self.last = Some(frame.clone());
            self.golden = Some(frame.clone());
            self.alt_ref = Some(frame.clone());
            return;
        };

        if !header.refresh_alt_ref {
            match header.copy_to_alt_ref {
                Some(ReferenceFrame::Last) => self.alt_ref = self.last.clone(),
                Some(ReferenceFrame::Golden) => self.alt_ref = self.golden.clone(),
                _ => {}
            }
        }
        if !header.refresh_golden {
            match header.copy_to_golden {
                Some(ReferenceFrame::Last) => self.golden = self.last.clone(),
                Some(ReferenceFrame::AltRef) => self.golden = self.alt_ref.clone(),
                _ => {}
            }
        }
        if header.refresh_golden {
            self.golden = Some(frame.clone());
        }
        if header.refresh_alt_ref {
            self.alt_ref = Some(frame.clone());
        }
        if header.refresh_last {
            self.last = Some(frame.clone());
        }
    }
}

/// Everything a decoder carries between frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderState {
    pub probabilities: ProbabilityTables,
    pub references: References,
    /// Display width.
    pub width: usize,
    /// Display height.
    pub height: usize,
}

impl DecoderState {
    /// State before the first key frame.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            probabilities: ProbabilityTables::default(),
            references: References::default(),
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::quant::QuantIndices;
    use crate::frame::InterHeader;

    fn inter(header: InterHeader) -> FrameHeader {
        FrameHeader::new(FrameKind::Inter(header), 16, 16, QuantIndices::uniform(10))
    }

    #[test]
    fn updates_persist_only_when_refreshed() {
        let base = ProbabilityTables::default();
        let mut header = inter(InterHeader::default());
        header.token_prob_updates[1][2][0][3] = Some(9);

        let during = base.for_frame(&header);
        assert_eq!(during.coefficients[1][2][0][3], 9);
        assert_eq!(base.after_frame(&header), during);

        header.refresh_entropy_probs = false;
        assert_eq!(base.after_frame(&header), base);
    }

    #[test]
    fn key_frames_reset_probabilities() {
        let mut adapted = ProbabilityTables::default();
        adapted.motion_vectors[0][0] = 3;
        let header = FrameHeader::new(FrameKind::Key, 16, 16, QuantIndices::uniform(10));
        assert_eq!(adapted.for_frame(&header), ProbabilityTables::default());
    }

    #[test]
    fn copy_flags_use_previous_buffers() {
        let a = Raster::filled(16, 16, 1, 128, 128);
        let b = Raster::filled(16, 16, 2, 128, 128);
        let mut refs = References::default();
        refs.update(&FrameKind::Key, &a);
        assert!(refs.is_complete());

        let header = InterHeader {
            copy_to_golden: Some(ReferenceFrame::Last),
            copy_to_alt_ref: None,
            ..InterHeader::default()
        };
        refs.update(&FrameKind::Inter(header), &b);
        assert_eq!(refs.last.as_ref(), Some(&b));
        assert_eq!(refs.golden.as_ref(), Some(&a));
        assert_eq!(refs.alt_ref.as_ref(), Some(&a));

        let header = InterHeader {
            refresh_last: false,
            refresh_alt_ref: true,
            copy_to_golden: Some(ReferenceFrame::AltRef),
            ..InterHeader::default()
        };
        let c = Raster::filled(16, 16, 3, 128, 128);
        refs.update(&FrameKind::Inter(header), &c);
        assert_eq!(refs.golden.as_ref(), Some(&a));
        assert_eq!(refs.alt_ref.as_ref(), Some(&c));
        assert_eq!(refs.last.as_ref(), Some(&b));
    }
}
