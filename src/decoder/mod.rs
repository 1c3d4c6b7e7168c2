//! Paired VP8 decoder.
//!
//! Reconstructs frames exactly as the encoder does, so a [`Decoder`] fed the
//! encoder's output always holds the same [`DecoderState`] as the encoder.

pub(crate) mod bool_decoder;
pub(crate) mod parser;
pub(crate) mod reconstruct;

use thiserror::Error;

use crate::common::loop_filter::filter_frame;
use crate::common::quant::Dequantizer;
use crate::frame::{Frame, FrameHeader, ReferenceFrame};
use crate::raster::Raster;
use crate::state::DecoderState;

pub use parser::parse_frame;

/// Errors that can occur when decoding a frame.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// An inter frame does not match the dimensions of the stream.
    #[error("frame is {actual:?}, stream is {expected:?}")]
    InvalidDimensions {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A macroblock predicts from a reference slot that was never filled.
    #[error("reference frame {0:?} is unavailable")]
    ReferenceUnavailable(ReferenceFrame),

    /// An inter frame arrived before any key frame.
    #[error("inter frame without a preceding key frame")]
    MissingKeyFrame,

    /// The payload ended early.
    #[error("truncated frame data")]
    Truncated,

    /// The payload is not a frame this decoder understands.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Decoder holding the persistent state between frames.
#[derive(Debug, Clone)]
pub struct Decoder {
    state: DecoderState,
}

impl Decoder {
    /// Decoder that expects a key frame first.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            state: DecoderState::new(width, height),
        }
    }

    /// Resumes decoding from a snapshot, typically taken from an encoder.
    pub fn from_state(state: DecoderState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn into_state(self) -> DecoderState {
        self.state
    }

    /// Parses and decodes one frame payload.
    pub fn decode(&mut self, data: &[u8]) -> Result<Raster, DecodeError> {
        let frame = parse_frame(data, &self.state)?;
        self.decode_frame(&frame)
    }

    /// Decodes a symbolic frame, returning the loop-filtered output.
    pub fn decode_frame(&mut self, frame: &Frame) -> Result<Raster, DecodeError> {
        apply_frame(&mut self.state, frame)
    }
}

/// Reconstructs `frame` on top of `state` and advances the state past it.
///
/// The state is left untouched on error.
pub(crate) fn apply_frame(state: &mut DecoderState, frame: &Frame) -> Result<Raster, DecodeError> {
    let (width, height) = frame.dimensions();
    if !frame.is_key() {
        if state.references.last.is_none() {
            return Err(DecodeError::MissingKeyFrame);
        }
        if (width, height) != (state.width, state.height) {
            return Err(DecodeError::InvalidDimensions {
                expected: (state.width, state.height),
                actual: (width, height),
            });
        }
    }

    let raster = reconstruct_frame(frame, state)?;
    commit_frame(state, &frame.header, &raster);
    Ok(raster)
}

/// Advances `state` past a frame whose loop-filtered output is `raster`.
pub(crate) fn commit_frame(state: &mut DecoderState, header: &FrameHeader, raster: &Raster) {
    state.width = usize::from(header.width);
    state.height = usize::from(header.height);
    state.references.update(&header.kind, raster);
    state.probabilities = state.probabilities.after_frame(header);
}

/// Loop-filtered reconstruction of `frame` predicted from `state`'s references.
pub(crate) fn reconstruct_frame(frame: &Frame, state: &DecoderState) -> Result<Raster, DecodeError> {
    let (width, height) = frame.dimensions();
    let dq = Dequantizer::new(&frame.header.quantizer);
    let mut raster = Raster::new(width, height);
    for (index, mb) in frame.macroblocks.iter().enumerate() {
        let (mbx, mby) = (index % frame.mb_cols, index / frame.mb_cols);
        reconstruct::reconstruct_macroblock(&mut raster, mb, mbx, mby, &dq, &state.references)
            .map_err(DecodeError::ReferenceUnavailable)?;
    }
    filter_frame(
        &mut raster,
        &frame.macroblocks,
        frame.mb_cols,
        &frame.header.loop_filter,
        frame.is_key(),
    );
    Ok(raster)
}
