//! VP8 encoder.
//!
//! [`Encoder`] turns rasters into frames written to a
//! [`ContainerWriter`](crate::mux::ContainerWriter), keeping the state a
//! decoder of its output will be in. Switching frames and
//! [`Encoder::reencode`] move that decoder onto another encoding of the same
//! source.

mod api;
mod config;
/// Rate and distortion measures
pub mod cost;
mod motion;
pub(crate) mod probability;
/// Quantization matrices and coefficient quantization
pub(crate) mod quantize;
mod reencode;
mod switching;
/// Trellis quantization for RD-optimized coefficient selection
mod trellis;
/// Per-frame analysis and macroblock coding
pub(crate) mod vp8;
pub(crate) mod writer;

pub use api::{EncodeError, EncodeOutcome, Encoder, FirstPassStats};
pub use config::EncoderConfig;
pub use cost::DEFAULT_DISTORTION_MULTIPLIER;
pub use reencode::{FrameSource, PredecessorSource, ReencodeOptions, SourceFrame, VecFrameSource};
pub use switching::fix_probability_tables;
