//! VP8 encoding with rate-distortion optimized mode decision.
//!
//! This crate encodes YUV 4:2:0 rasters into VP8 key and inter frames and
//! decodes them again with a paired decoder that reconstructs exactly what
//! the encoder predicted from.
//!
//! # Encoding
//!
//! An [`Encoder`] writes every frame to a
//! [`ContainerWriter`](mux::ContainerWriter) such as an IVF file. Each frame
//! is coded at the coarsest quantizer whose reconstruction reaches the
//! requested similarity:
//!
//! ```rust
//! use zenvp8::mux::IvfWriter;
//! use zenvp8::{Encoder, EncoderConfig, Raster};
//!
//! let writer = IvfWriter::new(Vec::new(), 64, 48, (30, 1))?;
//! let mut encoder = Encoder::new(writer, EncoderConfig::new());
//! for level in [40, 60, 80] {
//!     let frame = Raster::filled(64, 48, level, 128, 128);
//!     let ssim = encoder.encode(&frame, 0.9, None)?;
//!     assert!(ssim >= 0.9);
//! }
//! let ivf = encoder.into_writer().into_inner();
//! assert!(ivf.len() > 32);
//! # Ok::<(), zenvp8::EncodeError>(())
//! ```
//!
//! # Decoding
//!
//! A [`Decoder`] reads frame payloads back. [`Encoder::export_decoder`]
//! hands out a decoder in the encoder's current state, so decoding can pick
//! up in the middle of a stream:
//!
//! ```rust
//! use zenvp8::mux::MemoryWriter;
//! use zenvp8::{Decoder, Encoder, EncoderConfig, Raster};
//!
//! let mut encoder = Encoder::new(MemoryWriter::new(32, 32), EncoderConfig::new());
//! let mut decoder = encoder.export_decoder();
//! encoder.encode(&Raster::filled(32, 32, 90, 100, 110), 0.95, None)?;
//! decoder.decode(&encoder.writer().frames()[0])?;
//! assert_eq!(decoder.state(), encoder.state());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Switching streams
//!
//! [`Encoder::reencode`] re-encodes a source against an existing encoding,
//! starting with a switching frame that moves this stream's decoder onto the
//! other stream's picture.
//!
//! # Safety
//!
//! This crate contains no unsafe code.

#![forbid(unsafe_code)]

pub mod common;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod metrics;
pub mod mux;
pub mod raster;
pub mod state;

pub use decoder::{parse_frame, DecodeError, Decoder};
pub use encoder::{
    fix_probability_tables, EncodeError, EncodeOutcome, Encoder, EncoderConfig, FirstPassStats, FrameSource,
    PredecessorSource, ReencodeOptions, SourceFrame, VecFrameSource,
};
pub use frame::{Frame, FrameHeader, FrameKind, Macroblock, MacroblockPrediction, MotionVector, ReferenceFrame};
pub use metrics::{similarity, ssim, Similarity};
pub use mux::{ContainerWriter, MuxError};
pub use raster::{Plane, Raster};
pub use state::{DecoderState, ProbabilityTables, References};

// Re-export cooperative cancellation types
pub use enough::{Stop, StopReason, Unstoppable};
