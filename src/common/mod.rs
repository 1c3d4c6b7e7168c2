//! Bitstream tables, transforms and predictors shared by the encoder and decoder.

pub(crate) mod inter_prediction;
pub(crate) mod loop_filter;
pub(crate) mod mv_prediction;
pub(crate) mod prediction;
pub mod quant;
pub(crate) mod tables;
pub(crate) mod tokens;
/// DCT/IDCT and Walsh-Hadamard transforms
pub(crate) mod transform;
pub mod types;
