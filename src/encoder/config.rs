//! Encoder configuration.
//!
//! ```rust
//! use zenvp8::EncoderConfig;
//!
//! let config = EncoderConfig::new()
//!     .with_trellis(false)
//!     .with_search_step(8)
//!     .with_key_frame_interval(Some(30));
//! assert_eq!(config.search_step, 8);
//! ```

use crate::common::tables::MAX_QUANTIZER_INDEX;
use crate::encoder::cost::DEFAULT_DISTORTION_MULTIPLIER;

/// Largest loop filter sharpness the bitstream can carry.
pub const MAX_SHARPNESS: u8 = 7;

/// Largest initial diamond-search radius, in full pixels.
pub const MAX_SEARCH_STEP: usize = 64;

/// Tuning knobs of an [`Encoder`](crate::Encoder).
///
/// All fields are public for direct construction and inspection; the
/// builder methods clamp their arguments to the legal range.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct EncoderConfig {
    /// Fixed rate weight for every rate-distortion decision. `None` derives
    /// the weights from the quantizer. Default: `None`.
    pub rate_multiplier: Option<u32>,
    /// Weight of squared error against rate in 1/256 bit. Default: 256.
    pub distortion_multiplier: u32,
    /// Trellis-optimize coefficient levels. Default: true.
    pub trellis: bool,
    /// Gather statistics in a first pass before the committed encode.
    /// Default: false.
    pub two_pass: bool,
    /// Initial diamond-search radius in full pixels. Default: 16.
    pub search_step: usize,
    /// Loop filter sharpness (0-7). Default: 0.
    pub loop_filter_sharpness: u8,
    /// Force a key frame every this many frames. Default: `None`.
    pub key_frame_interval: Option<u32>,
    /// Quantizer index the convergence search starts from. Default: 64.
    pub initial_quantizer: u8,
    /// Frame rate as `(numerator, denominator)`, recorded by containers.
    /// Default: 30/1.
    pub frame_rate: (u32, u32),
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rate_multiplier: None,
            distortion_multiplier: DEFAULT_DISTORTION_MULTIPLIER,
            trellis: true,
            two_pass: false,
            search_step: 16,
            loop_filter_sharpness: 0,
            key_frame_interval: None,
            initial_quantizer: 64,
            frame_rate: (30, 1),
        }
    }

    /// Set a fixed rate weight, or `None` to derive it from the quantizer.
    #[must_use]
    pub fn with_rate_multiplier(mut self, multiplier: Option<u32>) -> Self {
        self.rate_multiplier = multiplier.map(|m| m.max(1));
        self
    }

    /// Set the distortion weight (at least 1).
    #[must_use]
    pub fn with_distortion_multiplier(mut self, multiplier: u32) -> Self {
        self.distortion_multiplier = multiplier.max(1);
        self
    }

    #[must_use]
    pub fn with_trellis(mut self, enable: bool) -> Self {
        self.trellis = enable;
        self
    }

    #[must_use]
    pub fn with_two_pass(mut self, enable: bool) -> Self {
        self.two_pass = enable;
        self
    }

    /// Set the initial search radius in full pixels (1-64).
    #[must_use]
    pub fn with_search_step(mut self, step: usize) -> Self {
        self.search_step = step.clamp(1, MAX_SEARCH_STEP);
        self
    }

    /// Set the loop filter sharpness (0-7).
    #[must_use]
    pub fn with_loop_filter_sharpness(mut self, sharpness: u8) -> Self {
        self.loop_filter_sharpness = sharpness.min(MAX_SHARPNESS);
        self
    }

    /// Force a key frame every `interval` frames. An interval of zero
    /// disables forcing.
    #[must_use]
    pub fn with_key_frame_interval(mut self, interval: Option<u32>) -> Self {
        self.key_frame_interval = interval.filter(|&n| n > 0);
        self
    }

    /// Set the starting quantizer index (0-127).
    #[must_use]
    pub fn with_initial_quantizer(mut self, quantizer: u8) -> Self {
        self.initial_quantizer = quantizer.min(MAX_QUANTIZER_INDEX);
        self
    }

    /// Set the frame rate; zero terms are replaced by one.
    #[must_use]
    pub fn with_frame_rate(mut self, numerator: u32, denominator: u32) -> Self {
        self.frame_rate = (numerator.max(1), denominator.max(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_clamp() {
        let config = EncoderConfig::new()
            .with_search_step(0)
            .with_loop_filter_sharpness(12)
            .with_initial_quantizer(200)
            .with_key_frame_interval(Some(0))
            .with_distortion_multiplier(0)
            .with_frame_rate(0, 0);
        assert_eq!(config.search_step, 1);
        assert_eq!(config.loop_filter_sharpness, MAX_SHARPNESS);
        assert_eq!(config.initial_quantizer, MAX_QUANTIZER_INDEX);
        assert_eq!(config.key_frame_interval, None);
        assert_eq!(config.distortion_multiplier, 1);
        assert_eq!(config.frame_rate, (1, 1));
    }

    #[test]
    fn defaults() {
        let config = EncoderConfig::default();
        assert_eq!(config.rate_multiplier, None);
        assert_eq!(config.distortion_multiplier, 256);
        assert!(config.trellis);
        assert!(!config.two_pass);
        assert_eq!(config.initial_quantizer, 64);
    }
}
