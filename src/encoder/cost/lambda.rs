//! Rate weights for rate-distortion decisions.
//!
//! Each decision class weighs rate against distortion with its own lambda,
//! derived from the AC dequantization step `q` of the plane it codes.
//! Higher lambda = prefer fewer bits; lower lambda = prefer fidelity.

use crate::common::quant::Dequantizer;

/// Mode and vector decisions for luma: (3 * q²) >> 7
#[inline]
pub fn calc_lambda_luma(q: u32) -> u32 {
    ((3 * q * q) >> 7).max(1)
}

/// Chroma mode decisions: (3 * q²) >> 6
#[inline]
pub fn calc_lambda_chroma(q: u32) -> u32 {
    ((3 * q * q) >> 6).max(1)
}

/// Trellis over whole-block luma (Y2 present): q² >> 4
#[inline]
pub fn calc_lambda_trellis_i16(q: u32) -> u32 {
    ((q * q) >> 4).max(1)
}

/// Trellis over subblock luma: (7 * q²) >> 5
#[inline]
pub fn calc_lambda_trellis_i4(q: u32) -> u32 {
    ((7 * q * q) >> 5).max(1)
}

/// Trellis over chroma: q² >> 1
#[inline]
pub fn calc_lambda_trellis_uv(q: u32) -> u32 {
    ((q * q) >> 1).max(1)
}

/// Lambdas for one quantizer setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lambdas {
    /// Luma mode, subblock mode and motion vector decisions.
    pub luma: u32,
    pub chroma: u32,
    pub trellis_i16: u32,
    pub trellis_i4: u32,
    pub trellis_uv: u32,
    /// Distortion weight shared by every decision.
    pub distortion: u32,
}

impl Lambdas {
    /// Derives lambdas from the dequantization steps. A fixed `rate_multiplier`
    /// replaces every derived value.
    pub(crate) fn new(dq: &Dequantizer, rate_multiplier: Option<u32>, distortion: u32) -> Self {
        let qy = u32::from(dq.y[1]);
        let quv = u32::from(dq.uv[1]);
        let derived = Self {
            luma: calc_lambda_luma(qy),
            chroma: calc_lambda_chroma(quv),
            trellis_i16: calc_lambda_trellis_i16(qy),
            trellis_i4: calc_lambda_trellis_i4(qy),
            trellis_uv: calc_lambda_trellis_uv(quv),
            distortion,
        };
        match rate_multiplier {
            Some(m) => Self {
                luma: m,
                chroma: m,
                trellis_i16: m,
                trellis_i4: m,
                trellis_uv: m,
                distortion,
            },
            None => derived,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::quant::QuantIndices;

    #[test]
    fn lambdas_grow_with_quantizer() {
        let fine = Lambdas::new(&Dequantizer::new(&QuantIndices::uniform(4)), None, 256);
        let coarse = Lambdas::new(&Dequantizer::new(&QuantIndices::uniform(100)), None, 256);
        assert!(fine.luma < coarse.luma);
        assert!(fine.chroma < coarse.chroma);
        assert!(fine.trellis_i4 < coarse.trellis_i4);
        assert!(coarse.luma < coarse.chroma);
    }

    #[test]
    fn fixed_multiplier_overrides_everything() {
        let l = Lambdas::new(&Dequantizer::new(&QuantIndices::uniform(60)), Some(7), 100);
        assert_eq!(
            [l.luma, l.chroma, l.trellis_i16, l.trellis_i4, l.trellis_uv],
            [7; 5]
        );
        assert_eq!(l.distortion, 100);
    }

    #[test]
    fn formulas_match_reference_values() {
        assert_eq!(calc_lambda_luma(64), 96);
        assert_eq!(calc_lambda_chroma(64), 192);
        assert_eq!(calc_lambda_trellis_i16(64), 256);
        assert_eq!(calc_lambda_trellis_i4(64), 896);
        assert_eq!(calc_lambda_trellis_uv(64), 2048);
        assert_eq!(calc_lambda_luma(1), 1);
    }
}
