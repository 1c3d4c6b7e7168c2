//! Quantizer indices and the dequantization factors they select.

use super::tables::{AC_QUANT, DC_QUANT, MAX_QUANTIZER_INDEX};

/// Quantizer indices carried in a frame header.
///
/// `y_ac` is the base index; the other planes are coded as deltas from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QuantIndices {
    pub y_ac: u8,
    pub y_dc_delta: i8,
    pub y2_dc_delta: i8,
    pub y2_ac_delta: i8,
    pub uv_dc_delta: i8,
    pub uv_ac_delta: i8,
}

/// Largest magnitude of a quantizer delta (4 bits + sign).
pub const MAX_QUANTIZER_DELTA: i8 = 15;

impl QuantIndices {
    /// All planes at the same index.
    pub fn uniform(y_ac: u8) -> Self {
        Self {
            y_ac: y_ac.min(MAX_QUANTIZER_INDEX),
            ..Self::default()
        }
    }

    /// The deltas in header order.
    pub(crate) fn deltas(&self) -> [i8; 5] {
        [
            self.y_dc_delta,
            self.y2_dc_delta,
            self.y2_ac_delta,
            self.uv_dc_delta,
            self.uv_ac_delta,
        ]
    }

    pub(crate) fn from_deltas(y_ac: u8, deltas: [i8; 5]) -> Self {
        let [y_dc_delta, y2_dc_delta, y2_ac_delta, uv_dc_delta, uv_ac_delta] =
            deltas.map(|d| d.clamp(-MAX_QUANTIZER_DELTA, MAX_QUANTIZER_DELTA));
        Self {
            y_ac: y_ac.min(MAX_QUANTIZER_INDEX),
            y_dc_delta,
            y2_dc_delta,
            y2_ac_delta,
            uv_dc_delta,
            uv_ac_delta,
        }
    }
}

fn index(base: u8, delta: i8) -> usize {
    (i32::from(base) + i32::from(delta)).clamp(0, i32::from(MAX_QUANTIZER_INDEX)) as usize
}

/// Dequantization steps `[dc, ac]` per plane type (RFC 6386, 14.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Dequantizer {
    pub y: [u16; 2],
    pub y2: [u16; 2],
    pub uv: [u16; 2],
}

impl Dequantizer {
    pub(crate) fn new(q: &QuantIndices) -> Self {
        let base = q.y_ac;
        let dc = |delta| DC_QUANT[index(base, delta)] as u16;
        let ac = |delta| AC_QUANT[index(base, delta)] as u16;

        Self {
            y: [dc(q.y_dc_delta), ac(0)],
            y2: [dc(q.y2_dc_delta) * 2, (ac(q.y2_ac_delta) * 155 / 100).max(8)],
            uv: [dc(q.uv_dc_delta).min(132), ac(q.uv_ac_delta)],
        }
    }

    /// Dequantizes a block of levels in natural order.
    pub(crate) fn dequantize(steps: [u16; 2], levels: &[i16; 16]) -> [i32; 16] {
        let mut out = [0i32; 16];
        for (i, (o, &l)) in out.iter_mut().zip(levels).enumerate() {
            *o = i32::from(l) * i32::from(steps[usize::from(i > 0)]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_indices_clamp() {
        let q = QuantIndices::from_deltas(127, [15, 15, 15, 15, 15]);
        let d = Dequantizer::new(&q);
        assert_eq!(d.y, [157, 284]);
        assert_eq!(d.uv[0], 132);

        let q = QuantIndices::from_deltas(0, [-15, -15, -15, -15, -15]);
        let d = Dequantizer::new(&q);
        assert_eq!(d.y, [4, 4]);
        assert_eq!(d.y2, [8, 8]);
    }

    #[test]
    fn dequantize_uses_dc_then_ac() {
        let mut levels = [0i16; 16];
        levels[0] = 2;
        levels[5] = -3;
        let out = Dequantizer::dequantize([10, 7], &levels);
        assert_eq!(out[0], 20);
        assert_eq!(out[5], -21);
    }
}
