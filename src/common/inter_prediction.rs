//! Motion-compensated prediction with the VP8 six-tap filters.
//!
//! Reference planes are treated as infinitely edge-extended, so any block
//! position is valid.

use crate::raster::{Plane, Raster};

/// Six-tap subpixel filters indexed by eighth-pel offset (RFC 6386, 18.3).
const SUBPEL_FILTERS: [[i32; 6]; 8] = [
    [0, 0, 128, 0, 0, 0],
    [0, -6, 123, 12, -1, 0],
    [2, -11, 108, 36, -8, 1],
    [0, -9, 93, 50, -6, 0],
    [3, -16, 77, 77, -16, 3],
    [0, -6, 50, 93, -9, 0],
    [1, -8, 36, 108, -11, 2],
    [0, -1, 12, 123, -6, 0],
];

const MAX_BLOCK: usize = 16;
/// Rows or columns of context a six-tap filter needs around a block.
const TAPS_BEFORE: usize = 2;
const TAPS_AFTER: usize = 3;
const WINDOW: usize = MAX_BLOCK + TAPS_BEFORE + TAPS_AFTER;

/// Predicts a `size`x`size` block whose top-left corner is at `(x, y)`,
/// displaced by `(dx, dy)` in eighth pixels of this plane.
pub(crate) fn predict_block(
    reference: &Plane,
    x: usize,
    y: usize,
    size: usize,
    dx: i32,
    dy: i32,
    out: &mut [u8],
) {
    let left = x as isize + (dx >> 3) as isize - TAPS_BEFORE as isize;
    let top = y as isize + (dy >> 3) as isize - TAPS_BEFORE as isize;
    let span = size + TAPS_BEFORE + TAPS_AFTER;

    let mut window = [0u8; WINDOW * WINDOW];
    for row in 0..span {
        for col in 0..span {
            window[row * WINDOW + col] =
                reference.at_clamped(left + col as isize, top + row as isize);
        }
    }

    let hfilter = &SUBPEL_FILTERS[(dx & 7) as usize];
    let vfilter = &SUBPEL_FILTERS[(dy & 7) as usize];

    // First pass: horizontal, over every row the vertical pass will read.
    let mut temp = [0u8; WINDOW * MAX_BLOCK];
    for row in 0..span {
        let src = &window[row * WINDOW..];
        for col in 0..size {
            temp[row * MAX_BLOCK + col] = apply(hfilter, |t| src[col + t]);
        }
    }

    // Second pass: vertical.
    for row in 0..size {
        for col in 0..size {
            out[row * size + col] = apply(vfilter, |t| temp[(row + t) * MAX_BLOCK + col]);
        }
    }
}

#[inline]
fn apply(filter: &[i32; 6], sample: impl Fn(usize) -> u8) -> u8 {
    let sum: i32 = filter
        .iter()
        .enumerate()
        .map(|(t, &k)| k * i32::from(sample(t)))
        .sum();
    ((sum + 64) >> 7).clamp(0, 255) as u8
}

/// Motion-compensated prediction of a whole macroblock.
///
/// `mv` is `(col, row)` in quarter luma pixels; chroma uses the same value as
/// an eighth-pel displacement at half resolution.
pub(crate) struct InterPrediction {
    pub y: [u8; 256],
    pub u: [u8; 64],
    pub v: [u8; 64],
}

impl InterPrediction {
    pub(crate) fn build(reference: &Raster, mbx: usize, mby: usize, mv: (i16, i16)) -> Self {
        let (col, row) = (i32::from(mv.0), i32::from(mv.1));
        let mut pred = Self {
            y: [0; 256],
            u: [0; 64],
            v: [0; 64],
        };
        predict_block(&reference.y, mbx * 16, mby * 16, 16, col * 2, row * 2, &mut pred.y);
        predict_block(&reference.u, mbx * 8, mby * 8, 8, col, row, &mut pred.u);
        predict_block(&reference.v, mbx * 8, mby * 8, 8, col, row, &mut pred.v);
        pred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize) -> Plane {
        let mut plane = Plane::new(width, height, 0);
        for y in 0..height {
            for x in 0..width {
                plane.set(x, y, (x * 4 + y) as u8);
            }
        }
        plane
    }

    #[test]
    fn full_pel_is_a_copy() {
        let plane = gradient(48, 48);
        let mut out = [0u8; 256];
        predict_block(&plane, 16, 16, 16, 8 * 3, -8 * 2, &mut out);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(out[y * 16 + x], plane.get(16 + x + 3, 16 + y - 2));
            }
        }
    }

    #[test]
    fn half_pel_interpolates_linear_ramp() {
        let plane = gradient(48, 48);
        let mut out = [0u8; 64];
        predict_block(&plane, 16, 16, 8, 4, 0, &mut out);
        for y in 0..8 {
            for x in 0..8 {
                let a = i32::from(plane.get(16 + x, 16 + y));
                let b = i32::from(plane.get(17 + x, 16 + y));
                assert_eq!(i32::from(out[y * 8 + x]), (a + b + 1) / 2);
            }
        }
    }

    #[test]
    fn far_outside_reads_edge() {
        let plane = Plane::new(32, 32, 90);
        let mut out = [0u8; 256];
        predict_block(&plane, 0, 0, 16, -8 * 200, 8 * 500 + 3, &mut out);
        assert!(out.iter().all(|&p| p == 90));
    }
}
