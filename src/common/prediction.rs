//! Intra prediction shared by the encoder and the decoder.
//!
//! Predictions are built in a small bordered workspace: row 0 holds the
//! pixels above the macroblock (plus four above-right pixels for luma), column
//! 0 holds the pixels to the left, and the block itself starts at `(1, 1)`.
//! Frame edges use the fixed values of RFC 6386: 127 above, 129 to the left.

use super::types::{BlockMode, IntraMode};
use crate::raster::Plane;

/// Luma workspace stride: 1 border pixel + 16 pixels + 4 above-right + padding.
pub(crate) const LUMA_STRIDE: usize = 32;
/// Luma workspace size: 17 rows (1 border + 16).
pub(crate) const LUMA_BLOCK_SIZE: usize = LUMA_STRIDE * (1 + 16);

/// Chroma workspace stride.
pub(crate) const CHROMA_STRIDE: usize = 32;
/// Chroma workspace size: 9 rows (1 border + 8).
pub(crate) const CHROMA_BLOCK_SIZE: usize = CHROMA_STRIDE * (1 + 8);

const ABOVE_EDGE: u8 = 127;
const LEFT_EDGE: u8 = 129;

/// Builds the luma workspace of macroblock `(mbx, mby)` from already
/// reconstructed pixels of `plane`.
pub(crate) fn luma_workspace(plane: &Plane, mbx: usize, mby: usize) -> [u8; LUMA_BLOCK_SIZE] {
    let stride = LUMA_STRIDE;
    let mut ws = [0u8; LUMA_BLOCK_SIZE];
    let (x0, y0) = (mbx * 16, mby * 16);
    let mb_cols = plane.width() / 16;

    if mby == 0 {
        ws[1..stride].fill(ABOVE_EDGE);
    } else {
        let above = plane.row(y0 - 1);
        ws[1..17].copy_from_slice(&above[x0..x0 + 16]);
        if mbx + 1 == mb_cols {
            ws[17..21].fill(above[x0 + 15]);
        } else {
            ws[17..21].copy_from_slice(&above[x0 + 16..x0 + 20]);
        }
    }

    // Subblocks on the right column below the first row reuse the
    // macroblock's above-right pixels.
    for row in [4, 8, 12] {
        ws.copy_within(17..21, row * stride + 17);
    }

    for y in 0..16 {
        ws[(y + 1) * stride] = if mbx == 0 {
            LEFT_EDGE
        } else {
            plane.get(x0 - 1, y0 + y)
        };
    }

    ws[0] = corner(plane, mbx, mby, x0, y0);
    ws
}

/// Builds the workspace of one 8x8 chroma block.
pub(crate) fn chroma_workspace(plane: &Plane, mbx: usize, mby: usize) -> [u8; CHROMA_BLOCK_SIZE] {
    let stride = CHROMA_STRIDE;
    let mut ws = [0u8; CHROMA_BLOCK_SIZE];
    let (x0, y0) = (mbx * 8, mby * 8);

    if mby == 0 {
        ws[1..stride].fill(ABOVE_EDGE);
    } else {
        ws[1..9].copy_from_slice(&plane.row(y0 - 1)[x0..x0 + 8]);
    }

    for y in 0..8 {
        ws[(y + 1) * stride] = if mbx == 0 {
            LEFT_EDGE
        } else {
            plane.get(x0 - 1, y0 + y)
        };
    }

    ws[0] = corner(plane, mbx, mby, x0, y0);
    ws
}

fn corner(plane: &Plane, mbx: usize, mby: usize, x0: usize, y0: usize) -> u8 {
    if mby == 0 {
        ABOVE_EDGE
    } else if mbx == 0 {
        LEFT_EDGE
    } else {
        plane.get(x0 - 1, y0 - 1)
    }
}

/// Copies the `size`x`size` interior of a workspace into a packed buffer.
pub(crate) fn workspace_block(ws: &[u8], size: usize, stride: usize, out: &mut [u8]) {
    for (y, row) in out.chunks_exact_mut(size).enumerate() {
        row.copy_from_slice(&ws[(y + 1) * stride + 1..][..size]);
    }
}

/// Fills the interior of a bordered workspace with a whole-block prediction.
///
/// `have_above`/`have_left` only matter for DC, which averages the edges that
/// lie inside the frame and falls back to 128 when neither does.
pub(crate) fn predict_whole(
    ws: &mut [u8],
    size: usize,
    stride: usize,
    mode: BlockMode,
    have_above: bool,
    have_left: bool,
) {
    match mode {
        BlockMode::DC => predict_dcpred(ws, size, stride, have_above, have_left),
        BlockMode::V => predict_vpred(ws, size, stride),
        BlockMode::H => predict_hpred(ws, size, stride),
        BlockMode::TM => predict_tmpred(ws, size, stride),
    }
}

fn predict_vpred(ws: &mut [u8], size: usize, stride: usize) {
    let (above, rows) = ws.split_at_mut(stride);
    for row in rows.chunks_exact_mut(stride).take(size) {
        row[1..=size].copy_from_slice(&above[1..=size]);
    }
}

fn predict_hpred(ws: &mut [u8], size: usize, stride: usize) {
    for row in ws.chunks_exact_mut(stride).skip(1).take(size) {
        let left = row[0];
        row[1..=size].fill(left);
    }
}

fn predict_dcpred(ws: &mut [u8], size: usize, stride: usize, have_above: bool, have_left: bool) {
    let mut sum = 0u32;
    let mut shift = if size == 8 { 2u32 } else { 3u32 };

    if have_above {
        sum += ws[1..=size].iter().map(|&p| u32::from(p)).sum::<u32>();
        shift += 1;
    }
    if have_left {
        sum += (0..size).map(|y| u32::from(ws[(y + 1) * stride])).sum::<u32>();
        shift += 1;
    }

    let dc = if have_above || have_left {
        ((sum + (1 << (shift - 1))) >> shift) as u8
    } else {
        128
    };

    for row in ws.chunks_exact_mut(stride).skip(1).take(size) {
        row[1..=size].fill(dc);
    }
}

// X_ij = L_i + A_j - P (RFC 6386, p. 52)
fn predict_tmpred(ws: &mut [u8], size: usize, stride: usize) {
    let p = i32::from(ws[0]);
    let (above, rows) = ws.split_at_mut(stride);
    for row in rows.chunks_exact_mut(stride).take(size) {
        let left = i32::from(row[0]) - p;
        for (out, &a) in row[1..=size].iter_mut().zip(&above[1..=size]) {
            *out = (left + i32::from(a)).clamp(0, 255) as u8;
        }
    }
}

/// Neighbouring pixels of one 4x4 subblock.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SubblockEdges {
    /// Eight pixels above, the last four being above-right.
    above: [u8; 8],
    left: [u8; 4],
    corner: u8,
}

impl SubblockEdges {
    /// Reads the edges of the subblock whose top-left pixel is at `(x0, y0)`
    /// of the workspace.
    pub(crate) fn gather(ws: &[u8], x0: usize, y0: usize, stride: usize) -> Self {
        let top = (y0 - 1) * stride + x0;
        let mut above = [0u8; 8];
        above.copy_from_slice(&ws[top..top + 8]);
        let mut left = [0u8; 4];
        for (i, l) in left.iter_mut().enumerate() {
            *l = ws[(y0 + i) * stride + x0 - 1];
        }
        Self {
            above,
            left,
            corner: ws[top - 1],
        }
    }

    /// Edge pixels from the bottom-left corner around to the top-right:
    /// L3 L2 L1 L0 P A0 A1 A2 A3.
    fn edge(&self) -> [u8; 9] {
        let [l0, l1, l2, l3] = self.left;
        let a = &self.above;
        [l3, l2, l1, l0, self.corner, a[0], a[1], a[2], a[3]]
    }
}

fn avg2(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b) + 1) >> 1) as u8
}

fn avg3(a: u8, b: u8, c: u8) -> u8 {
    ((u16::from(a) + 2 * u16::from(b) + u16::from(c) + 2) >> 2) as u8
}

/// Predicts a 4x4 subblock, row-major.
pub(crate) fn predict_subblock(mode: IntraMode, e: &SubblockEdges) -> [u8; 16] {
    let mut out = [0u8; 16];
    let a = &e.above;
    let l = &e.left;
    let p = e.corner;
    let mut put = |x: usize, y: usize, v: u8| out[y * 4 + x] = v;

    match mode {
        IntraMode::DC => {
            let sum: u32 = a[..4].iter().chain(l).map(|&v| u32::from(v)).sum();
            let dc = ((sum + 4) >> 3) as u8;
            return [dc; 16];
        }
        IntraMode::TM => {
            for y in 0..4 {
                for x in 0..4 {
                    let v = i32::from(l[y]) + i32::from(a[x]) - i32::from(p);
                    put(x, y, v.clamp(0, 255) as u8);
                }
            }
        }
        IntraMode::VE => {
            let row = [
                avg3(p, a[0], a[1]),
                avg3(a[0], a[1], a[2]),
                avg3(a[1], a[2], a[3]),
                avg3(a[2], a[3], a[4]),
            ];
            for y in 0..4 {
                for (x, &v) in row.iter().enumerate() {
                    put(x, y, v);
                }
            }
        }
        IntraMode::HE => {
            let col = [
                avg3(p, l[0], l[1]),
                avg3(l[0], l[1], l[2]),
                avg3(l[1], l[2], l[3]),
                avg3(l[2], l[3], l[3]),
            ];
            for (y, &v) in col.iter().enumerate() {
                for x in 0..4 {
                    put(x, y, v);
                }
            }
        }
        IntraMode::LD => {
            for y in 0..4 {
                for x in 0..4 {
                    let i = x + y;
                    let v = if i < 6 {
                        avg3(a[i], a[i + 1], a[i + 2])
                    } else {
                        avg3(a[6], a[7], a[7])
                    };
                    put(x, y, v);
                }
            }
        }
        IntraMode::RD => {
            let edge = e.edge();
            for y in 0..4 {
                for x in 0..4 {
                    let i = 3 - y + x;
                    put(x, y, avg3(edge[i], edge[i + 1], edge[i + 2]));
                }
            }
        }
        IntraMode::VR => {
            let [_, e1, e2, e3, e4, e5, e6, e7, e8] = e.edge();
            put(0, 3, avg3(e1, e2, e3));
            put(0, 2, avg3(e2, e3, e4));
            put(1, 3, avg3(e3, e4, e5));
            put(0, 1, avg3(e3, e4, e5));
            put(1, 2, avg2(e4, e5));
            put(0, 0, avg2(e4, e5));
            put(2, 3, avg3(e4, e5, e6));
            put(1, 1, avg3(e4, e5, e6));
            put(2, 2, avg2(e5, e6));
            put(1, 0, avg2(e5, e6));
            put(3, 3, avg3(e5, e6, e7));
            put(2, 1, avg3(e5, e6, e7));
            put(3, 2, avg2(e6, e7));
            put(2, 0, avg2(e6, e7));
            put(3, 1, avg3(e6, e7, e8));
            put(3, 0, avg2(e7, e8));
        }
        IntraMode::VL => {
            put(0, 0, avg2(a[0], a[1]));
            put(0, 1, avg3(a[0], a[1], a[2]));
            put(0, 2, avg2(a[1], a[2]));
            put(1, 0, avg2(a[1], a[2]));
            put(1, 1, avg3(a[1], a[2], a[3]));
            put(0, 3, avg3(a[1], a[2], a[3]));
            put(1, 2, avg2(a[2], a[3]));
            put(2, 0, avg2(a[2], a[3]));
            put(1, 3, avg3(a[2], a[3], a[4]));
            put(2, 1, avg3(a[2], a[3], a[4]));
            put(2, 2, avg2(a[3], a[4]));
            put(3, 0, avg2(a[3], a[4]));
            put(2, 3, avg3(a[3], a[4], a[5]));
            put(3, 1, avg3(a[3], a[4], a[5]));
            // The last two deviate from the pattern (RFC 6386, 12.3).
            put(3, 2, avg3(a[4], a[5], a[6]));
            put(3, 3, avg3(a[5], a[6], a[7]));
        }
        IntraMode::HD => {
            let [e0, e1, e2, e3, e4, e5, e6, e7, _] = e.edge();
            put(0, 3, avg2(e0, e1));
            put(1, 3, avg3(e0, e1, e2));
            put(0, 2, avg2(e1, e2));
            put(2, 3, avg2(e1, e2));
            put(1, 2, avg3(e1, e2, e3));
            put(3, 3, avg3(e1, e2, e3));
            put(2, 2, avg2(e2, e3));
            put(0, 1, avg2(e2, e3));
            put(3, 2, avg3(e2, e3, e4));
            put(1, 1, avg3(e2, e3, e4));
            put(2, 1, avg2(e3, e4));
            put(0, 0, avg2(e3, e4));
            put(3, 1, avg3(e3, e4, e5));
            put(1, 0, avg3(e3, e4, e5));
            put(2, 0, avg3(e4, e5, e6));
            put(3, 0, avg3(e5, e6, e7));
        }
        IntraMode::HU => {
            let [l0, l1, l2, l3] = *l;
            put(0, 0, avg2(l0, l1));
            put(1, 0, avg3(l0, l1, l2));
            put(2, 0, avg2(l1, l2));
            put(0, 1, avg2(l1, l2));
            put(3, 0, avg3(l1, l2, l3));
            put(1, 1, avg3(l1, l2, l3));
            put(2, 1, avg2(l2, l3));
            put(0, 2, avg2(l2, l3));
            put(3, 1, avg3(l2, l3, l3));
            put(1, 2, avg3(l2, l3, l3));
            for (x, y) in [(2, 2), (3, 2), (0, 3), (1, 3), (2, 3), (3, 3)] {
                put(x, y, l3);
            }
        }
    }
    out
}

/// Writes a packed 4x4 block into the workspace at `(x0, y0)`.
pub(crate) fn store_subblock(ws: &mut [u8], x0: usize, y0: usize, stride: usize, block: &[u8; 16]) {
    for (y, row) in block.chunks_exact(4).enumerate() {
        ws[(y0 + y) * stride + x0..][..4].copy_from_slice(row);
    }
}

/// Adds a residual to a packed 4x4 prediction with saturation.
pub(crate) fn add_residue(pred: &[u8; 16], residual: &[i32; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for ((o, &p), &r) in out.iter_mut().zip(pred).zip(residual) {
        *o = (i32::from(p) + r).clamp(0, 255) as u8;
    }
    out
}
