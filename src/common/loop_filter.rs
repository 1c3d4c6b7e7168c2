//! The VP8 normal loop filter (RFC 6386, section 15).
//!
//! Pixels straddling an edge are named `p3 p2 p1 p0 | q0 q1 q2 q3`; `step`
//! is the distance between two of them in the sample buffer (1 across a
//! vertical edge, the stride across a horizontal one).

use crate::common::types::InterMode;
use crate::frame::{LoopFilter, LumaPrediction, Macroblock, MacroblockPrediction};
use crate::raster::Raster;

/// Highest filter level.
pub const MAX_FILTER_LEVEL: u8 = 63;

#[inline]
fn u2s(v: u8) -> i32 {
    i32::from(v) - 128
}

#[inline]
fn s2u(v: i32) -> u8 {
    (c(v) + 128) as u8
}

#[inline]
fn c(v: i32) -> i32 {
    v.clamp(-128, 127)
}

#[inline]
fn diff(a: u8, b: u8) -> i32 {
    (i32::from(a) - i32::from(b)).abs()
}

fn common_adjust(use_outer_taps: bool, buf: &mut [u8], pos: usize, step: usize) -> i32 {
    let p1 = u2s(buf[pos - 2 * step]);
    let p0 = u2s(buf[pos - step]);
    let q0 = u2s(buf[pos]);
    let q1 = u2s(buf[pos + step]);

    let outer = if use_outer_taps { c(p1 - q1) } else { 0 };
    let a = c(outer + 3 * (q0 - p0));
    // Rounds the other way when a/8 is exactly half way.
    let b = c(a + 3) >> 3;
    let a = c(a + 4) >> 3;

    buf[pos] = s2u(q0 - a);
    buf[pos - step] = s2u(p0 + b);
    a
}

fn should_filter(buf: &[u8], pos: usize, step: usize, edge_limit: i32, interior_limit: i32) -> bool {
    let px = |i: isize| buf[(pos as isize + i * step as isize) as usize];
    let (p3, p2, p1, p0) = (px(-4), px(-3), px(-2), px(-1));
    let (q0, q1, q2, q3) = (px(0), px(1), px(2), px(3));

    diff(p0, q0) * 2 + diff(p1, q1) / 2 <= edge_limit
        && diff(p3, p2) <= interior_limit
        && diff(p2, p1) <= interior_limit
        && diff(p1, p0) <= interior_limit
        && diff(q3, q2) <= interior_limit
        && diff(q2, q1) <= interior_limit
        && diff(q1, q0) <= interior_limit
}

fn high_edge_variance(buf: &[u8], pos: usize, step: usize, threshold: i32) -> bool {
    diff(buf[pos - 2 * step], buf[pos - step]) > threshold
        || diff(buf[pos + step], buf[pos]) > threshold
}

fn subblock_filter(buf: &mut [u8], pos: usize, step: usize, limits: &EdgeLimits) {
    if !should_filter(buf, pos, step, limits.sub_edge, limits.interior) {
        return;
    }
    let p1 = u2s(buf[pos - 2 * step]);
    let q1 = u2s(buf[pos + step]);
    let hev = high_edge_variance(buf, pos, step, limits.hev_threshold);
    let a = (common_adjust(hev, buf, pos, step) + 1) >> 1;
    if !hev {
        buf[pos + step] = s2u(q1 - a);
        buf[pos - 2 * step] = s2u(p1 + a);
    }
}

fn macroblock_filter(buf: &mut [u8], pos: usize, step: usize, limits: &EdgeLimits) {
    if !should_filter(buf, pos, step, limits.mb_edge, limits.interior) {
        return;
    }
    if high_edge_variance(buf, pos, step, limits.hev_threshold) {
        common_adjust(true, buf, pos, step);
        return;
    }

    let p2 = u2s(buf[pos - 3 * step]);
    let p1 = u2s(buf[pos - 2 * step]);
    let p0 = u2s(buf[pos - step]);
    let q0 = u2s(buf[pos]);
    let q1 = u2s(buf[pos + step]);
    let q2 = u2s(buf[pos + 2 * step]);

    let w = c(c(p1 - q1) + 3 * (q0 - p0));

    let a = c((27 * w + 63) >> 7);
    buf[pos] = s2u(q0 - a);
    buf[pos - step] = s2u(p0 + a);

    let a = c((18 * w + 63) >> 7);
    buf[pos + step] = s2u(q1 - a);
    buf[pos - 2 * step] = s2u(p1 + a);

    let a = c((9 * w + 63) >> 7);
    buf[pos + 2 * step] = s2u(q2 - a);
    buf[pos - 3 * step] = s2u(p2 + a);
}

/// Thresholds derived from one macroblock's filter level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeLimits {
    mb_edge: i32,
    sub_edge: i32,
    interior: i32,
    hev_threshold: i32,
}

impl EdgeLimits {
    pub(crate) fn new(level: u8, sharpness: u8, key_frame: bool) -> Self {
        let level = i32::from(level);
        let sharpness = i32::from(sharpness);

        let mut interior = level;
        if sharpness > 0 {
            interior >>= if sharpness > 4 { 2 } else { 1 };
            interior = interior.min(9 - sharpness);
        }
        let interior = interior.max(1);

        let hev_threshold = match (key_frame, level) {
            (true, 40..) => 2,
            (true, 15..) => 1,
            (false, 40..) => 3,
            (false, 20..) => 2,
            (false, 15..) => 1,
            _ => 0,
        };

        Self {
            mb_edge: (level + 2) * 2 + interior,
            sub_edge: level * 2 + interior,
            interior,
            hev_threshold,
        }
    }
}

/// Filter level of one macroblock after reference and mode deltas.
pub(crate) fn macroblock_level(filter: &LoopFilter, prediction: &MacroblockPrediction) -> u8 {
    let base = i32::from(filter.level);
    let Some(deltas) = filter.deltas else {
        return filter.level;
    };
    let level = match prediction {
        MacroblockPrediction::Intra {
            luma: LumaPrediction::Subblocks(_),
            ..
        } => base + i32::from(deltas.reference[0]) + i32::from(deltas.mode[0]),
        MacroblockPrediction::Intra { .. } => base + i32::from(deltas.reference[0]),
        MacroblockPrediction::Inter {
            reference, mode, ..
        } => {
            let mode_index = if *mode == InterMode::Zero { 1 } else { 2 };
            base + i32::from(deltas.reference[reference.delta_index()])
                + i32::from(deltas.mode[mode_index])
        }
    };
    level.clamp(0, i32::from(MAX_FILTER_LEVEL)) as u8
}

/// Filters a reconstructed frame in place.
pub(crate) fn filter_frame(
    raster: &mut Raster,
    macroblocks: &[Macroblock],
    mb_cols: usize,
    filter: &LoopFilter,
    key_frame: bool,
) {
    if filter.level == 0 && filter.deltas.is_none() {
        return;
    }

    for (index, mb) in macroblocks.iter().enumerate() {
        let (mbx, mby) = (index % mb_cols, index / mb_cols);
        let level = macroblock_level(filter, &mb.prediction);
        if level == 0 {
            continue;
        }
        let limits = EdgeLimits::new(level, filter.sharpness, key_frame);
        let inner = !mb.prediction.has_y2() || mb.has_nonzero();

        let (buf, stride) = raster.y.samples_mut();
        filter_macroblock_plane(buf, stride, mbx * 16, mby * 16, 16, inner, &limits);
        let (buf, stride) = raster.u.samples_mut();
        filter_macroblock_plane(buf, stride, mbx * 8, mby * 8, 8, inner, &limits);
        let (buf, stride) = raster.v.samples_mut();
        filter_macroblock_plane(buf, stride, mbx * 8, mby * 8, 8, inner, &limits);
    }
}


fn filter_macroblock_plane(
    buf: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    size: usize,
    inner: bool,
    limits: &EdgeLimits,
) {
    // Inner edges sit every 4 pixels inside the block.
    let inner_edges = (4..size).step_by(4);

    if x0 > 0 {
        for y in 0..size {
            macroblock_filter(buf, (y0 + y) * stride + x0, 1, limits);
        }
    }
    if inner {
        for x in inner_edges.clone() {
            for y in 0..size {
                subblock_filter(buf, (y0 + y) * stride + x0 + x, 1, limits);
            }
        }
    }
    if y0 > 0 {
        for x in 0..size {
            macroblock_filter(buf, y0 * stride + x0 + x, stride, limits);
        }
    }
    if inner {
        for y in inner_edges {
            for x in 0..size {
                subblock_filter(buf, (y0 + y) * stride + x0 + x, stride, limits);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FilterDeltas, MotionVector, ReferenceFrame};

    #[test]
    fn limits_follow_sharpness() {
        let l = EdgeLimits::new(32, 0, true);
        assert_eq!(l.interior, 32);
        assert_eq!(l.mb_edge, 34 * 2 + 32);
        assert_eq!(l.sub_edge, 64 + 32);
        assert_eq!(l.hev_threshold, 1);

        let l = EdgeLimits::new(32, 5, false);
        assert_eq!(l.interior, 4);
        assert_eq!(l.hev_threshold, 2);

        assert_eq!(EdgeLimits::new(0, 0, true).interior, 1);
    }

    #[test]
    fn step_edge_is_smoothed() {
        // One row across a vertical macroblock edge at position 8.
        let mut row = [60u8, 60, 60, 60, 60, 60, 60, 60, 70, 70, 70, 70, 70, 70, 70, 70];
        let limits = EdgeLimits::new(20, 0, true);
        macroblock_filter(&mut row, 8, 1, &limits);
        assert!(row[7] > 60 && row[8] < 70);
        assert!(row[7] <= row[8]);
        assert_eq!(row[4], 60);
    }

    #[test]
    fn strong_edges_are_preserved() {
        let mut row = [10u8, 10, 10, 10, 200, 200, 200, 200];
        let limits = EdgeLimits::new(10, 0, true);
        let before = row;
        subblock_filter(&mut row, 4, 1, &limits);
        assert_eq!(row, before);
    }

    #[test]
    fn deltas_adjust_level() {
        let filter = LoopFilter {
            level: 30,
            sharpness: 0,
            deltas: Some(FilterDeltas {
                reference: [2, 0, -2, -2],
                mode: [4, -2, 2, 4],
            }),
        };
        let zero = MacroblockPrediction::Inter {
            reference: ReferenceFrame::Last,
            mode: InterMode::Zero,
            mv: MotionVector::ZERO,
        };
        assert_eq!(macroblock_level(&filter, &zero), 28);
        assert_eq!(macroblock_level(&filter, &MacroblockPrediction::DC), 32);
        let golden = MacroblockPrediction::Inter {
            reference: ReferenceFrame::Golden,
            mode: InterMode::New,
            mv: MotionVector::new(4, 4),
        };
        assert_eq!(macroblock_level(&filter, &golden), 30);
    }
}
