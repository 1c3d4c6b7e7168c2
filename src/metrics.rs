//! Structural similarity between two rasters.
//!
//! SSIM is evaluated per plane with a separable Gaussian window (σ = 1.5,
//! 8-bit fixed-point weights) over the display area only, then combined with
//! chroma weighted at one quarter of luma.

use core::f64::consts::{E, PI};

use crate::raster::{Plane, Raster};

const KERNEL_SHIFT: usize = 8;
const KERNEL_WEIGHT: usize = 1 << KERNEL_SHIFT;
const SIGMA: f64 = 1.5;
const SAMPLE_MAX: f64 = 255.0;
/// Weight of each chroma plane relative to luma for 4:2:0.
const CHROMA_WEIGHT: f64 = 0.25;

const SSIM_K1: f64 = 0.01 * 0.01;
const SSIM_K2: f64 = 0.03 * 0.03;

/// Per-plane and combined similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub y: f64,
    pub u: f64,
    pub v: f64,
    /// `(y + 0.25 * (u + v)) / 1.5`
    pub combined: f64,
}

/// Compares two rasters of equal display size.
pub fn similarity(a: &Raster, b: &Raster) -> Similarity {
    debug_assert!(a.same_geometry(b));
    let (w, h) = (a.width(), a.height());
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    let y = plane_ssim(&a.y, &b.y, w, h);
    let u = plane_ssim(&a.u, &b.u, cw, ch);
    let v = plane_ssim(&a.v, &b.v, cw, ch);
    Similarity {
        y,
        u,
        v,
        combined: (y + CHROMA_WEIGHT * (u + v)) / (1.0 + 2.0 * CHROMA_WEIGHT),
    }
}

/// Combined SSIM of two rasters.
pub fn ssim(a: &Raster, b: &Raster) -> f64 {
    similarity(a, b).combined
}

#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    mux: i64,
    muy: i64,
    x2: i64,
    xy: i64,
    y2: i64,
    w: i64,
}

impl Moments {
    fn accumulate(&mut self, weight: i64, other: &Moments) {
        self.mux += weight * other.mux;
        self.muy += weight * other.muy;
        self.x2 += weight * other.x2;
        self.xy += weight * other.xy;
        self.y2 += weight * other.y2;
        self.w += weight * other.w;
    }
}

fn plane_ssim(a: &Plane, b: &Plane, width: usize, height: usize) -> f64 {
    let kernel = gaussian_kernel(SIGMA, width.min(height), KERNEL_WEIGHT);
    let offset = kernel.len() >> 1;
    let line_size = kernel.len().next_power_of_two();
    let line_mask = line_size - 1;
    let mut lines = vec![vec![Moments::default(); width]; line_size];

    let mut ssim = 0.0;
    let mut total_weight = 0.0;

    for y in 0..height + offset {
        if y < height {
            let row_a = a.row(y);
            let row_b = b.row(y);
            let buf = &mut lines[y & line_mask];
            for (x, out) in buf.iter_mut().enumerate() {
                let mut m = Moments::default();
                let k_min = offset.saturating_sub(x);
                let k_max = kernel.len() - (x + offset + 1).saturating_sub(width);
                for (k, &weight) in kernel.iter().enumerate().take(k_max).skip(k_min) {
                    let tx = (x + k) - offset;
                    let pa = i64::from(row_a[tx]);
                    let pb = i64::from(row_b[tx]);
                    m.mux += weight * pa;
                    m.muy += weight * pb;
                    m.x2 += weight * pa * pa;
                    m.xy += weight * pa * pb;
                    m.y2 += weight * pb * pb;
                    m.w += weight;
                }
                *out = m;
            }
        }

        if y >= offset {
            let k_min = kernel.len().saturating_sub(y + 1);
            let k_max = kernel.len() - (y + 1).saturating_sub(height);
            for x in 0..width {
                let mut m = Moments::default();
                for k in k_min..k_max {
                    let line = &lines[(y + 1 + k - kernel.len()) & line_mask];
                    m.accumulate(kernel[k], &line[x]);
                }
                let w = m.w as f64;
                let c1 = SAMPLE_MAX * SAMPLE_MAX * SSIM_K1 * w * w;
                let c2 = SAMPLE_MAX * SAMPLE_MAX * SSIM_K2 * w * w;
                let mx2 = (m.mux as f64).powi(2);
                let mxy = m.mux as f64 * m.muy as f64;
                let my2 = (m.muy as f64).powi(2);
                let cs = w * (c2 + 2.0 * (m.xy as f64 * w - mxy))
                    / (m.x2 as f64 * w - mx2 + m.y2 as f64 * w - my2 + c2);
                ssim += cs * (2.0 * mxy + c1) / (mx2 + my2 + c1);
                total_weight += w;
            }
        }
    }

    if total_weight == 0.0 {
        1.0
    } else {
        ssim / total_weight
    }
}

fn gaussian_kernel(sigma: f64, max_len: usize, kernel_weight: usize) -> Vec<i64> {
    let scale = 1.0 / ((2.0 * PI).sqrt() * sigma);
    let nhisigma2 = -0.5 / sigma.powi(2);
    let s = (0.5 * PI).sqrt() * sigma / kernel_weight as f64;
    let len = if s >= 1.0 {
        0
    } else {
        (sigma * (-2.0 * s.ln()).sqrt()).floor() as usize
    };
    let half = len.min(max_len.saturating_sub(1));
    let mut kernel = vec![0i64; (half << 1) | 1];
    let mut sum = 0;
    for ci in 1..=half {
        let val = (kernel_weight as f64 * scale * E.powf(nhisigma2 * (ci * ci) as f64) + 0.5) as i64;
        kernel[half - ci] = val;
        kernel[half + ci] = val;
        sum += val;
    }
    kernel[half] = kernel_weight as i64 - (sum << 1);
    kernel
}
