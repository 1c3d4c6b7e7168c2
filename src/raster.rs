//! YUV 4:2:0 pixel storage.
//!
//! Planes are allocated to whole macroblocks; the padding right of and below
//! the display area replicates the last visible column and row, so every
//! macroblock can be predicted and compared without bounds special cases.

use imgref::{ImgRef, ImgVec};

use crate::encoder::EncodeError;

/// One plane of 8-bit samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plane {
    pixels: ImgVec<u8>,
}

impl Plane {
    /// Creates a plane filled with a single value.
    pub fn new(width: usize, height: usize, value: u8) -> Self {
        Self {
            pixels: ImgVec::new(vec![value; width * height], width, height),
        }
    }

    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    /// Borrow the plane as an image.
    pub fn as_img(&self) -> ImgRef<'_, u8> {
        self.pixels.as_ref()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels.buf()[y * self.pixels.stride() + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        let stride = self.pixels.stride();
        self.pixels.buf_mut()[y * stride + x] = value;
    }

    /// Sample with infinite edge extension.
    #[inline]
    pub fn at_clamped(&self, x: isize, y: isize) -> u8 {
        let x = x.clamp(0, self.width() as isize - 1) as usize;
        let y = y.clamp(0, self.height() as isize - 1) as usize;
        self.get(x, y)
    }

    /// One row of samples.
    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.pixels.stride();
        &self.pixels.buf()[y * stride..][..self.width()]
    }

    /// A square block starting at `(x, y)`.
    pub fn block(&self, x: usize, y: usize, size: usize) -> ImgRef<'_, u8> {
        self.pixels.sub_image(x, y, size, size)
    }

    /// Copies a square block into a tightly packed buffer.
    pub fn copy_block(&self, x: usize, y: usize, size: usize, out: &mut [u8]) {
        for (dst, src) in out.chunks_exact_mut(size).zip(self.block(x, y, size).rows()) {
            dst.copy_from_slice(src);
        }
    }

    /// Writes a tightly packed square block at `(x, y)`.
    pub fn store_block(&mut self, x: usize, y: usize, size: usize, src: &[u8]) {
        let stride = self.pixels.stride();
        let buf = self.pixels.buf_mut();
        for (row, line) in src.chunks_exact(size).enumerate() {
            buf[(y + row) * stride + x..][..size].copy_from_slice(line);
        }
    }

    /// Mutable samples and the row stride.
    pub(crate) fn samples_mut(&mut self) -> (&mut [u8], usize) {
        let stride = self.pixels.stride();
        (self.pixels.buf_mut(), stride)
    }

    fn copy_region_from(&mut self, other: &Plane, x: usize, y: usize, size: usize) {
        for row in y..y + size {
            let stride = self.pixels.stride();
            self.pixels.buf_mut()[row * stride + x..][..size]
                .copy_from_slice(&other.row(row)[x..x + size]);
        }
    }

    /// Fills `self` from `src` and replicates its last column and row into
    /// the padding.
    fn fill_from(&mut self, src: ImgRef<'_, u8>) {
        let (w, h) = (src.width(), src.height());
        let (width, height, stride) = (self.width(), self.height(), self.pixels.stride());
        let buf = self.pixels.buf_mut();
        for (y, line) in src.rows().enumerate() {
            let dst = &mut buf[y * stride..][..width];
            dst[..w].copy_from_slice(line);
            dst[w..].fill(line[w - 1]);
        }
        for y in h..height {
            buf.copy_within((h - 1) * stride..(h - 1) * stride + width, y * stride);
        }
    }
}

/// A frame of YUV 4:2:0 samples with macroblock-aligned planes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    width: usize,
    height: usize,
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
}

impl Raster {
    /// Black frame of the given display size.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0, 128, 128)
    }

    /// A frame where every plane holds a single value.
    pub fn filled(width: usize, height: usize, y: u8, u: u8, v: u8) -> Self {
        let (mb_cols, mb_rows) = macroblock_dimensions(width, height);
        Self {
            width,
            height,
            y: Plane::new(mb_cols * 16, mb_rows * 16, y),
            u: Plane::new(mb_cols * 8, mb_rows * 8, u),
            v: Plane::new(mb_cols * 8, mb_rows * 8, v),
        }
    }

    /// Builds a raster from display-sized planes.
    ///
    /// Chroma planes must be `((width + 1) / 2, (height + 1) / 2)`.
    pub fn from_planes(
        width: usize,
        height: usize,
        y: ImgRef<'_, u8>,
        u: ImgRef<'_, u8>,
        v: ImgRef<'_, u8>,
    ) -> Result<Self, EncodeError> {
        let chroma = ((width + 1) / 2, (height + 1) / 2);
        for (plane, expected) in [(y, (width, height)), (u, chroma), (v, chroma)] {
            let actual = (plane.width(), plane.height());
            if actual != expected || expected.0 == 0 || expected.1 == 0 {
                return Err(EncodeError::InvalidDimensions { expected, actual });
            }
        }

        let mut raster = Self::new(width, height);
        raster.y.fill_from(y);
        raster.u.fill_from(u);
        raster.v.fill_from(v);
        Ok(raster)
    }

    /// Display width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Display height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Macroblock columns and rows covering the frame.
    pub fn macroblock_dimensions(&self) -> (usize, usize) {
        macroblock_dimensions(self.width, self.height)
    }

    pub fn macroblock_count(&self) -> usize {
        let (cols, rows) = self.macroblock_dimensions();
        cols * rows
    }

    /// Copies one macroblock (luma and both chroma blocks) from `other`.
    pub fn copy_macroblock_from(&mut self, other: &Raster, mbx: usize, mby: usize) {
        self.y.copy_region_from(&other.y, mbx * 16, mby * 16, 16);
        self.u.copy_region_from(&other.u, mbx * 8, mby * 8, 8);
        self.v.copy_region_from(&other.v, mbx * 8, mby * 8, 8);
    }

    pub(crate) fn same_geometry(&self, other: &Raster) -> bool {
        self.width == other.width && self.height == other.height
    }
}

pub(crate) fn macroblock_dimensions(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(16), height.div_ceil(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planes_are_macroblock_aligned() {
        let raster = Raster::new(33, 17);
        assert_eq!(raster.macroblock_dimensions(), (3, 2));
        assert_eq!((raster.y.width(), raster.y.height()), (48, 32));
        assert_eq!((raster.u.width(), raster.u.height()), (24, 16));
    }

    #[test]
    fn from_planes_replicates_edges() {
        let y: Vec<u8> = (0..5 * 3).map(|i| i as u8).collect();
        let uv = vec![7u8; 3 * 2];
        let raster = Raster::from_planes(
            5,
            3,
            ImgRef::new(&y, 5, 3),
            ImgRef::new(&uv, 3, 2),
            ImgRef::new(&uv, 3, 2),
        )
        .unwrap();
        assert_eq!(raster.y.get(4, 0), 4);
        assert_eq!(raster.y.get(15, 0), 4);
        assert_eq!(raster.y.get(0, 15), 10);
        assert_eq!(raster.y.get(15, 15), 14);
        assert_eq!(raster.u.get(7, 7), 7);
    }

    #[test]
    fn from_planes_rejects_wrong_chroma() {
        let y = vec![0u8; 16 * 16];
        let uv = vec![0u8; 4 * 4];
        let err = Raster::from_planes(
            16,
            16,
            ImgRef::new(&y, 16, 16),
            ImgRef::new(&uv, 4, 4),
            ImgRef::new(&uv, 4, 4),
        )
        .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidDimensions { .. }));
    }

    #[test]
    fn clamped_access_extends_edges() {
        let mut plane = Plane::new(16, 16, 0);
        plane.set(0, 0, 9);
        plane.set(15, 15, 200);
        assert_eq!(plane.at_clamped(-40, -3), 9);
        assert_eq!(plane.at_clamped(100, 70), 200);
    }

    #[test]
    fn block_round_trip() {
        let mut plane = Plane::new(32, 32, 1);
        let src: Vec<u8> = (0..64).collect();
        plane.store_block(8, 16, 8, &src);
        let mut out = [0u8; 64];
        plane.copy_block(8, 16, 8, &mut out);
        assert_eq!(&out[..], &src[..]);
    }
}
