//! Pixel buffers with a parent-coordinate origin, plus masked images.
//!
//! All accessors take parent coordinates: pixel `(x, y)` of an image whose
//! origin is `(x0, y0)` lives at buffer offset `(y - y0) * width + (x - x0)`.

pub mod statistics;


use std::ops::{Index, IndexMut};

use crate::error::{Error, Result};
use crate::geom::BoxI;

pub type ImageF = Image<f32>;
pub type ImageD = Image<f64>;
pub type Mask = Image<u32>;

/// Row-major 2D image with an origin in parent coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
    x0: i32,
    y0: i32,
}

impl<T> Image<T> {
    pub fn from_vec(bbox: BoxI, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            bbox.area(),
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width: bbox.width(),
            height: bbox.height(),
            x0: bbox.x_min,
            y0: bbox.y_min,
        }
    }

    #[inline]
    pub fn bbox(&self) -> BoxI {
        BoxI::from_origin(self.x0, self.y0, self.width, self.height)
    }

    #[inline]
    pub fn x0(&self) -> i32 {
        self.x0
    }

    #[inline]
    pub fn y0(&self) -> i32 {
        self.y0
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Move the image origin without touching the pixels.
    #[inline]
    pub fn set_xy0(&mut self, x0: i32, y0: i32) {
        self.x0 = x0;
        self.y0 = y0;
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let lx = x - self.x0;
        let ly = y - self.y0;
        lx >= 0 && ly >= 0 && (lx as usize) < self.width && (ly as usize) < self.height
    }

    #[inline]
    fn offset(&self, x: i32, y: i32) -> usize {
        assert!(
            self.contains(x, y),
            "pixel ({x}, {y}) outside image {:?}",
            self.bbox()
        );
        (y - self.y0) as usize * self.width + (x - self.x0) as usize
    }

    #[inline]
    pub fn get_mut(&mut self, x: i32, y: i32) -> &mut T {
        let idx = self.offset(x, y);
        &mut self.pixels[idx]
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32, value: T) {
        let idx = self.offset(x, y);
        self.pixels[idx] = value;
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    /// Pixels of parent row `y`.
    #[inline]
    pub fn row(&self, y: i32) -> &[T] {
        let start = (y - self.y0) as usize * self.width;
        &self.pixels[start..start + self.width]
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.pixels
    }
}

impl<T: Copy> Image<T> {
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> T {
        self.pixels[self.offset(x, y)]
    }

    /// Pixel value, or `None` outside the image.
    #[inline]
    pub fn try_get(&self, x: i32, y: i32) -> Option<T> {
        if self.contains(x, y) {
            Some(self.pixels[self.offset(x, y)])
        } else {
            None
        }
    }

    pub fn map<U, F: Fn(T) -> U>(&self, f: F) -> Image<U> {
        Image {
            pixels: self.pixels.iter().map(|&v| f(v)).collect(),
            width: self.width,
            height: self.height,
            x0: self.x0,
            y0: self.y0,
        }
    }
}

impl<T: Copy + Default> Image<T> {
    /// Zero-filled image covering `bbox`.
    pub fn new(bbox: BoxI) -> Self {
        Self::new_filled(bbox, T::default())
    }

    pub fn new_filled(bbox: BoxI, value: T) -> Self {
        Self {
            pixels: vec![value; bbox.area()],
            width: bbox.width(),
            height: bbox.height(),
            x0: bbox.x_min,
            y0: bbox.y_min,
        }
    }

    /// Copy of the region `bbox ∩ self.bbox()`.
    pub fn cropped(&self, bbox: &BoxI) -> Self {
        let region = self.bbox().clipped(bbox);
        let mut out = Self::new(region);
        if region.is_empty() {
            return out;
        }
        let lx0 = (region.x_min - self.x0) as usize;
        for y in region.y_min..=region.y_max {
            let src = &self.row(y)[lx0..lx0 + region.width()];
            let start = (y - region.y_min) as usize * out.width;
            out.pixels[start..start + region.width()].copy_from_slice(src);
        }
        out
    }

    #[inline]
    pub fn fill(&mut self, value: T) {
        self.pixels.fill(value);
    }
}

impl Image<f32> {
    pub fn scale(&mut self, factor: f32) {
        self.pixels.iter_mut().for_each(|v| *v *= factor);
    }

    pub fn sum(&self) -> f64 {
        self.pixels.iter().map(|&v| v as f64).sum()
    }

    pub fn max_value(&self) -> Option<f32> {
        self.pixels.iter().copied().reduce(f32::max)
    }
}

impl Image<f64> {
    pub fn scale(&mut self, factor: f64) {
        self.pixels.iter_mut().for_each(|v| *v *= factor);
    }

    pub fn sum(&self) -> f64 {
        self.pixels.iter().sum()
    }

    pub fn max_value(&self) -> Option<f64> {
        self.pixels.iter().copied().reduce(f64::max)
    }
}

impl<T> Index<(i32, i32)> for Image<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (i32, i32)) -> &Self::Output {
        &self.pixels[self.offset(x, y)]
    }
}

impl<T> IndexMut<(i32, i32)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (i32, i32)) -> &mut Self::Output {
        let idx = self.offset(x, y);
        &mut self.pixels[idx]
    }
}

// ============================================================================
// Mask planes
// ============================================================================

pub const DEFAULT_MASK_PLANES: [&str; 6] = ["BAD", "SAT", "INTRP", "CR", "EDGE", "DETECTED"];

/// Named bit planes of a `u32` mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskPlanes {
    names: Vec<String>,
}

impl Default for MaskPlanes {
    fn default() -> Self {
        Self {
            names: DEFAULT_MASK_PLANES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MaskPlanes {
    /// Bit value (not index) of a named plane.
    pub fn bit(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| 1u32 << idx)
    }

    /// Register a plane, returning its bit. Known names keep their bit.
    pub fn add_plane(&mut self, name: &str) -> Result<u32> {
        if let Some(bit) = self.bit(name) {
            return Ok(bit);
        }
        if self.names.len() >= u32::BITS as usize {
            return Err(Error::MaskPlanesExhausted(name.to_string()));
        }
        self.names.push(name.to_string());
        Ok(1u32 << (self.names.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

// ============================================================================
// Masked image
// ============================================================================

/// Image, mask and variance planes sharing one bounding box.
#[derive(Debug, Clone)]
pub struct MaskedImage {
    pub image: ImageF,
    pub mask: Mask,
    pub variance: ImageF,
    pub planes: MaskPlanes,
}

impl MaskedImage {
    pub fn new(bbox: BoxI) -> Self {
        Self {
            image: ImageF::new(bbox),
            mask: Mask::new(bbox),
            variance: ImageF::new(bbox),
            planes: MaskPlanes::default(),
        }
    }

    /// Build from image and variance planes with an empty mask.
    pub fn from_parts(image: ImageF, variance: ImageF) -> Result<Self> {
        if image.bbox() != variance.bbox() {
            return Err(Error::DimensionMismatch {
                what: "variance plane",
                expected: image.bbox(),
                actual: variance.bbox(),
            });
        }
        let mask = Mask::new(image.bbox());
        Ok(Self {
            image,
            mask,
            variance,
            planes: MaskPlanes::default(),
        })
    }

    #[inline]
    pub fn bbox(&self) -> BoxI {
        self.image.bbox()
    }

    /// Copy of all three planes restricted to `bbox`.
    pub fn cropped(&self, bbox: &BoxI) -> Self {
        Self {
            image: self.image.cropped(bbox),
            mask: self.mask.cropped(bbox),
            variance: self.variance.cropped(bbox),
            planes: self.planes.clone(),
        }
    }
}
