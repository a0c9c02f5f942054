//! Footprints: span-encoded pixel sets with the peaks detected inside them.
//!
//! A footprint is a list of [`Span`]s (inclusive runs of pixels on a row) and
//! a list of [`Peak`]s. Most operations require the spans to be normalized:
//! sorted by `(y, x0)` with overlapping or touching runs merged.

mod heavy;


use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::geom::BoxI;
use crate::image::Mask;

pub use heavy::HeavyFootprint;

/// Inclusive run of pixels `x0..=x1` on row `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub y: i32,
    pub x0: i32,
    pub x1: i32,
}

impl Span {
    #[inline]
    pub const fn new(y: i32, x0: i32, x1: i32) -> Self {
        Self { y, x0, x1 }
    }

    #[inline]
    pub const fn width(&self) -> usize {
        (self.x1 - self.x0 + 1) as usize
    }
}

/// A local maximum detected inside a footprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Integer pixel position.
    pub ix: i32,
    pub iy: i32,
    /// Sub-pixel position.
    pub fx: f64,
    pub fy: f64,
    /// Pixel value at the peak.
    pub value: f32,
}

impl Peak {
    pub fn new(ix: i32, iy: i32, value: f32) -> Self {
        Self {
            ix,
            iy,
            fx: ix as f64,
            fy: iy as f64,
            value,
        }
    }

    pub fn with_position(fx: f64, fy: f64, value: f32) -> Self {
        Self {
            ix: fx.round() as i32,
            iy: fy.round() as i32,
            fx,
            fy,
            value,
        }
    }

    #[inline]
    pub fn position(&self) -> DVec2 {
        DVec2::new(self.fx, self.fy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    spans: Vec<Span>,
    peaks: Vec<Peak>,
    bbox: BoxI,
    normalized: bool,
}

impl Default for Footprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Footprint {
    pub fn new() -> Self {
        Self {
            spans: Vec::new(),
            peaks: Vec::new(),
            bbox: BoxI::empty(),
            normalized: true,
        }
    }

    /// Footprint covering every pixel of `bbox`.
    pub fn from_bbox(bbox: BoxI) -> Self {
        let mut fp = Self::new();
        if bbox.is_empty() {
            return fp;
        }
        for y in bbox.y_min..=bbox.y_max {
            fp.spans.push(Span::new(y, bbox.x_min, bbox.x_max));
        }
        fp.bbox = bbox;
        fp
    }

    pub fn from_pixels(pixels: impl IntoIterator<Item = (i32, i32)>) -> Self {
        let mut fp = Self::new();
        for (x, y) in pixels {
            fp.add_span(y, x, x);
        }
        fp.normalize();
        fp
    }

    pub fn add_span(&mut self, y: i32, x0: i32, x1: i32) {
        assert!(x0 <= x1, "span x0 ({x0}) must not exceed x1 ({x1})");
        self.spans.push(Span::new(y, x0, x1));
        self.bbox.include(x0, y);
        self.bbox.include(x1, y);
        self.normalized = false;
    }

    pub fn add_peak(&mut self, peak: Peak) {
        self.peaks.push(peak);
    }

    /// Sort spans and merge the ones that overlap or touch.
    pub fn normalize(&mut self) {
        if self.normalized {
            return;
        }
        self.spans.sort_unstable_by_key(|s| (s.y, s.x0));

        let mut merged: Vec<Span> = Vec::with_capacity(self.spans.len());
        for span in self.spans.drain(..) {
            match merged.last_mut() {
                Some(last) if last.y == span.y && span.x0 <= last.x1 + 1 => {
                    last.x1 = last.x1.max(span.x1);
                }
                _ => merged.push(span),
            }
        }
        self.spans = merged;
        self.recompute_bbox();
        self.normalized = true;
    }

    fn recompute_bbox(&mut self) {
        let mut bbox = BoxI::empty();
        for s in &self.spans {
            bbox.include(s.x0, s.y);
            bbox.include(s.x1, s.y);
        }
        self.bbox = bbox;
    }

    #[inline]
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    #[inline]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    #[inline]
    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    #[inline]
    pub fn peaks_mut(&mut self) -> &mut Vec<Peak> {
        &mut self.peaks
    }

    pub fn set_peaks(&mut self, peaks: Vec<Peak>) {
        self.peaks = peaks;
    }

    #[inline]
    pub fn bbox(&self) -> BoxI {
        self.bbox
    }

    pub fn area(&self) -> usize {
        debug_assert!(self.normalized, "area() requires a normalized footprint");
        self.spans.iter().map(Span::width).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        debug_assert!(self.normalized, "contains() requires a normalized footprint");
        let idx = self.spans.partition_point(|s| (s.y, s.x1) < (y, x));
        self.spans
            .get(idx)
            .is_some_and(|s| s.y == y && s.x0 <= x && x <= s.x1)
    }

    /// Iterate pixels in span order (row by row, left to right once normalized).
    pub fn pixels(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.spans
            .iter()
            .flat_map(|s| (s.x0..=s.x1).map(move |x| (x, s.y)))
    }

    /// Copy restricted to `bbox`. Peaks outside `bbox` are dropped.
    pub fn clipped_to(&self, bbox: &BoxI) -> Footprint {
        let mut out = Footprint::new();
        for s in &self.spans {
            if s.y < bbox.y_min || s.y > bbox.y_max {
                continue;
            }
            let x0 = s.x0.max(bbox.x_min);
            let x1 = s.x1.min(bbox.x_max);
            if x0 <= x1 {
                out.spans.push(Span::new(s.y, x0, x1));
            }
        }
        out.peaks = self
            .peaks
            .iter()
            .filter(|p| bbox.contains(p.ix, p.iy))
            .copied()
            .collect();
        out.normalized = self.normalized;
        out.recompute_bbox();
        out
    }

    /// Dilate by a disk of radius `r`. Peaks are kept.
    pub fn grown(&self, r: i32) -> Footprint {
        if r <= 0 {
            return self.clone();
        }
        let mut out = Footprint::new();
        let r_sq = (r * r) as f64;
        for s in &self.spans {
            for dy in -r..=r {
                let w = (r_sq - (dy * dy) as f64).sqrt().floor() as i32;
                out.add_span(s.y + dy, s.x0 - w, s.x1 + w);
            }
        }
        out.normalize();
        out.peaks = self.peaks.clone();
        out
    }

    /// OR `bits` into every mask pixel covered by this footprint.
    pub fn set_mask(&self, mask: &mut Mask, bits: u32) {
        let mbox = mask.bbox();
        for (x, y) in self.pixels() {
            if mbox.contains(x, y) {
                mask[(x, y)] |= bits;
            }
        }
    }

    /// Inside the footprint with at least one 4-neighbour outside it.
    pub fn is_edge_pixel(&self, x: i32, y: i32) -> bool {
        self.contains(x, y)
            && (!self.contains(x - 1, y)
                || !self.contains(x + 1, y)
                || !self.contains(x, y - 1)
                || !self.contains(x, y + 1))
    }

    /// Squared distance from `(x, y)` to the nearest footprint pixel
    /// (0 inside, `None` for an empty footprint).
    pub fn distance_squared_to(&self, x: i32, y: i32) -> Option<i64> {
        self.spans
            .iter()
            .map(|s| {
                let dy = (y - s.y) as i64;
                let dx = if x < s.x0 {
                    (s.x0 - x) as i64
                } else if x > s.x1 {
                    (x - s.x1) as i64
                } else {
                    0
                };
                dx * dx + dy * dy
            })
            .min()
    }
}
