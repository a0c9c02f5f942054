//! Footprints that carry their own pixel values.

use super::Footprint;
use crate::image::{ImageF, MaskedImage};

/// A normalized footprint plus image and variance values, one per footprint
/// pixel in span order.
#[derive(Debug, Clone, PartialEq)]
pub struct HeavyFootprint {
    footprint: Footprint,
    image: Vec<f32>,
    variance: Vec<f32>,
}

impl HeavyFootprint {
    /// Sample `image` at every footprint pixel (0 outside the image).
    pub fn from_image(footprint: Footprint, image: &ImageF) -> Self {
        let mut footprint = footprint;
        footprint.normalize();
        let values: Vec<f32> = footprint
            .pixels()
            .map(|(x, y)| image.try_get(x, y).unwrap_or(0.0))
            .collect();
        let variance = vec![0.0; values.len()];
        Self {
            footprint,
            image: values,
            variance,
        }
    }

    pub fn from_masked_image(footprint: Footprint, mimg: &MaskedImage) -> Self {
        let mut heavy = Self::from_image(footprint, &mimg.image);
        heavy.variance = heavy
            .footprint
            .pixels()
            .map(|(x, y)| mimg.variance.try_get(x, y).unwrap_or(0.0))
            .collect();
        heavy
    }

    /// Build from scattered `(x, y, value)` samples. Repeated pixels are summed.
    pub fn from_pixel_values(values: impl IntoIterator<Item = (i32, i32, f32)>) -> Self {
        Self::from_samples(values.into_iter().map(|(x, y, v)| (x, y, v, 0.0)))
    }

    fn from_samples(samples: impl Iterator<Item = (i32, i32, f32, f32)>) -> Self {
        let mut samples: Vec<(i32, i32, f32, f32)> = samples.collect();
        samples.sort_unstable_by_key(|&(x, y, _, _)| (y, x));

        let mut merged: Vec<(i32, i32, f32, f32)> = Vec::with_capacity(samples.len());
        for s in samples {
            match merged.last_mut() {
                Some(last) if last.0 == s.0 && last.1 == s.1 => {
                    last.2 += s.2;
                    last.3 += s.3;
                }
                _ => merged.push(s),
            }
        }

        // Samples are sorted by (y, x), which is exactly normalized pixel order.
        let footprint = Footprint::from_pixels(merged.iter().map(|&(x, y, _, _)| (x, y)));
        Self {
            footprint,
            image: merged.iter().map(|s| s.2).collect(),
            variance: merged.iter().map(|s| s.3).collect(),
        }
    }

    #[inline]
    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    #[inline]
    pub fn footprint_mut(&mut self) -> &mut Footprint {
        &mut self.footprint
    }

    #[inline]
    pub fn image_values(&self) -> &[f32] {
        &self.image
    }

    #[inline]
    pub fn variance_values(&self) -> &[f32] {
        &self.variance
    }

    /// Iterate `(x, y, value)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32, f32)> + '_ {
        self.footprint
            .pixels()
            .zip(self.image.iter())
            .map(|((x, y), &v)| (x, y, v))
    }

    pub fn value_at(&self, x: i32, y: i32) -> Option<f32> {
        let mut offset = 0usize;
        for s in self.footprint.spans() {
            if s.y == y && s.x0 <= x && x <= s.x1 {
                return Some(self.image[offset + (x - s.x0) as usize]);
            }
            offset += s.width();
        }
        None
    }

    pub fn sum(&self) -> f64 {
        self.image.iter().map(|&v| v as f64).sum()
    }

    /// Add the values into `image` where it overlaps.
    pub fn add_to(&self, image: &mut ImageF) {
        let bbox = image.bbox();
        for (x, y, v) in self.iter() {
            if bbox.contains(x, y) {
                image[(x, y)] += v;
            }
        }
    }

    /// Union of both footprints; values are summed where both cover a pixel.
    /// Peaks of `a` come first.
    pub fn merge(a: &HeavyFootprint, b: &HeavyFootprint) -> HeavyFootprint {
        let samples = a.samples().chain(b.samples());
        let mut merged = Self::from_samples(samples);
        let mut peaks = a.footprint.peaks().to_vec();
        peaks.extend_from_slice(b.footprint.peaks());
        merged.footprint.set_peaks(peaks);
        merged
    }

    fn samples(&self) -> impl Iterator<Item = (i32, i32, f32, f32)> + '_ {
        self.footprint
            .pixels()
            .zip(self.image.iter().zip(self.variance.iter()))
            .map(|((x, y), (&v, &var))| (x, y, v, var))
    }
}
