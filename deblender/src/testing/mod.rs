//! Synthetic scenes for deblender tests and benchmarks.

#![allow(dead_code)]

use crate::footprint::{Footprint, Peak};
use crate::geom::BoxI;
use crate::image::{ImageF, MaskedImage};

/// Minimal LCG for reproducible noise.
#[derive(Debug, Clone)]
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 33) as f32 / (1u64 << 31) as f32
    }

    /// Approximately standard normal (Irwin-Hall with 12 terms).
    pub fn next_gaussian(&mut self) -> f32 {
        (0..12).map(|_| self.next_f32()).sum::<f32>() - 6.0
    }
}

/// A circular Gaussian source.
#[derive(Debug, Clone, Copy)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    /// Total flux.
    pub flux: f64,
    pub sigma: f64,
}

impl Source {
    pub fn new(x: f64, y: f64, flux: f64, sigma: f64) -> Self {
        Self { x, y, flux, sigma }
    }

    pub fn value_at(&self, x: i32, y: i32) -> f64 {
        let dx = x as f64 - self.x;
        let dy = y as f64 - self.y;
        let two_sigma_sq = 2.0 * self.sigma * self.sigma;
        self.flux / (std::f64::consts::PI * two_sigma_sq)
            * (-(dx * dx + dy * dy) / two_sigma_sq).exp()
    }
}

/// Render `sources` into `bbox`. With `noise_sigma > 0`, Gaussian noise from
/// `seed` is added and the variance plane is `noise_sigma²`; otherwise the
/// variance is 1.
pub fn gaussian_scene(bbox: BoxI, sources: &[Source], noise_sigma: f32, seed: u64) -> MaskedImage {
    let mut mimg = MaskedImage::new(bbox);
    let mut rng = Lcg::new(seed);
    let variance = if noise_sigma > 0.0 {
        noise_sigma * noise_sigma
    } else {
        1.0
    };
    for (x, y) in bbox.pixels() {
        let mut v: f64 = sources.iter().map(|s| s.value_at(x, y)).sum();
        if noise_sigma > 0.0 {
            v += (rng.next_gaussian() * noise_sigma) as f64;
        }
        mimg.image[(x, y)] = v as f32;
        mimg.variance[(x, y)] = variance;
    }
    mimg
}

/// All pixels of `image` at or above `threshold`, with one peak per source
/// placed at its rounded position.
pub fn threshold_footprint(image: &ImageF, threshold: f32, sources: &[Source]) -> Footprint {
    let mut foot = Footprint::from_pixels(
        image
            .bbox()
            .pixels()
            .filter(|&(x, y)| image[(x, y)] >= threshold),
    );
    for s in sources {
        let (ix, iy) = (s.x.round() as i32, s.y.round() as i32);
        let value = image.try_get(ix, iy).unwrap_or(0.0);
        foot.add_peak(Peak::new(ix, iy, value));
    }
    foot
}

/// Two overlapping Gaussian sources on a 41×31 image at origin `(100, 200)`.
pub fn two_source_blend(noise_sigma: f32, seed: u64) -> (MaskedImage, Footprint, Vec<Source>) {
    let bbox = BoxI::from_origin(100, 200, 41, 31);
    let sources = vec![
        Source::new(113.0, 215.0, 5000.0, 1.8),
        Source::new(124.0, 216.0, 3000.0, 1.8),
    ];
    let mimg = gaussian_scene(bbox, &sources, noise_sigma, seed);
    let foot = threshold_footprint(&mimg.image, 2.0 + 5.0 * noise_sigma, &sources);
    (mimg, foot, sources)
}

#[cfg(test)]
/// Initialize a test subscriber once. Respects `RUST_LOG`, default "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
