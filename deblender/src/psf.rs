//! Point-spread-function models and a thread-safe PSF image cache.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::geom::BoxI;
use crate::image::ImageD;

/// FWHM of a Gaussian in units of its sigma: 2·sqrt(2·ln 2).
pub const GAUSSIAN_FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// A PSF model that can be realized as an image at any position.
pub trait Psf: Send + Sync {
    /// PSF image centred on `(x, y)`, normalized to unit sum.
    ///
    /// The central pixel of the returned image is `(round(x), round(y))`.
    fn compute_image(&self, x: f64, y: f64) -> ImageD;

    /// Full width at half maximum, in pixels.
    fn fwhm(&self) -> f64;
}

/// Realize a radial profile on a `(2h+1)²` stamp and normalize it.
fn realize<F: Fn(f64) -> f64>(x: f64, y: f64, half_size: i32, profile: F) -> ImageD {
    let cx = x.round() as i32;
    let cy = y.round() as i32;
    let bbox = BoxI::new(cx - half_size, cx + half_size, cy - half_size, cy + half_size);
    let mut img = ImageD::new(bbox);

    for (px, py) in bbox.pixels() {
        let dx = px as f64 - x;
        let dy = py as f64 - y;
        img[(px, py)] = profile(dx * dx + dy * dy);
    }

    let sum = img.sum();
    if sum > 0.0 {
        img.scale(1.0 / sum);
    }
    img
}

/// Circular Gaussian PSF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianPsf {
    pub sigma: f64,
    /// Stamp half-size in pixels; images are `2 * half_size + 1` on a side.
    pub half_size: i32,
}

impl GaussianPsf {
    pub fn new(sigma: f64, half_size: i32) -> Self {
        assert!(sigma > 0.0, "sigma must be positive, got {}", sigma);
        assert!(half_size >= 0, "half_size must be non-negative, got {}", half_size);
        Self { sigma, half_size }
    }

    /// Gaussian with the given FWHM and a stamp of about ±3 FWHM.
    pub fn from_fwhm(fwhm: f64) -> Self {
        let sigma = fwhm / GAUSSIAN_FWHM_PER_SIGMA;
        Self::new(sigma, (3.0 * fwhm).ceil() as i32)
    }
}

impl Psf for GaussianPsf {
    fn compute_image(&self, x: f64, y: f64) -> ImageD {
        let two_sigma_sq = 2.0 * self.sigma * self.sigma;
        realize(x, y, self.half_size, |r2| (-r2 / two_sigma_sq).exp())
    }

    fn fwhm(&self) -> f64 {
        self.sigma * GAUSSIAN_FWHM_PER_SIGMA
    }
}

/// Sum of two concentric Gaussians: `g(sigma1) + b·g(sigma2)`, each of unit
/// integral before mixing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoubleGaussianPsf {
    pub sigma1: f64,
    pub sigma2: f64,
    pub b: f64,
    pub half_size: i32,
}

impl DoubleGaussianPsf {
    pub fn new(sigma1: f64, sigma2: f64, b: f64, half_size: i32) -> Self {
        assert!(
            sigma1 > 0.0 && sigma2 > 0.0,
            "sigmas must be positive, got {} and {}",
            sigma1,
            sigma2
        );
        assert!(b >= 0.0, "b must be non-negative, got {}", b);
        Self {
            sigma1,
            sigma2,
            b,
            half_size,
        }
    }

    fn profile(&self, r2: f64) -> f64 {
        let s1 = self.sigma1 * self.sigma1;
        let s2 = self.sigma2 * self.sigma2;
        (-r2 / (2.0 * s1)).exp() / s1 + self.b * (-r2 / (2.0 * s2)).exp() / s2
    }
}

impl Psf for DoubleGaussianPsf {
    fn compute_image(&self, x: f64, y: f64) -> ImageD {
        realize(x, y, self.half_size, |r2| self.profile(r2))
    }

    /// Radius at half the central value, found by bisection; doubled.
    fn fwhm(&self) -> f64 {
        let half = 0.5 * self.profile(0.0);
        let mut lo = 0.0f64;
        let mut hi = 10.0 * self.sigma1.max(self.sigma2);
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            if self.profile(mid * mid) > half {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo + hi
    }
}

/// Memoizes PSF images by exact position.
///
/// Fitting a peak requests PSF images for all of its neighbours too; caching
/// keeps the total cost close to linear in the number of peaks.
pub struct CachingPsf<'a> {
    psf: &'a dyn Psf,
    cache: Mutex<HashMap<(u64, u64), Arc<ImageD>>>,
}

impl<'a> CachingPsf<'a> {
    pub fn new(psf: &'a dyn Psf) -> Self {
        Self {
            psf,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn compute_image(&self, x: f64, y: f64) -> Arc<ImageD> {
        let key = (x.to_bits(), y.to_bits());
        if let Some(img) = self.cache.lock().get(&key) {
            return Arc::clone(img);
        }
        // Computed outside the lock; a concurrent duplicate is harmless.
        let img = Arc::new(self.psf.compute_image(x, y));
        Arc::clone(self.cache.lock().entry(key).or_insert(img))
    }

    /// Uncached evaluation (for one-off shifted positions).
    pub fn compute_image_uncached(&self, x: f64, y: f64) -> ImageD {
        self.psf.compute_image(x, y)
    }

    pub fn fwhm(&self) -> f64 {
        self.psf.fwhm()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_image_is_normalized_and_centred() {
        let psf = GaussianPsf::new(1.5, 6);
        let img = psf.compute_image(20.0, 30.0);
        assert_eq!(img.bbox(), BoxI::new(14, 26, 24, 36));
        assert!((img.sum() - 1.0).abs() < 1e-12);
        assert_eq!(img.max_value(), Some(img.get(20, 30)));
        // Symmetric about the centre
        assert!((img.get(18, 30) - img.get(22, 30)).abs() < 1e-15);
        assert!((img.get(20, 27) - img.get(20, 33)).abs() < 1e-15);
    }

    #[test]
    fn test_gaussian_subpixel_shift_moves_light() {
        let psf = GaussianPsf::new(1.2, 5);
        let img = psf.compute_image(10.3, 10.0);
        assert_eq!(img.bbox().center(), (10, 10));
        assert!(img.get(11, 10) > img.get(9, 10));
    }

    #[test]
    fn test_gaussian_fwhm_roundtrip() {
        let psf = GaussianPsf::from_fwhm(3.0);
        assert!((psf.fwhm() - 3.0).abs() < 1e-12);
        assert_eq!(psf.half_size, 9);
    }

    #[test]
    fn test_double_gaussian_fwhm_between_components() {
        let single = GaussianPsf::new(1.0, 5);
        let double = DoubleGaussianPsf::new(1.0, 3.0, 0.1, 10);
        let fwhm = double.fwhm();
        assert!(fwhm > single.fwhm());
        assert!(fwhm < 3.0 * GAUSSIAN_FWHM_PER_SIGMA);

        let img = double.compute_image(0.0, 0.0);
        assert!((img.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_double_gaussian_with_zero_b_matches_gaussian_fwhm() {
        let double = DoubleGaussianPsf::new(2.0, 5.0, 0.0, 10);
        assert!((double.fwhm() - 2.0 * GAUSSIAN_FWHM_PER_SIGMA).abs() < 1e-9);
    }

    #[test]
    fn test_caching_psf_reuses_images() {
        let psf = GaussianPsf::new(1.0, 4);
        let cached = CachingPsf::new(&psf);
        assert!(cached.is_empty());

        let a = cached.compute_image(5.0, 5.0);
        let b = cached.compute_image(5.0, 5.0);
        let c = cached.compute_image(5.5, 5.0);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cached.len(), 2);
        assert_eq!(*a, psf.compute_image(5.0, 5.0));
    }

    #[test]
    #[should_panic(expected = "sigma must be positive")]
    fn test_gaussian_rejects_non_positive_sigma() {
        GaussianPsf::new(0.0, 3);
    }
}
