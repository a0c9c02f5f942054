use std::f64::consts::{PI, TAU};

use glam::DVec2;
use nalgebra::{Matrix2, Vector2};

use super::objc::{FieldParams, Objc, ObjcColor};
use crate::error::{Error, Result};
use crate::image::ImageF;
use crate::photo_trace;

/// Pixel statistics of one sector of an annulus.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cell {
    pub mean: f32,
    pub sigma: f32,
    pub npix: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annulus {
    pub r_inner: f64,
    pub r_outer: f64,
    pub cells: Vec<Cell>,
}

/// Radial profile of an object, split into annuli of angular sectors.
#[derive(Debug, Clone, PartialEq)]
pub struct CellStats {
    pub center: DVec2,
    pub annuli: Vec<Annulus>,
}

impl CellStats {
    /// Cells of `image` around `center`. Annulus `k` spans
    /// `[radii[k - 1], radii[k])` (from 0 for the first); each is split into
    /// `nsector` equal sectors starting along +x.
    pub fn from_image(image: &ImageF, center: DVec2, radii: &[f64], nsector: usize) -> Self {
        assert!(nsector > 0, "nsector must be positive");
        assert!(
            radii.windows(2).all(|w| w[0] < w[1]),
            "radii must be increasing: {:?}",
            radii
        );

        let nann = radii.len();
        // Per cell: (sum, sum of squares, count).
        let mut acc = vec![(0.0f64, 0.0f64, 0usize); nann * nsector];
        let rmax = radii.last().copied().unwrap_or(0.0);

        for (x, y) in image.bbox().pixels() {
            let d = DVec2::new(x as f64, y as f64) - center;
            let r = d.length();
            if r >= rmax {
                continue;
            }
            let Some(ann) = radii.iter().position(|&ro| r < ro) else {
                continue;
            };
            let theta = d.y.atan2(d.x).rem_euclid(TAU);
            let sector = ((theta / TAU * nsector as f64) as usize).min(nsector - 1);

            let v = image[(x, y)] as f64;
            let cell = &mut acc[ann * nsector + sector];
            cell.0 += v;
            cell.1 += v * v;
            cell.2 += 1;
        }

        let annuli = (0..nann)
            .map(|k| Annulus {
                r_inner: if k == 0 { 0.0 } else { radii[k - 1] },
                r_outer: radii[k],
                cells: acc[k * nsector..(k + 1) * nsector]
                    .iter()
                    .map(|&(sum, sum2, n)| {
                        if n == 0 {
                            return Cell::default();
                        }
                        let mean = sum / n as f64;
                        let var = (sum2 / n as f64 - mean * mean).max(0.0);
                        Cell {
                            mean: mean as f32,
                            sigma: var.sqrt() as f32,
                            npix: n,
                        }
                    })
                    .collect(),
            })
            .collect();

        Self { center, annuli }
    }
}

/// Result of [`fit_cell_as_psf_fake`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellPsfFit {
    /// Central intensity of the PSF.
    pub i0: f64,
    pub bkgd: f64,
    pub chisq: f64,
    pub dof: usize,
}

/// Mean of the unit-peak Gaussian `exp(-r²/2σ²)` over an annulus.
fn annulus_psf(r_inner: f64, r_outer: f64, sigma: f64) -> f64 {
    let two_s2 = 2.0 * sigma * sigma;
    let (a2, b2) = (r_inner * r_inner, r_outer * r_outer);
    if b2 - a2 <= f64::EPSILON {
        return (-a2 / two_s2).exp();
    }
    two_s2 * ((-a2 / two_s2).exp() - (-b2 / two_s2).exp()) / (b2 - a2)
}

/// Fit `I0 · g + bkgd` to the first `nannuli` annuli of `stats` in `color`.
///
/// `g` is the frame's Gaussian PSF averaged over each annulus, 1 at the
/// centre. Cells are weighted by the inverse variance of their mean: sky
/// noise, plus photon noise of the object unless `sky_noise_only`. The PSF
/// counts `I0 · 2πσ²` and their error are stored in `objc.colors[color]`.
pub fn fit_cell_as_psf_fake(
    objc: &mut Objc,
    color: usize,
    stats: &CellStats,
    fiparams: &FieldParams,
    nannuli: usize,
    sky_noise_only: bool,
) -> Result<CellPsfFit> {
    let ncolor = objc.colors.len().min(fiparams.ncolor());
    if color >= ncolor {
        return Err(Error::BadColor { color, ncolor });
    }
    if nannuli == 0 || nannuli > stats.annuli.len() {
        return Err(Error::BadAnnulusCount {
            requested: nannuli,
            available: stats.annuli.len(),
        });
    }
    let frame = &fiparams.frames[color];
    let sky_var = (frame.sky_sigma as f64).powi(2);
    let gain = (frame.gain as f64).max(f64::MIN_POSITIVE);

    // (g, mean, weight) per usable cell.
    let mut samples: Vec<(f64, f64, f64)> = Vec::new();
    for ann in &stats.annuli[..nannuli] {
        let g = annulus_psf(ann.r_inner, ann.r_outer, frame.psf_sigma);
        for cell in ann.cells.iter().filter(|c| c.npix > 0) {
            let n = cell.npix as f64;
            let mean = cell.mean as f64;
            let mut var = sky_var / n;
            if !sky_noise_only {
                var += (mean - frame.sky as f64).max(0.0) / gain / n;
            }
            if var > 0.0 {
                samples.push((g, mean, 1.0 / var));
            }
        }
    }
    if samples.len() < 2 {
        return Err(Error::TooFewCells(samples.len()));
    }

    let (mut sgg, mut sg, mut s1, mut sgy, mut sy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for &(g, y, w) in &samples {
        sgg += w * g * g;
        sg += w * g;
        s1 += w;
        sgy += w * g * y;
        sy += w * y;
    }
    let det = sgg * s1 - sg * sg;
    if det <= 1e-12 * sgg * s1 {
        return Err(Error::SingularFit);
    }
    let inv = Matrix2::new(sgg, sg, sg, s1)
        .try_inverse()
        .ok_or(Error::SingularFit)?;
    let x = inv * Vector2::new(sgy, sy);
    let (i0, bkgd) = (x[0], x[1]);

    let chisq: f64 = samples
        .iter()
        .map(|&(g, y, w)| {
            let r = y - i0 * g - bkgd;
            w * r * r
        })
        .sum();
    let dof = samples.len() - 2;

    let area = 2.0 * PI * frame.psf_sigma * frame.psf_sigma;
    objc.colors[color] = ObjcColor {
        psf_counts: (i0 * area) as f32,
        psf_counts_err: (inv[(0, 0)].sqrt() * area) as f32,
        sky: bkgd as f32,
        chisq: chisq as f32,
    };

    photo_trace!(
        "objc {} colour {}: I0 = {:.3} bkgd = {:.3} chisq/dof = {:.3}/{}",
        objc.id,
        color,
        i0,
        bkgd,
        chisq,
        dof
    );
    Ok(CellPsfFit {
        i0,
        bkgd,
        chisq,
        dof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annulus_psf() {
        assert!((annulus_psf(0.0, 1e-9, 2.0) - 1.0).abs() < 1e-6);
        let g = annulus_psf(0.0, 2.0, 2.0);
        // 2σ²(1 - e^{-1/2}) / r² = 2·(1 - e^{-0.5})
        assert!((g - 2.0 * (1.0 - (-0.5f64).exp())).abs() < 1e-12);
        assert!(annulus_psf(2.0, 4.0, 2.0) < g);
    }
}
