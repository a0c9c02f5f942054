//! PSF fits that decide whether a peak is a point source.
//!
//! Each peak is fitted, on a small stamp, with a linear model:
//! `flux·PSF + sky + sky_x·dx + sky_y·dy + Σ neighbour PSFs`, once as is and
//! once with the PSF's x/y derivatives added. Pixels within `R0 = ⌈fwhm⌉` get
//! full weight; the weight ramps linearly to zero at `R1 = ⌈1.5·fwhm⌉`. A peak
//! whose reduced chi-squared passes the cuts gets the fitted PSF as template.

use glam::DVec2;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::deblend::{FitQuality, PerPeak, PsfFitSummary};
use crate::footprint::{Footprint, Peak};
use crate::geom::BoxI;
use crate::image::{ImageD, ImageF};
use crate::lstsq::lstsq;
use crate::psf::CachingPsf;

/// Chi-squared used when the solver reports no residual.
const MISSING_CHISQ: f64 = 1e30;

// Columns of the design matrix.
const I_PSF: usize = 0;
const I_SKY: usize = 1;
const I_SKY_X: usize = 2;
const I_SKY_Y: usize = 3;
const I_OTHERS: usize = 4;

/// Reduced chi-squared cuts for accepting a PSF model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsfChisqCuts {
    /// Fit without derivative terms.
    pub cut1: f64,
    /// Fit with derivative terms.
    pub cut2: f64,
    /// Refit at the shifted centre.
    pub cut2b: f64,
}

impl Default for PsfChisqCuts {
    fn default() -> Self {
        Self {
            cut1: 1.5,
            cut2: 1.5,
            cut2b: 1.5,
        }
    }
}

/// Shared inputs of every per-peak fit.
struct FitContext<'a> {
    foot: &'a Footprint,
    fbb: BoxI,
    peaks: &'a [Peak],
    psf: &'a CachingPsf<'a>,
    psf_fwhm: f64,
    image: &'a ImageF,
    variance: &'a ImageF,
    cuts: PsfChisqCuts,
    tiny_footprint_size: i32,
}

/// Fit every peak of `foot`; results land in the matching `results` entry.
///
/// Peaks are fitted in parallel. `results[i]` must describe `peaks[i]`.
#[allow(clippy::too_many_arguments)]
pub fn fit_psfs(
    foot: &Footprint,
    peaks: &[Peak],
    results: &mut [PerPeak],
    psf: &CachingPsf<'_>,
    psf_fwhm: f64,
    image: &ImageF,
    variance: &ImageF,
    cuts: &PsfChisqCuts,
    tiny_footprint_size: i32,
) {
    assert_eq!(
        peaks.len(),
        results.len(),
        "one result per peak is required"
    );

    let ctx = FitContext {
        foot,
        fbb: foot.bbox(),
        peaks,
        psf,
        psf_fwhm,
        image,
        variance,
        cuts: *cuts,
        tiny_footprint_size,
    };

    results
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, res)| {
            tracing::debug!("Peak {}", index);
            fit_psf(&ctx, index, res);
        });
}

/// A stamp pixel used in the fit.
#[derive(Debug, Clone, Copy)]
struct FitPixel {
    x: i32,
    y: i32,
    /// Ramp weight.
    ramp: f64,
    /// `sqrt(ramp / variance)`.
    weight: f64,
}

fn fit_psf(ctx: &FitContext<'_>, index: usize, res: &mut PerPeak) {
    let pk = &ctx.peaks[index];
    let (cx, cy) = (pk.fx, pk.fy);

    let r0 = ctx.psf_fwhm.ceil() as i32;
    let r1 = (1.5 * ctx.psf_fwhm).ceil() as i32;
    let psfimg = ctx.psf.compute_image(cx, cy);
    let r2 = r1 as f64 + psfimg.width().min(psfimg.height()) as f64 / 2.0;
    let pbb = psfimg.bbox().clipped(&ctx.fbb);

    let r1f = r1 as f64;
    let stamp = BoxI::new(
        (cx - r1f).floor() as i32,
        (cx + r1f).ceil() as i32,
        (cy - r1f).floor() as i32,
        (cy + r1f).ceil() as i32,
    )
    .clipped(&ctx.fbb);
    if stamp.is_empty() {
        tracing::debug!("Skipping peak {}: out of bounds", index);
        res.set_out_of_bounds();
        return;
    }

    let tiny = ctx.tiny_footprint_size;
    if tiny > 0 && (stamp.x_max - stamp.x_min < tiny || stamp.y_max - stamp.y_min < tiny) {
        tracing::debug!("Skipping peak {}: tiny footprint / close to edge", index);
        res.set_tiny_footprint();
        return;
    }

    let others: Vec<_> = ctx
        .peaks
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != index)
        .filter(|(_, pk2)| pk.position().distance_squared(pk2.position()) <= r2 * r2)
        .map(|(_, pk2)| ctx.psf.compute_image(pk2.fx, pk2.fy))
        .filter(|opsf| opsf.bbox().overlaps(&stamp))
        .collect();
    if !others.is_empty() {
        tracing::debug!("{} other peaks within range", others.len());
    }

    let pixels = valid_pixels(ctx, stamp, cx, cy, r0, r1);
    if pixels.is_empty() {
        tracing::warn!(
            "Skipping peak at ({:.1},{:.1}): no unmasked pixels nearby",
            cx,
            cy
        );
        res.set_no_valid_pixels();
        return;
    }

    let nt1 = I_OTHERS + others.len();
    let nt2 = nt1 + 2;
    let (i_dx, i_dy) = (nt1, nt1 + 1);
    let np = pixels.len();

    let mut a = DMatrix::<f64>::zeros(np, nt2);
    let mut b = DVector::<f64>::zeros(np);
    for (row, p) in pixels.iter().enumerate() {
        let (x, y) = (p.x, p.y);
        if pbb.contains(x, y) {
            a[(row, I_PSF)] = psfimg[(x, y)];
        }
        a[(row, I_SKY)] = 1.0;
        a[(row, I_SKY_X)] = x as f64 - cx;
        a[(row, I_SKY_Y)] = y as f64 - cy;
        for (j, opsf) in others.iter().enumerate() {
            if let Some(v) = opsf.try_get(x, y) {
                a[(row, I_OTHERS + j)] = v;
            }
        }
        // Central differences on the strict interior of the clipped PSF box.
        if y >= pbb.y_min && y <= pbb.y_max && x > pbb.x_min && x < pbb.x_max {
            a[(row, i_dx)] = (psfimg[(x + 1, y)] - psfimg[(x - 1, y)]) / 2.0;
        }
        if x >= pbb.x_min && x <= pbb.x_max && y > pbb.y_min && y < pbb.y_max {
            a[(row, i_dy)] = (psfimg[(x, y + 1)] - psfimg[(x, y - 1)]) / 2.0;
        }
        b[row] = ctx.image[(x, y)] as f64;
    }

    let w = DVector::from_iterator(np, pixels.iter().map(|p| p.weight));
    let sumr: f64 = pixels.iter().map(|p| p.ramp).sum();
    let aw = weight_rows(&a, &w);
    let bw = b.component_mul(&w);

    let fits = lstsq(&aw.columns(0, nt1).into_owned(), &bw)
        .and_then(|fit1| lstsq(&aw, &bw).map(|fit2| (fit1, fit2)));
    let (fit1, fit2) = match fits {
        Ok(fits) => fits,
        Err(e) => {
            tracing::warn!("Failed to fit PSF to child: {}", e);
            res.set_psf_fit_failed();
            return;
        }
    };

    let chisq1 = fit1.chisq.unwrap_or(MISSING_CHISQ);
    let chisq2 = fit2.chisq.unwrap_or(MISSING_CHISQ);
    let dof1 = sumr - nt1 as f64;
    let dof2 = sumr - nt2 as f64;
    if dof1 <= 0.0 || dof2 <= 0.0 {
        tracing::debug!("Skipping peak {}: bad DOF {}, {}", index, dof1, dof2);
        res.set_bad_psf_dof();
        return;
    }

    let q1 = chisq1 / dof1;
    let mut q2 = chisq2 / dof2;
    tracing::debug!("PSF fits: chisq/dof = {}, {}", q1, q2);
    let ispsf1 = q1 < ctx.cuts.cut1;
    let mut ispsf2 = q2 < ctx.cuts.cut2;
    res.psf_fit1 = Some(FitQuality {
        chisq: chisq1,
        dof: dof1,
    });
    res.psf_fit2 = Some(FitQuality {
        chisq: chisq2,
        dof: dof2,
    });

    // Derivative column is (P(x+1) - P(x-1)) / 2, so a source at x + δ fits
    // with coefficient -flux·δ.
    let mut shift = DVec2::ZERO;
    if ispsf2 {
        let f0 = fit2.x[I_PSF];
        shift = DVec2::new(-fit2.x[i_dx] / f0, -fit2.x[i_dy] / f0);
        ispsf2 = shift.x.abs() < 1.0 && shift.y.abs() < 1.0;
        tracing::debug!(
            "isPSF2 -- checking derivatives: dx,dy = {}, {} -> {}",
            shift.x,
            shift.y,
            ispsf2
        );
        if !ispsf2 {
            res.psf_fit_big_decenter = true;
        }
    }

    let mut x2 = fit2.x;
    let mut best2 = FitQuality {
        chisq: chisq2,
        dof: dof2,
    };
    if ispsf2 {
        let shifted = ctx.psf.compute_image_uncached(cx + shift.x, cy + shift.y);
        let mut ab = a.columns(0, nt1).into_owned();
        set_psf_column(&mut ab, &pixels, &shifted, &ctx.fbb);

        let fitb = match lstsq(&weight_rows(&ab, &w), &bw) {
            Ok(fit) => fit,
            Err(e) => {
                tracing::warn!("Failed to refit shifted PSF: {}", e);
                res.set_psf_fit_failed();
                return;
            }
        };
        let chisqb = fitb.chisq.unwrap_or(MISSING_CHISQ);
        let dofb = sumr - nt1 as f64;
        let qb = chisqb / dofb;
        ispsf2 = qb < ctx.cuts.cut2b;
        tracing::debug!("shifted PSF: new chisq/dof = {}; good? {}", qb, ispsf2);

        q2 = qb;
        x2 = fitb.x;
        best2 = FitQuality {
            chisq: chisqb,
            dof: dofb,
        };
        res.psf_fit3 = Some(best2);
    }

    let mut center = pk.position();
    let (params, best) = if (ispsf1 && ispsf2 && q2 < q1) || (ispsf2 && !ispsf1) {
        tracing::debug!("Keeping shifted-PSF model");
        center += shift;
        res.psf_fit_with_decenter = true;
        (x2, best2)
    } else {
        (
            fit1.x,
            FitQuality {
                chisq: chisq1,
                dof: dof1,
            },
        )
    };
    let ispsf = ispsf1 || ispsf2;
    let flux = params[I_PSF];

    res.psf_fit = Some(PsfFitSummary {
        r0,
        r1,
        stamp,
        center,
        best,
        params: params.iter().copied().collect(),
        flux,
        n_others: others.len(),
    });

    if ispsf {
        res.set_deblended_as_psf();
        tracing::debug!("Deblending peak {} as PSF; setting template to PSF model", index);
        let (image, footprint) = psf_template(ctx.foot, &ctx.psf.compute_image(center.x, center.y), flux);
        res.set_template(image, footprint);
    }
}

/// Footprint pixels of the stamp within `R1` that have positive variance.
fn valid_pixels(
    ctx: &FitContext<'_>,
    stamp: BoxI,
    cx: f64,
    cy: f64,
    r0: i32,
    r1: i32,
) -> Vec<FitPixel> {
    let (r0f, r1f) = (r0 as f64, r1 as f64);
    stamp
        .pixels()
        .filter(|&(x, y)| ctx.foot.contains(x, y))
        .filter_map(|(x, y)| {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            let rr = dx * dx + dy * dy;
            if rr > r1f * r1f {
                return None;
            }
            if !ctx.image.contains(x, y) {
                return None;
            }
            let var = ctx.variance.try_get(x, y)? as f64;
            if var.is_nan() || var <= 0.0 {
                return None;
            }
            let ramp = if rr > r0f * r0f {
                1.0 - (rr.sqrt() - r0f) / (r1f - r0f)
            } else {
                1.0
            };
            Some(FitPixel {
                x,
                y,
                ramp,
                weight: (ramp / var).sqrt(),
            })
        })
        .collect()
}

fn weight_rows(a: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut aw = a.clone();
    for (mut row, &wi) in aw.row_iter_mut().zip(w.iter()) {
        row *= wi;
    }
    aw
}

/// Overwrite the PSF column with `psfimg`, zero outside its box clipped to
/// `fbb`.
fn set_psf_column(a: &mut DMatrix<f64>, pixels: &[FitPixel], psfimg: &ImageD, fbb: &BoxI) {
    let pbb = psfimg.bbox().clipped(fbb);
    for (row, p) in pixels.iter().enumerate() {
        a[(row, I_PSF)] = if pbb.contains(p.x, p.y) {
            psfimg[(p.x, p.y)]
        } else {
            0.0
        };
    }
}

/// The PSF scaled by `flux`, over `foot` clipped to the PSF box.
fn psf_template(foot: &Footprint, psfimg: &ImageD, flux: f64) -> (ImageF, Footprint) {
    let clipped = foot.clipped_to(&psfimg.bbox());
    let mut image = ImageF::new(clipped.bbox());
    for (x, y) in clipped.pixels() {
        image[(x, y)] = (psfimg[(x, y)] * flux) as f32;
    }
    (image, clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deblend::PerFootprint;
    use crate::image::MaskedImage;
    use crate::psf::{GaussianPsf, Psf};
    use crate::testing::Lcg;

    /// Render `psf` scaled by `flux` at each position, plus noise.
    fn psf_scene(
        psf: &dyn Psf,
        bbox: BoxI,
        stars: &[(f64, f64, f64)],
        noise: f32,
        seed: u64,
    ) -> MaskedImage {
        let mut mimg = MaskedImage::new(bbox);
        for &(x, y, flux) in stars {
            let img = psf.compute_image(x, y);
            for (px, py) in img.bbox().clipped(&bbox).pixels() {
                mimg.image[(px, py)] += (img[(px, py)] * flux) as f32;
            }
        }
        let mut rng = Lcg::new(seed);
        for v in mimg.image.pixels_mut() {
            *v += rng.next_gaussian() * noise;
        }
        mimg.variance.fill(noise * noise);
        mimg
    }

    fn run(
        mimg: &MaskedImage,
        foot: &Footprint,
        psf: &dyn Psf,
        tiny: i32,
    ) -> PerFootprint {
        let cpsf = CachingPsf::new(psf);
        let mut result = PerFootprint::new(foot.peaks());
        fit_psfs(
            foot,
            foot.peaks(),
            &mut result.peaks,
            &cpsf,
            psf.fwhm(),
            &mimg.image,
            &mimg.variance,
            &PsfChisqCuts::default(),
            tiny,
        );
        result
    }

    #[test]
    fn test_isolated_star_is_psf() {
        let psf = GaussianPsf::from_fwhm(3.0);
        let bbox = BoxI::from_origin(0, 0, 31, 31);
        let mimg = psf_scene(&psf, bbox, &[(15.0, 15.0, 10_000.0)], 1.0, 11);
        let mut foot = Footprint::from_bbox(bbox);
        foot.add_peak(Peak::new(15, 15, mimg.image[(15, 15)]));

        let result = run(&mimg, &foot, &psf, 2);
        let pk = &result.peaks[0];

        assert!(pk.deblended_as_psf);
        assert!(!pk.skip);
        let fit = pk.psf_fit.as_ref().unwrap();
        assert_eq!(fit.r0, 3);
        assert_eq!(fit.r1, 5);
        assert_eq!(fit.stamp, BoxI::new(10, 20, 10, 20));
        assert_eq!(fit.n_others, 0);
        assert!((fit.flux - 10_000.0).abs() < 200.0, "flux {}", fit.flux);

        let template = pk.template.as_ref().unwrap();
        let tsum = template.image.sum();
        assert!(tsum > 9_000.0 && tsum < 10_500.0, "template sum {tsum}");
        assert!(template.footprint.contains(15, 15));
    }

    #[test]
    fn test_shifted_star_keeps_decentered_model() {
        let psf = GaussianPsf::from_fwhm(3.0);
        let bbox = BoxI::from_origin(0, 0, 31, 31);
        let mimg = psf_scene(&psf, bbox, &[(15.3, 15.0, 300.0)], 1.0, 5);
        let mut foot = Footprint::from_bbox(bbox);
        foot.add_peak(Peak::new(15, 15, mimg.image[(15, 15)]));

        let result = run(&mimg, &foot, &psf, 2);
        let pk = &result.peaks[0];

        assert!(pk.psf_fit_with_decenter);
        assert!(!pk.psf_fit_big_decenter);
        assert!(pk.deblended_as_psf);
        let fit3 = pk.psf_fit3.expect("shifted refit");
        assert!(fit3.reduced_chisq() < PsfChisqCuts::default().cut2b);

        let fit = pk.psf_fit.as_ref().unwrap();
        assert_eq!(fit.best, fit3);
        assert_eq!(fit.params.len(), 4);
        assert!(fit.center.x > 15.1 && fit.center.x < 15.6, "center {:?}", fit.center);
        assert!((fit.center.y - 15.0).abs() < 0.2, "center {:?}", fit.center);
    }

    /// `flux·P - flux·δ·∂P/∂x` on the PSF box interior: exactly the
    /// derivative model of a source shifted by `δ` along x.
    fn linear_shift_scene(psf: &dyn Psf, bbox: BoxI, flux: f64, delta: f64) -> MaskedImage {
        let mut mimg = MaskedImage::new(bbox);
        let p = psf.compute_image(15.0, 15.0);
        let pbb = p.bbox();
        for (x, y) in pbb.clipped(&bbox).pixels() {
            let mut v = flux * p[(x, y)];
            if x > pbb.x_min && x < pbb.x_max {
                v -= flux * delta * (p[(x + 1, y)] - p[(x - 1, y)]) / 2.0;
            }
            mimg.image[(x, y)] = v as f32;
        }
        mimg.variance.fill(1.0);
        mimg
    }

    #[test]
    fn test_large_shift_is_big_decenter() {
        let psf = GaussianPsf::from_fwhm(3.0);
        let bbox = BoxI::from_origin(0, 0, 31, 31);
        let mimg = linear_shift_scene(&psf, bbox, 1_000.0, 1.5);
        let mut foot = Footprint::from_bbox(bbox);
        foot.add_peak(Peak::new(15, 15, mimg.image[(15, 15)]));

        let result = run(&mimg, &foot, &psf, 2);
        let pk = &result.peaks[0];

        let q2 = pk.psf_fit2.unwrap().reduced_chisq();
        assert!(q2 < PsfChisqCuts::default().cut2, "q2 {q2}");
        assert!(pk.psf_fit_big_decenter);
        assert!(!pk.psf_fit_with_decenter);
        assert!(pk.psf_fit3.is_none());
        let q1 = pk.psf_fit1.unwrap().reduced_chisq();
        assert!(q1 > PsfChisqCuts::default().cut1, "q1 {q1}");
        assert!(!pk.deblended_as_psf);
        assert_eq!(pk.psf_fit.as_ref().unwrap().center, DVec2::new(15.0, 15.0));
    }

    #[test]
    fn test_too_few_pixels_is_bad_dof() {
        let psf = GaussianPsf::from_fwhm(3.0);
        let bbox = BoxI::from_origin(0, 0, 21, 21);
        let mimg = psf_scene(&psf, bbox, &[(10.0, 10.0, 1_000.0)], 1.0, 1);
        // Four pixels cannot constrain four-plus parameters.
        let mut foot = Footprint::from_bbox(BoxI::new(10, 11, 10, 11));
        foot.add_peak(Peak::new(10, 10, mimg.image[(10, 10)]));

        let result = run(&mimg, &foot, &psf, 0);
        let pk = &result.peaks[0];

        assert!(!pk.tiny_footprint);
        assert!(pk.bad_psf_dof);
        assert!(pk.psf_fit1.is_none());
        assert!(pk.psf_fit.is_none());
        assert!(!pk.deblended_as_psf);
    }

    #[test]
    fn test_extended_source_is_not_psf() {
        let psf = GaussianPsf::from_fwhm(2.5);
        let wide = GaussianPsf::from_fwhm(8.0);
        let bbox = BoxI::from_origin(0, 0, 41, 41);
        let mimg = psf_scene(&wide, bbox, &[(20.0, 20.0, 50_000.0)], 1.0, 3);
        let mut foot = Footprint::from_bbox(bbox);
        foot.add_peak(Peak::new(20, 20, mimg.image[(20, 20)]));

        let result = run(&mimg, &foot, &psf, 2);
        let pk = &result.peaks[0];
        assert!(!pk.deblended_as_psf);
        assert!(pk.template.is_none());
        assert!(pk.psf_fit.is_some());
    }

    #[test]
    fn test_neighbours_enter_the_model() {
        let psf = GaussianPsf::from_fwhm(3.0);
        let bbox = BoxI::from_origin(0, 0, 41, 31);
        let mimg = psf_scene(
            &psf,
            bbox,
            &[(15.0, 15.0, 10_000.0), (21.0, 15.0, 8_000.0)],
            1.0,
            9,
        );
        let mut foot = Footprint::from_bbox(bbox);
        foot.add_peak(Peak::new(15, 15, mimg.image[(15, 15)]));
        foot.add_peak(Peak::new(21, 15, mimg.image[(21, 15)]));

        let result = run(&mimg, &foot, &psf, 2);
        for pk in &result.peaks {
            let fit = pk.psf_fit.as_ref().unwrap();
            assert_eq!(fit.n_others, 1);
            // Kept models never carry derivative terms: the shifted refit drops them
            assert_eq!(fit.params.len(), 5);
            assert!(pk.deblended_as_psf);
        }
        let f0 = result.peaks[0].psf_fit.as_ref().unwrap().flux;
        let f1 = result.peaks[1].psf_fit.as_ref().unwrap().flux;
        assert!((f0 - 10_000.0).abs() < 300.0, "flux {f0}");
        assert!((f1 - 8_000.0).abs() < 300.0, "flux {f1}");
    }

    #[test]
    fn test_tiny_footprint_is_skipped() {
        let psf = GaussianPsf::from_fwhm(3.0);
        let bbox = BoxI::from_origin(0, 0, 21, 21);
        let mimg = psf_scene(&psf, bbox, &[(10.0, 10.0, 1_000.0)], 1.0, 1);
        let mut foot = Footprint::from_bbox(BoxI::new(9, 10, 5, 15));
        foot.add_peak(Peak::new(10, 10, mimg.image[(10, 10)]));

        let result = run(&mimg, &foot, &psf, 2);
        assert!(result.peaks[0].tiny_footprint);
        assert!(result.peaks[0].skip);
    }

    #[test]
    fn test_no_valid_pixels() {
        let psf = GaussianPsf::from_fwhm(3.0);
        let bbox = BoxI::from_origin(0, 0, 21, 21);
        let mut mimg = psf_scene(&psf, bbox, &[(10.0, 10.0, 1_000.0)], 1.0, 1);
        mimg.variance.fill(0.0);
        let mut foot = Footprint::from_bbox(bbox);
        foot.add_peak(Peak::new(10, 10, mimg.image[(10, 10)]));

        let result = run(&mimg, &foot, &psf, 2);
        assert!(result.peaks[0].no_valid_pixels);
        assert!(result.peaks[0].psf_fit.is_none());
    }

    #[test]
    fn test_weight_rows() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let w = DVector::from_vec(vec![2.0, 0.5]);
        let aw = weight_rows(&a, &w);
        assert_eq!(aw, DMatrix::from_row_slice(2, 2, &[2.0, 4.0, 1.5, 2.0]));
    }
}
