//! Baseline deblender driver.
//!
//! Deblends one parent footprint into one child per peak:
//!
//! 1. **PSF fits** (optional): peaks that look like point sources get the
//!    fitted PSF as their template.
//! 2. **Templates**: every other peak gets a symmetric template, optionally
//!    ramped at the footprint edge, median-filtered and made monotonic.
//! 3. **Weights** (optional): templates are rescaled by a least-squares fit
//!    to the parent image.
//! 4. **Apportioning**: the parent's flux is split among the templates, and
//!    flux no template claims is handed out as stray flux.

mod edge_ramp;
mod result;
mod weights;


use crate::baseline::{
    apportion_flux, build_symmetric_template, flag_asymmetry, has_significant_flux_at_edge,
    make_monotonic, median_filter, StrayFluxOptions, Template,
};
use crate::config::DeblendConfig;
use crate::error::{Error, Result};
use crate::footprint::{Footprint, Peak};
use crate::image::statistics::median_f32;
use crate::image::{ImageF, MaskedImage};
use crate::psf::{CachingPsf, Psf};
use crate::psf_fit::{fit_psfs, PsfChisqCuts};

pub use result::{FitQuality, PeakTemplate, PerFootprint, PerPeak, PsfFitSummary};

/// Mask planes set while building templates.
pub const SYMM_1SIG: &str = "SYMM_1SIG";
pub const SYMM_3SIG: &str = "SYMM_3SIG";
pub const MONOTONIC_1SIG: &str = "MONOTONIC_1SIG";

/// Deblend `footprint` of `masked_image` into one child per peak.
///
/// The mask of `masked_image` gains the `SYMM_1SIG`, `SYMM_3SIG` and
/// `MONOTONIC_1SIG` planes and their bits are set where templates were
/// asymmetric or clipped. Fails if the footprint extends outside the image.
pub fn deblend(
    footprint: &Footprint,
    masked_image: &mut MaskedImage,
    psf: &dyn Psf,
    psf_fwhm: f64,
    config: &DeblendConfig,
) -> Result<PerFootprint> {
    config.validate();

    let mut fp = footprint.clone();
    fp.normalize();
    let peaks = select_peaks(fp.peaks(), config.max_number_of_peaks);

    let imbb = masked_image.bbox();
    let bb = fp.bbox();
    if !imbb.contains_box(&bb) {
        return Err(Error::FootprintOutsideImage {
            footprint: bb,
            image: imbb,
        });
    }

    let sigma1 = match config.sigma1 {
        Some(s) => s,
        None => estimate_sigma1(&masked_image.variance),
    };

    let bit_symm_1sig = masked_image.planes.add_plane(SYMM_1SIG)?;
    let bit_symm_3sig = masked_image.planes.add_plane(SYMM_3SIG)?;
    let bit_monotonic = masked_image.planes.add_plane(MONOTONIC_1SIG)?;

    let mut res = PerFootprint::new(&peaks);

    if config.fit_psfs {
        let cpsf = CachingPsf::new(psf);
        let cuts = PsfChisqCuts {
            cut1: config.psf_chisq_cut1,
            cut2: config.psf_chisq_cut2,
            cut2b: config.psf_chisq_cut2b,
        };
        fit_psfs(
            &fp,
            &peaks,
            &mut res.peaks,
            &cpsf,
            psf_fwhm,
            &masked_image.image,
            &masked_image.variance,
            &cuts,
            config.tiny_footprint_size,
        );
    }

    tracing::debug!(
        "Creating templates for footprint at x0,y0,W,H = ({},{}, {},{})",
        bb.x_min,
        bb.y_min,
        bb.width(),
        bb.height()
    );
    for pkres in res.peaks.iter_mut() {
        if pkres.skip || pkres.deblended_as_psf {
            continue;
        }
        let pk = pkres.peak;
        if !imbb.contains(pk.ix, pk.iy) {
            tracing::debug!(
                "Peak center is not inside image; skipping {}",
                pkres.index
            );
            pkres.set_out_of_bounds();
            continue;
        }
        tracing::debug!(
            "computing template for peak {} at ({},{})",
            pkres.index,
            pk.ix,
            pk.iy
        );

        let Some((mut t1, mut tfoot)) =
            build_symmetric_template(masked_image, &fp, &pk, config.patch_edges)
        else {
            tracing::debug!(
                "Peak {} at ({},{}): failed to build symmetric template",
                pkres.index,
                pk.ix,
                pk.iy
            );
            pkres.set_failed_symmetric_template();
            continue;
        };
        flag_asymmetry(
            &mut masked_image.mask,
            &masked_image.image,
            &tfoot,
            &pk,
            sigma1,
            bit_symm_1sig,
            bit_symm_3sig,
        );
        if config.keep_intermediate_templates {
            pkres.set_orig_template(&t1, &tfoot);
        }

        if config.ramp_flux_at_edge && has_significant_flux_at_edge(&t1, &tfoot, 3.0 * sigma1) {
            tracing::debug!(
                "Template {} has significant flux at edge: ramping",
                pkres.index
            );
            if let Some((t2, tfoot2)) = edge_ramp::ramp_flux_at_edge(
                psf,
                psf_fwhm,
                &t1,
                &tfoot,
                &fp,
                masked_image,
                &pk,
                config.patch_edges,
            ) {
                t1 = t2;
                tfoot = tfoot2;
                if config.keep_intermediate_templates {
                    pkres.set_ramped_template(&t1);
                } else {
                    pkres.has_ramped_template = true;
                }
            }
        }

        if config.median_smooth_template {
            let filtsize = config.median_filter_halfsize * 2 + 1;
            if t1.width() >= filtsize && t1.height() >= filtsize {
                tracing::debug!("Median filtering template {}", pkres.index);
                let input = t1.clone();
                median_filter(&input, &mut t1, config.median_filter_halfsize);
                if config.keep_intermediate_templates {
                    pkres.set_median_filtered_template(&t1);
                }
            } else {
                tracing::debug!(
                    "Not median-filtering template {}: size {} x {} smaller than required {} x {}",
                    pkres.index,
                    t1.width(),
                    t1.height(),
                    filtsize,
                    filtsize
                );
            }
        }

        if config.monotonic_template {
            tracing::debug!("Making template {} monotonic", pkres.index);
            let mbox = masked_image.mask.bbox();
            for (x, y) in make_monotonic(&mut t1, &pk, sigma1) {
                if mbox.contains(x, y) {
                    masked_image.mask[(x, y)] |= bit_monotonic;
                }
            }
        }

        pkres.set_template(t1, tfoot);
    }

    if config.lstsq_weight_templates {
        weights::weight_templates(&masked_image.image, &bb, &mut res.peaks)?;
    }

    let active: Vec<usize> = res
        .peaks
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.skip && p.template.is_some())
        .map(|(i, _)| i)
        .collect();

    tracing::debug!("Apportioning flux among {} templates", active.len());
    let mut sum_image = ImageF::new(bb);
    let options = StrayFluxOptions {
        assign: config.find_stray_flux,
        to_point_sources: config.stray_flux_to_point_sources,
        r_to_footprint: config.stray_flux_r_to_footprint,
    };
    let apportioned = {
        let templates: Vec<Template<'_>> = active
            .iter()
            .filter_map(|&i| {
                let p = &res.peaks[i];
                p.template.as_ref().map(|t| Template {
                    image: &t.image,
                    footprint: &t.footprint,
                    is_psf: p.deblended_as_psf,
                    peak: (p.peak.ix, p.peak.iy),
                })
            })
            .collect();
        apportion_flux(masked_image, &fp, &templates, &mut sum_image, &options)
    };

    for ((&i, portion), stray) in active
        .iter()
        .zip(apportioned.portions)
        .zip(apportioned.stray)
    {
        let pkres = &mut res.peaks[i];
        pkres.set_apportioned_flux(portion);
        pkres.set_stray_flux(if config.find_stray_flux { stray } else { None });
    }

    if config.get_template_sum {
        res.set_template_sum(sum_image);
    }

    tracing::info!(
        "Deblended footprint at ({},{}) into {} children ({} as PSF, {} skipped)",
        bb.x_min,
        bb.y_min,
        active.len(),
        res.peaks.iter().filter(|p| p.deblended_as_psf).count(),
        res.peaks.iter().filter(|p| p.skip).count()
    );

    Ok(res)
}

/// The `max_peaks` brightest peaks in their original order (all if 0).
fn select_peaks(peaks: &[Peak], max_peaks: usize) -> Vec<Peak> {
    if max_peaks == 0 || peaks.len() <= max_peaks {
        return peaks.to_vec();
    }
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| peaks[b].value.total_cmp(&peaks[a].value));
    order.truncate(max_peaks);
    order.sort_unstable();
    order.into_iter().map(|i| peaks[i]).collect()
}

/// `sqrt(median(variance))` over finite, positive variance pixels.
fn estimate_sigma1(variance: &ImageF) -> f32 {
    let positive: Vec<f32> = variance.pixels().iter().copied().filter(|&v| v > 0.0).collect();
    match median_f32(&positive) {
        Some(median) => median.sqrt(),
        None => {
            tracing::warn!("No positive variance pixels; using sigma1 = 1");
            1.0
        }
    }
}
