//! Extending templates that are cut off by the footprint edge.

use crate::baseline::{build_symmetric_template, copy_masked_within_footprint, significant_edge_pixels};
use crate::footprint::{Footprint, Peak};
use crate::geom::BoxI;
use crate::image::{ImageF, MaskedImage};
use crate::psf::Psf;

/// Grow a template whose flux is truncated at the footprint edge.
///
/// Every template edge pixel is spread outwards with a peak-normalized PSF
/// (combined by `max`). The result fills the zero pixels of a padded copy of
/// the parent, whose footprint is grown by `S ≈ 1.5·fwhm` (odd). A new
/// symmetric template is built from that and clipped to the image; it may
/// extend past the parent footprint. `None` if the new template fails.
#[allow(clippy::too_many_arguments)]
pub(super) fn ramp_flux_at_edge(
    psf: &dyn Psf,
    psf_fwhm: f64,
    template: &ImageF,
    tfoot: &Footprint,
    parent: &Footprint,
    mimg: &MaskedImage,
    peak: &Peak,
    patch_edges: bool,
) -> Option<(ImageF, Footprint)> {
    let s = ramp_size(psf_fwhm);
    let tbb = tfoot.bbox().grown(s);

    let fpcopy = parent.clipped_to(&tbb);
    let mut padim = MaskedImage::new(tbb);
    padim.planes = mimg.planes.clone();
    copy_masked_within_footprint(&fpcopy, mimg, &mut padim);

    let edge = significant_edge_pixels(template, tfoot, -1e6);
    let kernel = peak_normalized_psf(psf, &parent.bbox(), s);

    let mut ramped = ImageF::new(tbb);
    for (x, y) in edge.pixels() {
        let tin = template[(x, y)];
        for &(dx, dy, p) in &kernel {
            let (px, py) = (x + dx, y + dy);
            if ramped.contains(px, py) {
                let v = tin * p;
                if v > ramped[(px, py)] {
                    ramped[(px, py)] = v;
                }
            }
        }
    }

    for (v, &r) in padim.image.pixels_mut().iter_mut().zip(ramped.pixels()) {
        if *v == 0.0 {
            *v = r;
        }
    }

    let grown = fpcopy.grown(s);
    let (t2, mut tfoot2) = build_symmetric_template(&padim, &grown, peak, patch_edges)?;

    tfoot2 = tfoot2.clipped_to(&mimg.bbox());
    let t2 = t2.cropped(&tfoot2.bbox());
    Some((t2, tfoot2))
}

/// Odd integer near `1.5·fwhm`.
fn ramp_size(psf_fwhm: f64) -> i32 {
    (((psf_fwhm * 1.5 + 0.5) as i32) / 2) * 2 + 1
}

/// PSF at the centre of `bbox` as `(dx, dy, value)` offsets within `±s`,
/// scaled so its maximum is 1.
fn peak_normalized_psf(psf: &dyn Psf, bbox: &BoxI, s: i32) -> Vec<(i32, i32, f32)> {
    let (xc, yc) = bbox.center();
    let img = psf.compute_image(xc as f64, yc as f64);
    let window = BoxI::new(xc - s, xc + s, yc - s, yc + s);

    let kernel: Vec<(i32, i32, f64)> = img
        .bbox()
        .clipped(&window)
        .pixels()
        .map(|(x, y)| (x - xc, y - yc, img[(x, y)]))
        .collect();
    let max = kernel.iter().map(|k| k.2).fold(0.0f64, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }
    kernel
        .into_iter()
        .map(|(dx, dy, v)| (dx, dy, (v / max) as f32))
        .collect()
}
