//! Template-building and flux-apportioning primitives of the baseline deblender.
//!
//! 1. **Symmetric templates** (`symmetric`): assume each source is 180°
//!    symmetric about its peak and keep the lower of each mirrored pixel pair.
//! 2. **Smoothing** (`median`, `monotonic`): median-filter a template and clip
//!    it so it never increases walking outwards from the peak.
//! 3. **Edge tests** (`edge`): detect templates with significant flux where
//!    they touch the footprint boundary.
//! 4. **Apportioning** (`apportion`): split the parent's flux among templates,
//!    including flux no template claims.

mod apportion;
mod edge;
mod median;
mod monotonic;
mod symmetric;

#[cfg(test)]
mod tests;

use crate::footprint::Footprint;
use crate::image::{ImageF, MaskedImage};

pub use apportion::{apportion_flux, ApportionResult, StrayFluxOptions, Template};
pub use edge::{has_significant_flux_at_edge, significant_edge_pixels};
pub use median::median_filter;
pub use monotonic::make_monotonic;
pub use symmetric::{build_symmetric_template, flag_asymmetry};

/// Copy `src` into `dst` at every footprint pixel both images contain.
pub fn copy_within_footprint(foot: &Footprint, src: &ImageF, dst: &mut ImageF) {
    let region = src.bbox().clipped(&dst.bbox());
    for (x, y) in foot.pixels() {
        if region.contains(x, y) {
            dst[(x, y)] = src[(x, y)];
        }
    }
}

/// Masked-image flavour of [`copy_within_footprint`]; copies all three planes.
pub fn copy_masked_within_footprint(foot: &Footprint, src: &MaskedImage, dst: &mut MaskedImage) {
    let region = src.bbox().clipped(&dst.bbox());
    for (x, y) in foot.pixels() {
        if region.contains(x, y) {
            dst.image[(x, y)] = src.image[(x, y)];
            dst.mask[(x, y)] = src.mask[(x, y)];
            dst.variance[(x, y)] = src.variance[(x, y)];
        }
    }
}
