//! Deblender - splitting blended sources in astronomical images.
//!
//! A parent footprint holding several peaks is divided into one child per
//! peak:
//! - PSF fits pick out point sources
//! - Symmetric, median-filtered, monotonic templates model the rest
//! - The parent's flux is apportioned among the templates, with stray flux
//!   handed to the nearest children
//!
//! The `photo` module carries SDSS-style object families on top of the same
//! footprint and peak types.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use deblender::{deblend, DeblendConfig, GaussianPsf};
//!
//! let psf = GaussianPsf::from_fwhm(3.0);
//! let result = deblend(&footprint, &mut masked_image, &psf, 3.0, &DeblendConfig::default())?;
//!
//! for child in result.deblended() {
//!     let heavy = child.flux_portion(true);
//! }
//! ```

pub mod baseline;
pub mod config;
pub mod deblend;
pub mod error;
pub mod footprint;
pub mod geom;
pub mod image;
pub mod lstsq;
pub mod photo;
pub mod psf;
pub mod psf_fit;

#[cfg(any(test, feature = "bench"))]
pub mod testing;

#[cfg(feature = "bench")]
pub mod bench;

#[doc(hidden)]
pub use tracing;

// ============================================================================
// Core types
// ============================================================================

pub use error::{Error, Result};
pub use footprint::{Footprint, HeavyFootprint, Peak, Span};
pub use geom::BoxI;
pub use image::{Image, ImageD, ImageF, Mask, MaskPlanes, MaskedImage};
pub use psf::{CachingPsf, DoubleGaussianPsf, GaussianPsf, Psf};

// ============================================================================
// Deblending
// ============================================================================

pub use config::{DeblendConfig, StrayFluxToPointSources};
pub use deblend::{
    // Main API
    deblend,
    // Results
    FitQuality,
    PeakTemplate,
    PerFootprint,
    PerPeak,
    PsfFitSummary,
    // Mask planes
    MONOTONIC_1SIG,
    SYMM_1SIG,
    SYMM_3SIG,
};

// ============================================================================
// Photo families
// ============================================================================

pub use photo::{
    fit_cell_as_psf_fake, make_children_fake, merge_peaks, CellPsfFit, CellStats, FieldParams,
    FrameParams, Objc,
};
