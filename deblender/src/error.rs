//! Error types for deblending operations.

use thiserror::Error;

use crate::geom::BoxI;

/// Errors that can occur while deblending or in the photo compatibility layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Footprint bounding-box {footprint:?} extends outside image bounding-box {image:?}")]
    FootprintOutsideImage { footprint: BoxI, image: BoxI },

    #[error("strayFluxToPointSources: value \"{0}\" not in the set of allowed values: [never, necessary, always]")]
    InvalidStrayFluxOption(String),

    #[error("Dimension mismatch for {what}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: BoxI,
        actual: BoxI,
    },

    #[error("No more mask planes available (requested '{0}')")]
    MaskPlanesExhausted(String),

    #[error("Least-squares solve failed: {0}")]
    LeastSquares(String),

    #[error("Object {0} already has a family")]
    AlreadyHasFamily(u32),

    #[error("Colour index {color} out of range (ncolor = {ncolor})")]
    BadColor { color: usize, ncolor: usize },

    #[error("Annulus count {requested} out of range (available {available})")]
    BadAnnulusCount { requested: usize, available: usize },

    #[error("Too few usable cells for a PSF fit: {0}")]
    TooFewCells(usize),

    #[error("PSF cell fit is singular")]
    SingularFit,
}

pub type Result<T> = std::result::Result<T, Error>;
