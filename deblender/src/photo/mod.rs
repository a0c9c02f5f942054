//! SDSS `photo`-style object families.
//!
//! Stand-ins for the `photo` pipeline routines the deblender is tested
//! against: merging close peaks, splitting an object into one child per peak,
//! and fitting a PSF to a radial cell profile.

mod cell;
mod objc;


pub use cell::{fit_cell_as_psf_fake, Annulus, Cell, CellPsfFit, CellStats};
pub use objc::{
    make_children_fake, merge_peaks, FieldParams, FrameParams, Objc, ObjcColor, ObjcFlags,
};

/// Trace-level diagnostics for the `photo` layer.
///
/// Takes `format!`-style arguments and logs them under the
/// `deblender::photo` target.
#[macro_export]
macro_rules! photo_trace {
    ($($arg:tt)*) => {
        $crate::tracing::trace!(target: "deblender::photo", $($arg)*)
    };
}
