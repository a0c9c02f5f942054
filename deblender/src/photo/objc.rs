use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::footprint::{Footprint, Peak};
use crate::photo_trace;

// ============================================================================
// Field parameters
// ============================================================================

/// Per-colour frame parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameParams {
    /// Sky level, counts per pixel.
    pub sky: f32,
    /// Per-pixel sky noise.
    pub sky_sigma: f32,
    /// Electrons per count.
    pub gain: f32,
    /// Gaussian PSF width in pixels.
    pub psf_sigma: f64,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            sky: 0.0,
            sky_sigma: 1.0,
            gain: 1.0,
            psf_sigma: 1.5,
        }
    }
}

/// Parameters shared by every object of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldParams {
    pub frames: Vec<FrameParams>,
    /// Peaks closer than this to a brighter peak are merged into it.
    pub min_peak_spacing: f64,
    /// Maximum number of children per family; 0 means no limit.
    pub max_children: usize,
}

impl Default for FieldParams {
    fn default() -> Self {
        Self {
            frames: vec![FrameParams::default()],
            min_peak_spacing: 2.0,
            max_children: 25,
        }
    }
}

impl FieldParams {
    /// `ncolor` identical frames.
    pub fn with_frames(ncolor: usize, frame: FrameParams) -> Self {
        Self {
            frames: vec![frame; ncolor],
            ..Self::default()
        }
    }

    pub fn ncolor(&self) -> usize {
        self.frames.len()
    }
}

// ============================================================================
// Objects
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjcFlags {
    /// Object was split into children.
    pub blended: bool,
    /// Object is a child of a blend.
    pub child: bool,
    /// Object has a single peak and was not deblended.
    pub nodeblend: bool,
    /// Peaks were dropped to respect `max_children`.
    pub too_many_peaks: bool,
}

/// Measurements in one colour.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObjcColor {
    pub psf_counts: f32,
    pub psf_counts_err: f32,
    /// Fitted background level.
    pub sky: f32,
    pub chisq: f32,
}

/// A detected object and, once deblended, its family of children.
#[derive(Debug, Clone)]
pub struct Objc {
    pub id: u32,
    /// Id of the parent, for children.
    pub parent: Option<u32>,
    /// Position within the parent's family, for children.
    pub child_index: Option<usize>,
    pub flags: ObjcFlags,
    pub footprint: Footprint,
    pub peaks: Vec<Peak>,
    pub colors: Vec<ObjcColor>,
    pub children: Vec<Objc>,
}

impl Objc {
    /// Object covering `footprint`, taking its peaks.
    pub fn new(id: u32, footprint: Footprint, ncolor: usize) -> Self {
        let peaks = footprint.peaks().to_vec();
        Self {
            id,
            parent: None,
            child_index: None,
            flags: ObjcFlags::default(),
            footprint,
            peaks,
            colors: vec![ObjcColor::default(); ncolor],
            children: Vec::new(),
        }
    }

    pub fn has_family(&self) -> bool {
        !self.children.is_empty()
    }
}

// ============================================================================
// Families
// ============================================================================

/// Merge `p2` into `p1`.
///
/// The float position becomes the mean of both weighted by their positive
/// values (equal weights if neither is positive). The integer position and
/// value become those of the brighter peak.
pub fn merge_peaks(p1: &mut Peak, p2: &Peak) {
    let (mut w1, mut w2) = (p1.value.max(0.0) as f64, p2.value.max(0.0) as f64);
    if w1 + w2 <= 0.0 {
        (w1, w2) = (1.0, 1.0);
    }
    let norm = w1 + w2;
    p1.fx = (w1 * p1.fx + w2 * p2.fx) / norm;
    p1.fy = (w1 * p1.fy + w2 * p2.fy) / norm;

    if p2.value > p1.value {
        p1.ix = p2.ix;
        p1.iy = p2.iy;
        p1.value = p2.value;
    }
}

/// Give `objc` a family with one child per peak.
///
/// Peaks are taken brightest first; a peak within `min_peak_spacing` of an
/// already accepted peak is merged into it. With a single surviving peak the
/// object is flagged `nodeblend` and gets no family. Children are numbered
/// `1..=n` within the family and carry the parent's footprint with only their
/// own peak. Returns the number of children.
pub fn make_children_fake(objc: &mut Objc, fiparams: &FieldParams) -> Result<usize> {
    if objc.has_family() {
        return Err(Error::AlreadyHasFamily(objc.id));
    }

    let mut sorted = objc.peaks.clone();
    sorted.sort_by(|a, b| b.value.total_cmp(&a.value));

    let min_sep2 = fiparams.min_peak_spacing * fiparams.min_peak_spacing;
    let mut accepted: Vec<Peak> = Vec::with_capacity(sorted.len());
    for pk in &sorted {
        let close = accepted.iter_mut().find(|a| {
            let (dx, dy) = (a.fx - pk.fx, a.fy - pk.fy);
            dx * dx + dy * dy < min_sep2
        });
        match close {
            Some(a) => {
                photo_trace!(
                    "objc {}: merging peak ({},{}) into ({},{})",
                    objc.id,
                    pk.ix,
                    pk.iy,
                    a.ix,
                    a.iy
                );
                merge_peaks(a, pk);
            }
            None => accepted.push(*pk),
        }
    }

    if fiparams.max_children > 0 && accepted.len() > fiparams.max_children {
        photo_trace!(
            "objc {}: {} peaks, keeping the brightest {}",
            objc.id,
            accepted.len(),
            fiparams.max_children
        );
        accepted.truncate(fiparams.max_children);
        objc.flags.too_many_peaks = true;
    }
    objc.peaks = accepted;

    if objc.peaks.len() <= 1 {
        objc.flags.nodeblend = true;
        photo_trace!("objc {}: single peak, not deblending", objc.id);
        return Ok(0);
    }

    let ncolor = objc.colors.len();
    objc.children = objc
        .peaks
        .iter()
        .enumerate()
        .map(|(i, pk)| {
            let mut footprint = objc.footprint.clone();
            footprint.set_peaks(vec![*pk]);
            let mut child = Objc::new(i as u32 + 1, footprint, ncolor);
            child.parent = Some(objc.id);
            child.child_index = Some(i);
            child.flags.child = true;
            child
        })
        .collect();
    objc.flags.blended = true;

    photo_trace!("objc {}: made {} children", objc.id, objc.children.len());
    Ok(objc.children.len())
}
