//! Per-footprint and per-peak deblend results.

use glam::DVec2;

use crate::footprint::{Footprint, HeavyFootprint, Peak};
use crate::geom::BoxI;
use crate::image::ImageF;

/// `(chisq, dof)` of one PSF fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitQuality {
    pub chisq: f64,
    pub dof: f64,
}

impl FitQuality {
    #[inline]
    pub fn reduced_chisq(&self) -> f64 {
        self.chisq / self.dof
    }
}

/// What the PSF fit learned about a peak.
#[derive(Debug, Clone, PartialEq)]
pub struct PsfFitSummary {
    /// Radius of full weight.
    pub r0: i32,
    /// Radius where the weight ramps to zero.
    pub r1: i32,
    pub stamp: BoxI,
    /// Fit centre, moved by the decenter terms when that model was kept.
    pub center: DVec2,
    pub best: FitQuality,
    /// Parameters of the kept model: flux, sky, sky x/y slopes, neighbour
    /// fluxes, then the derivative terms if present.
    pub params: Vec<f64>,
    pub flux: f64,
    /// Neighbouring peaks modelled as extra PSF terms.
    pub n_others: usize,
}

/// A template image and the footprint it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakTemplate {
    pub image: ImageF,
    pub footprint: Footprint,
}

/// Result of deblending one peak of a parent footprint.
#[derive(Debug, Clone)]
pub struct PerPeak {
    pub peak: Peak,
    pub index: usize,

    /// Set by any of the skip reasons below.
    pub skip: bool,
    pub out_of_bounds: bool,
    pub tiny_footprint: bool,
    pub no_valid_pixels: bool,
    pub failed_symmetric_template: bool,

    pub deblended_as_psf: bool,
    pub psf_fit_failed: bool,
    pub bad_psf_dof: bool,
    /// The fit with derivative terms wanted to move the centre a pixel or more.
    pub psf_fit_big_decenter: bool,
    /// The shifted-PSF model was kept.
    pub psf_fit_with_decenter: bool,
    /// Fit without derivative terms.
    pub psf_fit1: Option<FitQuality>,
    /// Fit with derivative terms.
    pub psf_fit2: Option<FitQuality>,
    /// Refit at the shifted centre.
    pub psf_fit3: Option<FitQuality>,
    pub psf_fit: Option<PsfFitSummary>,

    pub template: Option<PeakTemplate>,
    pub template_weight: f64,
    /// Flux apportioned to this peak, over the template's bounding box.
    pub portion: Option<ImageF>,
    pub stray_flux: Option<HeavyFootprint>,

    pub has_ramped_template: bool,
    pub orig_template: Option<PeakTemplate>,
    pub ramped_template: Option<ImageF>,
    pub median_filtered_template: Option<ImageF>,
}

impl PerPeak {
    pub fn new(index: usize, peak: Peak) -> Self {
        Self {
            peak,
            index,
            skip: false,
            out_of_bounds: false,
            tiny_footprint: false,
            no_valid_pixels: false,
            failed_symmetric_template: false,
            deblended_as_psf: false,
            psf_fit_failed: false,
            bad_psf_dof: false,
            psf_fit_big_decenter: false,
            psf_fit_with_decenter: false,
            psf_fit1: None,
            psf_fit2: None,
            psf_fit3: None,
            psf_fit: None,
            template: None,
            template_weight: 1.0,
            portion: None,
            stray_flux: None,
            has_ramped_template: false,
            orig_template: None,
            ramped_template: None,
            median_filtered_template: None,
        }
    }

    pub fn set_out_of_bounds(&mut self) {
        self.out_of_bounds = true;
        self.skip = true;
    }

    pub fn set_tiny_footprint(&mut self) {
        self.tiny_footprint = true;
        self.skip = true;
    }

    pub fn set_no_valid_pixels(&mut self) {
        self.no_valid_pixels = true;
        self.skip = true;
    }

    pub fn set_failed_symmetric_template(&mut self) {
        self.failed_symmetric_template = true;
        self.skip = true;
    }

    pub fn set_psf_fit_failed(&mut self) {
        self.psf_fit_failed = true;
    }

    pub fn set_bad_psf_dof(&mut self) {
        self.bad_psf_dof = true;
    }

    pub fn set_deblended_as_psf(&mut self) {
        self.deblended_as_psf = true;
    }

    pub fn set_template(&mut self, image: ImageF, footprint: Footprint) {
        self.template = Some(PeakTemplate { image, footprint });
    }

    pub fn set_template_weight(&mut self, weight: f64) {
        self.template_weight = weight;
    }

    pub fn set_apportioned_flux(&mut self, portion: ImageF) {
        self.portion = Some(portion);
    }

    pub fn set_stray_flux(&mut self, stray: Option<HeavyFootprint>) {
        self.stray_flux = stray;
    }

    pub fn set_orig_template(&mut self, image: &ImageF, footprint: &Footprint) {
        self.orig_template = Some(PeakTemplate {
            image: image.clone(),
            footprint: footprint.clone(),
        });
    }

    pub fn set_ramped_template(&mut self, image: &ImageF) {
        self.has_ramped_template = true;
        self.ramped_template = Some(image.clone());
    }

    pub fn set_median_filtered_template(&mut self, image: &ImageF) {
        self.median_filtered_template = Some(image.clone());
    }

    /// Apportioned flux as a heavy footprint carrying this peak, optionally
    /// merged with the stray flux. `None` until flux has been apportioned.
    pub fn flux_portion(&self, include_stray: bool) -> Option<HeavyFootprint> {
        let template = self.template.as_ref()?;
        let portion = self.portion.as_ref()?;

        let mut heavy = HeavyFootprint::from_image(template.footprint.clone(), portion);
        heavy.footprint_mut().set_peaks(vec![self.peak]);

        match (&self.stray_flux, include_stray) {
            (Some(stray), true) => Some(HeavyFootprint::merge(&heavy, stray)),
            _ => Some(heavy),
        }
    }
}

/// Result of deblending one parent footprint.
#[derive(Debug, Clone)]
pub struct PerFootprint {
    pub peaks: Vec<PerPeak>,
    /// Sum of all templates, when requested.
    pub template_sum: Option<ImageF>,
}

impl PerFootprint {
    pub fn new(peaks: &[Peak]) -> Self {
        Self {
            peaks: peaks
                .iter()
                .enumerate()
                .map(|(i, pk)| PerPeak::new(i, *pk))
                .collect(),
            template_sum: None,
        }
    }

    pub fn set_template_sum(&mut self, sum: ImageF) {
        self.template_sum = Some(sum);
    }

    /// Peaks that produced a template.
    pub fn deblended(&self) -> impl Iterator<Item = &PerPeak> {
        self.peaks.iter().filter(|p| !p.skip)
    }
}
