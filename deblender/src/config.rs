//! Configuration for the baseline deblender.
//!
//! [`DeblendConfig`] is a flat struct; parameters are grouped by comments into
//! the pipeline stages they control. It deserializes from YAML or JSON through
//! `common::load_config`, with every field optional.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Enums
// ============================================================================

/// Whether templates replaced by a PSF model may receive stray flux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrayFluxToPointSources {
    /// Point sources never receive stray flux.
    Never,
    /// Only when the footprint has no extended children.
    #[default]
    Necessary,
    /// Point sources compete with extended children.
    Always,
}

impl FromStr for StrayFluxToPointSources {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "necessary" => Ok(Self::Necessary),
            "always" => Ok(Self::Always),
            other => Err(Error::InvalidStrayFluxOption(other.to_string())),
        }
    }
}

impl fmt::Display for StrayFluxToPointSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Never => "never",
            Self::Necessary => "necessary",
            Self::Always => "always",
        })
    }
}

// ============================================================================
// Deblend configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeblendConfig {
    // -- PSF fitting --
    /// Fit each peak with a PSF model and replace point-like templates.
    pub fit_psfs: bool,
    /// Reduced-chisq cut for the fit without derivative terms.
    pub psf_chisq_cut1: f64,
    /// Reduced-chisq cut for the fit with derivative terms.
    pub psf_chisq_cut2: f64,
    /// Reduced-chisq cut for the refit at the shifted centre.
    pub psf_chisq_cut2b: f64,
    /// Skip PSF fits on stamps narrower than this (pixels).
    pub tiny_footprint_size: i32,

    // -- Templates --
    /// Median-filter each symmetric template.
    pub median_smooth_template: bool,
    /// Half-size of the median filter window.
    pub median_filter_halfsize: usize,
    /// Clip templates to be monotonically decreasing from the peak.
    pub monotonic_template: bool,
    /// Keep mirrored pixels that fall off the image.
    pub patch_edges: bool,
    /// Extend templates with significant flux at the footprint edge by a
    /// PSF-shaped ramp.
    pub ramp_flux_at_edge: bool,
    /// Fit a per-template weight by least squares before apportioning.
    pub lstsq_weight_templates: bool,

    // -- Apportioning --
    /// Hand out flux that no template claims.
    pub find_stray_flux: bool,
    pub stray_flux_to_point_sources: StrayFluxToPointSources,
    /// Measure stray-flux distance to the template footprint rather than to
    /// the peak.
    pub stray_flux_r_to_footprint: bool,

    // -- Limits and noise --
    /// Deblend only the N brightest peaks (0 = all).
    pub max_number_of_peaks: usize,
    /// Per-pixel noise; `None` derives it from the median variance.
    pub sigma1: Option<f32>,

    // -- Outputs --
    /// Return the sum of all templates.
    pub get_template_sum: bool,
    /// Keep the symmetric, median-filtered and monotonic stages of each
    /// template.
    pub keep_intermediate_templates: bool,
}

impl Default for DeblendConfig {
    fn default() -> Self {
        Self {
            fit_psfs: true,
            psf_chisq_cut1: 1.5,
            psf_chisq_cut2: 1.5,
            psf_chisq_cut2b: 1.5,
            tiny_footprint_size: 2,

            median_smooth_template: true,
            median_filter_halfsize: 2,
            monotonic_template: true,
            patch_edges: false,
            ramp_flux_at_edge: false,
            lstsq_weight_templates: false,

            find_stray_flux: true,
            stray_flux_to_point_sources: StrayFluxToPointSources::Necessary,
            stray_flux_r_to_footprint: true,

            max_number_of_peaks: 0,
            sigma1: None,

            get_template_sum: false,
            keep_intermediate_templates: false,
        }
    }
}

impl DeblendConfig {
    /// Panics on out-of-range parameters.
    pub fn validate(&self) {
        for (name, cut) in [
            ("psf_chisq_cut1", self.psf_chisq_cut1),
            ("psf_chisq_cut2", self.psf_chisq_cut2),
            ("psf_chisq_cut2b", self.psf_chisq_cut2b),
        ] {
            assert!(cut > 0.0, "{name} must be positive, got {cut}");
        }
        assert!(
            self.tiny_footprint_size >= 0,
            "tiny_footprint_size must be non-negative, got {}",
            self.tiny_footprint_size
        );
        assert!(
            self.median_filter_halfsize <= 64,
            "median_filter_halfsize should be <= 64, got {}",
            self.median_filter_halfsize
        );
        if let Some(sigma1) = self.sigma1 {
            assert!(
                sigma1.is_finite() && sigma1 > 0.0,
                "sigma1 must be positive and finite, got {sigma1}"
            );
        }
    }

    /// Templates only: no PSF fitting, no smoothing.
    pub fn symmetric_only() -> Self {
        Self {
            fit_psfs: false,
            median_smooth_template: false,
            monotonic_template: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        DeblendConfig::default().validate();
        DeblendConfig::symmetric_only().validate();
    }

    #[test]
    fn test_stray_flux_option_parses() {
        assert_eq!(
            "never".parse::<StrayFluxToPointSources>().unwrap(),
            StrayFluxToPointSources::Never
        );
        assert_eq!(
            "always".parse::<StrayFluxToPointSources>().unwrap(),
            StrayFluxToPointSources::Always
        );
        let err = "sometimes".parse::<StrayFluxToPointSources>().unwrap_err();
        assert!(matches!(err, Error::InvalidStrayFluxOption(ref s) if s == "sometimes"));
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn test_display_matches_parse() {
        for opt in [
            StrayFluxToPointSources::Never,
            StrayFluxToPointSources::Necessary,
            StrayFluxToPointSources::Always,
        ] {
            assert_eq!(opt.to_string().parse::<StrayFluxToPointSources>().unwrap(), opt);
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "fit_psfs: false\nstray_flux_to_point_sources: always\nsigma1: 2.5\n";
        let config: DeblendConfig = serde_yml::from_str(yaml).unwrap();
        assert!(!config.fit_psfs);
        assert_eq!(config.stray_flux_to_point_sources, StrayFluxToPointSources::Always);
        assert_eq!(config.sigma1, Some(2.5));
        assert_eq!(config.median_filter_halfsize, 2);
        assert!(config.monotonic_template);
    }

    #[test]
    fn test_json_rejects_unknown_option() {
        let json = r#"{"stray_flux_to_point_sources": "sometimes"}"#;
        assert!(serde_json::from_str::<DeblendConfig>(json).is_err());
    }

    #[test]
    #[should_panic(expected = "psf_chisq_cut2 must be positive")]
    fn test_validate_rejects_bad_cut() {
        DeblendConfig {
            psf_chisq_cut2: 0.0,
            ..DeblendConfig::default()
        }
        .validate();
    }
}
