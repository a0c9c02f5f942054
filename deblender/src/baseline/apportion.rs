use crate::config::StrayFluxToPointSources;
use crate::footprint::{Footprint, HeavyFootprint};
use crate::image::{ImageF, MaskedImage};

/// One child's template as seen by [`apportion_flux`].
#[derive(Debug, Clone, Copy)]
pub struct Template<'a> {
    pub image: &'a ImageF,
    pub footprint: &'a Footprint,
    /// Template was replaced by a PSF model.
    pub is_psf: bool,
    /// Integer peak position.
    pub peak: (i32, i32),
}

/// How flux no template claims is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrayFluxOptions {
    pub assign: bool,
    pub to_point_sources: StrayFluxToPointSources,
    /// Measure the stray-flux distance to the template footprint instead of
    /// to the peak.
    pub r_to_footprint: bool,
}

impl Default for StrayFluxOptions {
    fn default() -> Self {
        Self {
            assign: true,
            to_point_sources: StrayFluxToPointSources::Necessary,
            r_to_footprint: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApportionResult {
    /// Flux portion per template, over the template's bounding box.
    pub portions: Vec<ImageF>,
    /// Stray flux per template, `None` when it received none.
    pub stray: Vec<Option<HeavyFootprint>>,
}

/// Split the parent's flux among `templates`.
///
/// At each pixel of `foot`, template `i` receives
/// `img · max(0, t_i) / Σ_j max(0, t_j)`. `sum_image` (bounding box of
/// `foot`) receives the template sum. Pixels where the sum is zero are stray
/// flux: when `options.assign` is set they are shared among the eligible
/// templates with weights `1 / (1 + r²)`.
pub fn apportion_flux(
    mimg: &MaskedImage,
    foot: &Footprint,
    templates: &[Template<'_>],
    sum_image: &mut ImageF,
    options: &StrayFluxOptions,
) -> ApportionResult {
    let img = &mimg.image;
    let imbb = img.bbox();

    sum_image.fill(0.0);
    for t in templates {
        for (x, y) in t.footprint.pixels() {
            if sum_image.contains(x, y) && foot.contains(x, y) {
                sum_image[(x, y)] += t.image.try_get(x, y).unwrap_or(0.0).max(0.0);
            }
        }
    }

    let portions: Vec<ImageF> = templates
        .iter()
        .map(|t| {
            let mut portion = ImageF::new(t.footprint.bbox());
            for (x, y) in t.footprint.pixels() {
                if !foot.contains(x, y) || !imbb.contains(x, y) || !sum_image.contains(x, y) {
                    continue;
                }
                let sum = sum_image[(x, y)];
                if sum > 0.0 {
                    let tv = t.image.try_get(x, y).unwrap_or(0.0).max(0.0);
                    portion[(x, y)] = img[(x, y)] * tv / sum;
                }
            }
            portion
        })
        .collect();

    let mut stray: Vec<Option<HeavyFootprint>> = vec![None; templates.len()];
    if !options.assign || templates.is_empty() {
        return ApportionResult { portions, stray };
    }

    let eligible = stray_eligible(templates, options.to_point_sources);
    if eligible.is_empty() {
        return ApportionResult { portions, stray };
    }

    let mut samples: Vec<Vec<(i32, i32, f32)>> = vec![Vec::new(); templates.len()];
    let mut weights = vec![0.0f64; eligible.len()];
    for (x, y) in foot.pixels() {
        if !imbb.contains(x, y) || !sum_image.contains(x, y) || sum_image[(x, y)] > 0.0 {
            continue;
        }
        for (w, &i) in weights.iter_mut().zip(&eligible) {
            let t = &templates[i];
            let r2 = if options.r_to_footprint {
                t.footprint.distance_squared_to(x, y).unwrap_or(0) as f64
            } else {
                let dx = (x - t.peak.0) as f64;
                let dy = (y - t.peak.1) as f64;
                dx * dx + dy * dy
            };
            *w = 1.0 / (1.0 + r2);
        }
        let total: f64 = weights.iter().sum();
        let value = img[(x, y)] as f64;
        for (w, &i) in weights.iter().zip(&eligible) {
            samples[i].push((x, y, (value * w / total) as f32));
        }
    }

    for (slot, pixels) in stray.iter_mut().zip(samples) {
        if !pixels.is_empty() {
            *slot = Some(HeavyFootprint::from_pixel_values(pixels));
        }
    }
    ApportionResult { portions, stray }
}

/// Indices of templates allowed to receive stray flux.
fn stray_eligible(templates: &[Template<'_>], mode: StrayFluxToPointSources) -> Vec<usize> {
    let extended: Vec<usize> = (0..templates.len())
        .filter(|&i| !templates[i].is_psf)
        .collect();
    match mode {
        StrayFluxToPointSources::Never => extended,
        StrayFluxToPointSources::Always => (0..templates.len()).collect(),
        StrayFluxToPointSources::Necessary if extended.is_empty() => {
            (0..templates.len()).collect()
        }
        StrayFluxToPointSources::Necessary => extended,
    }
}
