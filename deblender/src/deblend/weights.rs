//! Least-squares template weights.

use nalgebra::{DMatrix, DVector};

use super::PerPeak;
use crate::error::Result;
use crate::geom::BoxI;
use crate::image::ImageF;
use crate::lstsq::lstsq;

/// Rescale every template so their weighted sum best matches `image` over
/// `bbox`. Each template is multiplied by its weight, which is also recorded
/// on the peak.
pub(super) fn weight_templates(image: &ImageF, bbox: &BoxI, peaks: &mut [PerPeak]) -> Result<()> {
    let active: Vec<usize> = peaks
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.skip && p.template.is_some())
        .map(|(i, _)| i)
        .collect();
    if active.is_empty() {
        return Ok(());
    }

    let width = bbox.width();
    let npix = bbox.area();
    let row_of = |x: i32, y: i32| (y - bbox.y_min) as usize * width + (x - bbox.x_min) as usize;

    let mut a = DMatrix::<f64>::zeros(npix, active.len());
    for (col, &i) in active.iter().enumerate() {
        let Some(t) = peaks[i].template.as_ref() else {
            continue;
        };
        for (x, y) in t.footprint.pixels() {
            if bbox.contains(x, y) {
                a[(row_of(x, y), col)] = t.image.try_get(x, y).unwrap_or(0.0) as f64;
            }
        }
    }
    let b = DVector::from_iterator(npix, bbox.pixels().map(|(x, y)| image[(x, y)] as f64));

    let solution = lstsq(&a, &b)?;
    for (&i, &w) in active.iter().zip(solution.x.iter()) {
        let pkres = &mut peaks[i];
        if let Some(t) = pkres.template.as_mut() {
            t.image.scale(w as f32);
        }
        pkres.set_template_weight(w);
    }
    tracing::debug!("Template weights: {:?}", solution.x.as_slice());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::{Footprint, Peak};

    #[test]
    fn test_weights_recover_scaling() {
        let bbox = BoxI::new(0, 9, 0, 0);
        let left = Footprint::from_bbox(BoxI::new(0, 4, 0, 0));
        let right = Footprint::from_bbox(BoxI::new(5, 9, 0, 0));

        let mut image = ImageF::new(bbox);
        for x in 0..5 {
            image[(x, 0)] = 2.0 * (x + 1) as f32;
        }
        for x in 5..10 {
            image[(x, 0)] = 0.5;
        }

        let mut peaks = vec![
            PerPeak::new(0, Peak::new(2, 0, 6.0)),
            PerPeak::new(1, Peak::new(7, 0, 0.5)),
            PerPeak::new(2, Peak::new(8, 0, 0.5)),
        ];
        let mut lt = ImageF::new(left.bbox());
        for x in 0..5 {
            lt[(x, 0)] = (x + 1) as f32;
        }
        peaks[0].set_template(lt, left);
        peaks[1].set_template(ImageF::new_filled(right.bbox(), 1.0), right);
        peaks[2].set_out_of_bounds();

        weight_templates(&image, &bbox, &mut peaks).unwrap();

        assert!((peaks[0].template_weight - 2.0).abs() < 1e-6);
        assert!((peaks[1].template_weight - 0.5).abs() < 1e-6);
        assert_eq!(peaks[2].template_weight, 1.0);
        let t0 = &peaks[0].template.as_ref().unwrap().image;
        assert!((t0[(4, 0)] - 10.0).abs() < 1e-4);
    }
}
