use crate::footprint::Footprint;
use crate::image::ImageF;

/// True if any edge pixel of `foot` has `img >= threshold`.
pub fn has_significant_flux_at_edge(img: &ImageF, foot: &Footprint, threshold: f32) -> bool {
    foot.pixels()
        .filter(|&(x, y)| foot.is_edge_pixel(x, y))
        .any(|(x, y)| img.try_get(x, y).is_some_and(|v| v >= threshold))
}

/// Edge pixels of `foot` with `img >= threshold`, as a footprint.
pub fn significant_edge_pixels(img: &ImageF, foot: &Footprint, threshold: f32) -> Footprint {
    Footprint::from_pixels(
        foot.pixels()
            .filter(|&(x, y)| foot.is_edge_pixel(x, y))
            .filter(|&(x, y)| img.try_get(x, y).is_some_and(|v| v >= threshold)),
    )
}
