use crate::footprint::{Footprint, Peak};
use crate::image::{ImageF, Mask, MaskedImage};

/// Build the 180°-symmetric template of `peak` inside `foot`.
///
/// A pixel `p` belongs to the template when its mirror `2·peak − p` is also in
/// the footprint; its value is the smaller of the pair, floored at zero. With
/// `patch_edges`, pixels whose mirror falls off the image are kept with their
/// own value. Returns `None` if the peak is not inside the footprint.
pub fn build_symmetric_template(
    mimg: &MaskedImage,
    foot: &Footprint,
    peak: &Peak,
    patch_edges: bool,
) -> Option<(ImageF, Footprint)> {
    let img = &mimg.image;
    let imbb = img.bbox();

    let mut foot = foot.clipped_to(&imbb);
    foot.normalize();

    let (cx, cy) = (peak.ix, peak.iy);
    if !foot.contains(cx, cy) {
        return None;
    }

    let mut samples: Vec<(i32, i32, f32)> = Vec::with_capacity(foot.area());
    for (x, y) in foot.pixels() {
        let (mx, my) = (2 * cx - x, 2 * cy - y);
        let value = if foot.contains(mx, my) {
            img[(x, y)].min(img[(mx, my)])
        } else if patch_edges && !imbb.contains(mx, my) {
            img[(x, y)]
        } else {
            continue;
        };
        samples.push((x, y, value.max(0.0)));
    }

    let mut tfoot = Footprint::from_pixels(samples.iter().map(|&(x, y, _)| (x, y)));
    if tfoot.is_empty() {
        return None;
    }
    tfoot.add_peak(*peak);

    let mut template = ImageF::new(tfoot.bbox());
    for (x, y, v) in samples {
        template[(x, y)] = v;
    }
    Some((template, tfoot))
}

/// Mark template pixels whose value differs from their mirror by more than
/// one (`bit_1sig`) or three (`bit_3sig`) times `sigma1`.
///
/// Returns the number of pixels flagged at the 1σ level.
pub fn flag_asymmetry(
    mask: &mut Mask,
    img: &ImageF,
    template_foot: &Footprint,
    peak: &Peak,
    sigma1: f32,
    bit_1sig: u32,
    bit_3sig: u32,
) -> usize {
    let (cx, cy) = (peak.ix, peak.iy);
    let mbox = mask.bbox();
    let mut flagged = 0;

    for (x, y) in template_foot.pixels() {
        let (mx, my) = (2 * cx - x, 2 * cy - y);
        let (Some(v), Some(mirror)) = (img.try_get(x, y), img.try_get(mx, my)) else {
            continue;
        };
        if !mbox.contains(x, y) {
            continue;
        }
        let diff = (v - mirror).abs();
        if diff > sigma1 {
            mask[(x, y)] |= bit_1sig;
            flagged += 1;
        }
        if diff > 3.0 * sigma1 {
            mask[(x, y)] |= bit_3sig;
        }
    }
    flagged
}
