use crate::footprint::Peak;
use crate::image::ImageF;

/// Clip `template` so it never increases walking outwards from `peak`.
///
/// Pixels are visited in Chebyshev rings of growing radius. Each pixel is
/// limited to its inward neighbour: one step towards the peak along the
/// dominant axis, or along both axes near the diagonals. Every inward
/// neighbour lies on the previous ring and is already final.
///
/// Returns the pixels lowered by more than `sigma1`.
pub fn make_monotonic(template: &mut ImageF, peak: &Peak, sigma1: f32) -> Vec<(i32, i32)> {
    let bbox = template.bbox();
    let (cx, cy) = (peak.ix, peak.iy);
    let mut clipped = Vec::new();
    if !bbox.contains(cx, cy) {
        return clipped;
    }

    let max_ring = (cx - bbox.x_min)
        .max(bbox.x_max - cx)
        .max(cy - bbox.y_min)
        .max(bbox.y_max - cy);

    for d in 1..=max_ring {
        let y_lo = (cy - d).max(bbox.y_min);
        let y_hi = (cy + d).min(bbox.y_max);
        let x_lo = (cx - d).max(bbox.x_min);
        let x_hi = (cx + d).min(bbox.x_max);

        for y in y_lo..=y_hi {
            if (y - cy).abs() == d {
                for x in x_lo..=x_hi {
                    clip_to_inward(template, cx, cy, x, y, sigma1, &mut clipped);
                }
            } else {
                for x in [cx - d, cx + d] {
                    if x >= bbox.x_min && x <= bbox.x_max {
                        clip_to_inward(template, cx, cy, x, y, sigma1, &mut clipped);
                    }
                }
            }
        }
    }
    clipped
}

#[inline]
fn clip_to_inward(
    template: &mut ImageF,
    cx: i32,
    cy: i32,
    x: i32,
    y: i32,
    sigma1: f32,
    clipped: &mut Vec<(i32, i32)>,
) {
    let (ix, iy) = inward_neighbor(x - cx, y - cy);
    let inward = template[(x - ix, y - iy)];
    let v = template[(x, y)];
    if v > inward {
        template[(x, y)] = inward;
        if v - inward > sigma1 {
            clipped.push((x, y));
        }
    }
}

/// Step (subtracted from the pixel position) that moves one ring inwards.
#[inline]
fn inward_neighbor(dx: i32, dy: i32) -> (i32, i32) {
    let (ax, ay) = (dx.abs(), dy.abs());
    let sx = if 2 * ax >= ay { dx.signum() } else { 0 };
    let sy = if 2 * ay >= ax { dy.signum() } else { 0 };
    (sx, sy)
}
