use rayon::prelude::*;

use crate::image::statistics::median_f32_mut;
use crate::image::ImageF;

/// Square median filter of half-size `halfsize` (window `(2h+1)²`).
///
/// Pixels closer than `halfsize` to the image border are copied unchanged, so
/// images smaller than the window come back as a plain copy.
pub fn median_filter(input: &ImageF, output: &mut ImageF, halfsize: usize) {
    assert_eq!(
        input.bbox(),
        output.bbox(),
        "median filter input and output must share a bounding box"
    );

    let width = input.width();
    let height = input.height();
    if width == 0 || height == 0 {
        return;
    }
    let src = input.pixels();
    let window = 2 * halfsize + 1;

    output
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(ly, out_row)| {
            let src_row = &src[ly * width..(ly + 1) * width];
            if ly < halfsize || ly >= height.saturating_sub(halfsize) {
                out_row.copy_from_slice(src_row);
                return;
            }

            let mut scratch = Vec::with_capacity(window * window);
            for (lx, out) in out_row.iter_mut().enumerate() {
                if lx < halfsize || lx >= width.saturating_sub(halfsize) {
                    *out = src_row[lx];
                    continue;
                }
                scratch.clear();
                for wy in ly - halfsize..=ly + halfsize {
                    let row = &src[wy * width..(wy + 1) * width];
                    scratch.extend_from_slice(&row[lx - halfsize..=lx + halfsize]);
                }
                *out = median_f32_mut(&mut scratch);
            }
        });
}
