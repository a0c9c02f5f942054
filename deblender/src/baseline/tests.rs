use super::*;
use crate::config::StrayFluxToPointSources;
use crate::footprint::Peak;
use crate::geom::BoxI;
use crate::image::Mask;
use crate::testing::{two_source_blend, Lcg};

/// 5×3 image at the origin with `value = x + 10·y`.
fn ramp_image() -> MaskedImage {
    let mut mimg = MaskedImage::new(BoxI::new(0, 4, 0, 2));
    for (x, y) in mimg.bbox().pixels() {
        mimg.image[(x, y)] = (x + 10 * y) as f32;
    }
    mimg
}

// ============================================================================
// Symmetric templates
// ============================================================================

#[test]
fn test_symmetric_template_takes_pairwise_minimum() {
    let mut mimg = ramp_image();
    mimg.image[(0, 1)] = -5.0;
    let foot = Footprint::from_bbox(mimg.bbox());
    let peak = Peak::new(2, 1, 12.0);

    let (t, tfoot) = build_symmetric_template(&mimg, &foot, &peak, false).unwrap();

    assert_eq!(tfoot.area(), 15);
    assert_eq!(tfoot.peaks().len(), 1);
    assert_eq!(t[(2, 1)], 12.0);
    // (1,1) mirrors (3,1)
    assert_eq!(t[(1, 1)], 11.0);
    assert_eq!(t[(3, 1)], 11.0);
    // (0,0) mirrors (4,2)
    assert_eq!(t[(0, 0)], 0.0);
    assert_eq!(t[(4, 2)], 0.0);
    // Negative pixel floors both partners at zero
    assert_eq!(t[(0, 1)], 0.0);
    assert_eq!(t[(4, 1)], 0.0);
}

#[test]
fn test_symmetric_template_drops_unpaired_pixels() {
    let mimg = ramp_image();
    let foot = Footprint::from_pixels(
        mimg.bbox()
            .pixels()
            .filter(|&(x, y)| (x, y) != (4, 2)),
    );
    let peak = Peak::new(2, 1, 12.0);

    let (_, tfoot) = build_symmetric_template(&mimg, &foot, &peak, false).unwrap();

    assert_eq!(tfoot.area(), 13);
    assert!(!tfoot.contains(0, 0));
    assert!(!tfoot.contains(4, 2));
    assert!(tfoot.contains(1, 0));
}

#[test]
fn test_symmetric_template_patch_edges() {
    let mimg = ramp_image();
    let foot = Footprint::from_bbox(mimg.bbox());
    let peak = Peak::new(1, 1, 11.0);

    let (_, plain) = build_symmetric_template(&mimg, &foot, &peak, false).unwrap();
    assert_eq!(plain.area(), 9);
    assert!(!plain.contains(3, 1));

    let (t, patched) = build_symmetric_template(&mimg, &foot, &peak, true).unwrap();
    assert_eq!(patched.area(), 15);
    assert_eq!(t[(4, 2)], 24.0);
}

#[test]
fn test_symmetric_template_peak_outside_footprint() {
    let mimg = ramp_image();
    let foot = Footprint::from_bbox(BoxI::new(0, 1, 0, 2));
    let peak = Peak::new(3, 1, 13.0);
    assert!(build_symmetric_template(&mimg, &foot, &peak, false).is_none());
}

#[test]
fn test_symmetric_template_of_symmetric_source_is_the_source() {
    let (mimg, foot, sources) = two_source_blend(0.0, 1);
    let first = &foot.peaks()[0];
    let (t, tfoot) = build_symmetric_template(&mimg, &foot, first, false).unwrap();

    // Close to the brighter source the companion is negligible on both sides,
    // so the template is the image itself.
    let (cx, cy) = (sources[0].x as i32, sources[0].y as i32);
    for (dx, dy) in [(0, 0), (-1, 0), (0, 1), (-2, -1)] {
        let (x, y) = (cx + dx, cy + dy);
        assert!(tfoot.contains(x, y));
        let mirror = mimg.image[(2 * cx - x, 2 * cy - y)];
        assert_eq!(t[(x, y)], mimg.image[(x, y)].min(mirror));
    }
    // Towards the companion the template follows the fainter mirror side.
    assert!(t[(cx + 4, cy)] < mimg.image[(cx + 4, cy)]);
}

#[test]
fn test_flag_asymmetry() {
    let mimg = ramp_image();
    let foot = Footprint::from_bbox(mimg.bbox());
    let peak = Peak::new(2, 1, 12.0);
    let (_, tfoot) = build_symmetric_template(&mimg, &foot, &peak, false).unwrap();

    let mut mask = Mask::new(mimg.bbox());
    // |img - mirror| is 2 for (1,1)/(3,1), 4 for (0,1)/(4,1), 20+ across rows
    let flagged = flag_asymmetry(&mut mask, &mimg.image, &tfoot, &peak, 3.0, 0x1, 0x2);

    assert_eq!(mask[(2, 1)], 0);
    assert_eq!(mask[(1, 1)], 0);
    assert_eq!(mask[(0, 1)], 0x1);
    assert_eq!(mask[(0, 0)], 0x3);
    assert_eq!(flagged, 12);
}

// ============================================================================
// Median filter
// ============================================================================

#[test]
fn test_median_filter_removes_spike() {
    let bbox = BoxI::from_origin(10, 20, 7, 7);
    let mut input = ImageF::new_filled(bbox, 1.0);
    input[(13, 23)] = 100.0;
    input[(10, 20)] = 50.0;

    let mut output = ImageF::new(bbox);
    median_filter(&input, &mut output, 1);

    assert_eq!(output[(13, 23)], 1.0);
    // Border pixels are copied
    assert_eq!(output[(10, 20)], 50.0);
    assert_eq!(output[(12, 22)], 1.0);
}

#[test]
fn test_median_filter_small_image_is_copied() {
    let bbox = BoxI::from_origin(0, 0, 2, 2);
    let input = ImageF::from_vec(bbox, vec![1.0, 2.0, 3.0, 4.0]);
    let mut output = ImageF::new(bbox);
    median_filter(&input, &mut output, 2);
    assert_eq!(output.pixels(), input.pixels());
}

#[test]
fn test_median_filter_matches_brute_force() {
    let bbox = BoxI::from_origin(-3, 4, 12, 9);
    let mut rng = Lcg::new(7);
    let input = ImageF::from_vec(bbox, (0..bbox.area()).map(|_| rng.next_f32()).collect());
    let mut output = ImageF::new(bbox);
    median_filter(&input, &mut output, 2);

    for (x, y) in bbox.pixels() {
        let interior = x - 2 >= bbox.x_min
            && x + 2 <= bbox.x_max
            && y - 2 >= bbox.y_min
            && y + 2 <= bbox.y_max;
        if !interior {
            assert_eq!(output[(x, y)], input[(x, y)]);
            continue;
        }
        let mut window: Vec<f32> = BoxI::new(x - 2, x + 2, y - 2, y + 2)
            .pixels()
            .map(|(wx, wy)| input[(wx, wy)])
            .collect();
        window.sort_by(f32::total_cmp);
        assert_eq!(output[(x, y)], window[12]);
    }
}

// ============================================================================
// Monotonic templates
// ============================================================================

#[test]
fn test_make_monotonic_row() {
    let bbox = BoxI::new(0, 4, 0, 0);
    let mut t = ImageF::from_vec(bbox, vec![1.0, 5.0, 3.0, 4.0, 10.0]);
    let peak = Peak::new(1, 0, 5.0);

    let clipped = make_monotonic(&mut t, &peak, 2.0);

    assert_eq!(t.pixels(), &[1.0f32, 5.0, 3.0, 3.0, 3.0]);
    assert_eq!(clipped, vec![(4, 0)]);
}

#[test]
fn test_make_monotonic_axes_decrease_from_peak() {
    let bbox = BoxI::from_origin(0, 0, 15, 11);
    let mut rng = Lcg::new(42);
    let mut t = ImageF::from_vec(
        bbox,
        (0..bbox.area()).map(|_| rng.next_f32() * 10.0).collect(),
    );
    let (cx, cy) = (6, 4);
    t[(cx, cy)] = 20.0;
    let peak = Peak::new(cx, cy, 20.0);

    make_monotonic(&mut t, &peak, 1.0);

    assert_eq!(t[(cx, cy)], 20.0);
    assert_eq!(t.max_value(), Some(20.0));
    for x in cx + 1..=bbox.x_max {
        assert!(t[(x, cy)] <= t[(x - 1, cy)]);
    }
    for x in bbox.x_min..cx {
        assert!(t[(x, cy)] <= t[(x + 1, cy)]);
    }
    for y in cy + 1..=bbox.y_max {
        assert!(t[(cx, y)] <= t[(cx, y - 1)]);
    }
    for y in bbox.y_min..cy {
        assert!(t[(cx, y)] <= t[(cx, y + 1)]);
    }
}

#[test]
fn test_make_monotonic_peak_outside_is_noop() {
    let bbox = BoxI::new(0, 2, 0, 0);
    let mut t = ImageF::from_vec(bbox, vec![1.0, 3.0, 9.0]);
    let clipped = make_monotonic(&mut t, &Peak::new(7, 0, 1.0), 0.5);
    assert!(clipped.is_empty());
    assert_eq!(t.pixels(), &[1.0f32, 3.0, 9.0]);
}

// ============================================================================
// Edges and copies
// ============================================================================

#[test]
fn test_significant_flux_at_edge() {
    let bbox = BoxI::new(0, 4, 0, 4);
    let foot = Footprint::from_bbox(bbox);
    let mut img = ImageF::new(bbox);
    img[(2, 2)] = 10.0;

    assert!(!has_significant_flux_at_edge(&img, &foot, 5.0));
    assert!(significant_edge_pixels(&img, &foot, 5.0).is_empty());

    img[(0, 2)] = 6.0;
    img[(4, 4)] = 5.0;
    assert!(has_significant_flux_at_edge(&img, &foot, 5.0));
    let edge = significant_edge_pixels(&img, &foot, 5.0);
    assert_eq!(edge.area(), 2);
    assert!(edge.contains(0, 2));
    assert!(edge.contains(4, 4));
}

#[test]
fn test_copy_within_footprint() {
    let src = ImageF::new_filled(BoxI::new(0, 4, 0, 4), 7.0);
    let mut dst = ImageF::new(BoxI::new(2, 6, 0, 4));
    let foot = Footprint::from_bbox(BoxI::new(1, 3, 1, 1));

    copy_within_footprint(&foot, &src, &mut dst);

    assert_eq!(dst[(2, 1)], 7.0);
    assert_eq!(dst[(3, 1)], 7.0);
    assert_eq!(dst[(4, 1)], 0.0);
    assert_eq!(dst[(2, 0)], 0.0);
}

#[test]
fn test_copy_masked_within_footprint() {
    let mut src = MaskedImage::new(BoxI::new(0, 2, 0, 2));
    src.image.fill(3.0);
    src.variance.fill(0.5);
    src.mask.fill(0x4);
    let mut dst = MaskedImage::new(src.bbox());
    let foot = Footprint::from_pixels([(1, 1)]);

    copy_masked_within_footprint(&foot, &src, &mut dst);

    assert_eq!(dst.image[(1, 1)], 3.0);
    assert_eq!(dst.variance[(1, 1)], 0.5);
    assert_eq!(dst.mask[(1, 1)], 0x4);
    assert_eq!(dst.image[(0, 0)], 0.0);
}

// ============================================================================
// Apportioning
// ============================================================================

#[test]
fn test_apportion_conserves_flux() {
    let (mimg, foot, sources) = two_source_blend(0.0, 3);
    let models: Vec<ImageF> = sources
        .iter()
        .map(|s| {
            let mut m = ImageF::new(foot.bbox());
            for (x, y) in foot.pixels() {
                m[(x, y)] = s.value_at(x, y) as f32;
            }
            m
        })
        .collect();
    let templates: Vec<Template<'_>> = models
        .iter()
        .zip(&sources)
        .map(|(m, s)| Template {
            image: m,
            footprint: &foot,
            is_psf: false,
            peak: (s.x as i32, s.y as i32),
        })
        .collect();

    let mut sum = ImageF::new(foot.bbox());
    let result = apportion_flux(&mimg, &foot, &templates, &mut sum, &StrayFluxOptions::default());

    let total: f64 = foot.pixels().map(|(x, y)| mimg.image[(x, y)] as f64).sum();
    let apportioned: f64 = result.portions.iter().map(|p| p.sum()).sum();
    assert!((apportioned - total).abs() < 1e-4 * total);
    assert!(result.stray.iter().all(Option::is_none));

    // Noise-free scene with exact models: each portion is its source.
    let (x, y) = (sources[0].x as i32, sources[0].y as i32);
    let expected = sources[0].value_at(x, y) as f32;
    assert!((result.portions[0][(x, y)] - expected).abs() < 1e-3 * expected);
}

struct StrayScene {
    mimg: MaskedImage,
    parent: Footprint,
    left: Footprint,
    right: Footprint,
    left_img: ImageF,
    right_img: ImageF,
}

/// Row of ten unit pixels; templates cover x ∈ [0, 2] and x ∈ [7, 9].
fn stray_scene() -> StrayScene {
    let bbox = BoxI::new(0, 9, 0, 0);
    let mut mimg = MaskedImage::new(bbox);
    mimg.image.fill(1.0);
    let left = Footprint::from_bbox(BoxI::new(0, 2, 0, 0));
    let right = Footprint::from_bbox(BoxI::new(7, 9, 0, 0));
    StrayScene {
        left_img: ImageF::new_filled(left.bbox(), 1.0),
        right_img: ImageF::new_filled(right.bbox(), 1.0),
        parent: Footprint::from_bbox(bbox),
        mimg,
        left,
        right,
    }
}

impl StrayScene {
    fn templates(&self, left_psf: bool, right_psf: bool) -> [Template<'_>; 2] {
        [
            Template {
                image: &self.left_img,
                footprint: &self.left,
                is_psf: left_psf,
                peak: (1, 0),
            },
            Template {
                image: &self.right_img,
                footprint: &self.right,
                is_psf: right_psf,
                peak: (8, 0),
            },
        ]
    }

    fn run(&self, templates: &[Template<'_>], options: StrayFluxOptions) -> ApportionResult {
        let mut sum = ImageF::new(self.parent.bbox());
        apportion_flux(&self.mimg, &self.parent, templates, &mut sum, &options)
    }
}

fn options(mode: StrayFluxToPointSources, r_to_footprint: bool) -> StrayFluxOptions {
    StrayFluxOptions {
        assign: true,
        to_point_sources: mode,
        r_to_footprint,
    }
}

#[test]
fn test_stray_flux_necessary_skips_point_sources() {
    let scene = stray_scene();
    let result = scene.run(
        &scene.templates(false, true),
        options(StrayFluxToPointSources::Necessary, false),
    );

    assert_eq!(result.portions[0].sum(), 3.0);
    assert_eq!(result.portions[1].sum(), 3.0);
    let stray = result.stray[0].as_ref().unwrap();
    assert_eq!(stray.footprint().area(), 4);
    assert!((stray.sum() - 4.0).abs() < 1e-6);
    assert!(result.stray[1].is_none());
}

#[test]
fn test_stray_flux_necessary_falls_back_to_point_sources() {
    let scene = stray_scene();
    let result = scene.run(
        &scene.templates(true, true),
        options(StrayFluxToPointSources::Necessary, false),
    );
    let total: f64 = result.stray.iter().flatten().map(|h| h.sum()).sum();
    assert!((total - 4.0).abs() < 1e-6);
    assert!(result.stray.iter().all(Option::is_some));
}

#[test]
fn test_stray_flux_never_with_only_point_sources() {
    let scene = stray_scene();
    let result = scene.run(
        &scene.templates(true, true),
        options(StrayFluxToPointSources::Never, false),
    );
    assert!(result.stray.iter().all(Option::is_none));
}

#[test]
fn test_stray_flux_always_weights_by_peak_distance() {
    let scene = stray_scene();
    let result = scene.run(
        &scene.templates(false, true),
        options(StrayFluxToPointSources::Always, false),
    );
    let left = result.stray[0].as_ref().unwrap();
    let right = result.stray[1].as_ref().unwrap();
    assert!((left.sum() + right.sum() - 4.0).abs() < 1e-6);

    // x = 3: r² = 4 to the left peak, 25 to the right one
    let (wl, wr) = (1.0 / 5.0, 1.0 / 26.0);
    let expected = wl / (wl + wr);
    assert!((left.value_at(3, 0).unwrap() as f64 - expected).abs() < 1e-6);
    assert!(left.value_at(3, 0) > right.value_at(3, 0));
}

#[test]
fn test_stray_flux_r_to_footprint() {
    let scene = stray_scene();
    let result = scene.run(
        &scene.templates(false, false),
        options(StrayFluxToPointSources::Necessary, true),
    );
    // x = 3: distance² 1 to the left footprint, 16 to the right one
    let (wl, wr) = (1.0 / 2.0, 1.0 / 17.0);
    let left = result.stray[0].as_ref().unwrap();
    assert!((left.value_at(3, 0).unwrap() as f64 - wl / (wl + wr)).abs() < 1e-6);
}

#[test]
fn test_stray_flux_disabled() {
    let scene = stray_scene();
    let result = scene.run(
        &scene.templates(false, false),
        StrayFluxOptions {
            assign: false,
            ..StrayFluxOptions::default()
        },
    );
    assert!(result.stray.iter().all(Option::is_none));
}
