//! Criterion benchmarks, registered from `benches/`.
//!
//! Run with: cargo bench -p deblender --features bench --bench deblend

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};

use crate::baseline::median_filter;
use crate::config::DeblendConfig;
use crate::deblend::deblend;
use crate::geom::BoxI;
use crate::image::ImageF;
use crate::psf::{CachingPsf, GaussianPsf, Psf};
use crate::testing::{gaussian_scene, threshold_footprint, two_source_blend, Lcg, Source};

/// Whole-footprint deblending.
pub fn bench_deblend(c: &mut Criterion) {
    let mut group = c.benchmark_group("deblend");
    let psf = GaussianPsf::new(1.8, 11);

    let configs = [
        ("symmetric_only", DeblendConfig::symmetric_only()),
        ("default", DeblendConfig::default()),
        (
            "ramp_lstsq",
            DeblendConfig {
                ramp_flux_at_edge: true,
                lstsq_weight_templates: true,
                ..DeblendConfig::default()
            },
        ),
    ];
    for (name, config) in &configs {
        let (mimg, foot, _) = two_source_blend(1.0, 42);
        group.bench_function(BenchmarkId::new("two_sources", name), |b| {
            b.iter_batched(
                || mimg.clone(),
                |mut m| black_box(deblend(&foot, &mut m, &psf, psf.fwhm(), config)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    for npeaks in [4usize, 16] {
        let (mimg, foot) = crowded_field(npeaks, 7);
        group.bench_function(BenchmarkId::new("crowded", npeaks), |b| {
            b.iter_batched(
                || mimg.clone(),
                |mut m| {
                    black_box(deblend(
                        &foot,
                        &mut m,
                        &psf,
                        psf.fwhm(),
                        &DeblendConfig::default(),
                    ))
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Median filter over template-sized images.
pub fn bench_median_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("median_filter");
    let mut rng = Lcg::new(3);
    for size in [32usize, 128] {
        let bbox = BoxI::from_origin(0, 0, size, size);
        let mut input = ImageF::new(bbox);
        for v in input.pixels_mut() {
            *v = rng.next_f32();
        }
        for halfsize in [1usize, 2] {
            let mut output = ImageF::new(bbox);
            group.bench_function(
                BenchmarkId::new(format!("{size}x{size}"), halfsize),
                |b| b.iter(|| median_filter(black_box(&input), &mut output, halfsize)),
            );
        }
    }
    group.finish();
}

/// PSF image realization with and without the cache.
pub fn bench_psf_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("psf");
    let psf = GaussianPsf::from_fwhm(3.0);
    group.bench_function("uncached", |b| {
        b.iter(|| black_box(psf.compute_image(black_box(50.3), 60.7)))
    });
    let cached = CachingPsf::new(&psf);
    group.bench_function("cached", |b| {
        b.iter(|| black_box(cached.compute_image(black_box(50.3), 60.7)))
    });
    group.finish();
}

/// `npeaks` sources on a grid with one footprint covering all of them.
fn crowded_field(npeaks: usize, seed: u64) -> (crate::image::MaskedImage, crate::footprint::Footprint) {
    let side = (npeaks as f64).sqrt().ceil() as usize;
    let spacing = 9.0;
    let size = (side as f64 * spacing + 16.0) as usize;
    let bbox = BoxI::from_origin(0, 0, size, size);
    let mut rng = Lcg::new(seed);

    let sources: Vec<Source> = (0..npeaks)
        .map(|i| {
            let (gx, gy) = ((i % side) as f64, (i / side) as f64);
            Source::new(
                8.0 + gx * spacing + rng.next_f32() as f64,
                8.0 + gy * spacing + rng.next_f32() as f64,
                2000.0 + 3000.0 * rng.next_f32() as f64,
                1.8 + rng.next_f32() as f64,
            )
        })
        .collect();
    let mimg = gaussian_scene(bbox, &sources, 1.0, seed);
    let foot = threshold_footprint(&mimg.image, 5.0, &sources);
    (mimg, foot)
}
