use criterion::{criterion_group, criterion_main};

fn deblend_benchmarks(c: &mut criterion::Criterion) {
    deblender::bench::bench_deblend(c);
    deblender::bench::bench_median_filter(c);
    deblender::bench::bench_psf_cache(c);
}

criterion_group!(benches, deblend_benchmarks);
criterion_main!(benches);
