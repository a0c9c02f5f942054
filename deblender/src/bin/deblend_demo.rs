//! Demo: deblend a synthetic three-source blend.
//!
//! Renders three overlapping Gaussian sources, detects them as one footprint
//! by thresholding, deblends it and logs each child's flux.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p deblender --bin deblend-demo [config.yaml|config.json]
//! ```
//!
//! Without an argument the default `DeblendConfig` is used. Set
//! `DEBLEND_LOG_DIR` to also write rotated log files there.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use deblender::{deblend, BoxI, DeblendConfig, Footprint, GaussianPsf, MaskedImage, Peak, Psf};

const PSF_SIGMA: f64 = 1.7;
const THRESHOLD: f32 = 3.0;

/// (x, y, flux, sigma)
const SOURCES: [(f64, f64, f64, f64); 3] = [
    (30.0, 25.0, 8000.0, 1.7),
    (39.0, 27.0, 4000.0, 1.7),
    (33.0, 34.0, 6000.0, 3.0),
];

fn main() -> anyhow::Result<()> {
    match std::env::var_os("DEBLEND_LOG_DIR") {
        Some(dir) => common::log_setup::setup_logging(
            "info,deblender=debug",
            &PathBuf::from(dir),
            "deblend-demo",
        ),
        None => common::log_setup::setup_console_logging("info,deblender=debug"),
    }

    let config: DeblendConfig = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => common::load_config(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DeblendConfig::default(),
    };
    tracing::info!(?config, "Deblend configuration");

    let mut mimg = render_scene(BoxI::from_origin(0, 0, 70, 60));
    let foot = detect(&mimg);
    tracing::info!(
        "Footprint: {} pixels, {} peaks, bbox {:?}",
        foot.area(),
        foot.peaks().len(),
        foot.bbox()
    );

    let psf = GaussianPsf::new(PSF_SIGMA, 12);
    let start = Instant::now();
    let result = deblend(&foot, &mut mimg, &psf, psf.fwhm(), &config)?;
    tracing::info!("Deblended in {:.2?}", start.elapsed());

    for (pk, &(x, y, flux, _)) in result.peaks.iter().zip(SOURCES.iter()) {
        let measured = pk.flux_portion(true).map(|h| h.sum()).unwrap_or(0.0);
        tracing::info!(
            "Child {} at ({},{}): flux {:.1} (true {:.1} at {:.1},{:.1}), psf={}, skip={}",
            pk.index,
            pk.peak.ix,
            pk.peak.iy,
            measured,
            flux,
            x,
            y,
            pk.deblended_as_psf,
            pk.skip
        );
    }
    Ok(())
}

fn render_scene(bbox: BoxI) -> MaskedImage {
    let mut mimg = MaskedImage::new(bbox);
    mimg.variance.fill(1.0);
    for (px, py) in bbox.pixels() {
        let v: f64 = SOURCES
            .iter()
            .map(|&(x, y, flux, sigma)| {
                let (dx, dy) = (px as f64 - x, py as f64 - y);
                let two_s2 = 2.0 * sigma * sigma;
                flux / (std::f64::consts::PI * two_s2) * (-(dx * dx + dy * dy) / two_s2).exp()
            })
            .sum();
        mimg.image[(px, py)] = v as f32;
    }
    mimg
}

fn detect(mimg: &MaskedImage) -> Footprint {
    let image = &mimg.image;
    let mut foot = Footprint::from_pixels(
        image
            .bbox()
            .pixels()
            .filter(|&(x, y)| image[(x, y)] >= THRESHOLD),
    );
    for &(x, y, _, _) in &SOURCES {
        let (ix, iy) = (x.round() as i32, y.round() as i32);
        foot.add_peak(Peak::new(ix, iy, image[(ix, iy)]));
    }
    foot
}
